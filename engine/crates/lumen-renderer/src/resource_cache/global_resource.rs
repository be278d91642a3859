use ash::vk;
use lumen_asset::{
    asset_loader::AssetLoader,
    source_desc::{CubeMapDesc, LevelResourceDesc},
    texture_data::{TextureData, combine_cube_faces},
};
use lumen_render_interface::deferred_destroy::{DeferredDestroyQueue, DeferredResource};
use lumen_rhi::{
    desc::{RhiBufferDesc, RhiSamplerDesc},
    handles::{RhiBufferHandle, RhiSamplerHandle},
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    resource_cache::gpu_texture::{GpuTexture, GpuTextureKind, validate_texture},
};

/// 颜色分级 LUT 的尺寸：16 个 16x16 的切片横向排列
pub const COLOR_GRADING_LUT_SLICE: u32 = 16;

/// 关卡级别的全局渲染资源：IBL 的两个 cube map、BRDF LUT、颜色分级 LUT
pub struct GlobalRenderResource {
    pub irradiance: GpuTexture,
    pub specular: GpuTexture,
    pub brdf_lut: GpuTexture,
    pub color_grading_lut: GpuTexture,

    pub irradiance_sampler: RhiSamplerHandle,
    pub specular_sampler: RhiSamplerHandle,
    pub brdf_lut_sampler: RhiSamplerHandle,
    pub color_grading_lut_sampler: RhiSamplerHandle,
}

/// CPU 端已经解码完成的全局资源
struct GlobalTextureSet {
    irradiance: TextureData,
    specular: TextureData,
    brdf_lut: TextureData,
    color_grading_lut: TextureData,
}

// new & init
impl GlobalRenderResource {
    /// 读取并上传全局资源
    ///
    /// 描述为空的资源使用内置的默认值，读取失败则整体失败，不会创建任何 GPU 对象
    pub fn load(rhi: &mut dyn Rhi, loader: &mut dyn AssetLoader, desc: &LevelResourceDesc) -> RenderResult<Self> {
        let _span = tracy_client::span!("GlobalRenderResource::load");
        let textures = Self::load_textures(loader, desc)?;
        for (texture, name) in [
            (&textures.irradiance, "irradiance"),
            (&textures.specular, "specular"),
            (&textures.brdf_lut, "brdf-lut"),
            (&textures.color_grading_lut, "color-grading-lut"),
        ] {
            validate_texture(texture, name).map_err(|e| RenderError::Asset(anyhow::anyhow!(e)))?;
        }

        let mut created: Vec<GpuTexture> = Vec::with_capacity(4);
        let result = Self::upload_textures(rhi, &textures, &mut created);
        if let Err(e) = result {
            for texture in created {
                texture.destroy(rhi);
            }
            return Err(e);
        }
        let [irradiance, specular, brdf_lut, color_grading_lut]: [GpuTexture; 4] = array_init::from_iter(created)
            .ok_or_else(|| RenderError::PassState("global texture count mismatch".to_string()))?;

        let irradiance_sampler = rhi.create_sampler(
            &RhiSamplerDesc {
                max_lod: irradiance.mip_levels as f32,
                ..RhiSamplerDesc::linear_clamp()
            },
            "irradiance",
        )?;
        let specular_sampler = rhi.create_sampler(
            &RhiSamplerDesc {
                max_lod: specular.mip_levels as f32,
                ..RhiSamplerDesc::linear_clamp()
            },
            "specular",
        )?;
        let brdf_lut_sampler = rhi.create_sampler(&RhiSamplerDesc::linear_clamp(), "brdf-lut")?;
        let color_grading_lut_sampler = rhi.create_sampler(&RhiSamplerDesc::linear_clamp(), "color-grading-lut")?;

        log::info!(
            "global render resource loaded: specular {} mips, color grading {}x{}",
            specular.mip_levels,
            textures.color_grading_lut.width,
            textures.color_grading_lut.height
        );

        Ok(Self {
            irradiance,
            specular,
            brdf_lut,
            color_grading_lut,
            irradiance_sampler,
            specular_sampler,
            brdf_lut_sampler,
            color_grading_lut_sampler,
        })
    }

    fn load_textures(loader: &mut dyn AssetLoader, desc: &LevelResourceDesc) -> RenderResult<GlobalTextureSet> {
        let ibl = &desc.ibl_resource_desc;
        let irradiance = Self::load_cube(loader, &ibl.skybox_irradiance_map, "irradiance")?;
        let specular = Self::load_cube(loader, &ibl.skybox_specular_map, "specular")?;
        let brdf_lut = loader
            .load_texture(&ibl.brdf_map, false)
            .map_err(RenderError::Asset)?
            .unwrap_or_else(|| TextureData::single_texel([255, 0, 0, 255], false));
        let color_grading_lut = loader
            .load_texture(&desc.color_grading_resource_desc.color_grading_map, false)
            .map_err(RenderError::Asset)?
            .unwrap_or_else(identity_color_grading_lut);

        Ok(GlobalTextureSet {
            irradiance,
            specular,
            brdf_lut,
            color_grading_lut,
        })
    }

    /// 6 个面都为空时使用黑色的 1x1 cube；只缺少部分面视为错误
    fn load_cube(loader: &mut dyn AssetLoader, desc: &CubeMapDesc, name: &str) -> RenderResult<TextureData> {
        let mut faces = Vec::with_capacity(6);
        for file in desc.faces_in_upload_order() {
            faces.push(loader.load_texture_hdr(file).map_err(RenderError::Asset)?);
        }

        let loaded = faces.iter().filter(|f| f.is_some()).count();
        let faces: Vec<TextureData> = match loaded {
            0 => (0..6).map(|_| TextureData::new_rgba32f(1, 1, &[0.0, 0.0, 0.0, 1.0])).collect(),
            6 => faces.into_iter().flatten().collect(),
            _ => {
                return Err(RenderError::Asset(anyhow::anyhow!(
                    "cube map <{}> only has {} of 6 faces",
                    name,
                    loaded
                )));
            }
        };
        let faces = <[TextureData; 6]>::try_from(faces)
            .map_err(|_| RenderError::Asset(anyhow::anyhow!("cube map <{}> needs 6 faces", name)))?;
        combine_cube_faces(faces)
            .ok_or_else(|| RenderError::Asset(anyhow::anyhow!("cube map <{}> faces differ in size or format", name)))
    }

    /// 每张贴图使用独立的 stage buffer，在一次 single time command 中完成上传
    fn upload_textures(
        rhi: &mut dyn Rhi,
        textures: &GlobalTextureSet,
        created: &mut Vec<GpuTexture>,
    ) -> RenderResult<()> {
        let items = [
            (&textures.irradiance, GpuTextureKind::Cube, true, "irradiance"),
            (&textures.specular, GpuTextureKind::Cube, true, "specular"),
            (&textures.brdf_lut, GpuTextureKind::Texture2D, false, "brdf-lut"),
            (&textures.color_grading_lut, GpuTextureKind::Texture2D, false, "color-grading-lut"),
        ];

        let mut stage_buffers: Vec<RhiBufferHandle> = Vec::with_capacity(items.len());
        let result = (|| -> RenderResult<()> {
            for (texture, _, _, name) in &items {
                let buffer = rhi.create_buffer(
                    &RhiBufferDesc::new_stage_buffer(texture.pixels.len() as vk::DeviceSize),
                    &format!("{}-stage", name),
                )?;
                stage_buffers.push(buffer);
                rhi.write_buffer(buffer, 0, &texture.pixels)?;
            }

            let cmd = rhi.begin_single_time_commands()?;
            for ((texture, kind, mips, name), buffer) in items.iter().zip(&stage_buffers) {
                created.push(GpuTexture::record_upload(rhi, cmd, (*buffer, 0), texture, *kind, *mips, name)?);
            }
            rhi.end_single_time_commands(cmd)?;
            Ok(())
        })();

        for buffer in stage_buffers {
            rhi.destroy_buffer(buffer);
        }
        result
    }
}

// destroy
impl GlobalRenderResource {
    pub fn destroy(self, rhi: &mut dyn Rhi) {
        for texture in [self.irradiance, self.specular, self.brdf_lut, self.color_grading_lut] {
            texture.destroy(rhi);
        }
        for sampler in [
            self.irradiance_sampler,
            self.specular_sampler,
            self.brdf_lut_sampler,
            self.color_grading_lut_sampler,
        ] {
            rhi.destroy_sampler(sampler);
        }
    }

    /// 旧的资源可能仍在被 in flight 的帧使用
    pub fn defer_destroy(self, queue: &mut DeferredDestroyQueue, frame_id: u64) {
        for texture in [self.irradiance, self.specular, self.brdf_lut, self.color_grading_lut] {
            texture.defer_destroy(queue, frame_id);
        }
        for sampler in [
            self.irradiance_sampler,
            self.specular_sampler,
            self.brdf_lut_sampler,
            self.color_grading_lut_sampler,
        ] {
            queue.push(DeferredResource::Sampler(sampler), frame_id);
        }
    }
}

/// 不改变颜色的 LUT：x 方向上依次是 16 个 blue 切片，切片内 x 为 red，y 为 green
pub fn identity_color_grading_lut() -> TextureData {
    let n = COLOR_GRADING_LUT_SLICE;
    let (width, height) = (n * n, n);
    let scale = |v: u32| (v * 255 / (n - 1)) as u8;

    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[scale(x % n), scale(y), scale(x / n), 255]);
        }
    }
    TextureData::new_rgba8(width, height, false, pixels)
}

#[cfg(test)]
mod tests {
    use lumen_asset::memory_loader::MemoryAssetLoader;
    use lumen_rhi::headless::HeadlessRhi;

    use super::*;

    #[test]
    fn test_identity_lut() {
        let lut = identity_color_grading_lut();
        assert_eq!((lut.width, lut.height), (256, 16));
        assert!(lut.is_consistent());

        let texel = |x: u32, y: u32| {
            let i = ((y * lut.width + x) * 4) as usize;
            lut.pixels[i..i + 4].to_vec()
        };
        assert_eq!(texel(0, 0), vec![0, 0, 0, 255]);
        assert_eq!(texel(15, 0), vec![255, 0, 0, 255]);
        assert_eq!(texel(255, 15), vec![255, 255, 255, 255]);
        assert_eq!(texel(16, 0), vec![0, 0, 17, 255]);
    }

    #[test]
    fn test_default_resources() {
        let mut rhi = HeadlessRhi::new();
        let mut loader = MemoryAssetLoader::new();
        let resource = GlobalRenderResource::load(&mut rhi, &mut loader, &LevelResourceDesc::default()).unwrap();

        assert_eq!(resource.irradiance.mip_levels, 1);
        assert_eq!(resource.color_grading_lut.mip_levels, 1);
        assert_eq!(rhi.read_texel(resource.brdf_lut.image, 0, 0, 0), Some(vec![255, 0, 0, 255]));
        // stage buffer 已经释放
        assert_eq!(rhi.live_buffer_count(), 0);
        assert!(rhi.validation_messages().is_empty());

        resource.destroy(&mut rhi);
        assert_eq!(rhi.live_image_count(), 0);
    }

    #[test]
    fn test_partial_cube_is_error() {
        let mut rhi = HeadlessRhi::new();
        let mut loader = MemoryAssetLoader::new();
        loader.insert_texture("px.hdr", TextureData::new_rgba32f(1, 1, &[1.0, 1.0, 1.0, 1.0]));

        let mut desc = LevelResourceDesc::default();
        desc.ibl_resource_desc.skybox_irradiance_map.positive_x_map = "px.hdr".to_string();
        let result = GlobalRenderResource::load(&mut rhi, &mut loader, &desc);
        assert!(matches!(result, Err(RenderError::Asset(_))));
        assert_eq!(rhi.live_object_count(), 0);
    }
}
