use ash::vk;
use lumen_asset::texture_data::TextureData;
use lumen_render_interface::deferred_destroy::{DeferredDestroyQueue, DeferredResource};
use lumen_rhi::{
    desc::{RhiBufferImageCopy, RhiImageBarrier, RhiImageDesc, RhiImageViewDesc},
    error::RhiResult,
    handles::{RhiBufferHandle, RhiCommandBufferHandle, RhiImageHandle, RhiImageViewHandle},
    rhi::Rhi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTextureKind {
    Texture2D,
    /// 6 个面依次排列在 array layer 中
    Cube,
}

/// 上传完成后只读的贴图
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub image: RhiImageHandle,
    pub view: RhiImageViewHandle,
    pub mip_levels: u32,
}

// new & init
impl GpuTexture {
    /// 在 cmd 中录制从 buffer 到贴图的上传
    ///
    /// 录制顺序：UNDEFINED -> TRANSFER_DST，copy，然后生成 mipmap 或者直接转换到 SHADER_READ_ONLY
    pub fn record_upload(
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        (src_buffer, src_offset): (RhiBufferHandle, vk::DeviceSize),
        texture: &TextureData,
        kind: GpuTextureKind,
        generate_mips: bool,
        name: &str,
    ) -> RhiResult<Self> {
        let mip_levels = if generate_mips { texture.full_mip_levels() } else { 1 };
        let usage =
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC;
        let (image_desc, view_desc) = match kind {
            GpuTextureKind::Texture2D => (
                RhiImageDesc::new_2d(texture.extent(), texture.format, usage).mip_levels(mip_levels),
                RhiImageViewDesc::new_2d(texture.format, vk::ImageAspectFlags::COLOR).level_count(mip_levels),
            ),
            GpuTextureKind::Cube => (
                RhiImageDesc::new_cube(texture.extent(), texture.format, usage, mip_levels),
                RhiImageViewDesc::new_cube(texture.format, mip_levels),
            ),
        };

        let image = rhi.create_image(&image_desc, name)?;
        let view = match rhi.create_image_view(image, &view_desc, name) {
            Ok(view) => view,
            Err(e) => {
                rhi.destroy_image(image);
                return Err(e);
            }
        };

        rhi.cmd_pipeline_barrier(
            cmd,
            &[RhiImageBarrier::new()
                .image(image)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)],
            &[],
        );
        rhi.cmd_copy_buffer_to_image(
            cmd,
            src_buffer,
            image,
            &[RhiBufferImageCopy::whole_layers(texture.extent(), 0, texture.array_layers).buffer_offset(src_offset)],
        );

        if mip_levels > 1 {
            rhi.cmd_generate_mipmaps(cmd, image);
        } else {
            rhi.cmd_pipeline_barrier(
                cmd,
                &[RhiImageBarrier::new()
                    .image(image)
                    .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                    .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ)],
                &[],
            );
        }

        Ok(Self {
            image,
            view,
            mip_levels,
        })
    }
}

// destroy
impl GpuTexture {
    pub fn destroy(self, rhi: &mut dyn Rhi) {
        rhi.destroy_image_view(self.view);
        rhi.destroy_image(self.image);
    }

    /// 可能仍在被 in-flight 的帧使用
    pub fn defer_destroy(self, queue: &mut DeferredDestroyQueue, frame_id: u64) {
        queue.push(DeferredResource::ImageView(self.view), frame_id);
        queue.push(DeferredResource::Image(self.image), frame_id);
    }
}

/// 上传前检查贴图数据，避免创建出与数据不符的 image
pub fn validate_texture(texture: &TextureData, name: &str) -> Result<(), String> {
    if lumen_rhi::format::format_texel_size(texture.format).is_none() {
        return Err(format!("texture <{}> uses unsupported format {:?}", name, texture.format));
    }
    if !texture.is_consistent() {
        return Err(format!(
            "texture <{}> has {} bytes, expect {}x{}x{} texels",
            name,
            texture.pixels.len(),
            texture.width,
            texture.height,
            texture.array_layers
        ));
    }
    Ok(())
}

/// 按 mip 层数复用的 sampler
#[derive(Default)]
pub struct MipmapSamplerCache {
    samplers: std::collections::HashMap<u32, lumen_rhi::handles::RhiSamplerHandle>,
}

impl MipmapSamplerCache {
    pub fn get_or_create(
        &mut self,
        rhi: &mut dyn Rhi,
        mip_levels: u32,
        max_anisotropy: f32,
    ) -> RhiResult<lumen_rhi::handles::RhiSamplerHandle> {
        if let Some(sampler) = self.samplers.get(&mip_levels) {
            return Ok(*sampler);
        }
        let desc = lumen_rhi::desc::RhiSamplerDesc::mipmap_repeat(mip_levels as f32, max_anisotropy);
        let sampler = rhi.create_sampler(&desc, &format!("mipmap-sampler-{}", mip_levels))?;
        self.samplers.insert(mip_levels, sampler);
        Ok(sampler)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    pub fn destroy(&mut self, rhi: &mut dyn Rhi) {
        for (_, sampler) in self.samplers.drain() {
            rhi.destroy_sampler(sampler);
        }
    }
}
