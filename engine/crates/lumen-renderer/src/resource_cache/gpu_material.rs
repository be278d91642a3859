use ash::vk;
use lumen_asset::{asset_loader::MaterialData, texture_data::TextureData};
use lumen_render_interface::{
    frame_counter::FrameSlot, per_frame_data::MeshPerMaterialUniformBufferObject, ring_buffer::RingBuffer,
};
use lumen_rhi::{
    desc::{RhiBufferBarrier, RhiBufferDesc, RhiDescriptorWrite, RhiMemoryLocation},
    handles::{
        RhiBufferHandle, RhiCommandBufferHandle, RhiDescriptorPoolHandle, RhiDescriptorSetHandle,
        RhiDescriptorSetLayoutHandle,
    },
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    resource_cache::{
        descriptor_layouts::MeshDescriptorLayouts,
        gpu_texture::{GpuTexture, GpuTextureKind, MipmapSamplerCache, validate_texture},
    },
};

/// GPU 上的 material：参数 uniform buffer、5 张贴图以及对应的 descriptor set
#[derive(Debug, Clone, Copy)]
pub struct GpuMaterial {
    pub uniform_buffer: RhiBufferHandle,
    /// base color, metallic roughness, normal, occlusion, emissive
    pub textures: [GpuTexture; 5],
    pub descriptor_set: RhiDescriptorSetHandle,
}

// new & init
impl GpuMaterial {
    /// 缺失的贴图使用 1x1 的灰色贴图
    pub const FALLBACK_TEXEL: [u8; 4] = [128, 128, 128, 128];

    const TEXTURE_NAMES: [&'static str; 5] = ["base-color", "metallic-roughness", "normal", "occlusion", "emissive"];

    /// 5 张贴图补齐缺失项，只有 base color 是 sRGB
    pub fn resolve_textures(material: MaterialData) -> [TextureData; 5] {
        let fallback = |srgb: bool| TextureData::single_texel(Self::FALLBACK_TEXEL, srgb);
        [
            material.base_color.unwrap_or_else(|| fallback(true)),
            material.metallic_roughness.unwrap_or_else(|| fallback(false)),
            material.normal.unwrap_or_else(|| fallback(false)),
            material.occlusion.unwrap_or_else(|| fallback(false)),
            material.emissive.unwrap_or_else(|| fallback(false)),
        ]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upload(
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        ring: &mut RingBuffer,
        slot: FrameSlot,
        textures: &[TextureData; 5],
        uniform: &MeshPerMaterialUniformBufferObject,
        (pool, layout): (RhiDescriptorPoolHandle, RhiDescriptorSetLayoutHandle),
        samplers: &mut MipmapSamplerCache,
        name: &str,
    ) -> RenderResult<Self> {
        let _span = tracy_client::span!("GpuMaterial::upload");
        for (texture, texture_name) in textures.iter().zip(Self::TEXTURE_NAMES) {
            validate_texture(texture, &format!("{}-{}", name, texture_name))
                .map_err(|e| RenderError::Asset(anyhow::anyhow!(e)))?;
        }

        let uniform_staging = ring.push_bytes(rhi, slot, bytemuck::bytes_of(uniform))?;
        let mut texture_staging = Vec::with_capacity(textures.len());
        for texture in textures {
            texture_staging.push(ring.push_bytes(rhi, slot, &texture.pixels)?);
        }

        let uniform_buffer = rhi.create_buffer(
            &RhiBufferDesc::new(
                uniform_staging.size,
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                RhiMemoryLocation::GpuOnly,
            ),
            &format!("{}-uniform", name),
        )?;
        rhi.cmd_copy_buffer(
            cmd,
            uniform_staging.buffer,
            uniform_buffer,
            &[vk::BufferCopy::default().src_offset(uniform_staging.offset).dst_offset(0).size(uniform_staging.size)],
        );
        rhi.cmd_pipeline_barrier(
            cmd,
            &[],
            &[RhiBufferBarrier::after_upload(
                uniform_buffer,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::UNIFORM_READ,
            )],
        );

        let mut gpu_textures = Vec::with_capacity(textures.len());
        for ((texture, staging), texture_name) in textures.iter().zip(&texture_staging).zip(Self::TEXTURE_NAMES) {
            gpu_textures.push(GpuTexture::record_upload(
                rhi,
                cmd,
                (staging.buffer, staging.offset),
                texture,
                GpuTextureKind::Texture2D,
                true,
                &format!("{}-{}", name, texture_name),
            )?);
        }
        let textures: [GpuTexture; 5] = array_from_vec(gpu_textures);

        let max_anisotropy = rhi.limits().max_sampler_anisotropy;
        let descriptor_set = rhi.allocate_descriptor_set(pool, layout, name)?;
        let mut writes = vec![RhiDescriptorWrite::buffer(
            MeshDescriptorLayouts::PER_MATERIAL_BINDING_UNIFORM,
            vk::DescriptorType::UNIFORM_BUFFER,
            uniform_buffer,
            0,
            uniform_staging.size,
        )];
        for (binding, texture) in MeshDescriptorLayouts::PER_MATERIAL_BINDING_TEXTURES.iter().zip(&textures) {
            let sampler = samplers.get_or_create(rhi, texture.mip_levels, max_anisotropy)?;
            writes.push(RhiDescriptorWrite::sampled_image(*binding, texture.view, sampler));
        }
        rhi.update_descriptor_set(descriptor_set, &writes)?;

        Ok(Self {
            uniform_buffer,
            textures,
            descriptor_set,
        })
    }
}

// destroy
impl GpuMaterial {
    pub fn destroy(self, rhi: &mut dyn Rhi) {
        rhi.destroy_buffer(self.uniform_buffer);
        for texture in self.textures {
            texture.destroy(rhi);
        }
    }
}

fn array_from_vec(textures: Vec<GpuTexture>) -> [GpuTexture; 5] {
    array_init::from_iter(textures).unwrap_or_else(|| unreachable!("material always has 5 textures"))
}
