//! 渲染资源缓存
//!
//! 按资源描述符去重的 GPU 上传：同一个描述符只会读取、上传一次，之后返回同一个 GUID。
//! 所有的上传数据都先写入 ring buffer 中当前帧的区域。

pub mod descriptor_layouts;
pub mod global_resource;
pub mod gpu_material;
pub mod gpu_mesh;
pub mod gpu_texture;
pub mod per_frame;

use std::collections::HashMap;

use ash::vk;
use lumen_asset::{
    asset_loader::AssetLoader,
    mesh_data::MeshVertexBinding,
    source_desc::{LevelResourceDesc, MaterialSourceDesc, MeshSourceDesc},
};
use lumen_render_interface::{
    bounding_box::AxisAlignedBox,
    deferred_destroy::DeferredDestroyQueue,
    frame_counter::{FrameCounter, FrameSlot},
    guid_allocator::GuidAllocator,
    per_frame_data::MeshPerMaterialUniformBufferObject,
    render_settings::{ConfigError, RenderConfig},
    ring_buffer::RingBuffer,
};
use lumen_rhi::{
    desc::{RhiBufferDesc, RhiDescriptorPoolDesc, RhiDescriptorWrite, RhiLimits, RhiMemoryLocation},
    handles::{RhiBufferHandle, RhiCommandBufferHandle, RhiDescriptorPoolHandle, RhiDescriptorSetHandle},
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    resource_cache::{
        descriptor_layouts::MeshDescriptorLayouts,
        global_resource::GlobalRenderResource,
        gpu_material::GpuMaterial,
        gpu_mesh::{GpuMesh, MeshDescriptorTarget},
        gpu_texture::MipmapSamplerCache,
        per_frame::{INSTANCE_BLOCK_RANGE, JOINT_MATRICES_RANGE, PER_FRAME_BLOCK_RANGE, PerFrameData},
    },
};

pub struct RenderResourceCache {
    ring_buffer: RingBuffer,
    deferred_destroy: DeferredDestroyQueue,
    asset_loader: Box<dyn AssetLoader>,

    descriptor_pool: RhiDescriptorPoolHandle,
    layouts: MeshDescriptorLayouts,
    /// 所有 mesh pass 共用，dynamic offset 指向本帧写入 ring buffer 的位置
    per_frame_set: RhiDescriptorSetHandle,
    /// 非蒙皮 mesh 的 per-mesh set 绑定的空数据
    default_joint_binding_buffer: RhiBufferHandle,

    mesh_guid_allocator: GuidAllocator<MeshSourceDesc>,
    material_guid_allocator: GuidAllocator<MaterialSourceDesc>,
    meshes: HashMap<usize, GpuMesh>,
    materials: HashMap<usize, GpuMaterial>,
    samplers: MipmapSamplerCache,

    global_resource: Option<GlobalRenderResource>,
    /// 每次替换全局资源时加一，pass 据此判断是否需要重写 descriptor set
    global_resource_version: u64,

    pub per_frame_data: PerFrameData,
    limits: RhiLimits,
}

// new & init
impl RenderResourceCache {
    pub fn new(rhi: &mut dyn Rhi, config: &RenderConfig, asset_loader: Box<dyn AssetLoader>) -> RenderResult<Self> {
        let _span = tracy_client::span!("RenderResourceCache::new");
        config.validate()?;
        // dynamic offset 是 u32，且一个 slot 至少要能放下一次骨骼矩阵
        if config.ring_buffer_size > u32::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "ring_buffer_size {} exceeds the dynamic offset range",
                config.ring_buffer_size
            ))
            .into());
        }
        if config.ring_buffer_size / (config.max_frames_in_flight as u64) < JOINT_MATRICES_RANGE {
            return Err(ConfigError::Invalid(format!(
                "ring buffer slot must hold at least {} bytes of joint matrices",
                JOINT_MATRICES_RANGE
            ))
            .into());
        }

        let limits = rhi.limits();
        let alignment = limits
            .min_uniform_buffer_offset_alignment
            .max(limits.min_storage_buffer_offset_alignment);
        let ring_buffer = RingBuffer::new(rhi, config.ring_buffer_size, config.max_frames_in_flight, alignment)?;

        let descriptor_pool = rhi.create_descriptor_pool(
            &RhiDescriptorPoolDesc {
                max_sets: config.descriptor_pool.max_sets,
                pool_sizes: config.descriptor_pool.pool_sizes(),
            },
            "render-resource",
        )?;
        let layouts = MeshDescriptorLayouts::new(rhi)?;

        let per_frame_set = rhi.allocate_descriptor_set(descriptor_pool, layouts.per_frame, "mesh-per-frame")?;
        let ring = ring_buffer.buffer();
        rhi.update_descriptor_set(
            per_frame_set,
            &[
                RhiDescriptorWrite::buffer(
                    MeshDescriptorLayouts::PER_FRAME_BINDING_FRAME_DATA,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    ring,
                    0,
                    PER_FRAME_BLOCK_RANGE,
                ),
                RhiDescriptorWrite::buffer(
                    MeshDescriptorLayouts::PER_FRAME_BINDING_INSTANCES,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    ring,
                    0,
                    INSTANCE_BLOCK_RANGE,
                ),
                RhiDescriptorWrite::buffer(
                    MeshDescriptorLayouts::PER_FRAME_BINDING_JOINT_MATRICES,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    ring,
                    0,
                    JOINT_MATRICES_RANGE,
                ),
            ],
        )?;

        let default_joint_binding_buffer = rhi.create_buffer(
            &RhiBufferDesc::new(
                size_of::<MeshVertexBinding>() as vk::DeviceSize,
                vk::BufferUsageFlags::STORAGE_BUFFER,
                RhiMemoryLocation::CpuToGpu,
            ),
            "default-joint-binding",
        )?;
        rhi.write_buffer(
            default_joint_binding_buffer,
            0,
            bytemuck::bytes_of(&MeshVertexBinding::default()),
        )?;

        let mut cache = Self {
            ring_buffer,
            deferred_destroy: DeferredDestroyQueue::new(),
            asset_loader,
            descriptor_pool,
            layouts,
            per_frame_set,
            default_joint_binding_buffer,
            mesh_guid_allocator: GuidAllocator::default(),
            material_guid_allocator: GuidAllocator::default(),
            meshes: HashMap::new(),
            materials: HashMap::new(),
            samplers: MipmapSamplerCache::default(),
            global_resource: None,
            global_resource_version: 0,
            per_frame_data: PerFrameData::default(),
            limits,
        };

        // 关卡加载之前 pass 就需要绑定全局资源，先使用内置的默认值
        let global = GlobalRenderResource::load(rhi, cache.asset_loader.as_mut(), &LevelResourceDesc::default())?;
        cache.global_resource = Some(global);
        cache.global_resource_version = 1;

        log::info!(
            "render resource cache created: ring buffer {} bytes, {} frames in flight, loader <{}>",
            config.ring_buffer_size,
            config.max_frames_in_flight,
            cache.asset_loader.name()
        );
        Ok(cache)
    }
}

// getters
impl RenderResourceCache {
    #[inline]
    pub fn mesh(&self, mesh_id: usize) -> Option<&GpuMesh> {
        self.meshes.get(&mesh_id)
    }

    #[inline]
    pub fn material(&self, material_id: usize) -> Option<&GpuMaterial> {
        self.materials.get(&material_id)
    }

    /// 未上传的 mesh 返回空包围盒
    pub fn get_cached_bounding_box(&self, mesh_id: usize) -> AxisAlignedBox {
        self.meshes.get(&mesh_id).map(|mesh| mesh.bounding_box).unwrap_or_default()
    }

    #[inline]
    pub fn mesh_guid_allocator(&self) -> &GuidAllocator<MeshSourceDesc> {
        &self.mesh_guid_allocator
    }

    #[inline]
    pub fn material_guid_allocator(&self) -> &GuidAllocator<MaterialSourceDesc> {
        &self.material_guid_allocator
    }

    #[inline]
    pub fn global_resource(&self) -> Option<&GlobalRenderResource> {
        self.global_resource.as_ref()
    }

    #[inline]
    pub fn global_resource_version(&self) -> u64 {
        self.global_resource_version
    }

    #[inline]
    pub fn layouts(&self) -> &MeshDescriptorLayouts {
        &self.layouts
    }

    #[inline]
    pub fn per_frame_set(&self) -> RhiDescriptorSetHandle {
        self.per_frame_set
    }

    #[inline]
    pub fn descriptor_pool(&self) -> RhiDescriptorPoolHandle {
        self.descriptor_pool
    }

    #[inline]
    pub fn ring_buffer(&self) -> &RingBuffer {
        &self.ring_buffer
    }

    #[inline]
    pub fn limits(&self) -> &RhiLimits {
        &self.limits
    }
}

// update
impl RenderResourceCache {
    /// 帧开始时调用，此时 slot 的 fence 已经等待完成
    pub fn begin_frame(&mut self, rhi: &mut dyn Rhi, frame_counter: &FrameCounter) {
        let _span = tracy_client::span!("RenderResourceCache::begin_frame");
        self.ring_buffer.reset_slot(frame_counter.frame_slot());
        self.deferred_destroy.cleanup(rhi, frame_counter.frame_id(), frame_counter.fif_count());
    }

    /// 只在 slot 的 fence 已经 signal 时调用
    #[inline]
    pub fn reset_ring_slot(&mut self, slot: FrameSlot) {
        self.ring_buffer.reset_slot(slot);
    }

    /// 已经上传过的 mesh 直接返回 GUID，不会读取资源也不会调用 RHI
    pub fn get_or_create_mesh(
        &mut self,
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        slot: FrameSlot,
        desc: &MeshSourceDesc,
    ) -> RenderResult<usize> {
        if let Some(guid) = self.mesh_guid_allocator.get_element_guid(desc) {
            return Ok(guid);
        }
        let _span = tracy_client::span!("RenderResourceCache::get_or_create_mesh");

        let mesh_data = self.asset_loader.load_mesh_data(desc).map_err(RenderError::Asset)?;
        let gpu_mesh = GpuMesh::upload(
            rhi,
            cmd,
            &mut self.ring_buffer,
            slot,
            &mesh_data,
            &MeshDescriptorTarget {
                pool: self.descriptor_pool,
                layout: self.layouts.per_mesh,
                default_joint_binding_buffer: self.default_joint_binding_buffer,
            },
            &desc.mesh_file,
        )?;

        let guid = self.mesh_guid_allocator.alloc_guid(desc);
        self.meshes.insert(guid, gpu_mesh);
        log::debug!(
            "mesh <{}> uploaded as {}: {} vertices, {} indices",
            desc.mesh_file,
            guid,
            gpu_mesh.vertex_count,
            gpu_mesh.index_count
        );
        Ok(guid)
    }

    /// 缺失的贴图使用默认贴图
    pub fn get_or_create_material(
        &mut self,
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        slot: FrameSlot,
        desc: &MaterialSourceDesc,
    ) -> RenderResult<usize> {
        if let Some(guid) = self.material_guid_allocator.get_element_guid(desc) {
            return Ok(guid);
        }
        let _span = tracy_client::span!("RenderResourceCache::get_or_create_material");

        let material_data = self.asset_loader.load_material_data(desc).map_err(RenderError::Asset)?;
        let textures = GpuMaterial::resolve_textures(material_data);
        let name = if desc.base_color_file.is_empty() { "material-default" } else { desc.base_color_file.as_str() };
        let gpu_material = GpuMaterial::upload(
            rhi,
            cmd,
            &mut self.ring_buffer,
            slot,
            &textures,
            &MeshPerMaterialUniformBufferObject::default(),
            (self.descriptor_pool, self.layouts.per_material),
            &mut self.samplers,
            name,
        )?;

        let guid = self.material_guid_allocator.alloc_guid(desc);
        self.materials.insert(guid, gpu_material);
        log::debug!("material <{}> uploaded as {}", name, guid);
        Ok(guid)
    }

    /// 替换全局资源，旧的资源延迟到不再被使用时销毁
    ///
    /// 读取失败时保留原来的资源
    pub fn upload_global_render_resource(
        &mut self,
        rhi: &mut dyn Rhi,
        desc: &LevelResourceDesc,
        frame_id: u64,
    ) -> RenderResult<()> {
        let _span = tracy_client::span!("RenderResourceCache::upload_global_render_resource");
        let resource = GlobalRenderResource::load(rhi, self.asset_loader.as_mut(), desc)?;
        if let Some(old) = self.global_resource.replace(resource) {
            old.defer_destroy(&mut self.deferred_destroy, frame_id);
        }
        self.global_resource_version += 1;
        Ok(())
    }

    /// 将数据写入 ring buffer，返回用于 dynamic descriptor 的偏移
    ///
    /// 至少占用 `range` 字节，保证 descriptor 的绑定范围不会越过本次分配
    pub fn push_dynamic(
        &mut self,
        rhi: &mut dyn Rhi,
        slot: FrameSlot,
        bytes: &[u8],
        range: vk::DeviceSize,
    ) -> RenderResult<u32> {
        let size = range.max(bytes.len() as vk::DeviceSize);
        let allocation = self.ring_buffer.allocate(slot, size)?;
        rhi.write_buffer(allocation.buffer, allocation.offset, bytes)?;
        Ok(allocation.offset as u32)
    }
}

// destroy
impl RenderResourceCache {
    /// 调用前需要 device idle
    pub fn destroy(mut self, rhi: &mut dyn Rhi) {
        let _span = tracy_client::span!("RenderResourceCache::destroy");
        self.deferred_destroy.flush(rhi);

        for (_, mesh) in self.meshes.drain() {
            mesh.destroy(rhi);
        }
        for (_, material) in self.materials.drain() {
            material.destroy(rhi);
        }
        self.samplers.destroy(rhi);
        if let Some(global) = self.global_resource.take() {
            global.destroy(rhi);
        }

        rhi.destroy_buffer(self.default_joint_binding_buffer);
        rhi.destroy_descriptor_pool(self.descriptor_pool);
        self.layouts.destroy(rhi);
        self.ring_buffer.destroy(rhi);
        log::info!("render resource cache destroyed");
    }
}

#[cfg(test)]
mod tests {
    use lumen_asset::{mesh_data::MeshData, memory_loader::MemoryAssetLoader, texture_data::TextureData};
    use lumen_rhi::{error::RhiError, headless::HeadlessRhi};

    use super::*;

    fn test_config() -> RenderConfig {
        RenderConfig {
            max_frames_in_flight: 2,
            ring_buffer_size: 2 * 256 * 1024,
            ..Default::default()
        }
    }

    fn cube_desc() -> MeshSourceDesc {
        MeshSourceDesc {
            mesh_file: "cube.obj".to_string(),
        }
    }

    #[test]
    fn test_mesh_is_uploaded_once() {
        let mut rhi = HeadlessRhi::new();
        let loader = MemoryAssetLoader::new().with_mesh("cube.obj", MeshData::cube());
        let counter = loader.counter();
        let mut cache = RenderResourceCache::new(&mut rhi, &test_config(), Box::new(loader)).unwrap();

        let slot = FrameSlot::from_usize(0);
        let cmd = rhi.begin_single_time_commands().unwrap();
        let a = cache.get_or_create_mesh(&mut rhi, cmd, slot, &cube_desc()).unwrap();
        let buffers = rhi.live_buffer_count();
        let b = cache.get_or_create_mesh(&mut rhi, cmd, slot, &cube_desc()).unwrap();
        rhi.end_single_time_commands(cmd).unwrap();

        assert_eq!(a, b);
        assert_eq!(counter.mesh_load_count("cube.obj"), 1);
        assert_eq!(rhi.live_buffer_count(), buffers);
        let mesh = cache.mesh(a).unwrap();
        assert_eq!(mesh.index_count, MeshData::cube().indices.len() as u32);
        assert!(!mesh.is_skinned());
        assert_eq!(cache.get_cached_bounding_box(a), MeshData::cube().bounding_box());
        assert!(cache.get_cached_bounding_box(a + 1).is_empty());
        assert!(rhi.validation_messages().is_empty());

        cache.destroy(&mut rhi);
        assert_eq!(rhi.live_buffer_count(), 0);
        assert_eq!(rhi.live_image_count(), 0);
    }

    #[test]
    fn test_failed_mesh_upload_releases_buffers() {
        let mut rhi = HeadlessRhi::new();
        let loader = MemoryAssetLoader::new().with_mesh("cube.obj", MeshData::cube());
        let mut cache = RenderResourceCache::new(&mut rhi, &test_config(), Box::new(loader)).unwrap();

        let slot = FrameSlot::from_usize(0);
        let cmd = rhi.begin_single_time_commands().unwrap();
        let buffers = rhi.live_buffer_count();
        // vertex buffer 创建成功，index buffer 创建失败
        rhi.inject_create_fault(1);
        let result = cache.get_or_create_mesh(&mut rhi, cmd, slot, &cube_desc());
        assert!(matches!(result, Err(RenderError::Rhi(RhiError::OutOfMemory(_)))));
        assert_eq!(rhi.live_buffer_count(), buffers);
        assert!(cache.mesh_guid_allocator().is_empty());

        let guid = cache.get_or_create_mesh(&mut rhi, cmd, slot, &cube_desc()).unwrap();
        assert_eq!(rhi.live_buffer_count(), buffers + 2);
        rhi.end_single_time_commands(cmd).unwrap();
        assert!(cache.mesh(guid).is_some());

        cache.destroy(&mut rhi);
        assert_eq!(rhi.live_buffer_count(), 0);
    }

    #[test]
    fn test_missing_mesh_is_asset_error() {
        let mut rhi = HeadlessRhi::new();
        let mut cache = RenderResourceCache::new(&mut rhi, &test_config(), Box::new(MemoryAssetLoader::new())).unwrap();

        let cmd = rhi.begin_single_time_commands().unwrap();
        let result = cache.get_or_create_mesh(&mut rhi, cmd, FrameSlot::from_usize(0), &cube_desc());
        rhi.end_single_time_commands(cmd).unwrap();

        assert!(matches!(result, Err(RenderError::Asset(_))));
        assert!(cache.mesh_guid_allocator().is_empty());
        cache.destroy(&mut rhi);
    }

    #[test]
    fn test_default_material_uses_fallback_textures() {
        let mut rhi = HeadlessRhi::new();
        let mut cache = RenderResourceCache::new(&mut rhi, &test_config(), Box::new(MemoryAssetLoader::new())).unwrap();

        let cmd = rhi.begin_single_time_commands().unwrap();
        let id = cache
            .get_or_create_material(&mut rhi, cmd, FrameSlot::from_usize(0), &MaterialSourceDesc::default())
            .unwrap();
        rhi.end_single_time_commands(cmd).unwrap();

        let material = *cache.material(id).unwrap();
        assert_eq!(rhi.read_texel(material.textures[0].image, 0, 0, 0), Some(GpuMaterial::FALLBACK_TEXEL.to_vec()));
        assert!(rhi.validation_messages().is_empty());
        cache.destroy(&mut rhi);
    }

    #[test]
    fn test_global_resource_replacement_is_deferred() {
        let mut rhi = HeadlessRhi::new();
        let loader = MemoryAssetLoader::new().with_texture("brdf.png", TextureData::single_texel([1, 2, 3, 4], false));
        let config = test_config();
        let mut cache = RenderResourceCache::new(&mut rhi, &config, Box::new(loader)).unwrap();
        assert_eq!(cache.global_resource_version(), 1);

        let images = rhi.live_image_count();
        let mut desc = LevelResourceDesc::default();
        desc.ibl_resource_desc.brdf_map = "brdf.png".to_string();
        cache.upload_global_render_resource(&mut rhi, &desc, 0).unwrap();
        assert_eq!(cache.global_resource_version(), 2);
        // 旧的资源仍然存活
        assert_eq!(rhi.live_image_count(), images * 2);

        let mut counter = FrameCounter::new(0, config.max_frames_in_flight);
        for _ in 0..config.max_frames_in_flight {
            counter.next_frame();
        }
        cache.begin_frame(&mut rhi, &counter);
        assert_eq!(rhi.live_image_count(), images);
        let brdf = cache.global_resource().unwrap().brdf_lut.image;
        assert_eq!(rhi.read_texel(brdf, 0, 0, 0), Some(vec![1, 2, 3, 4]));

        // 读取失败时保留原来的资源
        desc.ibl_resource_desc.brdf_map = "missing.png".to_string();
        assert!(cache.upload_global_render_resource(&mut rhi, &desc, 2).is_err());
        assert_eq!(cache.global_resource_version(), 2);
        cache.destroy(&mut rhi);
    }

    #[test]
    fn test_push_dynamic_is_aligned() {
        let mut rhi = HeadlessRhi::new();
        let mut cache = RenderResourceCache::new(&mut rhi, &test_config(), Box::new(MemoryAssetLoader::new())).unwrap();
        let slot = FrameSlot::from_usize(1);

        let a = cache.push_dynamic(&mut rhi, slot, &[1, 2, 3], 16).unwrap();
        let b = cache.push_dynamic(&mut rhi, slot, &[4], 16).unwrap();
        let alignment = cache.limits().min_storage_buffer_offset_alignment;
        assert_eq!(a as u64 % alignment, 0);
        assert_eq!(b as u64 % alignment, 0);
        assert!(b > a);

        cache.reset_ring_slot(slot);
        assert_eq!(cache.ring_buffer().used(slot), 0);
        cache.destroy(&mut rhi);
    }

    #[test]
    fn test_rejects_tiny_ring_buffer() {
        let mut rhi = HeadlessRhi::new();
        let config = RenderConfig {
            max_frames_in_flight: 1,
            ring_buffer_size: JOINT_MATRICES_RANGE - 1,
            ..Default::default()
        };
        let result = RenderResourceCache::new(&mut rhi, &config, Box::new(MemoryAssetLoader::new()));
        assert!(matches!(result, Err(RenderError::Config(_))));
        assert_eq!(rhi.live_object_count(), 0);
    }
}
