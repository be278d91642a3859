use ash::vk;
use lumen_asset::mesh_data::{MeshData, MeshVertexBinding};
use lumen_render_interface::{
    bounding_box::AxisAlignedBox,
    frame_counter::FrameSlot,
    ring_buffer::{RingAllocation, RingBuffer},
};
use lumen_rhi::{
    desc::{RhiBufferBarrier, RhiBufferDesc, RhiDescriptorWrite, RhiMemoryLocation},
    error::RhiResult,
    handles::{
        RhiBufferHandle, RhiCommandBufferHandle, RhiDescriptorPoolHandle, RhiDescriptorSetHandle,
        RhiDescriptorSetLayoutHandle,
    },
    rhi::Rhi,
};

use crate::{
    error::{RenderError, RenderResult},
    resource_cache::descriptor_layouts::MeshDescriptorLayouts,
};

/// mesh 的 per-mesh descriptor set 从哪里分配
pub struct MeshDescriptorTarget {
    pub pool: RhiDescriptorPoolHandle,
    pub layout: RhiDescriptorSetLayoutHandle,
    /// 非蒙皮 mesh 也需要绑定一个有效的 buffer
    pub default_joint_binding_buffer: RhiBufferHandle,
}

/// 已经写入 ring buffer 的数据
struct MeshStaging {
    vertex: RingAllocation,
    index: RingAllocation,
    joint_binding: Option<RingAllocation>,
}

/// GPU 上的 mesh，上传之后不再改变
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: RhiBufferHandle,
    pub vertex_count: u32,
    pub index_buffer: RhiBufferHandle,
    pub index_count: u32,
    pub index_type: vk::IndexType,
    /// 只有蒙皮 mesh 才有
    pub joint_binding_buffer: Option<RhiBufferHandle>,
    pub descriptor_set: RhiDescriptorSetHandle,
    pub bounding_box: AxisAlignedBox,
}

// new & init
impl GpuMesh {
    /// 数据先写入 ring buffer 中当前 slot 的区域，再在 cmd 中录制 copy 到 device local buffer
    ///
    /// copy 之后的 barrier 保证同一个 cmd 中后续的 draw 能读到数据
    pub fn upload(
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        ring: &mut RingBuffer,
        slot: FrameSlot,
        mesh: &MeshData,
        target: &MeshDescriptorTarget,
        name: &str,
    ) -> RenderResult<Self> {
        let _span = tracy_client::span!("GpuMesh::upload");
        mesh.validate().map_err(|e| RenderError::Asset(anyhow::anyhow!("mesh <{}>: {}", name, e)))?;
        if mesh.indices.is_empty() {
            return Err(RenderError::Asset(anyhow::anyhow!("mesh <{}> has no index", name)));
        }

        // 先占用 ring buffer，空间不足时不会留下创建了一半的 buffer
        let vertex_staging = ring.push_bytes(rhi, slot, bytemuck::cast_slice(&mesh.vertices))?;
        let index_staging = ring.push_bytes(rhi, slot, mesh.indices.as_bytes())?;
        let joint_binding_staging = match &mesh.bindings {
            Some(bindings) => {
                Some(ring.push_bytes(rhi, slot, bytemuck::cast_slice::<MeshVertexBinding, u8>(bindings))?)
            }
            None => None,
        };

        let staging = MeshStaging {
            vertex: vertex_staging,
            index: index_staging,
            joint_binding: joint_binding_staging,
        };
        let mut created = Vec::with_capacity(3);
        match Self::create_gpu_objects(rhi, cmd, mesh, &staging, target, name, &mut created) {
            Ok(gpu_mesh) => Ok(gpu_mesh),
            Err(e) => {
                log::error!("failed to upload mesh <{}>: {}", name, e);
                for buffer in created {
                    rhi.destroy_buffer(buffer);
                }
                Err(e)
            }
        }
    }

    /// 创建成功的 buffer 都会记录在 `created` 中
    fn create_gpu_objects(
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        mesh: &MeshData,
        staging: &MeshStaging,
        target: &MeshDescriptorTarget,
        name: &str,
        created: &mut Vec<RhiBufferHandle>,
    ) -> RenderResult<Self> {
        let vertex_buffer = Self::create_device_buffer(
            rhi,
            cmd,
            &staging.vertex,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{}-vertex", name),
        )?;
        created.push(vertex_buffer);
        let index_buffer = Self::create_device_buffer(
            rhi,
            cmd,
            &staging.index,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{}-index", name),
        )?;
        created.push(index_buffer);
        let joint_binding_buffer = match &staging.joint_binding {
            Some(joint_binding) => {
                let buffer = Self::create_device_buffer(
                    rhi,
                    cmd,
                    joint_binding,
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                    &format!("{}-joint-binding", name),
                )?;
                created.push(buffer);
                Some(buffer)
            }
            None => None,
        };

        let mut barriers = vec![
            RhiBufferBarrier::after_upload(
                vertex_buffer,
                vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            ),
            RhiBufferBarrier::after_upload(
                index_buffer,
                vk::PipelineStageFlags2::INDEX_INPUT,
                vk::AccessFlags2::INDEX_READ,
            ),
        ];
        if let Some(buffer) = joint_binding_buffer {
            barriers.push(RhiBufferBarrier::after_upload(
                buffer,
                vk::PipelineStageFlags2::VERTEX_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ,
            ));
        }
        rhi.cmd_pipeline_barrier(cmd, &[], &barriers);

        let descriptor_set = rhi.allocate_descriptor_set(target.pool, target.layout, name)?;
        rhi.update_descriptor_set(
            descriptor_set,
            &[RhiDescriptorWrite::buffer(
                MeshDescriptorLayouts::PER_MESH_BINDING_JOINT_BINDINGS,
                vk::DescriptorType::STORAGE_BUFFER,
                joint_binding_buffer.unwrap_or(target.default_joint_binding_buffer),
                0,
                vk::WHOLE_SIZE,
            )],
        )?;

        Ok(Self {
            vertex_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            index_type: mesh.indices.index_type(),
            joint_binding_buffer,
            descriptor_set,
            bounding_box: mesh.bounding_box(),
        })
    }

    fn create_device_buffer(
        rhi: &mut dyn Rhi,
        cmd: RhiCommandBufferHandle,
        staging: &RingAllocation,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> RhiResult<RhiBufferHandle> {
        let buffer = rhi.create_buffer(
            &RhiBufferDesc::new(staging.size, usage | vk::BufferUsageFlags::TRANSFER_DST, RhiMemoryLocation::GpuOnly),
            name,
        )?;
        rhi.cmd_copy_buffer(
            cmd,
            staging.buffer,
            buffer,
            &[vk::BufferCopy::default().src_offset(staging.offset).dst_offset(0).size(staging.size)],
        );
        Ok(buffer)
    }
}

// getters
impl GpuMesh {
    #[inline]
    pub fn is_skinned(&self) -> bool {
        self.joint_binding_buffer.is_some()
    }
}

// destroy
impl GpuMesh {
    /// descriptor set 随 pool 一起释放
    pub fn destroy(self, rhi: &mut dyn Rhi) {
        rhi.destroy_buffer(self.vertex_buffer);
        rhi.destroy_buffer(self.index_buffer);
        if let Some(buffer) = self.joint_binding_buffer {
            rhi.destroy_buffer(buffer);
        }
    }
}
