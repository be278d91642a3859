use glam::Mat4;
use indexmap::IndexMap;
use lumen_render_interface::{
    per_frame_data::{VulkanMeshInstance, VulkanPickMeshInstance},
    render_settings::DefaultRendererSettings,
};
use lumen_rhi::handles::{RhiDescriptorSetHandle, RhiPipelineHandle};
use lumen_scene::render_entity::RenderMeshNode;

use crate::{
    error::RenderResult,
    render_pass::PassDrawContext,
    resource_cache::per_frame::{INSTANCE_BLOCK_RANGE, JOINT_MATRICES_RANGE},
};

/// mesh pipeline 的 push constant
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshDrawPushConstants {
    /// 每个实例在骨骼矩阵数组中占用的矩阵个数
    pub joint_stride: u32,
    pub _padding: [u32; 3],
}

/// 实例数据的写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshInstanceKind {
    Mesh,
    /// 额外写入 node id
    Pick,
}

/// 相同 (material, mesh) 的节点合并为一组，组之间保持第一次出现的顺序
pub fn group_nodes<'a>(
    nodes: impl Iterator<Item = RenderMeshNode<'a>>,
    by_material: bool,
) -> IndexMap<(usize, usize), Vec<RenderMeshNode<'a>>> {
    let mut groups: IndexMap<(usize, usize), Vec<RenderMeshNode<'a>>> = IndexMap::new();
    for node in nodes {
        let material = if by_material { node.material_asset_id } else { 0 };
        groups.entry((material, node.mesh_asset_id)).or_default().push(node);
    }
    groups
}

/// 一次 draw call 能容纳的实例数，蒙皮实例受骨骼矩阵区域的大小限制
pub fn instances_per_draw(joint_stride: usize) -> usize {
    let max_instances = DefaultRendererSettings::MESH_PER_DRAWCALL_MAX_INSTANCE_COUNT;
    if joint_stride == 0 {
        max_instances
    } else {
        (DefaultRendererSettings::MESH_VERTEX_BLENDING_MAX_JOINT_COUNT / joint_stride).clamp(1, max_instances)
    }
}

/// 绘制一组 mesh 节点时共享的状态
pub struct MeshDrawState {
    pub pipeline: RhiPipelineHandle,
    /// 本 pass 的 per-frame 数据在 ring buffer 中的偏移
    pub per_frame_offset: u32,
    /// 是否绑定 set 2 的 material
    pub with_material: bool,
    pub instance_kind: MeshInstanceKind,
    /// 绑定在 material 之后的 set
    pub extra_sets: Vec<RhiDescriptorSetHandle>,
}

/// 绘制节点，返回 draw call 的数量
///
/// 尚未上传的 mesh 或 material 被跳过
pub fn draw_mesh_nodes<'a>(
    ctx: &mut PassDrawContext,
    state: &MeshDrawState,
    nodes: impl Iterator<Item = RenderMeshNode<'a>>,
) -> RenderResult<u32> {
    let _span = tracy_client::span!("draw_mesh_nodes");
    let mut draw_count = 0;
    let per_frame_set = ctx.resource_cache.per_frame_set();

    for ((material_id, mesh_id), group) in group_nodes(nodes, state.with_material) {
        let Some(mesh) = ctx.resource_cache.mesh(mesh_id).copied() else {
            log::warn!("mesh {} is not uploaded, skip {} instances", mesh_id, group.len());
            continue;
        };
        let mut sets = vec![per_frame_set, mesh.descriptor_set];
        if state.with_material {
            let Some(material) = ctx.resource_cache.material(material_id).copied() else {
                log::warn!("material {} is not uploaded, skip {} instances", material_id, group.len());
                continue;
            };
            sets.push(material.descriptor_set);
        }
        sets.extend_from_slice(&state.extra_sets);

        let joint_stride = if mesh.is_skinned() {
            group
                .iter()
                .map(|node| node.joint_matrices.len())
                .max()
                .unwrap_or(0)
                .clamp(1, DefaultRendererSettings::MESH_VERTEX_BLENDING_MAX_JOINT_COUNT)
        } else {
            0
        };

        ctx.rhi.cmd_bind_vertex_buffers(ctx.cmd, 0, &[(mesh.vertex_buffer, 0)]);
        ctx.rhi.cmd_bind_index_buffer(ctx.cmd, mesh.index_buffer, 0, mesh.index_type);
        ctx.rhi.cmd_push_constants(
            ctx.cmd,
            state.pipeline,
            bytemuck::bytes_of(&MeshDrawPushConstants {
                joint_stride: joint_stride as u32,
                _padding: [0; 3],
            }),
        );

        for chunk in group.chunks(instances_per_draw(joint_stride)) {
            let instance_offset = push_instances(ctx, chunk, state.instance_kind)?;
            let joint_offset = if joint_stride > 0 { push_joint_matrices(ctx, chunk, joint_stride)? } else { 0 };

            ctx.rhi.cmd_bind_descriptor_sets(
                ctx.cmd,
                state.pipeline,
                0,
                &sets,
                &[state.per_frame_offset, instance_offset, joint_offset],
            );
            ctx.rhi.cmd_draw_indexed(ctx.cmd, mesh.index_count, chunk.len() as u32, 0, 0, 0);
            draw_count += 1;
        }
    }
    Ok(draw_count)
}

fn push_instances(ctx: &mut PassDrawContext, chunk: &[RenderMeshNode], kind: MeshInstanceKind) -> RenderResult<u32> {
    let bytes: Vec<u8> = match kind {
        MeshInstanceKind::Mesh => {
            let instances = chunk
                .iter()
                .map(|node| VulkanMeshInstance {
                    enable_vertex_blending: if node.enable_vertex_blending { 1.0 } else { -1.0 },
                    _padding_enable_vertex_blending: [0.0; 3],
                    model_matrix: *node.model_matrix,
                })
                .collect::<Vec<_>>();
            bytemuck::cast_slice(&instances).to_vec()
        }
        MeshInstanceKind::Pick => {
            let instances = chunk
                .iter()
                .map(|node| VulkanPickMeshInstance {
                    model_matrix: *node.model_matrix,
                    node_id: node.node_id as u32,
                    enable_vertex_blending: if node.enable_vertex_blending { 1.0 } else { -1.0 },
                    _padding: [0; 2],
                })
                .collect::<Vec<_>>();
            bytemuck::cast_slice(&instances).to_vec()
        }
    };
    ctx.resource_cache.push_dynamic(ctx.rhi, ctx.frame_slot, &bytes, INSTANCE_BLOCK_RANGE)
}

/// 每个实例占用 `joint_stride` 个矩阵，不足的部分用单位矩阵补齐
fn push_joint_matrices(ctx: &mut PassDrawContext, chunk: &[RenderMeshNode], joint_stride: usize) -> RenderResult<u32> {
    let mut matrices = vec![Mat4::IDENTITY; chunk.len() * joint_stride];
    for (node, dst) in chunk.iter().zip(matrices.chunks_mut(joint_stride)) {
        let count = node.joint_matrices.len().min(joint_stride);
        dst[..count].copy_from_slice(&node.joint_matrices[..count]);
    }
    ctx.resource_cache.push_dynamic(ctx.rhi, ctx.frame_slot, bytemuck::cast_slice(&matrices), JOINT_MATRICES_RANGE)
}

#[cfg(test)]
mod tests {
    use lumen_scene::render_entity::RenderEntity;

    use super::*;

    fn entity(instance_id: usize, mesh: usize, material: usize) -> RenderEntity {
        RenderEntity {
            instance_id,
            mesh_asset_id: mesh,
            material_asset_id: material,
            ..Default::default()
        }
    }

    #[test]
    fn test_group_keeps_first_seen_order() {
        let entities = [entity(1, 2, 1), entity(2, 1, 1), entity(3, 2, 1), entity(4, 2, 3)];
        let groups = group_nodes(entities.iter().map(RenderMeshNode::from_entity), true);
        let keys = groups.keys().copied().collect::<Vec<_>>();
        assert_eq!(keys, vec![(1, 2), (1, 1), (3, 2)]);
        assert_eq!(groups[&(1, 2)].iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![1, 3]);

        let groups = group_nodes(entities.iter().map(RenderMeshNode::from_entity), false);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&(0, 2)].len(), 3);
    }

    #[test]
    fn test_instances_per_draw() {
        assert_eq!(instances_per_draw(0), 64);
        assert_eq!(instances_per_draw(1), 64);
        assert_eq!(instances_per_draw(100), 10);
        assert_eq!(instances_per_draw(4096), 1);
    }
}
