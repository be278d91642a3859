use glam::Mat4;
use lumen_render_interface::bounding_box::AxisAlignedBox;

/// 渲染线程上的一个可绘制实例，对应 game object 的一个 part
#[derive(Debug, Clone, PartialEq)]
pub struct RenderEntity {
    /// 由场景的 instance id 分配器分配，也是 pick 的结果
    pub instance_id: usize,
    pub model_matrix: Mat4,

    pub mesh_asset_id: usize,
    pub enable_vertex_blending: bool,
    pub joint_matrices: Vec<Mat4>,
    /// 模型空间的包围盒
    pub bounding_box: AxisAlignedBox,

    pub material_asset_id: usize,
    pub blend: bool,
    pub double_sided: bool,
}

impl Default for RenderEntity {
    fn default() -> Self {
        Self {
            instance_id: 0,
            model_matrix: Mat4::IDENTITY,
            mesh_asset_id: 0,
            enable_vertex_blending: false,
            joint_matrices: Vec::new(),
            bounding_box: AxisAlignedBox::empty(),
            material_asset_id: 0,
            blend: false,
            double_sided: false,
        }
    }
}

/// 剔除结果中的一项，只借用实体的数据，生命周期不超过当前帧
#[derive(Debug, Clone, Copy)]
pub struct RenderMeshNode<'a> {
    pub node_id: usize,
    pub model_matrix: &'a Mat4,
    pub joint_matrices: &'a [Mat4],
    pub mesh_asset_id: usize,
    pub material_asset_id: usize,
    pub enable_vertex_blending: bool,
}

impl<'a> RenderMeshNode<'a> {
    pub fn from_entity(entity: &'a RenderEntity) -> Self {
        Self {
            node_id: entity.instance_id,
            model_matrix: &entity.model_matrix,
            joint_matrices: &entity.joint_matrices,
            mesh_asset_id: entity.mesh_asset_id,
            material_asset_id: entity.material_asset_id,
            enable_vertex_blending: entity.enable_vertex_blending,
        }
    }
}
