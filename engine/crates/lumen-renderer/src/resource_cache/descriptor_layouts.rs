use ash::vk;
use lumen_rhi::{desc::RhiDescriptorBinding, error::RhiResult, handles::RhiDescriptorSetLayoutHandle, rhi::Rhi};

/// mesh 相关的 pipeline 共用的三个 descriptor set layout
///
/// - set 0 `per_frame`：per-frame 数据、实例数组、骨骼矩阵，都指向 ring buffer，通过 dynamic offset 选择本帧写入的位置
/// - set 1 `per_mesh`：蒙皮的顶点绑定数据
/// - set 2 `per_material`：material 参数与 5 张贴图
pub struct MeshDescriptorLayouts {
    pub per_frame: RhiDescriptorSetLayoutHandle,
    pub per_mesh: RhiDescriptorSetLayoutHandle,
    pub per_material: RhiDescriptorSetLayoutHandle,
}

// new & init
impl MeshDescriptorLayouts {
    pub const PER_FRAME_BINDING_FRAME_DATA: u32 = 0;
    pub const PER_FRAME_BINDING_INSTANCES: u32 = 1;
    pub const PER_FRAME_BINDING_JOINT_MATRICES: u32 = 2;

    pub const PER_MESH_BINDING_JOINT_BINDINGS: u32 = 0;

    pub const PER_MATERIAL_BINDING_UNIFORM: u32 = 0;
    /// base color, metallic roughness, normal, occlusion, emissive
    pub const PER_MATERIAL_BINDING_TEXTURES: [u32; 5] = [1, 2, 3, 4, 5];

    pub fn new(rhi: &mut dyn Rhi) -> RhiResult<Self> {
        let vs_fs = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let per_frame = rhi.create_descriptor_set_layout(
            &[
                RhiDescriptorBinding::new(
                    Self::PER_FRAME_BINDING_FRAME_DATA,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    vs_fs,
                ),
                RhiDescriptorBinding::new(
                    Self::PER_FRAME_BINDING_INSTANCES,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    vs_fs,
                ),
                RhiDescriptorBinding::new(
                    Self::PER_FRAME_BINDING_JOINT_MATRICES,
                    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                    vk::ShaderStageFlags::VERTEX,
                ),
            ],
            "mesh-per-frame",
        )?;

        let per_mesh = rhi.create_descriptor_set_layout(
            &[RhiDescriptorBinding::new(
                Self::PER_MESH_BINDING_JOINT_BINDINGS,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX,
            )],
            "mesh-per-mesh",
        )?;

        let mut material_bindings = vec![RhiDescriptorBinding::new(
            Self::PER_MATERIAL_BINDING_UNIFORM,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::FRAGMENT,
        )];
        material_bindings.extend(Self::PER_MATERIAL_BINDING_TEXTURES.iter().map(|binding| {
            RhiDescriptorBinding::new(
                *binding,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            )
        }));
        let per_material = rhi.create_descriptor_set_layout(&material_bindings, "mesh-per-material")?;

        Ok(Self {
            per_frame,
            per_mesh,
            per_material,
        })
    }
}

// destroy
impl MeshDescriptorLayouts {
    pub fn destroy(&mut self, rhi: &mut dyn Rhi) {
        rhi.destroy_descriptor_set_layout(std::mem::take(&mut self.per_frame));
        rhi.destroy_descriptor_set_layout(std::mem::take(&mut self.per_mesh));
        rhi.destroy_descriptor_set_layout(std::mem::take(&mut self.per_material));
    }
}
