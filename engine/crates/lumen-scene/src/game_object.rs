//! 逻辑线程描述 game object 的方式，通过 swap context 传给渲染线程

use glam::Mat4;
use lumen_asset::source_desc::{MaterialSourceDesc, MeshSourceDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameObjectId(pub u64);

impl GameObjectId {
    pub const INVALID: Self = Self(u64::MAX);

    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for GameObjectId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for GameObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() { write!(f, "GO{}", self.0) } else { write!(f, "GO(invalid)") }
    }
}

/// 场景中 instance id 的分配依据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GameObjectPartId {
    pub go_id: GameObjectId,
    pub part_id: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameObjectMeshDesc {
    pub mesh_file: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameObjectMaterialDesc {
    pub base_color_texture_file: String,
    pub metallic_roughness_texture_file: String,
    pub normal_texture_file: String,
    pub occlusion_texture_file: String,
    pub emissive_texture_file: String,
    /// false 时使用默认材质
    pub with_texture: bool,
}

impl GameObjectMaterialDesc {
    pub fn to_source_desc(&self) -> MaterialSourceDesc {
        MaterialSourceDesc {
            base_color_file: self.base_color_texture_file.clone(),
            metallic_roughness_file: self.metallic_roughness_texture_file.clone(),
            normal_file: self.normal_texture_file.clone(),
            occlusion_file: self.occlusion_texture_file.clone(),
            emissive_file: self.emissive_texture_file.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameObjectTransformDesc {
    pub transform_matrix: Mat4,
}
impl Default for GameObjectTransformDesc {
    fn default() -> Self {
        Self {
            transform_matrix: Mat4::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonAnimationResult {
    pub transforms: Vec<Mat4>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameObjectPartDesc {
    pub mesh_desc: GameObjectMeshDesc,
    pub material_desc: GameObjectMaterialDesc,
    pub transform_desc: GameObjectTransformDesc,
    pub with_animation: bool,
    pub skeleton_animation_result: SkeletonAnimationResult,
}

impl GameObjectPartDesc {
    #[inline]
    pub fn mesh_source_desc(&self) -> MeshSourceDesc {
        MeshSourceDesc {
            mesh_file: self.mesh_desc.mesh_file.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameObjectDesc {
    go_id: GameObjectId,
    object_parts: Vec<GameObjectPartDesc>,
}

impl GameObjectDesc {
    pub fn new(go_id: GameObjectId, object_parts: Vec<GameObjectPartDesc>) -> Self {
        Self { go_id, object_parts }
    }

    #[inline]
    pub fn id(&self) -> GameObjectId {
        self.go_id
    }

    #[inline]
    pub fn object_parts(&self) -> &[GameObjectPartDesc] {
        &self.object_parts
    }
}
