//! 用于去重 GPU 上传的资源描述符
//!
//! 所有的描述符都按值比较：两个描述符相等，就对应同一个 GPU 对象。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshSourceDesc {
    pub mesh_file: String,
}

/// 空字符串表示没有该贴图
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSourceDesc {
    pub base_color_file: String,
    pub metallic_roughness_file: String,
    pub normal_file: String,
    pub occlusion_file: String,
    pub emissive_file: String,
}

/// cube map 的 6 个面
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeMapDesc {
    pub positive_x_map: String,
    pub negative_x_map: String,
    pub positive_y_map: String,
    pub negative_y_map: String,
    pub positive_z_map: String,
    pub negative_z_map: String,
}
impl CubeMapDesc {
    /// 上传时使用的面顺序：+X, -X, +Z, -Z, +Y, -Y
    pub fn faces_in_upload_order(&self) -> [&str; 6] {
        [
            &self.positive_x_map,
            &self.negative_x_map,
            &self.positive_z_map,
            &self.negative_z_map,
            &self.positive_y_map,
            &self.negative_y_map,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelIblResourceDesc {
    pub skybox_irradiance_map: CubeMapDesc,
    pub skybox_specular_map: CubeMapDesc,
    pub brdf_map: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelColorGradingResourceDesc {
    pub color_grading_map: String,
}

/// 关卡级别的全局资源
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelResourceDesc {
    pub ibl_resource_desc: LevelIblResourceDesc,
    pub color_grading_resource_desc: LevelColorGradingResourceDesc,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_descs_compare_by_value() {
        let mut set = HashSet::new();
        set.insert(MeshSourceDesc {
            mesh_file: "cube.obj".to_string(),
        });
        assert!(set.contains(&MeshSourceDesc {
            mesh_file: String::from("cube.obj")
        }));
    }

    #[test]
    fn test_cube_face_order() {
        let desc = CubeMapDesc {
            positive_x_map: "px".into(),
            negative_x_map: "nx".into(),
            positive_y_map: "py".into(),
            negative_y_map: "ny".into(),
            positive_z_map: "pz".into(),
            negative_z_map: "nz".into(),
        };
        assert_eq!(desc.faces_in_upload_order(), ["px", "nx", "pz", "nz", "py", "ny"]);
    }
}
