use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use lumen_render_interface::bounding_box::AxisAlignedBox;
use serde::{Deserialize, Serialize};

/// 与 mesh 顶点着色器输入一致的顶点布局
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub uv: [f32; 2],
}

/// 蒙皮数据，每个顶点最多受 4 个关节影响
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MeshVertexBinding {
    pub indices: [u32; 4],
    pub weights: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}
impl MeshIndices {
    /// 顶点数不超过 u16 的范围时使用 u16 索引
    pub fn sequential(vertex_count: usize) -> Self {
        if vertex_count <= u16::MAX as usize + 1 {
            Self::U16((0..vertex_count as u32).map(|i| i as u16).collect())
        } else {
            Self::U32((0..vertex_count as u32).collect())
        }
    }

    pub fn from_u32(indices: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count <= u16::MAX as usize + 1 {
            Self::U16(indices.into_iter().map(|i| i as u16).collect())
        } else {
            Self::U32(indices)
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn index_type(&self) -> ash::vk::IndexType {
        match self {
            Self::U16(_) => ash::vk::IndexType::UINT16,
            Self::U32(_) => ash::vk::IndexType::UINT32,
        }
    }

    pub fn max_index(&self) -> Option<u32> {
        match self {
            Self::U16(v) => v.iter().max().map(|i| *i as u32),
            Self::U32(v) => v.iter().max().copied(),
        }
    }
}

/// CPU 端的网格数据
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: MeshIndices,
    /// 仅蒙皮网格存在，长度与 vertices 相同
    pub bindings: Option<Vec<MeshVertexBinding>>,
}

impl MeshData {
    pub fn bounding_box(&self) -> AxisAlignedBox {
        AxisAlignedBox::from_points(self.vertices.iter().map(|v| Vec3::from(v.position)))
    }

    #[inline]
    pub fn is_skinned(&self) -> bool {
        self.bindings.is_some()
    }

    /// 索引越界或蒙皮数据长度不一致时返回错误信息
    pub fn validate(&self) -> Result<(), String> {
        if self.vertices.is_empty() {
            return Err("mesh has no vertex".to_string());
        }
        if let Some(max_index) = self.indices.max_index()
            && max_index as usize >= self.vertices.len()
        {
            return Err(format!("index {} out of range, vertex count: {}", max_index, self.vertices.len()));
        }
        if let Some(bindings) = &self.bindings
            && bindings.len() != self.vertices.len()
        {
            return Err(format!(
                "binding count {} does not match vertex count {}",
                bindings.len(),
                self.vertices.len()
            ));
        }
        Ok(())
    }

    /// 以原点为中心、边长为 2 的立方体，每个面独立的 4 个顶点
    pub fn cube() -> Self {
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::NEG_Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::NEG_Y, Vec3::NEG_Z),
            (Vec3::Z, Vec3::X),
            (Vec3::NEG_Z, Vec3::NEG_X),
        ];
        let uvs = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent) in faces {
            let bitangent = normal.cross(tangent);
            let base = vertices.len() as u32;
            let corners = [-tangent - bitangent, tangent - bitangent, tangent + bitangent, -tangent + bitangent];
            for (corner, uv) in corners.iter().zip(uvs.iter()) {
                vertices.push(MeshVertex {
                    position: (normal + *corner).to_array(),
                    normal: normal.to_array(),
                    tangent: tangent.to_array(),
                    uv: uv.to_array(),
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        let vertex_count = vertices.len();
        Self {
            vertices,
            indices: MeshIndices::from_u32(indices, vertex_count),
            bindings: None,
        }
    }
}

/// 按三角形计算切线，所有输入都是展开后的顶点，每 3 个构成一个三角形
pub fn triangle_tangent(positions: [Vec3; 3], uvs: [Vec2; 3]) -> Vec3 {
    let edge1 = positions[1] - positions[0];
    let edge2 = positions[2] - positions[1];
    let delta_uv1 = uvs[1] - uvs[0];
    let delta_uv2 = uvs[2] - uvs[1];

    let mut divide = delta_uv1.x * delta_uv2.y - delta_uv2.x * delta_uv1.y;
    if (0.0..1e-6).contains(&divide) {
        divide = 1e-6;
    } else if divide <= 0.0 && divide > -1e-6 {
        divide = -1e-6;
    }
    let df = 1.0 / divide;
    (df * (delta_uv2.y * edge1 - delta_uv1.y * edge2)).normalize_or_zero()
}

/// 缺少法线时使用面法线
pub fn triangle_normal(positions: [Vec3; 3]) -> Vec3 {
    (positions[1] - positions[0]).cross(positions[2] - positions[1]).normalize_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_mesh() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.indices.index_type(), ash::vk::IndexType::UINT16);
        assert!(cube.validate().is_ok());

        let bbox = cube.bounding_box();
        assert_eq!(bbox.min_corner(), Vec3::splat(-1.0));
        assert_eq!(bbox.max_corner(), Vec3::splat(1.0));
    }

    #[test]
    fn test_large_mesh_uses_u32() {
        let indices = MeshIndices::sequential(70_000);
        assert_eq!(indices.index_type(), ash::vk::IndexType::UINT32);
        assert_eq!(indices.as_bytes().len(), 70_000 * 4);

        let indices = MeshIndices::sequential(3);
        assert_eq!(indices.as_bytes().len(), 6);
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mesh = MeshData {
            vertices: vec![MeshVertex::default(); 3],
            indices: MeshIndices::U16(vec![0, 1, 3]),
            bindings: None,
        };
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn test_triangle_tangent_follows_u() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0)];
        let uvs = [Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)];
        let tangent = triangle_tangent(positions, uvs);
        assert!((tangent - Vec3::X).length() < 1e-5);
        assert!((triangle_normal(positions) - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_degenerate_uv_does_not_produce_nan() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let tangent = triangle_tangent(positions, [Vec2::splat(0.5); 3]);
        assert!(!tangent.is_nan());
    }
}
