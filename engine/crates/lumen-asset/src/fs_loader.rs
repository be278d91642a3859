//! 从文件系统读取资源
//!
//! - mesh: `.obj` 通过 tobj 读取，`.json` 为引擎自己的顶点格式（可以带蒙皮数据）
//! - texture: 通过 image 读取

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use glam::{Vec2, Vec3};
use serde::Deserialize;

use crate::asset_loader::AssetLoader;
use crate::mesh_data::{MeshData, MeshIndices, MeshVertex, MeshVertexBinding, triangle_normal, triangle_tangent};
use crate::source_desc::MeshSourceDesc;
use crate::texture_data::TextureData;

pub struct FsAssetLoader {
    root: PathBuf,
}

// new & init
impl FsAssetLoader {
    /// 相对路径都基于 root 解析
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        log::info!("fs asset loader root: {}", root.display());
        Self { root }
    }

    /// 使用工作区的 assets 目录
    pub fn with_default_root() -> Self {
        Self::new(lumen_crate_tools::resource::LumenPath::assets_root())
    }
}

// tools
impl FsAssetLoader {
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) }
    }

    fn load_obj(path: &Path) -> anyhow::Result<MeshData> {
        let _span = tracy_client::span!("FsAssetLoader::load_obj");
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ignore_lines: true,
                ignore_points: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("failed to load obj: {}", path.display()))?;

        let mut vertices = Vec::new();
        for model in &models {
            let mesh = &model.mesh;
            let position_at = |i: usize| Vec3::new(mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]);
            let normal_at = |i: usize| {
                (mesh.normals.len() >= 3 * (i + 1))
                    .then(|| Vec3::new(mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2]))
            };
            let uv_at = |i: usize| {
                (mesh.texcoords.len() >= 2 * (i + 1)).then(|| Vec2::new(mesh.texcoords[2 * i], mesh.texcoords[2 * i + 1]))
            };

            for triangle in mesh.indices.chunks_exact(3) {
                let ids = [triangle[0] as usize, triangle[1] as usize, triangle[2] as usize];
                if ids.iter().any(|i| mesh.positions.len() < 3 * (i + 1)) {
                    bail!("obj index out of range: {}", path.display());
                }
                let positions = ids.map(position_at);

                // 任意一个顶点缺失法线时使用面法线
                let normals = match (normal_at(ids[0]), normal_at(ids[1]), normal_at(ids[2])) {
                    (Some(n0), Some(n1), Some(n2)) => [n0, n1, n2],
                    _ => [triangle_normal(positions); 3],
                };
                let uvs = match (uv_at(ids[0]), uv_at(ids[1]), uv_at(ids[2])) {
                    (Some(t0), Some(t1), Some(t2)) => [t0, t1, t2],
                    _ => [Vec2::splat(0.5); 3],
                };
                let tangent = triangle_tangent(positions, uvs);

                for i in 0..3 {
                    vertices.push(MeshVertex {
                        position: positions[i].to_array(),
                        normal: normals[i].to_array(),
                        tangent: tangent.to_array(),
                        uv: uvs[i].to_array(),
                    });
                }
            }
        }

        if vertices.is_empty() {
            bail!("obj has no triangle: {}", path.display());
        }
        let vertex_count = vertices.len();
        Ok(MeshData {
            vertices,
            indices: MeshIndices::sequential(vertex_count),
            bindings: None,
        })
    }

    fn load_json_mesh(path: &Path) -> anyhow::Result<MeshData> {
        let _span = tracy_client::span!("FsAssetLoader::load_json_mesh");
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read mesh: {}", path.display()))?;
        let json: JsonMeshData =
            serde_json::from_str(&text).with_context(|| format!("failed to parse mesh: {}", path.display()))?;
        let mesh = json.into_mesh_data();
        if let Err(msg) = mesh.validate() {
            bail!("invalid mesh {}: {}", path.display(), msg);
        }
        Ok(mesh)
    }

    fn load_image(&self, file: &str) -> anyhow::Result<Option<image::DynamicImage>> {
        if file.is_empty() {
            return Ok(None);
        }
        let path = self.resolve(file);
        let img = image::open(&path).with_context(|| format!("failed to load image: {}", path.display()))?;
        Ok(Some(img))
    }
}

impl AssetLoader for FsAssetLoader {
    fn name(&self) -> &str {
        "fs"
    }

    fn load_mesh_data(&mut self, desc: &MeshSourceDesc) -> anyhow::Result<MeshData> {
        let path = self.resolve(&desc.mesh_file);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("obj") => Self::load_obj(&path),
            Some("json") => Self::load_json_mesh(&path),
            _ => bail!("unsupported mesh format: {}", path.display()),
        }
    }

    fn load_texture(&mut self, file: &str, is_srgb: bool) -> anyhow::Result<Option<TextureData>> {
        let _span = tracy_client::span!("FsAssetLoader::load_texture");
        Ok(self.load_image(file)?.map(|img| {
            let rgba = img.into_rgba8();
            let (width, height) = rgba.dimensions();
            TextureData::new_rgba8(width, height, is_srgb, rgba.into_raw())
        }))
    }

    fn load_texture_hdr(&mut self, file: &str) -> anyhow::Result<Option<TextureData>> {
        let _span = tracy_client::span!("FsAssetLoader::load_texture_hdr");
        Ok(self.load_image(file)?.map(|img| {
            let rgba = img.into_rgba32f();
            let (width, height) = rgba.dimensions();
            TextureData::new_rgba32f(width, height, rgba.as_raw())
        }))
    }
}

/// `.json` mesh 的文件格式
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonMeshData {
    vertex_buffer: Vec<JsonVertex>,
    index_buffer: Vec<u32>,
    bind: Vec<JsonSkeletonBinding>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonVertex {
    px: f32,
    py: f32,
    pz: f32,
    nx: f32,
    ny: f32,
    nz: f32,
    tx: f32,
    ty: f32,
    tz: f32,
    u: f32,
    v: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSkeletonBinding {
    index0: u32,
    index1: u32,
    index2: u32,
    index3: u32,
    weight0: f32,
    weight1: f32,
    weight2: f32,
    weight3: f32,
}

impl JsonMeshData {
    fn into_mesh_data(self) -> MeshData {
        let vertices: Vec<MeshVertex> = self
            .vertex_buffer
            .iter()
            .map(|v| MeshVertex {
                position: [v.px, v.py, v.pz],
                normal: [v.nx, v.ny, v.nz],
                tangent: [v.tx, v.ty, v.tz],
                uv: [v.u, v.v],
            })
            .collect();
        let bindings = (!self.bind.is_empty()).then(|| {
            self.bind
                .iter()
                .map(|b| MeshVertexBinding {
                    indices: [b.index0, b.index1, b.index2, b.index3],
                    weights: [b.weight0, b.weight1, b.weight2, b.weight3],
                })
                .collect()
        });
        let vertex_count = vertices.len();
        MeshData {
            vertices,
            indices: MeshIndices::from_u32(self.index_buffer, vertex_count),
            bindings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lumen-asset-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_obj_without_normals() {
        let dir = temp_dir("obj");
        std::fs::write(
            dir.join("tri.obj"),
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nf 1/1 2/2 3/3\n",
        )
        .unwrap();

        let mut loader = FsAssetLoader::new(&dir);
        let mesh = loader
            .load_mesh_data(&MeshSourceDesc {
                mesh_file: "tri.obj".to_string(),
            })
            .unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, MeshIndices::U16(vec![0, 1, 2]));
        for v in &mesh.vertices {
            assert!((Vec3::from(v.normal) - Vec3::Z).length() < 1e-5);
            assert!((Vec3::from(v.tangent) - Vec3::X).length() < 1e-5);
        }
        assert_eq!(mesh.bounding_box().max_corner(), Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_load_json_skinned_mesh() {
        let dir = temp_dir("json");
        std::fs::write(
            dir.join("skin.json"),
            r#"{
                "vertex_buffer": [
                    { "px": 0, "py": 0, "pz": 0, "u": 0.5, "v": 0.5 },
                    { "px": 1, "py": 0, "pz": 0 },
                    { "px": 0, "py": 1, "pz": 0 }
                ],
                "index_buffer": [0, 1, 2],
                "bind": [
                    { "index0": 1, "weight0": 1.0 },
                    { "index0": 2, "weight0": 1.0 },
                    { "index0": 3, "weight0": 0.5, "index1": 4, "weight1": 0.5 }
                ]
            }"#,
        )
        .unwrap();

        let mut loader = FsAssetLoader::new(&dir);
        let mesh = loader
            .load_mesh_data(&MeshSourceDesc {
                mesh_file: "skin.json".to_string(),
            })
            .unwrap();
        assert!(mesh.is_skinned());
        assert_eq!(mesh.vertices[0].uv, [0.5, 0.5]);
        assert_eq!(mesh.bindings.as_ref().unwrap()[2].indices, [3, 4, 0, 0]);
    }

    #[test]
    fn test_unsupported_mesh_format() {
        let mut loader = FsAssetLoader::new(temp_dir("fbx"));
        let err = loader.load_mesh_data(&MeshSourceDesc {
            mesh_file: "a.fbx".to_string(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_load_png_texture() {
        let dir = temp_dir("png");
        let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 255]));
        img.save(dir.join("albedo.png")).unwrap();

        let mut loader = FsAssetLoader::new(&dir);
        let tex = loader.load_texture("albedo.png", true).unwrap().unwrap();
        assert_eq!((tex.width, tex.height), (4, 2));
        assert_eq!(tex.format, ash::vk::Format::R8G8B8A8_SRGB);
        assert_eq!(&tex.pixels[0..4], &[10, 20, 30, 255]);

        assert!(loader.load_texture("", false).unwrap().is_none());
        assert!(loader.load_texture("missing.png", false).is_err());
    }
}
