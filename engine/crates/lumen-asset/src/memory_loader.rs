//! 内存中的资源，不访问文件系统，会记录每个资源被读取的次数

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use crate::asset_loader::AssetLoader;
use crate::mesh_data::MeshData;
use crate::source_desc::MeshSourceDesc;
use crate::texture_data::TextureData;

/// 读取次数的统计，loader 交给渲染器之后仍然可以通过它查看
#[derive(Debug, Clone, Default)]
pub struct LoadCounter {
    inner: Arc<Mutex<LoadCounts>>,
}

#[derive(Debug, Default)]
struct LoadCounts {
    mesh: HashMap<String, usize>,
    texture: HashMap<String, usize>,
}

impl LoadCounter {
    fn record_mesh(&self, file: &str) {
        if let Ok(mut counts) = self.inner.lock() {
            *counts.mesh.entry(file.to_string()).or_default() += 1;
        }
    }

    fn record_texture(&self, file: &str) {
        if let Ok(mut counts) = self.inner.lock() {
            *counts.texture.entry(file.to_string()).or_default() += 1;
        }
    }

    pub fn mesh_load_count(&self, file: &str) -> usize {
        self.inner.lock().map(|c| c.mesh.get(file).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn texture_load_count(&self, file: &str) -> usize {
        self.inner.lock().map(|c| c.texture.get(file).copied().unwrap_or(0)).unwrap_or(0)
    }

    pub fn total_mesh_loads(&self) -> usize {
        self.inner.lock().map(|c| c.mesh.values().sum()).unwrap_or(0)
    }

    pub fn total_texture_loads(&self) -> usize {
        self.inner.lock().map(|c| c.texture.values().sum()).unwrap_or(0)
    }
}

#[derive(Default)]
pub struct MemoryAssetLoader {
    meshes: HashMap<String, MeshData>,
    textures: HashMap<String, TextureData>,

    counter: LoadCounter,
}

// new & init
impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mesh(mut self, file: &str, mesh: MeshData) -> Self {
        self.insert_mesh(file, mesh);
        self
    }

    pub fn with_texture(mut self, file: &str, texture: TextureData) -> Self {
        self.insert_texture(file, texture);
        self
    }

    pub fn insert_mesh(&mut self, file: &str, mesh: MeshData) {
        self.meshes.insert(file.to_string(), mesh);
    }

    pub fn insert_texture(&mut self, file: &str, texture: TextureData) {
        self.textures.insert(file.to_string(), texture);
    }
}

// getters
impl MemoryAssetLoader {
    /// 与 loader 共享同一份统计
    #[inline]
    pub fn counter(&self) -> LoadCounter {
        self.counter.clone()
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn name(&self) -> &str {
        "memory"
    }

    fn load_mesh_data(&mut self, desc: &MeshSourceDesc) -> anyhow::Result<MeshData> {
        self.counter.record_mesh(&desc.mesh_file);
        self.meshes.get(&desc.mesh_file).cloned().ok_or_else(|| anyhow!("mesh not found: {}", desc.mesh_file))
    }

    fn load_texture(&mut self, file: &str, is_srgb: bool) -> anyhow::Result<Option<TextureData>> {
        if file.is_empty() {
            return Ok(None);
        }
        self.counter.record_texture(file);
        let mut texture = self.textures.get(file).cloned().ok_or_else(|| anyhow!("texture not found: {}", file))?;
        if texture.format == ash::vk::Format::R8G8B8A8_UNORM && is_srgb {
            texture.format = ash::vk::Format::R8G8B8A8_SRGB;
        } else if texture.format == ash::vk::Format::R8G8B8A8_SRGB && !is_srgb {
            texture.format = ash::vk::Format::R8G8B8A8_UNORM;
        }
        Ok(Some(texture))
    }

    fn load_texture_hdr(&mut self, file: &str) -> anyhow::Result<Option<TextureData>> {
        if file.is_empty() {
            return Ok(None);
        }
        self.counter.record_texture(file);
        self.textures.get(file).cloned().map(Some).ok_or_else(|| anyhow!("texture not found: {}", file))
    }
}
