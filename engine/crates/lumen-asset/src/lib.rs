//! Lumen 的资源层
//!
//! 渲染器只通过 [`asset_loader::AssetLoader`] 读取资源，不关心文件格式。

pub mod asset_loader;
pub mod fs_loader;
pub mod global_rendering;
pub mod memory_loader;
pub mod mesh_data;
pub mod source_desc;
pub mod texture_data;
