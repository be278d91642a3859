use lumen_asset::{
    asset_loader::AssetLoader, fs_loader::FsAssetLoader, memory_loader::MemoryAssetLoader, mesh_data::MeshData,
    texture_data::TextureData,
};

pub const CUBE_MESH: &str = "cube.obj";
pub const AXIS_MESH: &str = "axis.obj";
pub const CHECKER_TEXTURE: &str = "checker.png";
pub const NORMAL_TEXTURE: &str = "flat_normal.png";

/// 8x8 的棋盘格
fn checker_texture() -> TextureData {
    const SIZE: u32 = 8;
    let pixels = (0..SIZE * SIZE)
        .flat_map(|i| {
            let (x, y) = (i % SIZE, i / SIZE);
            if (x + y) % 2 == 0 { [230, 230, 230, 255] } else { [40, 40, 40, 255] }
        })
        .collect();
    TextureData::new_rgba8(SIZE, SIZE, true, pixels)
}

/// 内置的资源，不依赖任何文件
pub fn builtin_asset_loader() -> MemoryAssetLoader {
    MemoryAssetLoader::new()
        .with_mesh(CUBE_MESH, MeshData::cube())
        .with_mesh(AXIS_MESH, MeshData::cube())
        .with_texture(CHECKER_TEXTURE, checker_texture())
        .with_texture(NORMAL_TEXTURE, TextureData::single_texel([128, 128, 255, 255], false))
}

pub fn create_asset_loader(use_fs_assets: bool) -> Box<dyn AssetLoader> {
    if use_fs_assets { Box::new(FsAssetLoader::with_default_root()) } else { Box::new(builtin_asset_loader()) }
}

#[cfg(test)]
mod tests {
    use lumen_asset::source_desc::MeshSourceDesc;

    use super::*;

    #[test]
    fn test_builtin_assets_are_loadable() {
        let mut loader = builtin_asset_loader();
        let mesh = loader
            .load_mesh_data(&MeshSourceDesc {
                mesh_file: CUBE_MESH.to_string(),
            })
            .unwrap();
        assert!(mesh.validate().is_ok());

        let checker = loader.load_texture(CHECKER_TEXTURE, true).unwrap().unwrap();
        assert!(checker.is_consistent());
        assert_eq!(checker.width, 8);
    }
}
