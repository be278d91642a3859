use std::{
    env,
    path::{Path, PathBuf},
};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
/// 可以通过 `LUMEN_ASSET_ROOT` 环境变量覆盖资产根目录。
///
/// # 使用示例
/// ```ignore
/// let mesh = LumenPath::assets_path("mesh/cube.obj");    // assets/mesh/cube.obj
/// let cfg = LumenPath::config_path("render.toml");       // config/render.toml
/// ```
pub struct LumenPath {}
// 核心路径
impl LumenPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| manifest_dir.to_path_buf())
    }
}
// 根目录下
impl LumenPath {
    /// 资产根目录
    pub fn assets_root() -> PathBuf {
        match env::var_os("LUMEN_ASSET_ROOT") {
            Some(root) => PathBuf::from(root),
            None => Self::workspace_path().join("assets"),
        }
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::assets_root().join(filename)
    }

    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_under_workspace() {
        let workspace = LumenPath::workspace_path();
        assert!(LumenPath::config_path("render.toml").starts_with(&workspace));
        assert!(LumenPath::config_path("render.toml").ends_with("config/render.toml"));
    }
}
