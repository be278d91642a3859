use crate::mesh_data::MeshData;
use crate::source_desc::MaterialSourceDesc;
use crate::source_desc::MeshSourceDesc;
use crate::texture_data::TextureData;

/// 一个材质的 5 张贴图，None 表示没有对应的文件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialData {
    pub base_color: Option<TextureData>,
    pub metallic_roughness: Option<TextureData>,
    pub normal: Option<TextureData>,
    pub occlusion: Option<TextureData>,
    pub emissive: Option<TextureData>,
}

/// 渲染器读取资源的唯一入口
///
/// 渲染器只在 render 线程上调用，所以方法使用 `&mut self`。
pub trait AssetLoader: Send {
    fn name(&self) -> &str;

    fn load_mesh_data(&mut self, desc: &MeshSourceDesc) -> anyhow::Result<MeshData>;

    /// 读取 LDR 贴图，统一转换为 RGBA8
    ///
    /// 文件名为空时返回 `Ok(None)`
    fn load_texture(&mut self, file: &str, is_srgb: bool) -> anyhow::Result<Option<TextureData>>;

    /// 读取 HDR 贴图，统一转换为 RGBA32F
    fn load_texture_hdr(&mut self, file: &str) -> anyhow::Result<Option<TextureData>>;

    /// base color 使用 sRGB，其余贴图都是线性的
    fn load_material_data(&mut self, desc: &MaterialSourceDesc) -> anyhow::Result<MaterialData> {
        let _span = tracy_client::span!("AssetLoader::load_material_data");
        Ok(MaterialData {
            base_color: self.load_texture(&desc.base_color_file, true)?,
            metallic_roughness: self.load_texture(&desc.metallic_roughness_file, false)?,
            normal: self.load_texture(&desc.normal_file, false)?,
            occlusion: self.load_texture(&desc.occlusion_file, false)?,
            emissive: self.load_texture(&desc.emissive_file, false)?,
        })
    }
}
