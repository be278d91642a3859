//! 具体的 pass
//!
//! 每帧的执行顺序固定：方向光阴影、点光源阴影、主相机；pick 只在查询时执行。

pub mod directional_light_shadow;
pub mod main_camera;
pub mod mesh_batch;
pub mod pick;
pub mod point_light_shadow;
pub mod ui;

use ash::vk;
use lumen_rhi::{
    desc::{RhiImageDesc, RhiImageViewDesc},
    error::RhiResult,
    format::aspect_of,
    handles::{RhiImageHandle, RhiImageViewHandle},
    rhi::Rhi,
};

/// pass 自己持有的 attachment
#[derive(Debug, Clone, Copy, Default)]
pub struct PassAttachment {
    pub image: RhiImageHandle,
    pub view: RhiImageViewHandle,
    pub format: vk::Format,
}

impl PassAttachment {
    /// `layers > 1` 时创建 2D array view
    pub fn new(
        rhi: &mut dyn Rhi,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        layers: u32,
        name: &str,
    ) -> RhiResult<Self> {
        let image = rhi.create_image(&RhiImageDesc::new_2d(extent, format, usage).array_layers(layers), name)?;
        let view_desc = if layers > 1 {
            RhiImageViewDesc::new_2d_array(format, aspect_of(format), layers)
        } else {
            RhiImageViewDesc::new_2d(format, aspect_of(format))
        };
        match rhi.create_image_view(image, &view_desc, name) {
            Ok(view) => Ok(Self { image, view, format }),
            Err(e) => {
                rhi.destroy_image(image);
                Err(e)
            }
        }
    }

    /// 可以重复调用
    pub fn destroy(&mut self, rhi: &mut dyn Rhi) {
        rhi.destroy_image_view(std::mem::take(&mut self.view));
        rhi.destroy_image(std::mem::take(&mut self.image));
    }
}
