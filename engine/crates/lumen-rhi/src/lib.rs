//! Lumen RHI
//!
//! 所有的 GPU 对象都由 RHI 持有，外部只拿到 slotmap 的 key 作为句柄。
//! 句柄在 RHI 之外不会被别名化；销毁是显式的，对空句柄或已经销毁的句柄调用 destroy 是 no-op。
//!
//! - [`rhi::Rhi`]：设备、资源、命令录制与队列提交的接口
//! - [`headless::HeadlessRhi`]：在 CPU 上模拟的后端，用于测试以及无窗口运行

pub mod desc;
pub mod error;
pub mod format;
pub mod handles;
pub mod headless;
pub mod rhi;
pub mod submit_info;
pub mod swapchain;
