//! Lumen 渲染器
//!
//! - [`resource_cache::RenderResourceCache`]：mesh/material 的 GPU 缓存、ring buffer、全局 IBL 资源
//! - [`render_pass::RenderPass`]：每个 pass 的统一接口，具体实现位于 [`passes`]
//! - [`pipeline::RenderPipeline`]：固定顺序的 pass 组合
//! - [`render_system::RenderSystem`]：渲染线程的入口，每帧调用 `tick`

pub mod error;
pub mod label_color;
pub mod passes;
pub mod pipeline;
pub mod present;
pub mod render_pass;
pub mod render_system;
pub mod resource_cache;
