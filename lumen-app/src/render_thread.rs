use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, anyhow};
use ash::vk;
use crossbeam_channel::{Receiver, Sender};
use lumen_asset::{
    asset_loader::AssetLoader,
    global_rendering::GlobalRenderingConfig,
    source_desc::MeshSourceDesc,
};
use lumen_render_interface::render_settings::RenderConfig;
use lumen_renderer::{
    passes::pick::PickPass,
    render_system::{RenderSystem, RenderSystemInitInfo},
};
use lumen_rhi::headless::{HeadlessRhi, HeadlessStats};
use lumen_scene::{game_object::GameObjectId, render_entity::RenderEntity, swap_context::RenderSwapContext};

use crate::demo_assets::AXIS_MESH;

/// pick 的结果：instance id 与其所属的 game object
pub type PickReply = Result<(usize, GameObjectId), String>;

/// 渲染线程控制消息
pub enum RenderThreadMessage {
    /// 窗口尺寸变化
    Resize(vk::Extent2D),
    /// 编辑器的 pick 查询，uv 相对于引擎内容视口
    Pick { uv: [f32; 2], reply: Sender<PickReply> },
    /// 显示或隐藏坐标轴
    ShowAxis(bool),
    /// 退出渲染线程
    Shutdown,
}

pub struct RenderThreadInitInfo {
    pub config: RenderConfig,
    pub global_rendering: GlobalRenderingConfig,
    pub asset_loader: Box<dyn AssetLoader>,
    /// 0 表示不限制
    pub frame_limit: u64,
}

/// 渲染线程结束时的统计
#[derive(Debug, Default)]
pub struct RenderThreadReport {
    pub frames: u64,
    pub stats: HeadlessStats,
    pub validation_errors: usize,
    /// 导致渲染线程提前退出的错误
    pub fatal_error: Option<String>,
}

/// 渲染线程句柄
pub struct RenderThread {
    sender: Sender<RenderThreadMessage>,
    thread_handle: Option<JoinHandle<RenderThreadReport>>,
    running: Arc<AtomicBool>,
    swap_context: Arc<RenderSwapContext>,
}

// new & init
impl RenderThread {
    /// 启动渲染线程，并等待 RenderSystem 创建完成
    pub fn spawn(init_info: RenderThreadInitInfo) -> anyhow::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<RenderThreadMessage>();
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded::<Result<Arc<RenderSwapContext>, String>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let thread_handle = thread::Builder::new()
            .name("RenderThread".to_string())
            .spawn(move || Self::render_thread_main(init_info, receiver, ready_sender, running_clone))
            .context("failed to spawn render thread")?;

        let swap_context = match ready_receiver.recv() {
            Ok(Ok(swap_context)) => swap_context,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(anyhow!("failed to create render system: {}", e));
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(anyhow!("render thread exited before initialization"));
            }
        };

        Ok(Self {
            sender,
            thread_handle: Some(thread_handle),
            running,
            swap_context,
        })
    }
}

// getters
impl RenderThread {
    #[inline]
    pub fn swap_context(&self) -> Arc<RenderSwapContext> {
        self.swap_context.clone()
    }

    /// 渲染线程遇到致命错误或达到帧数上限后返回 false
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

// update
impl RenderThread {
    pub fn resize(&self, extent: vk::Extent2D) {
        self.send(RenderThreadMessage::Resize(extent));
    }

    pub fn show_axis(&self, visible: bool) {
        self.send(RenderThreadMessage::ShowAxis(visible));
    }

    /// 阻塞到渲染线程处理完这次查询
    pub fn pick(&self, uv: [f32; 2]) -> anyhow::Result<(usize, GameObjectId)> {
        let (reply, receiver) = crossbeam_channel::bounded(1);
        if !self.send(RenderThreadMessage::Pick { uv, reply }) {
            return Err(anyhow!("render thread is not running"));
        }
        receiver.recv().context("render thread exited before answering pick")?.map_err(|e| anyhow!(e))
    }

    fn send(&self, message: RenderThreadMessage) -> bool {
        self.is_running() && self.sender.send(message).is_ok()
    }

    /// 请求渲染线程关闭
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.sender.send(RenderThreadMessage::Shutdown);
    }

    /// 等待渲染线程结束并取回统计
    pub fn join(mut self) -> anyhow::Result<RenderThreadReport> {
        self.shutdown();
        let handle = self.thread_handle.take().context("render thread is already joined")?;
        handle.join().map_err(|_| anyhow!("render thread panicked"))
    }
}

// render thread
impl RenderThread {
    fn render_thread_main(
        init_info: RenderThreadInitInfo,
        receiver: Receiver<RenderThreadMessage>,
        ready_sender: Sender<Result<Arc<RenderSwapContext>, String>>,
        running: Arc<AtomicBool>,
    ) -> RenderThreadReport {
        tracy_client::set_thread_name!("RenderThread");

        let RenderThreadInitInfo {
            config,
            global_rendering,
            asset_loader,
            frame_limit,
        } = init_info;
        let mut rhi = HeadlessRhi::new();
        PickPass::register_headless_program(&mut rhi);
        let render_system = RenderSystem::new(
            rhi,
            RenderSystemInitInfo {
                config,
                global_rendering,
                asset_loader,
                ui_overlay: None,
            },
        );
        let mut render_system = match render_system {
            Ok(render_system) => render_system,
            Err(e) => {
                log::error!("render thread: {}", e);
                running.store(false, Ordering::SeqCst);
                let _ = ready_sender.send(Err(e.to_string()));
                return RenderThreadReport {
                    fatal_error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };
        let _ = ready_sender.send(Ok(render_system.swap_context()));

        let axis = Self::create_axis(&mut render_system);
        let mut report = RenderThreadReport::default();

        'render_loop: while running.load(Ordering::SeqCst) {
            for message in receiver.try_iter() {
                match message {
                    RenderThreadMessage::Resize(extent) => render_system.notify_window_resized(extent),
                    RenderThreadMessage::Pick { uv, reply } => {
                        let result = render_system
                            .get_guid_of_picked_mesh(uv)
                            .map(|instance_id| (instance_id, render_system.get_game_object_id_by_instance_id(instance_id)))
                            .map_err(|e| e.to_string());
                        let _ = reply.send(result);
                    }
                    RenderThreadMessage::ShowAxis(visible) => {
                        render_system.set_visible_axis(if visible { axis.clone() } else { None });
                    }
                    RenderThreadMessage::Shutdown => {
                        log::info!("render thread: received shutdown signal");
                        break 'render_loop;
                    }
                }
            }

            if let Err(e) = render_system.tick() {
                log::error!("render thread: frame {} failed: {}", report.frames, e);
                report.fatal_error = Some(e.to_string());
                break;
            }
            report.frames += 1;
            if frame_limit != 0 && report.frames >= frame_limit {
                log::info!("render thread: reached frame limit {}", frame_limit);
                break;
            }
        }
        running.store(false, Ordering::SeqCst);

        log::info!("render thread: cleaning up...");
        let rhi = render_system.destroy();
        report.stats = rhi.stats().clone();
        report.validation_errors = rhi.validation_messages().len();
        for message in rhi.validation_messages() {
            log::warn!("validation: {}", message);
        }
        log::info!("render thread: exited after {} frames", report.frames);
        report
    }

    /// 坐标轴上传失败时不显示坐标轴
    fn create_axis(render_system: &mut RenderSystem<HeadlessRhi>) -> Option<RenderEntity> {
        let axis_mesh = MeshSourceDesc {
            mesh_file: AXIS_MESH.to_string(),
        };
        match render_system.create_axis(std::slice::from_ref(&axis_mesh)) {
            Ok(ids) => ids.first().map(|mesh_asset_id| RenderEntity {
                mesh_asset_id: *mesh_asset_id,
                bounding_box: render_system.resource_cache().get_cached_bounding_box(*mesh_asset_id),
                ..Default::default()
            }),
            Err(e) => {
                log::warn!("render thread: failed to create axis: {}", e);
                None
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
