mod app_config;
mod demo_assets;
mod logic_thread;
mod render_thread;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use lumen_asset::global_rendering::GlobalRenderingConfig;
use lumen_crate_tools::init_log::init_log;
use lumen_crate_tools::resource::LumenPath;

use crate::app_config::AppConfig;
use crate::logic_thread::{LogicWorld, LogicWorldConfig, spawn_logic_thread};
use crate::render_thread::{RenderThread, RenderThreadInitInfo};

fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

fn init_env() {
    std::panic::set_hook(Box::new(panic_handler));

    init_log();

    tracy_client::Client::start();
    tracy_client::set_thread_name!("MainThread");
}

/// 第一个命令行参数可以指定配置文件
fn config_file_path() -> PathBuf {
    std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| LumenPath::config_path("lumen-app.toml"))
}

fn load_global_rendering(config: &AppConfig) -> anyhow::Result<GlobalRenderingConfig> {
    match &config.global_rendering_file {
        Some(file) => GlobalRenderingConfig::load_from_file(&LumenPath::config_path(file))
            .with_context(|| format!("failed to load global rendering config {}", file)),
        None => Ok(GlobalRenderingConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    init_env();

    let config = AppConfig::load_or_default(&config_file_path())?;
    let global_rendering = load_global_rendering(&config)?;

    let render_thread = RenderThread::spawn(RenderThreadInitInfo {
        config: config.render.clone(),
        global_rendering,
        asset_loader: demo_assets::create_asset_loader(config.use_fs_assets),
        frame_limit: config.frame_count,
    })?;

    let world = LogicWorld::new(
        render_thread.swap_context(),
        LogicWorldConfig {
            game_object_count: config.game_object_count,
            tick_count: config.logic_tick_count,
            tick_interval: Duration::from_millis(config.logic_tick_interval_ms),
        },
    );
    let logic_thread = spawn_logic_thread(world, render_thread.running_flag())?;

    if let Some(extent) = config.resize_to {
        render_thread.resize(extent.into());
    }
    render_thread.show_axis(true);

    let logic_report = logic_thread.join().map_err(|_| anyhow!("logic thread panicked"))?;
    log::info!(
        "logic: {} ticks, {} spawned, {} deleted",
        logic_report.ticks,
        logic_report.spawned,
        logic_report.deleted
    );

    if render_thread.is_running() {
        match render_thread.pick([0.5, 0.5]) {
            Ok((instance_id, go_id)) => log::info!("pick at center: instance {} of {}", instance_id, go_id),
            Err(e) => log::warn!("pick at center failed: {}", e),
        }
    }

    let report = render_thread.join()?;
    log::info!(
        "render: {} frames, {} submits, {} presents, {} swapchains created",
        report.frames,
        report.stats.submits,
        report.stats.presents,
        report.stats.swapchains_created
    );

    if let Some(e) = report.fatal_error {
        return Err(anyhow!("render thread failed: {}", e));
    }
    if report.validation_errors > 0 {
        return Err(anyhow!("{} validation errors reported", report.validation_errors));
    }
    Ok(())
}
