//! 在 CPU 上模拟的 RHI 后端
//!
//! 不进行光栅化，但是会：
//! - 保存 buffer 与 image（mip 0）的内容，执行 copy 以及 render pass 的 clear
//! - 使用已注册 [`HeadlessProgram`] 的 draw 会被光栅化，见 [`program`]
//! - 维护 fence、semaphore 与 command buffer 的状态，并校验使用方式
//! - 统计创建的对象、提交、draw call 等，供测试断言
//! - 通过 `inject_*_fault` 模拟 swapchain 失效、device lost 以及对象创建失败
//!
//! 提交是同步执行的：`queue_submit` 返回时命令已经执行完毕，fence 已经 signal。

pub mod command;
mod objects;
pub mod program;

use std::collections::{HashMap, VecDeque};

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    desc::*,
    error::{RhiError, RhiResult},
    format::{format_texel_size, is_depth_format},
    handles::*,
    rhi::Rhi,
    submit_info::RhiSubmitInfo,
    swapchain::{RhiAcquiredImage, RhiSwapchainInfo, calculate_swapchain_extent, calculate_swapchain_image_count},
};
use command::HeadlessCommand;
use objects::*;
pub use objects::CommandBufferState;
pub use program::{HeadlessDrawInput, HeadlessProgram};
use program::{RasterTarget, rasterize_triangle};

/// 注入到下一次对应操作中的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessFault {
    OutOfDate,
    Suboptimal,
    DeviceLost,
}

/// 各类操作的计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: u64,
    pub images_created: u64,
    pub pipelines_created: u64,
    pub render_passes_created: u64,
    pub framebuffers_created: u64,
    pub descriptor_sets_allocated: u64,
    pub swapchains_created: u64,

    pub submits: u64,
    pub presents: u64,
    pub acquires: u64,
    pub device_wait_idle: u64,
    pub fence_waits: u64,
    pub single_time_submits: u64,

    pub draw_calls: u64,
    pub copy_commands: u64,

    pub validation_errors: u64,
}

struct HeadlessSwapchain {
    info: RhiSwapchainInfo,
    images: Vec<RhiImageHandle>,
    views: Vec<RhiImageViewHandle>,
    acquired: Vec<bool>,
    next_image: u32,
}

/// 提交执行时跟踪的绑定状态
#[derive(Default)]
struct ExecuteState {
    /// begin info 与当前的 subpass
    render_pass: Option<(RhiRenderPassBeginInfo, u32)>,
    pipeline: RhiPipelineHandle,
    /// set 序号 -> (set, 各个 dynamic binding 的 offset)
    sets: HashMap<u32, (RhiDescriptorSetHandle, Vec<(u32, u32)>)>,
    vertex_buffer: Option<(RhiBufferHandle, vk::DeviceSize)>,
    index_buffer: Option<(RhiBufferHandle, vk::DeviceSize, vk::IndexType)>,
    viewport: Option<vk::Viewport>,
    scissor: Option<vk::Rect2D>,
}

/// (image, layer)
struct DrawOutput {
    color: (RhiImageHandle, u32),
    depth: Option<(RhiImageHandle, u32)>,
    target: RasterTarget,
}

pub struct HeadlessRhi {
    buffers: SlotMap<RhiBufferHandle, HeadlessBuffer>,
    images: SlotMap<RhiImageHandle, HeadlessImage>,
    image_views: SlotMap<RhiImageViewHandle, HeadlessImageView>,
    samplers: SlotMap<RhiSamplerHandle, HeadlessSampler>,
    render_passes: SlotMap<RhiRenderPassHandle, HeadlessRenderPass>,
    framebuffers: SlotMap<RhiFramebufferHandle, HeadlessFramebuffer>,
    pipelines: SlotMap<RhiPipelineHandle, HeadlessPipeline>,
    descriptor_set_layouts: SlotMap<RhiDescriptorSetLayoutHandle, HeadlessDescriptorSetLayout>,
    descriptor_pools: SlotMap<RhiDescriptorPoolHandle, HeadlessDescriptorPool>,
    descriptor_sets: SlotMap<RhiDescriptorSetHandle, HeadlessDescriptorSet>,
    fences: SlotMap<RhiFenceHandle, HeadlessFence>,
    semaphores: SlotMap<RhiSemaphoreHandle, HeadlessSemaphore>,
    command_pools: SlotMap<RhiCommandPoolHandle, HeadlessCommandPool>,
    command_buffers: SlotMap<RhiCommandBufferHandle, HeadlessCommandBuffer>,

    swapchain: Option<HeadlessSwapchain>,
    surface_format: vk::Format,
    surface_capabilities: vk::SurfaceCapabilitiesKHR,

    /// single time commands 使用的 pool 与 fence，第一次使用时创建
    single_time: Option<(RhiCommandPoolHandle, RhiFenceHandle)>,
    /// 以 fragment shader 的名字为 key
    programs: HashMap<&'static str, Box<dyn HeadlessProgram>>,

    acquire_faults: VecDeque<HeadlessFault>,
    present_faults: VecDeque<HeadlessFault>,
    submit_faults: VecDeque<HeadlessFault>,
    /// 还允许成功创建的对象数量，为 0 时下一次创建返回 OutOfMemory
    create_budget: Option<u32>,
    device_lost: bool,

    limits: RhiLimits,
    stats: HeadlessStats,
    validation_messages: Vec<String>,
}

// new & init
impl Default for HeadlessRhi {
    fn default() -> Self {
        Self::new()
    }
}
impl HeadlessRhi {
    pub fn new() -> Self {
        log::info!("create headless rhi");
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            image_views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            render_passes: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            descriptor_set_layouts: SlotMap::with_key(),
            descriptor_pools: SlotMap::with_key(),
            descriptor_sets: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            command_pools: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),

            swapchain: None,
            surface_format: vk::Format::R8G8B8A8_SRGB,
            surface_capabilities: vk::SurfaceCapabilitiesKHR {
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                min_image_count: 2,
                max_image_count: 8,
                ..Default::default()
            },

            single_time: None,
            programs: HashMap::new(),

            acquire_faults: VecDeque::new(),
            present_faults: VecDeque::new(),
            submit_faults: VecDeque::new(),
            create_budget: None,
            device_lost: false,

            limits: RhiLimits::default(),
            stats: HeadlessStats::default(),
            validation_messages: Vec::new(),
        }
    }
}

// getters
impl HeadlessRhi {
    #[inline]
    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    #[inline]
    pub fn validation_messages(&self) -> &[String] {
        &self.validation_messages
    }

    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// 不包含 swapchain 的 image
    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.values().filter(|image| !image.owned_by_swapchain).count()
    }

    #[inline]
    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn live_render_pass_count(&self) -> usize {
        self.render_passes.len()
    }

    #[inline]
    pub fn live_descriptor_set_count(&self) -> usize {
        self.descriptor_sets.len()
    }

    /// 除 swapchain 之外仍然存活的对象总数
    pub fn live_object_count(&self) -> usize {
        self.buffers.len()
            + self.live_image_count()
            + self.image_views.values().filter(|view| !view.owned_by_swapchain).count()
            + self.samplers.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.pipelines.len()
            + self.descriptor_set_layouts.len()
            + self.descriptor_pools.len()
            + self.descriptor_sets.len()
            + self.fences.len()
            + self.semaphores.len()
            + self.command_pools.len()
            + self.command_buffers.len()
    }

    /// 测试用：command buffer 中录制的命令
    pub fn recorded_commands(&self, cmd: RhiCommandBufferHandle) -> Option<&[HeadlessCommand]> {
        self.command_buffers.get(cmd).map(|cmd| cmd.commands.as_slice())
    }

    pub fn command_buffer_state(&self, cmd: RhiCommandBufferHandle) -> Option<CommandBufferState> {
        self.command_buffers.get(cmd).map(|cmd| cmd.state)
    }

    pub fn is_fence_signaled(&self, fence: RhiFenceHandle) -> Option<bool> {
        self.fences.get(fence).map(|fence| fence.signaled)
    }

    /// 测试用：直接读取 image 中 mip 0 的一个 texel
    pub fn read_texel(&self, image: RhiImageHandle, layer: u32, x: u32, y: u32) -> Option<Vec<u8>> {
        let image = self.images.get(image)?;
        if x >= image.desc.extent.width || y >= image.desc.extent.height || layer >= image.desc.array_layers {
            return None;
        }
        let offset = image.texel_offset(layer, x, y);
        Some(image.data[offset..offset + image.texel_size()].to_vec())
    }

    /// 测试用：直接写入 image 中 mip 0 的一个 texel，模拟着色器的输出
    pub fn write_texel(&mut self, image: RhiImageHandle, layer: u32, x: u32, y: u32, texel: &[u8]) -> bool {
        let Some(image) = self.images.get_mut(image) else {
            return false;
        };
        if x >= image.desc.extent.width || y >= image.desc.extent.height || texel.len() != image.texel_size() {
            return false;
        }
        let offset = image.texel_offset(layer, x, y);
        image.data[offset..offset + texel.len()].copy_from_slice(texel);
        true
    }

    /// 通过 image view 找到 image
    pub fn image_of_view(&self, view: RhiImageViewHandle) -> Option<RhiImageHandle> {
        self.image_views.get(view).map(|view| view.image)
    }
}

// fault injection
impl HeadlessRhi {
    /// 下一次创建 swapchain 时使用的格式，用于模拟 surface 格式的变化
    pub fn set_surface_format(&mut self, format: vk::Format) {
        self.surface_format = format;
    }

    pub fn inject_acquire_fault(&mut self, fault: HeadlessFault) {
        self.acquire_faults.push_back(fault);
    }

    pub fn inject_present_fault(&mut self, fault: HeadlessFault) {
        self.present_faults.push_back(fault);
    }

    /// 使用 `fragment_shader` 的 draw 之后由 `program` 光栅化
    pub fn register_program(&mut self, fragment_shader: &'static str, program: Box<dyn HeadlessProgram>) {
        log::info!("headless program registered for <{}>", fragment_shader);
        self.programs.insert(fragment_shader, program);
    }

    pub fn inject_submit_fault(&mut self, fault: HeadlessFault) {
        self.submit_faults.push_back(fault);
    }

    /// 之后的 `successes` 次创建成功，再下一次创建返回 OutOfMemory，失败一次后恢复正常
    pub fn inject_create_fault(&mut self, successes: u32) {
        self.create_budget = Some(successes);
    }
}

// tools
impl HeadlessRhi {
    fn report_validation(&mut self, message: String) {
        log::error!("[headless validation] {}", message);
        self.stats.validation_errors += 1;
        self.validation_messages.push(message);
    }

    fn check_device(&self) -> RhiResult<()> {
        if self.device_lost { Err(RhiError::DeviceLost) } else { Ok(()) }
    }

    /// 所有 create 与 allocate 的入口检查
    fn check_create(&mut self, name: &str) -> RhiResult<()> {
        self.check_device()?;
        match self.create_budget {
            Some(0) => {
                self.create_budget = None;
                log::warn!("injected allocation failure when create <{}>", name);
                Err(RhiError::OutOfMemory(format!("<{}>", name)))
            }
            Some(remain) => {
                self.create_budget = Some(remain - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// 录制一条命令，`validate` 返回 Err 时报告 validation 错误并丢弃该命令
    fn record(
        &mut self,
        cmd: RhiCommandBufferHandle,
        command: HeadlessCommand,
        validate: impl FnOnce(&mut RecordingState) -> Result<(), String>,
    ) {
        let result = match self.command_buffers.get_mut(cmd) {
            None => Err(format!("record {:?} into an invalid command buffer", command)),
            Some(command_buffer) if command_buffer.state != CommandBufferState::Recording => Err(format!(
                "record {:?} into command buffer <{}> which is not recording",
                command, command_buffer.name
            )),
            Some(command_buffer) => match validate(&mut command_buffer.recording) {
                Ok(()) => {
                    command_buffer.commands.push(command);
                    Ok(())
                }
                Err(message) => Err(format!("<{}>: {}", command_buffer.name, message)),
            },
        };
        if let Err(message) = result {
            self.report_validation(message);
        }
    }

    fn outside_render_pass(state: &mut RecordingState, what: &str) -> Result<(), String> {
        if state.render_pass.is_some() {
            Err(format!("{} inside a render pass", what))
        } else {
            Ok(())
        }
    }

    fn inside_render_pass(state: &mut RecordingState, what: &str) -> Result<(), String> {
        if state.render_pass.is_none() {
            Err(format!("{} outside a render pass", what))
        } else if !state.pipeline_bound {
            Err(format!("{} without a bound pipeline", what))
        } else {
            Ok(())
        }
    }

    fn free_command_buffer(&mut self, cmd: RhiCommandBufferHandle) {
        if let Some(command_buffer) = self.command_buffers.remove(cmd)
            && let Some(pool) = self.command_pools.get_mut(command_buffer.pool)
        {
            pool.command_buffers.retain(|c| *c != cmd);
        }
    }

    fn destroy_swapchain_objects(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            for view in swapchain.views {
                self.image_views.remove(view);
            }
            for image in swapchain.images {
                self.images.remove(image);
            }
        }
    }

    fn execute(&mut self, cmd: RhiCommandBufferHandle) {
        let commands = match self.command_buffers.get(cmd) {
            Some(command_buffer) => command_buffer.commands.clone(),
            None => return,
        };
        let mut state = ExecuteState::default();
        for command in &commands {
            match command {
                HeadlessCommand::BeginRenderPass(info) => {
                    self.execute_clear(info);
                    state.render_pass = Some((info.clone(), 0));
                }
                HeadlessCommand::NextSubpass => {
                    if let Some((_, subpass)) = state.render_pass.as_mut() {
                        *subpass += 1;
                    }
                }
                HeadlessCommand::EndRenderPass => state.render_pass = None,
                HeadlessCommand::BindPipeline(pipeline) => state.pipeline = *pipeline,
                HeadlessCommand::BindDescriptorSets {
                    first_set,
                    sets,
                    dynamic_offsets,
                    ..
                } => self.bind_sets(&mut state, *first_set, sets, dynamic_offsets),
                HeadlessCommand::BindVertexBuffers { first_binding, buffers } => {
                    if *first_binding == 0 {
                        state.vertex_buffer = buffers.first().copied();
                    }
                }
                HeadlessCommand::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => state.index_buffer = Some((*buffer, *offset, *index_type)),
                HeadlessCommand::SetViewport(viewport) => state.viewport = Some(*viewport),
                HeadlessCommand::SetScissor(scissor) => state.scissor = Some(*scissor),
                HeadlessCommand::Draw {
                    vertex_count,
                    instance_count,
                } => {
                    self.stats.draw_calls += 1;
                    if !self.has_program(&state) {
                        continue;
                    }
                    let vertices = (0..*vertex_count).collect_vec();
                    self.execute_draw(&state, &vertices, *instance_count);
                }
                HeadlessCommand::DrawIndexed {
                    index_count,
                    instance_count,
                } => {
                    self.stats.draw_calls += 1;
                    if !self.has_program(&state) {
                        continue;
                    }
                    match self.read_indices(&state, *index_count) {
                        Some(indices) => self.execute_draw(&state, &indices, *instance_count),
                        None => self.report_validation("draw indexed without a valid index buffer".to_string()),
                    }
                }
                HeadlessCommand::CopyBuffer { src, dst, regions } => {
                    self.stats.copy_commands += 1;
                    self.execute_copy_buffer(*src, *dst, regions);
                }
                HeadlessCommand::CopyBufferToImage { src, dst, regions } => {
                    self.stats.copy_commands += 1;
                    self.execute_copy_buffer_image(*src, *dst, regions, true);
                }
                HeadlessCommand::CopyImageToBuffer { src, dst, regions } => {
                    self.stats.copy_commands += 1;
                    self.execute_copy_buffer_image(*dst, *src, regions, false);
                }
                _ => {}
            }
        }
    }

    /// dynamic offset 按 set 的顺序、set 内按 binding 从小到大依次消耗
    fn bind_sets(
        &self,
        state: &mut ExecuteState,
        first_set: u32,
        sets: &[RhiDescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        let mut offsets = dynamic_offsets.iter().copied();
        for (index, set) in sets.iter().enumerate() {
            let dynamic_bindings = self
                .descriptor_sets
                .get(*set)
                .and_then(|set| self.descriptor_set_layouts.get(set.layout))
                .map(|layout| {
                    layout
                        .bindings
                        .iter()
                        .filter(|binding| {
                            matches!(
                                binding.ty,
                                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                            )
                        })
                        .map(|binding| binding.binding)
                        .sorted()
                        .collect_vec()
                })
                .unwrap_or_default();
            let dynamic = dynamic_bindings.into_iter().filter_map(|binding| Some((binding, offsets.next()?))).collect();
            state.sets.insert(first_set + index as u32, (*set, dynamic));
        }
    }

    fn has_program(&self, state: &ExecuteState) -> bool {
        self.pipelines
            .get(state.pipeline)
            .and_then(|pipeline| pipeline.desc.fragment_shader)
            .is_some_and(|shader| self.programs.contains_key(shader))
    }

    fn read_indices(&self, state: &ExecuteState, index_count: u32) -> Option<Vec<u32>> {
        let (buffer, offset, index_type) = state.index_buffer?;
        let data = self.buffers.get(buffer)?.data.get(offset as usize..)?;
        let size = if index_type == vk::IndexType::UINT16 { 2 } else { 4 };
        if data.len() < index_count as usize * size {
            return None;
        }
        let indices = data
            .chunks_exact(size)
            .take(index_count as usize)
            .map(|bytes| match bytes {
                [a, b] => u16::from_le_bytes([*a, *b]) as u32,
                [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
                _ => 0,
            })
            .collect();
        Some(indices)
    }

    /// 只有注册了 program 的 pipeline 才会被光栅化
    fn execute_draw(&mut self, state: &ExecuteState, vertices: &[u32], instance_count: u32) {
        let Some(pipeline) = self.pipelines.get(state.pipeline) else {
            return;
        };
        let Some(program) = pipeline.desc.fragment_shader.and_then(|shader| self.programs.get(shader)) else {
            return;
        };
        let Some(output) = self.output_attachments(state, pipeline.desc.depth_test) else {
            return;
        };
        let Some(color_image) = self.images.get(output.color.0) else {
            return;
        };
        let texel_size = color_image.texel_size();
        let color_extent = color_image.desc.extent;

        let input = self.draw_input(state, instance_count);
        let mut depth = output.depth.and_then(|(image, layer)| {
            let image = self.images.get(image)?;
            let start = image.texel_offset(layer, 0, 0);
            let values =
                image.data[start..start + image.layer_size()].chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            Some((values.collect_vec(), image.desc.extent.width))
        });
        let depth_write = pipeline.desc.depth_write;

        let mut fragments: Vec<(u32, u32, Vec<u8>)> = Vec::new();
        for instance in 0..instance_count {
            let Some(texel) = program.fragment(&input, instance) else {
                continue;
            };
            if texel.len() != texel_size {
                continue;
            }
            for triangle in vertices.chunks_exact(3) {
                let positions = [0, 1, 2].map(|i| program.vertex(&input, instance, triangle[i]));
                let [Some(a), Some(b), Some(c)] = positions else {
                    continue;
                };
                rasterize_triangle(&output.target, [a, b, c], |x, y, z| {
                    if x >= color_extent.width || y >= color_extent.height {
                        return;
                    }
                    if let Some((values, width)) = depth.as_mut() {
                        let Some(stored) = values.get_mut((y * *width + x) as usize) else {
                            return;
                        };
                        if z >= *stored {
                            return;
                        }
                        if depth_write {
                            *stored = z;
                        }
                    }
                    fragments.push((x, y, texel.clone()));
                });
            }
        }

        let (color, color_layer) = output.color;
        for (x, y, texel) in fragments {
            self.write_texel(color, color_layer, x, y, &texel);
        }
        if let (Some((image, layer)), Some((values, _))) = (output.depth, depth)
            && depth_write
            && let Some(image) = self.images.get_mut(image)
        {
            let start = image.texel_offset(layer, 0, 0);
            let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect_vec();
            image.data[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }

    /// 当前 subpass 的第一个 color attachment 与 depth attachment，以及光栅化的区域
    fn output_attachments(&self, state: &ExecuteState, depth_test: bool) -> Option<DrawOutput> {
        let (info, subpass) = state.render_pass.as_ref()?;
        let render_pass = self.render_passes.get(info.render_pass)?;
        let framebuffer = self.framebuffers.get(info.framebuffer)?;
        let subpass = render_pass.desc.subpasses.get(*subpass as usize)?;
        let image_of = |attachment: u32| -> Option<(RhiImageHandle, u32)> {
            let view = self.image_views.get(*framebuffer.desc.attachments.get(attachment as usize)?)?;
            Some((view.image, view.desc.base_array_layer))
        };

        let color = image_of(*subpass.color_attachments.first()?)?;
        let depth = if depth_test { subpass.depth_attachment.and_then(image_of) } else { None };
        let area = info.render_area;
        let scissor = state.scissor.unwrap_or(area);
        let clip_min = (area.offset.x.max(scissor.offset.x), area.offset.y.max(scissor.offset.y));
        let clip_max = (
            (area.offset.x + area.extent.width as i32).min(scissor.offset.x + scissor.extent.width as i32),
            (area.offset.y + area.extent.height as i32).min(scissor.offset.y + scissor.extent.height as i32),
        );
        let viewport = state.viewport.unwrap_or(vk::Viewport {
            x: area.offset.x as f32,
            y: area.offset.y as f32,
            width: area.extent.width as f32,
            height: area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        Some(DrawOutput {
            color,
            depth,
            target: RasterTarget {
                viewport,
                clip: vk::Rect2D {
                    offset: vk::Offset2D {
                        x: clip_min.0,
                        y: clip_min.1,
                    },
                    extent: vk::Extent2D {
                        width: (clip_max.0 - clip_min.0).max(0) as u32,
                        height: (clip_max.1 - clip_min.1).max(0) as u32,
                    },
                },
            },
        })
    }

    fn draw_input(&self, state: &ExecuteState, instance_count: u32) -> HeadlessDrawInput<'_> {
        let vertex_data = state
            .vertex_buffer
            .and_then(|(buffer, offset)| self.buffers.get(buffer)?.data.get(offset as usize..))
            .unwrap_or_default();

        let mut buffers = Vec::new();
        for (set_index, (set, dynamic)) in &state.sets {
            let Some(set) = self.descriptor_sets.get(*set) else {
                continue;
            };
            for (binding, write) in &set.writes {
                let RhiDescriptorResource::Buffer { buffer, offset, range } = write.resource else {
                    continue;
                };
                let Some(data) = self.buffers.get(buffer).map(|buffer| buffer.data.as_slice()) else {
                    continue;
                };
                let dynamic_offset = dynamic.iter().find(|(b, _)| b == binding).map_or(0, |(_, o)| *o as usize);
                let start = (offset as usize + dynamic_offset).min(data.len());
                let end = if range == vk::WHOLE_SIZE { data.len() } else { (start + range as usize).min(data.len()) };
                buffers.push(((*set_index, *binding), &data[start..end]));
            }
        }

        HeadlessDrawInput {
            vertex_data,
            instance_count,
            buffers,
        }
    }

    fn execute_clear(&mut self, info: &RhiRenderPassBeginInfo) {
        let (Some(render_pass), Some(framebuffer)) =
            (self.render_passes.get(info.render_pass), self.framebuffers.get(info.framebuffer))
        else {
            return;
        };
        let targets = render_pass
            .desc
            .attachments
            .iter()
            .zip(framebuffer.desc.attachments.iter())
            .enumerate()
            .filter(|(_, (attachment, _))| attachment.load_op == vk::AttachmentLoadOp::CLEAR)
            .filter_map(|(index, (_, view))| {
                let view = self.image_views.get(*view)?;
                Some((index, view.image, view.desc.base_array_layer, view.desc.layer_count))
            })
            .collect_vec();

        for (index, image, base_layer, layer_count) in targets {
            let Some(clear) = info.clear_values.get(index) else {
                continue;
            };
            let Some(image) = self.images.get_mut(image) else {
                continue;
            };
            let texel = encode_clear_texel(image.desc.format, clear);
            let layer_size = image.layer_size();
            let last_layer = base_layer.saturating_add(layer_count).min(image.desc.array_layers);
            for layer in base_layer..last_layer {
                let start = layer as usize * layer_size;
                for chunk in image.data[start..start + layer_size].chunks_exact_mut(texel.len()) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }

    fn execute_copy_buffer(&mut self, src: RhiBufferHandle, dst: RhiBufferHandle, regions: &[vk::BufferCopy]) {
        for region in regions {
            let Some(src_buffer) = self.buffers.get(src) else {
                return;
            };
            let (src_start, size) = (region.src_offset as usize, region.size as usize);
            if src_start + size > src_buffer.data.len() {
                let message = format!("copy buffer: source range out of bounds of <{}>", src_buffer.name);
                self.report_validation(message);
                continue;
            }
            let bytes = src_buffer.data[src_start..src_start + size].to_vec();

            let Some(dst_buffer) = self.buffers.get_mut(dst) else {
                return;
            };
            let dst_start = region.dst_offset as usize;
            if dst_start + size > dst_buffer.data.len() {
                let message = format!("copy buffer: destination range out of bounds of <{}>", dst_buffer.name);
                self.report_validation(message);
                continue;
            }
            dst_buffer.data[dst_start..dst_start + size].copy_from_slice(&bytes);
        }
    }

    /// buffer 中的数据按 (layer, row) 紧密排列
    fn execute_copy_buffer_image(
        &mut self,
        buffer: RhiBufferHandle,
        image: RhiImageHandle,
        regions: &[RhiBufferImageCopy],
        to_image: bool,
    ) {
        for region in regions {
            // 只保存了 mip 0
            if region.mip_level != 0 {
                continue;
            }
            let (Some(buffer_obj), Some(image_obj)) = (self.buffers.get(buffer), self.images.get(image)) else {
                return;
            };
            let texel_size = image_obj.texel_size();
            let row_size = region.image_extent.width as usize * texel_size;
            let rows = region.image_extent.height as usize;
            let layers = region.layer_count as usize;
            let total = row_size * rows * layers;

            let out_of_image = region.image_offset.x < 0
                || region.image_offset.y < 0
                || region.image_offset.x as u32 + region.image_extent.width > image_obj.desc.extent.width
                || region.image_offset.y as u32 + region.image_extent.height > image_obj.desc.extent.height
                || region.base_array_layer + region.layer_count > image_obj.desc.array_layers;
            let out_of_buffer = region.buffer_offset as usize + total > buffer_obj.data.len();
            if out_of_image || out_of_buffer {
                let message = format!("copy between <{}> and <{}> out of bounds", buffer_obj.name, image_obj.name);
                self.report_validation(message);
                continue;
            }

            let mut row_ranges = Vec::with_capacity(rows * layers);
            for layer in 0..region.layer_count {
                for row in 0..region.image_extent.height {
                    let buffer_offset =
                        region.buffer_offset as usize + ((layer * region.image_extent.height + row) as usize) * row_size;
                    let image_offset = image_obj.texel_offset(
                        region.base_array_layer + layer,
                        region.image_offset.x as u32,
                        region.image_offset.y as u32 + row,
                    );
                    row_ranges.push((buffer_offset, image_offset));
                }
            }

            if to_image {
                let src = self.buffers[buffer].data.clone();
                let dst = &mut self.images[image].data;
                for (buffer_offset, image_offset) in row_ranges {
                    dst[image_offset..image_offset + row_size].copy_from_slice(&src[buffer_offset..buffer_offset + row_size]);
                }
            } else {
                let src = self.images[image].data.clone();
                let dst = &mut self.buffers[buffer].data;
                for (buffer_offset, image_offset) in row_ranges {
                    dst[buffer_offset..buffer_offset + row_size].copy_from_slice(&src[image_offset..image_offset + row_size]);
                }
            }
        }
    }
}

impl Rhi for HeadlessRhi {
    fn name(&self) -> &str {
        "headless"
    }

    fn limits(&self) -> RhiLimits {
        self.limits
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn device_wait_idle(&mut self) -> RhiResult<()> {
        self.check_device()?;
        self.stats.device_wait_idle += 1;
        Ok(())
    }

    // swapchain
    fn create_swapchain(&mut self, window_extent: vk::Extent2D) -> RhiResult<RhiSwapchainInfo> {
        self.check_device()?;
        let extent = calculate_swapchain_extent(&self.surface_capabilities, window_extent);
        let image_count = calculate_swapchain_image_count(&self.surface_capabilities);
        self.destroy_swapchain_objects();

        let info = RhiSwapchainInfo {
            extent,
            image_format: self.surface_format,
            image_count,
            depth_format: self.depth_format(),
        };
        let mut images = Vec::with_capacity(image_count as usize);
        let mut views = Vec::with_capacity(image_count as usize);
        for index in 0..image_count {
            let desc = RhiImageDesc::new_2d(
                extent,
                self.surface_format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            );
            let image = self.images.insert(HeadlessImage::new(desc, &format!("swapchain-{}", index), true));
            let view = self.image_views.insert(HeadlessImageView {
                image,
                desc: RhiImageViewDesc::new_2d(self.surface_format, vk::ImageAspectFlags::COLOR),
                owned_by_swapchain: true,
            });
            images.push(image);
            views.push(view);
        }

        self.swapchain = Some(HeadlessSwapchain {
            info,
            images,
            views,
            acquired: vec![false; image_count as usize],
            next_image: 0,
        });
        self.stats.swapchains_created += 1;
        log::info!(
            "create swapchain: {}x{}, {:?}, {} images",
            extent.width,
            extent.height,
            self.surface_format,
            image_count
        );
        Ok(info)
    }

    fn destroy_swapchain(&mut self) {
        self.destroy_swapchain_objects();
    }

    fn swapchain_info(&self) -> Option<RhiSwapchainInfo> {
        self.swapchain.as_ref().map(|swapchain| swapchain.info)
    }

    fn swapchain_image_views(&self) -> Vec<RhiImageViewHandle> {
        self.swapchain.as_ref().map(|swapchain| swapchain.views.clone()).unwrap_or_default()
    }

    fn acquire_next_image(&mut self, signal: RhiSemaphoreHandle, _timeout_ns: u64) -> RhiResult<RhiAcquiredImage> {
        let _span = tracy_client::span!("HeadlessRhi::acquire_next_image");
        self.check_device()?;
        if self.swapchain.is_none() {
            return Err(RhiError::Validation("acquire without a swapchain".to_string()));
        }
        if !self.semaphores.contains_key(signal) {
            return Err(RhiError::invalid_handle("semaphore"));
        }

        let suboptimal = match self.acquire_faults.pop_front() {
            Some(HeadlessFault::OutOfDate) => {
                log::warn!("swapchain is out of date when acquire next image");
                return Err(RhiError::SwapchainOutOfDate);
            }
            Some(HeadlessFault::DeviceLost) => {
                self.device_lost = true;
                return Err(RhiError::DeviceLost);
            }
            Some(HeadlessFault::Suboptimal) => true,
            None => false,
        };

        let Some(swapchain) = self.swapchain.as_mut() else {
            return Err(RhiError::Validation("acquire without a swapchain".to_string()));
        };
        let count = swapchain.info.image_count;
        let Some(image_index) =
            (0..count).map(|i| (swapchain.next_image + i) % count).find(|i| !swapchain.acquired[*i as usize])
        else {
            return Err(RhiError::Validation("all swapchain images are acquired".to_string()));
        };
        swapchain.acquired[image_index as usize] = true;
        swapchain.next_image = (image_index + 1) % count;

        if let Some(semaphore) = self.semaphores.get_mut(signal) {
            if semaphore.signaled {
                let message = format!("acquire signals semaphore <{}> which is already signaled", semaphore.name);
                self.report_validation(message);
            } else {
                semaphore.signaled = true;
            }
        }

        self.stats.acquires += 1;
        if suboptimal {
            log::warn!("swapchain acquire image index {} is not optimal", image_index);
        }
        Ok(RhiAcquiredImage {
            image_index,
            suboptimal,
        })
    }

    fn queue_present(&mut self, image_index: u32, wait_semaphores: &[RhiSemaphoreHandle]) -> RhiResult<bool> {
        let _span = tracy_client::span!("HeadlessRhi::queue_present");
        self.check_device()?;

        for semaphore in wait_semaphores {
            match self.semaphores.get_mut(*semaphore) {
                Some(s) if s.signaled => s.signaled = false,
                Some(s) => {
                    let message = format!("present waits on semaphore <{}> which will never be signaled", s.name);
                    self.report_validation(message);
                }
                None => return Err(RhiError::invalid_handle("semaphore")),
            }
        }

        let acquired = self
            .swapchain
            .as_mut()
            .and_then(|swapchain| swapchain.acquired.get_mut(image_index as usize))
            .map(|acquired| std::mem::replace(acquired, false));
        if acquired != Some(true) {
            self.report_validation(format!("present swapchain image {} which is not acquired", image_index));
            return Err(RhiError::Validation(format!("present image {} not acquired", image_index)));
        }

        match self.present_faults.pop_front() {
            Some(HeadlessFault::OutOfDate) => {
                log::warn!("swapchain is out of date when present image");
                Err(RhiError::SwapchainOutOfDate)
            }
            Some(HeadlessFault::DeviceLost) => {
                self.device_lost = true;
                Err(RhiError::DeviceLost)
            }
            Some(HeadlessFault::Suboptimal) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                self.stats.presents += 1;
                Ok(true)
            }
            None => {
                self.stats.presents += 1;
                Ok(false)
            }
        }
    }

    // buffer & image
    fn create_buffer(&mut self, desc: &RhiBufferDesc, name: &str) -> RhiResult<RhiBufferHandle> {
        self.check_create(name)?;
        if desc.size == 0 {
            return Err(RhiError::Validation(format!("buffer <{}> has zero size", name)));
        }
        self.stats.buffers_created += 1;
        Ok(self.buffers.insert(HeadlessBuffer {
            desc: desc.clone(),
            name: name.to_string(),
            data: vec![0; desc.size as usize],
        }))
    }

    fn destroy_buffer(&mut self, buffer: RhiBufferHandle) {
        self.buffers.remove(buffer);
    }

    fn buffer_size(&self, buffer: RhiBufferHandle) -> Option<vk::DeviceSize> {
        self.buffers.get(buffer).map(|buffer| buffer.desc.size)
    }

    fn write_buffer(&mut self, buffer: RhiBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        let buffer = self.buffers.get_mut(buffer).ok_or(RhiError::invalid_handle("buffer"))?;
        if !buffer.desc.is_host_visible() {
            return Err(RhiError::Validation(format!("write to device local buffer <{}>", buffer.name)));
        }
        let start = offset as usize;
        if start + data.len() > buffer.data.len() {
            return Err(RhiError::Validation(format!(
                "write [{}, {}) out of bounds of <{}> ({} bytes)",
                start,
                start + data.len(),
                buffer.name,
                buffer.data.len()
            )));
        }
        buffer.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: RhiBufferHandle, offset: vk::DeviceSize, dst: &mut [u8]) -> RhiResult<()> {
        let buffer = self.buffers.get(buffer).ok_or(RhiError::invalid_handle("buffer"))?;
        if !buffer.desc.is_host_visible() {
            return Err(RhiError::Validation(format!("read from device local buffer <{}>", buffer.name)));
        }
        let start = offset as usize;
        if start + dst.len() > buffer.data.len() {
            return Err(RhiError::Validation(format!("read out of bounds of <{}>", buffer.name)));
        }
        dst.copy_from_slice(&buffer.data[start..start + dst.len()]);
        Ok(())
    }

    fn create_image(&mut self, desc: &RhiImageDesc, name: &str) -> RhiResult<RhiImageHandle> {
        self.check_create(name)?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::Validation(format!("image <{}> has zero extent", name)));
        }
        if format_texel_size(desc.format).is_none() {
            return Err(RhiError::Validation(format!("image <{}> uses unsupported format {:?}", name, desc.format)));
        }
        self.stats.images_created += 1;
        Ok(self.images.insert(HeadlessImage::new(desc.clone(), name, false)))
    }

    fn destroy_image(&mut self, image: RhiImageHandle) {
        if self.images.get(image).is_some_and(|image| image.owned_by_swapchain) {
            self.report_validation("destroy an image owned by the swapchain".to_string());
            return;
        }
        self.images.remove(image);
    }

    fn create_image_view(
        &mut self,
        image: RhiImageHandle,
        desc: &RhiImageViewDesc,
        name: &str,
    ) -> RhiResult<RhiImageViewHandle> {
        let image_obj = self.images.get(image).ok_or(RhiError::invalid_handle("image"))?;
        if desc.base_array_layer.saturating_add(desc.layer_count) > image_obj.desc.array_layers
            || desc.base_mip_level.saturating_add(desc.level_count) > image_obj.desc.mip_levels
        {
            return Err(RhiError::Validation(format!(
                "view <{}> exceeds the subresource range of <{}>",
                name, image_obj.name
            )));
        }
        if is_depth_format(desc.format) != is_depth_format(image_obj.desc.format) {
            return Err(RhiError::Validation(format!("view <{}> format mismatch", name)));
        }
        Ok(self.image_views.insert(HeadlessImageView {
            image,
            desc: *desc,
            owned_by_swapchain: false,
        }))
    }

    fn destroy_image_view(&mut self, view: RhiImageViewHandle) {
        if self.image_views.get(view).is_some_and(|view| view.owned_by_swapchain) {
            return;
        }
        self.image_views.remove(view);
    }

    fn create_sampler(&mut self, desc: &RhiSamplerDesc, _name: &str) -> RhiResult<RhiSamplerHandle> {
        self.check_device()?;
        Ok(self.samplers.insert(HeadlessSampler { _desc: *desc }))
    }

    fn destroy_sampler(&mut self, sampler: RhiSamplerHandle) {
        self.samplers.remove(sampler);
    }

    // render pass & pipeline
    fn create_render_pass(&mut self, desc: &RhiRenderPassDesc, name: &str) -> RhiResult<RhiRenderPassHandle> {
        self.check_device()?;
        let attachment_count = desc.attachments.len() as u32;
        for subpass in &desc.subpasses {
            let out_of_range = subpass
                .input_attachments
                .iter()
                .chain(subpass.color_attachments.iter())
                .chain(subpass.depth_attachment.iter())
                .any(|index| *index >= attachment_count);
            if out_of_range {
                return Err(RhiError::Validation(format!(
                    "render pass <{}> subpass <{}> references a missing attachment",
                    name, subpass.name
                )));
            }
        }
        if desc.subpasses.is_empty() {
            return Err(RhiError::Validation(format!("render pass <{}> has no subpass", name)));
        }
        self.stats.render_passes_created += 1;
        Ok(self.render_passes.insert(HeadlessRenderPass {
            desc: desc.clone(),
            name: name.to_string(),
        }))
    }

    fn destroy_render_pass(&mut self, render_pass: RhiRenderPassHandle) {
        self.render_passes.remove(render_pass);
    }

    fn create_framebuffer(&mut self, desc: &RhiFramebufferDesc, name: &str) -> RhiResult<RhiFramebufferHandle> {
        self.check_device()?;
        let render_pass = self.render_passes.get(desc.render_pass).ok_or(RhiError::invalid_handle("render pass"))?;
        if render_pass.desc.attachments.len() != desc.attachments.len() {
            return Err(RhiError::Validation(format!(
                "framebuffer <{}> has {} attachments, render pass <{}> expects {}",
                name,
                desc.attachments.len(),
                render_pass.name,
                render_pass.desc.attachments.len()
            )));
        }
        for (attachment, view) in render_pass.desc.attachments.iter().zip(desc.attachments.iter()) {
            let view = self.image_views.get(*view).ok_or(RhiError::invalid_handle("image view"))?;
            let image = self.images.get(view.image).ok_or(RhiError::invalid_handle("image"))?;
            if image.desc.extent.width < desc.extent.width || image.desc.extent.height < desc.extent.height {
                return Err(RhiError::Validation(format!(
                    "framebuffer <{}>: attachment <{}> is smaller than the framebuffer",
                    name, image.name
                )));
            }
            if view.desc.format != attachment.format {
                return Err(RhiError::Validation(format!(
                    "framebuffer <{}>: attachment <{}> format {:?} does not match {:?}",
                    name, image.name, view.desc.format, attachment.format
                )));
            }
        }
        self.stats.framebuffers_created += 1;
        Ok(self.framebuffers.insert(HeadlessFramebuffer { desc: desc.clone() }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: RhiFramebufferHandle) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_graphics_pipeline(&mut self, desc: &RhiPipelineDesc, name: &str) -> RhiResult<RhiPipelineHandle> {
        self.check_device()?;
        let render_pass = self.render_passes.get(desc.render_pass).ok_or(RhiError::invalid_handle("render pass"))?;
        let Some(subpass) = render_pass.desc.subpasses.get(desc.subpass as usize) else {
            return Err(RhiError::Validation(format!(
                "pipeline <{}> uses subpass {} of <{}>",
                name, desc.subpass, render_pass.name
            )));
        };
        if subpass.color_attachments.len() as u32 != desc.color_attachment_count {
            return Err(RhiError::Validation(format!(
                "pipeline <{}> writes {} color attachments, subpass <{}> has {}",
                name,
                desc.color_attachment_count,
                subpass.name,
                subpass.color_attachments.len()
            )));
        }
        if desc.descriptor_set_layouts.iter().any(|layout| !self.descriptor_set_layouts.contains_key(*layout)) {
            return Err(RhiError::invalid_handle("descriptor set layout"));
        }
        self.stats.pipelines_created += 1;
        Ok(self.pipelines.insert(HeadlessPipeline {
            desc: desc.clone(),
            name: name.to_string(),
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: RhiPipelineHandle) {
        self.pipelines.remove(pipeline);
    }

    // descriptor
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[RhiDescriptorBinding],
        name: &str,
    ) -> RhiResult<RhiDescriptorSetLayoutHandle> {
        if !bindings.iter().map(|binding| binding.binding).all_unique() {
            return Err(RhiError::Validation(format!("descriptor set layout <{}> has duplicated bindings", name)));
        }
        Ok(self.descriptor_set_layouts.insert(HeadlessDescriptorSetLayout {
            bindings: bindings.to_vec(),
        }))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: RhiDescriptorSetLayoutHandle) {
        self.descriptor_set_layouts.remove(layout);
    }

    fn create_descriptor_pool(
        &mut self,
        desc: &RhiDescriptorPoolDesc,
        _name: &str,
    ) -> RhiResult<RhiDescriptorPoolHandle> {
        Ok(self.descriptor_pools.insert(HeadlessDescriptorPool {
            desc: desc.clone(),
            sets: Vec::new(),
        }))
    }

    fn destroy_descriptor_pool(&mut self, pool: RhiDescriptorPoolHandle) {
        if let Some(pool) = self.descriptor_pools.remove(pool) {
            for set in pool.sets {
                self.descriptor_sets.remove(set);
            }
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: RhiDescriptorPoolHandle,
        layout: RhiDescriptorSetLayoutHandle,
        name: &str,
    ) -> RhiResult<RhiDescriptorSetHandle> {
        if !self.descriptor_set_layouts.contains_key(layout) {
            return Err(RhiError::invalid_handle("descriptor set layout"));
        }
        let pool_obj = self.descriptor_pools.get(pool).ok_or(RhiError::invalid_handle("descriptor pool"))?;
        if pool_obj.sets.len() as u32 >= pool_obj.desc.max_sets {
            return Err(RhiError::OutOfMemory(format!("descriptor set <{}>", name)));
        }
        let set = self.descriptor_sets.insert(HeadlessDescriptorSet {
            pool,
            layout,
            writes: Default::default(),
        });
        self.descriptor_pools[pool].sets.push(set);
        self.stats.descriptor_sets_allocated += 1;
        Ok(set)
    }

    fn update_descriptor_set(&mut self, set: RhiDescriptorSetHandle, writes: &[RhiDescriptorWrite]) -> RhiResult<()> {
        let set_obj = self.descriptor_sets.get(set).ok_or(RhiError::invalid_handle("descriptor set"))?;
        debug_assert!(self.descriptor_pools.contains_key(set_obj.pool));
        let layout = self
            .descriptor_set_layouts
            .get(set_obj.layout)
            .ok_or(RhiError::invalid_handle("descriptor set layout"))?;
        for write in writes {
            let Some(binding) = layout.bindings.iter().find(|binding| binding.binding == write.binding) else {
                return Err(RhiError::Validation(format!("descriptor binding {} does not exist", write.binding)));
            };
            if binding.ty != write.ty {
                return Err(RhiError::Validation(format!(
                    "descriptor binding {} expects {:?}, got {:?}",
                    write.binding, binding.ty, write.ty
                )));
            }
            let resource_alive = match write.resource {
                RhiDescriptorResource::Buffer { buffer, .. } => self.buffers.contains_key(buffer),
                RhiDescriptorResource::Image { view, sampler, .. } => {
                    self.image_views.contains_key(view) && sampler.is_none_or(|s| self.samplers.contains_key(s))
                }
            };
            if !resource_alive {
                return Err(RhiError::invalid_handle("descriptor resource"));
            }
        }
        let set_obj = &mut self.descriptor_sets[set];
        for write in writes {
            set_obj.writes.insert(write.binding, *write);
        }
        Ok(())
    }

    // sync
    fn create_fence(&mut self, signaled: bool, name: &str) -> RhiResult<RhiFenceHandle> {
        self.check_create(name)?;
        Ok(self.fences.insert(HeadlessFence {
            signaled,
            name: name.to_string(),
        }))
    }

    fn destroy_fence(&mut self, fence: RhiFenceHandle) {
        self.fences.remove(fence);
    }

    fn wait_for_fences(&mut self, fences: &[RhiFenceHandle], timeout_ns: u64) -> RhiResult<()> {
        let _span = tracy_client::span!("HeadlessRhi::wait_for_fences");
        self.check_device()?;
        self.stats.fence_waits += 1;
        for fence in fences {
            let fence = self.fences.get(*fence).ok_or(RhiError::invalid_handle("fence"))?;
            // 提交是同步执行的，未 signal 的 fence 不会再被 signal
            if !fence.signaled {
                log::error!("wait for fence <{}> which is never submitted", fence.name);
                return Err(RhiError::FenceTimeout { timeout_ns });
            }
        }
        Ok(())
    }

    fn reset_fences(&mut self, fences: &[RhiFenceHandle]) -> RhiResult<()> {
        for fence in fences {
            self.fences.get_mut(*fence).ok_or(RhiError::invalid_handle("fence"))?.signaled = false;
        }
        Ok(())
    }

    fn create_semaphore(&mut self, name: &str) -> RhiResult<RhiSemaphoreHandle> {
        self.check_create(name)?;
        Ok(self.semaphores.insert(HeadlessSemaphore {
            signaled: false,
            name: name.to_string(),
        }))
    }

    fn destroy_semaphore(&mut self, semaphore: RhiSemaphoreHandle) {
        self.semaphores.remove(semaphore);
    }

    // command buffer
    fn create_command_pool(&mut self, name: &str) -> RhiResult<RhiCommandPoolHandle> {
        self.check_create(name)?;
        Ok(self.command_pools.insert(HeadlessCommandPool {
            command_buffers: Vec::new(),
        }))
    }

    fn destroy_command_pool(&mut self, pool: RhiCommandPoolHandle) {
        if let Some(pool) = self.command_pools.remove(pool) {
            for cmd in pool.command_buffers {
                self.command_buffers.remove(cmd);
            }
        }
    }

    fn reset_command_pool(&mut self, pool: RhiCommandPoolHandle) -> RhiResult<()> {
        let pool = self.command_pools.get(pool).ok_or(RhiError::invalid_handle("command pool"))?;
        for cmd in &pool.command_buffers {
            if let Some(command_buffer) = self.command_buffers.get_mut(*cmd) {
                command_buffer.reset();
            }
        }
        Ok(())
    }

    fn allocate_command_buffer(&mut self, pool: RhiCommandPoolHandle, name: &str) -> RhiResult<RhiCommandBufferHandle> {
        self.check_create(name)?;
        if !self.command_pools.contains_key(pool) {
            return Err(RhiError::invalid_handle("command pool"));
        }
        let cmd = self.command_buffers.insert(HeadlessCommandBuffer::new(pool, name));
        self.command_pools[pool].command_buffers.push(cmd);
        Ok(cmd)
    }

    fn begin_command_buffer(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()> {
        let command_buffer = self.command_buffers.get_mut(cmd).ok_or(RhiError::invalid_handle("command buffer"))?;
        if command_buffer.state == CommandBufferState::Recording {
            return Err(RhiError::Validation(format!("command buffer <{}> is already recording", command_buffer.name)));
        }
        command_buffer.reset();
        command_buffer.state = CommandBufferState::Recording;
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()> {
        let command_buffer = self.command_buffers.get_mut(cmd).ok_or(RhiError::invalid_handle("command buffer"))?;
        if command_buffer.state != CommandBufferState::Recording {
            return Err(RhiError::Validation(format!("command buffer <{}> is not recording", command_buffer.name)));
        }
        if command_buffer.recording.render_pass.is_some() {
            return Err(RhiError::Validation(format!(
                "command buffer <{}> ends inside a render pass",
                command_buffer.name
            )));
        }
        if command_buffer.recording.label_depth != 0 {
            return Err(RhiError::Validation(format!("command buffer <{}> has unbalanced labels", command_buffer.name)));
        }
        command_buffer.state = CommandBufferState::Executable;
        Ok(())
    }

    // recording
    fn cmd_begin_render_pass(&mut self, cmd: RhiCommandBufferHandle, info: &RhiRenderPassBeginInfo) {
        let framebuffer_matches = self
            .framebuffers
            .get(info.framebuffer)
            .is_some_and(|framebuffer| framebuffer.desc.render_pass == info.render_pass);
        let render_pass_alive = self.render_passes.contains_key(info.render_pass);
        let render_pass = info.render_pass;
        self.record(cmd, HeadlessCommand::BeginRenderPass(info.clone()), |state| {
            Self::outside_render_pass(state, "begin render pass")?;
            if !render_pass_alive || !framebuffer_matches {
                return Err("begin render pass with an invalid render pass or framebuffer".to_string());
            }
            state.render_pass = Some((render_pass, 0));
            state.pipeline_bound = false;
            Ok(())
        });
    }

    fn cmd_next_subpass(&mut self, cmd: RhiCommandBufferHandle) {
        let subpass_count = self
            .command_buffers
            .get(cmd)
            .and_then(|command_buffer| command_buffer.recording.render_pass)
            .and_then(|(render_pass, _)| self.render_passes.get(render_pass))
            .map_or(0, |render_pass| render_pass.desc.subpasses.len() as u32);
        self.record(cmd, HeadlessCommand::NextSubpass, |state| {
            let Some((render_pass, subpass)) = state.render_pass else {
                return Err("next subpass outside a render pass".to_string());
            };
            if subpass + 1 >= subpass_count {
                return Err(format!("next subpass beyond the last subpass ({} subpasses)", subpass_count));
            }
            state.render_pass = Some((render_pass, subpass + 1));
            state.pipeline_bound = false;
            Ok(())
        });
    }

    fn cmd_end_render_pass(&mut self, cmd: RhiCommandBufferHandle) {
        self.record(cmd, HeadlessCommand::EndRenderPass, |state| {
            if state.render_pass.take().is_none() {
                return Err("end render pass without begin".to_string());
            }
            state.pipeline_bound = false;
            Ok(())
        });
    }

    fn cmd_bind_pipeline(&mut self, cmd: RhiCommandBufferHandle, pipeline: RhiPipelineHandle) {
        let target = self.pipelines.get(pipeline).map(|p| (p.desc.render_pass, p.desc.subpass, p.name.clone()));
        self.record(cmd, HeadlessCommand::BindPipeline(pipeline), |state| {
            let Some((render_pass, subpass, name)) = target else {
                return Err("bind an invalid pipeline".to_string());
            };
            if state.render_pass != Some((render_pass, subpass)) {
                return Err(format!("pipeline <{}> is bound outside its subpass", name));
            }
            state.pipeline_bound = true;
            Ok(())
        });
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: RhiCommandBufferHandle,
        pipeline: RhiPipelineHandle,
        first_set: u32,
        sets: &[RhiDescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        let sets_alive = sets.iter().all(|set| self.descriptor_sets.contains_key(*set));
        let alignment = self.limits.min_storage_buffer_offset_alignment as u32;
        let command = HeadlessCommand::BindDescriptorSets {
            pipeline,
            first_set,
            sets: sets.to_vec(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        };
        self.record(cmd, command, |_| {
            if !sets_alive {
                return Err("bind an invalid descriptor set".to_string());
            }
            if dynamic_offsets.iter().any(|offset| offset % alignment != 0) {
                return Err(format!("dynamic offset is not aligned to {}", alignment));
            }
            Ok(())
        });
    }

    fn cmd_push_constants(&mut self, cmd: RhiCommandBufferHandle, pipeline: RhiPipelineHandle, data: &[u8]) {
        let limit = self.pipelines.get(pipeline).map(|p| p.desc.push_constant_size as usize);
        self.record(cmd, HeadlessCommand::PushConstants { size: data.len() }, |_| match limit {
            Some(limit) if data.len() <= limit => Ok(()),
            _ => Err("push constants exceed the pipeline layout".to_string()),
        });
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: RhiCommandBufferHandle,
        first_binding: u32,
        buffers: &[(RhiBufferHandle, vk::DeviceSize)],
    ) {
        let alive = buffers.iter().all(|(buffer, _)| self.buffers.contains_key(*buffer));
        let command = HeadlessCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        };
        self.record(cmd, command, |_| if alive { Ok(()) } else { Err("bind an invalid vertex buffer".to_string()) });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        buffer: RhiBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        let alive = self.buffers.contains_key(buffer);
        let command = HeadlessCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        };
        self.record(cmd, command, |_| if alive { Ok(()) } else { Err("bind an invalid index buffer".to_string()) });
    }

    fn cmd_set_viewport(&mut self, cmd: RhiCommandBufferHandle, viewport: vk::Viewport) {
        self.record(cmd, HeadlessCommand::SetViewport(viewport), |_| Ok(()));
    }

    fn cmd_set_scissor(&mut self, cmd: RhiCommandBufferHandle, scissor: vk::Rect2D) {
        self.record(cmd, HeadlessCommand::SetScissor(scissor), |_| Ok(()));
    }

    fn cmd_draw(
        &mut self,
        cmd: RhiCommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        let command = HeadlessCommand::Draw {
            vertex_count,
            instance_count,
        };
        self.record(cmd, command, |state| Self::inside_render_pass(state, "draw"));
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: RhiCommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        let command = HeadlessCommand::DrawIndexed {
            index_count,
            instance_count,
        };
        self.record(cmd, command, |state| Self::inside_render_pass(state, "draw indexed"));
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiBufferHandle,
        dst: RhiBufferHandle,
        regions: &[vk::BufferCopy],
    ) {
        let command = HeadlessCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        };
        self.record(cmd, command, |state| Self::outside_render_pass(state, "copy buffer"));
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiBufferHandle,
        dst: RhiImageHandle,
        regions: &[RhiBufferImageCopy],
    ) {
        let command = HeadlessCommand::CopyBufferToImage {
            src,
            dst,
            regions: regions.to_vec(),
        };
        self.record(cmd, command, |state| Self::outside_render_pass(state, "copy buffer to image"));
    }

    fn cmd_copy_image_to_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiImageHandle,
        dst: RhiBufferHandle,
        regions: &[RhiBufferImageCopy],
    ) {
        let command = HeadlessCommand::CopyImageToBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        };
        self.record(cmd, command, |state| Self::outside_render_pass(state, "copy image to buffer"));
    }

    fn cmd_generate_mipmaps(&mut self, cmd: RhiCommandBufferHandle, image: RhiImageHandle) {
        let alive = self.images.contains_key(image);
        self.record(cmd, HeadlessCommand::GenerateMipmaps(image), |state| {
            Self::outside_render_pass(state, "generate mipmaps")?;
            if alive { Ok(()) } else { Err("generate mipmaps of an invalid image".to_string()) }
        });
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: RhiCommandBufferHandle,
        image_barriers: &[RhiImageBarrier],
        buffer_barriers: &[RhiBufferBarrier],
    ) {
        let alive = image_barriers.iter().all(|barrier| self.images.contains_key(barrier.image))
            && buffer_barriers.iter().all(|barrier| self.buffers.contains_key(barrier.buffer));
        let command = HeadlessCommand::PipelineBarrier {
            image_barriers: image_barriers.to_vec(),
            buffer_barriers: buffer_barriers.to_vec(),
        };
        self.record(cmd, command, |state| {
            Self::outside_render_pass(state, "pipeline barrier")?;
            if alive { Ok(()) } else { Err("barrier on an invalid resource".to_string()) }
        });
    }

    fn cmd_begin_label(&mut self, cmd: RhiCommandBufferHandle, label: &str, _color: [f32; 4]) {
        self.record(cmd, HeadlessCommand::BeginLabel(label.to_string()), |state| {
            state.label_depth += 1;
            Ok(())
        });
    }

    fn cmd_end_label(&mut self, cmd: RhiCommandBufferHandle) {
        self.record(cmd, HeadlessCommand::EndLabel, |state| {
            if state.label_depth == 0 {
                return Err("end label without begin".to_string());
            }
            state.label_depth -= 1;
            Ok(())
        });
    }

    // queue
    fn queue_submit(&mut self, submits: &[RhiSubmitInfo], fence: Option<RhiFenceHandle>) -> RhiResult<()> {
        let _span = tracy_client::span!("HeadlessRhi::queue_submit");
        self.check_device()?;
        if let Some(fault) = self.submit_faults.pop_front() {
            log::error!("injected submit fault: {:?}", fault);
            self.device_lost = true;
            return Err(RhiError::DeviceLost);
        }

        if let Some(fence) = fence {
            let fence = self.fences.get(fence).ok_or(RhiError::invalid_handle("fence"))?;
            if fence.signaled {
                let message = format!("submit with fence <{}> which is already signaled", fence.name);
                self.report_validation(message.clone());
                return Err(RhiError::Validation(message));
            }
        }

        for submit in submits {
            for cmd in &submit.command_buffers {
                let command_buffer = self.command_buffers.get(*cmd).ok_or(RhiError::invalid_handle("command buffer"))?;
                if command_buffer.state != CommandBufferState::Executable {
                    let message = format!("submit command buffer <{}> which is not executable", command_buffer.name);
                    self.report_validation(message.clone());
                    return Err(RhiError::Validation(message));
                }
            }
        }

        for submit in submits {
            for (semaphore, _stage) in &submit.wait_semaphores {
                match self.semaphores.get_mut(*semaphore) {
                    Some(s) if s.signaled => s.signaled = false,
                    Some(s) => {
                        let message = format!("submit waits on semaphore <{}> which will never be signaled", s.name);
                        self.report_validation(message);
                    }
                    None => return Err(RhiError::invalid_handle("semaphore")),
                }
            }

            for cmd in &submit.command_buffers {
                self.execute(*cmd);
            }

            for semaphore in &submit.signal_semaphores {
                match self.semaphores.get_mut(*semaphore) {
                    Some(s) if s.signaled => {
                        let message = format!("submit signals semaphore <{}> which is already signaled", s.name);
                        self.report_validation(message);
                    }
                    Some(s) => s.signaled = true,
                    None => return Err(RhiError::invalid_handle("semaphore")),
                }
            }
        }

        if let Some(fence) = fence.and_then(|fence| self.fences.get_mut(fence)) {
            fence.signaled = true;
        }
        self.stats.submits += 1;
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> RhiResult<()> {
        self.check_device()
    }

    fn begin_single_time_commands(&mut self) -> RhiResult<RhiCommandBufferHandle> {
        let (pool, _) = match self.single_time {
            Some(single_time) => single_time,
            None => {
                let pool = self.create_command_pool("single-time")?;
                let fence = match self.create_fence(false, "single-time") {
                    Ok(fence) => fence,
                    Err(e) => {
                        self.destroy_command_pool(pool);
                        return Err(e);
                    }
                };
                self.single_time = Some((pool, fence));
                (pool, fence)
            }
        };
        let cmd = self.allocate_command_buffer(pool, "single-time")?;
        self.begin_command_buffer(cmd)?;
        Ok(cmd)
    }

    fn end_single_time_commands(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()> {
        let _span = tracy_client::span!("HeadlessRhi::end_single_time_commands");
        let Some((_, fence)) = self.single_time else {
            return Err(RhiError::Validation("end single time commands without begin".to_string()));
        };
        let result = self
            .end_command_buffer(cmd)
            .and_then(|_| self.queue_submit(&[RhiSubmitInfo::new(&[cmd])], Some(fence)))
            .and_then(|_| self.wait_for_fences(&[fence], u64::MAX))
            .and_then(|_| self.reset_fences(&[fence]));
        self.free_command_buffer(cmd);
        self.stats.single_time_submits += 1;
        result
    }
}

impl Drop for HeadlessRhi {
    fn drop(&mut self) {
        if let Some((pool, fence)) = self.single_time.take() {
            self.destroy_command_pool(pool);
            self.destroy_fence(fence);
        }
        self.destroy_swapchain_objects();
        let leaked = self.live_object_count();
        if leaked != 0 {
            log::warn!("headless rhi dropped with {} live objects", leaked);
        }
    }
}

#[cfg(test)]
mod tests;
