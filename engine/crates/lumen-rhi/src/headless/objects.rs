//! headless 后端中各类 GPU 对象在 CPU 上的表示

use std::collections::HashMap;

use ash::vk;

use crate::{
    desc::{
        RhiBufferDesc, RhiDescriptorBinding, RhiDescriptorPoolDesc, RhiDescriptorWrite, RhiFramebufferDesc,
        RhiImageDesc, RhiImageViewDesc, RhiPipelineDesc, RhiRenderPassDesc, RhiSamplerDesc,
    },
    format::format_texel_size,
    handles::{
        RhiCommandBufferHandle, RhiCommandPoolHandle, RhiDescriptorPoolHandle, RhiDescriptorSetHandle,
        RhiDescriptorSetLayoutHandle, RhiImageHandle, RhiRenderPassHandle,
    },
};

use super::command::HeadlessCommand;

pub(super) struct HeadlessBuffer {
    pub desc: RhiBufferDesc,
    pub name: String,
    pub data: Vec<u8>,
}

/// 只保存 mip 0 的内容，各 layer 紧密排列
pub(super) struct HeadlessImage {
    pub desc: RhiImageDesc,
    pub name: String,
    pub data: Vec<u8>,
    pub owned_by_swapchain: bool,
}
impl HeadlessImage {
    pub fn new(desc: RhiImageDesc, name: &str, owned_by_swapchain: bool) -> Self {
        let texel_size = format_texel_size(desc.format).unwrap_or(4) as usize;
        let size = desc.extent.width as usize * desc.extent.height as usize * desc.array_layers as usize * texel_size;
        Self {
            desc,
            name: name.to_string(),
            data: vec![0; size],
            owned_by_swapchain,
        }
    }

    #[inline]
    pub fn texel_size(&self) -> usize {
        format_texel_size(self.desc.format).unwrap_or(4) as usize
    }

    #[inline]
    pub fn layer_size(&self) -> usize {
        self.desc.extent.width as usize * self.desc.extent.height as usize * self.texel_size()
    }

    /// (layer, x, y) 处 texel 的字节偏移
    #[inline]
    pub fn texel_offset(&self, layer: u32, x: u32, y: u32) -> usize {
        layer as usize * self.layer_size() + (y as usize * self.desc.extent.width as usize + x as usize) * self.texel_size()
    }
}

pub(super) struct HeadlessImageView {
    pub image: RhiImageHandle,
    pub desc: RhiImageViewDesc,
    pub owned_by_swapchain: bool,
}

pub(super) struct HeadlessSampler {
    pub _desc: RhiSamplerDesc,
}

pub(super) struct HeadlessRenderPass {
    pub desc: RhiRenderPassDesc,
    pub name: String,
}

pub(super) struct HeadlessFramebuffer {
    pub desc: RhiFramebufferDesc,
}

pub(super) struct HeadlessPipeline {
    pub desc: RhiPipelineDesc,
    pub name: String,
}

pub(super) struct HeadlessDescriptorSetLayout {
    pub bindings: Vec<RhiDescriptorBinding>,
}

pub(super) struct HeadlessDescriptorPool {
    pub desc: RhiDescriptorPoolDesc,
    pub sets: Vec<RhiDescriptorSetHandle>,
}

pub(super) struct HeadlessDescriptorSet {
    pub pool: RhiDescriptorPoolHandle,
    pub layout: RhiDescriptorSetLayoutHandle,
    pub writes: HashMap<u32, RhiDescriptorWrite>,
}

pub(super) struct HeadlessFence {
    pub signaled: bool,
    pub name: String,
}

pub(super) struct HeadlessSemaphore {
    pub signaled: bool,
    pub name: String,
}

pub(super) struct HeadlessCommandPool {
    pub command_buffers: Vec<RhiCommandBufferHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
}

/// 录制期间用于校验的状态
#[derive(Default)]
pub(super) struct RecordingState {
    /// 当前所在的 render pass 以及 subpass 序号
    pub render_pass: Option<(RhiRenderPassHandle, u32)>,
    pub pipeline_bound: bool,
    pub label_depth: u32,
}

pub(super) struct HeadlessCommandBuffer {
    pub pool: RhiCommandPoolHandle,
    pub name: String,
    pub state: CommandBufferState,
    pub commands: Vec<HeadlessCommand>,
    pub recording: RecordingState,
}
impl HeadlessCommandBuffer {
    pub fn new(pool: RhiCommandPoolHandle, name: &str) -> Self {
        Self {
            pool,
            name: name.to_string(),
            state: CommandBufferState::Initial,
            commands: Vec::new(),
            recording: RecordingState::default(),
        }
    }

    pub fn reset(&mut self) {
        self.state = CommandBufferState::Initial;
        self.commands.clear();
        self.recording = RecordingState::default();
    }
}

/// 将 clear value 按照 image 的格式编码为一个 texel
pub(super) fn encode_clear_texel(format: vk::Format, clear: &crate::desc::RhiClearValue) -> Vec<u8> {
    use crate::desc::RhiClearValue;

    let texel_size = format_texel_size(format).unwrap_or(4) as usize;
    let bytes = match (*clear, format) {
        (RhiClearValue::ColorUint(v), vk::Format::R32_UINT) => v[0].to_le_bytes().to_vec(),
        (RhiClearValue::Color(c), vk::Format::R32_SFLOAT) => c[0].to_le_bytes().to_vec(),
        (RhiClearValue::Color(c), vk::Format::R32G32B32A32_SFLOAT) => c.iter().flat_map(|v| v.to_le_bytes()).collect(),
        (
            RhiClearValue::Color(c),
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB,
        ) => {
            let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            if matches!(format, vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB) {
                vec![to_u8(c[2]), to_u8(c[1]), to_u8(c[0]), to_u8(c[3])]
            } else {
                vec![to_u8(c[0]), to_u8(c[1]), to_u8(c[2]), to_u8(c[3])]
            }
        }
        (RhiClearValue::DepthStencil { depth, .. }, vk::Format::D32_SFLOAT) => depth.to_le_bytes().to_vec(),
        _ => vec![0; texel_size],
    };

    let mut bytes = bytes;
    bytes.resize(texel_size, 0);
    bytes
}
