use ash::vk;

use crate::{
    desc::{RhiBufferBarrier, RhiBufferImageCopy, RhiImageBarrier, RhiRenderPassBeginInfo},
    handles::{RhiBufferHandle, RhiDescriptorSetHandle, RhiImageHandle, RhiPipelineHandle},
};

/// command buffer 中录制的一条命令
///
/// 状态相关的命令只用于校验；copy、clear 与 draw 在提交时执行或计数
#[derive(Debug, Clone)]
pub enum HeadlessCommand {
    BeginRenderPass(RhiRenderPassBeginInfo),
    NextSubpass,
    EndRenderPass,
    BindPipeline(RhiPipelineHandle),
    BindDescriptorSets {
        pipeline: RhiPipelineHandle,
        first_set: u32,
        sets: Vec<RhiDescriptorSetHandle>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        size: usize,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<(RhiBufferHandle, vk::DeviceSize)>,
    },
    BindIndexBuffer {
        buffer: RhiBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: RhiBufferHandle,
        dst: RhiBufferHandle,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: RhiBufferHandle,
        dst: RhiImageHandle,
        regions: Vec<RhiBufferImageCopy>,
    },
    CopyImageToBuffer {
        src: RhiImageHandle,
        dst: RhiBufferHandle,
        regions: Vec<RhiBufferImageCopy>,
    },
    GenerateMipmaps(RhiImageHandle),
    PipelineBarrier {
        image_barriers: Vec<RhiImageBarrier>,
        buffer_barriers: Vec<RhiBufferBarrier>,
    },
    BeginLabel(String),
    EndLabel,
}

impl HeadlessCommand {
    #[inline]
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. } | Self::DrawIndexed { .. })
    }

    #[inline]
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::CopyBuffer { .. } | Self::CopyBufferToImage { .. } | Self::CopyImageToBuffer { .. } | Self::GenerateMipmaps(_)
        )
    }
}
