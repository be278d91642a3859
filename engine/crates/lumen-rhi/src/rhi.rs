use ash::vk;

use crate::{
    desc::{
        RhiBufferBarrier, RhiBufferDesc, RhiBufferImageCopy, RhiDescriptorBinding, RhiDescriptorPoolDesc,
        RhiDescriptorWrite, RhiFramebufferDesc, RhiImageBarrier, RhiImageDesc, RhiImageViewDesc, RhiLimits,
        RhiPipelineDesc, RhiRenderPassBeginInfo, RhiRenderPassDesc, RhiSamplerDesc,
    },
    error::RhiResult,
    handles::*,
    submit_info::RhiSubmitInfo,
    swapchain::{RhiAcquiredImage, RhiSwapchainInfo},
};

/// 渲染器看到的 GPU 接口
///
/// - 所有对象通过句柄访问，`destroy_*` 对空句柄或已销毁的句柄是 no-op
/// - `cmd_*` 只负责录制，误用由后端的 validation 报告，不在录制时返回错误
/// - 只有一个 graphics queue，提交按顺序完成
pub trait Rhi {
    // ------------------------------------------------------------------------
    // device
    // ------------------------------------------------------------------------
    fn name(&self) -> &str;

    fn limits(&self) -> RhiLimits;

    /// 渲染器使用的深度格式
    fn depth_format(&self) -> vk::Format;

    /// 阻塞直到队列上所有已提交的工作完成
    fn device_wait_idle(&mut self) -> RhiResult<()>;

    // ------------------------------------------------------------------------
    // swapchain
    // ------------------------------------------------------------------------
    /// 创建或重建 swapchain，旧的 swapchain 以及它的 image view 会被销毁
    fn create_swapchain(&mut self, window_extent: vk::Extent2D) -> RhiResult<RhiSwapchainInfo>;

    fn destroy_swapchain(&mut self);

    fn swapchain_info(&self) -> Option<RhiSwapchainInfo>;

    /// 与 swapchain image 一一对应
    fn swapchain_image_views(&self) -> Vec<RhiImageViewHandle>;

    /// 返回的 image 在 `signal` 被 signal 后可用
    fn acquire_next_image(&mut self, signal: RhiSemaphoreHandle, timeout_ns: u64) -> RhiResult<RhiAcquiredImage>;

    /// return: suboptimal
    fn queue_present(&mut self, image_index: u32, wait_semaphores: &[RhiSemaphoreHandle]) -> RhiResult<bool>;

    // ------------------------------------------------------------------------
    // buffer & image
    // ------------------------------------------------------------------------
    fn create_buffer(&mut self, desc: &RhiBufferDesc, name: &str) -> RhiResult<RhiBufferHandle>;

    fn destroy_buffer(&mut self, buffer: RhiBufferHandle);

    fn buffer_size(&self, buffer: RhiBufferHandle) -> Option<vk::DeviceSize>;

    /// 写入 host visible 的 buffer
    fn write_buffer(&mut self, buffer: RhiBufferHandle, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()>;

    /// 读取 host visible 的 buffer
    fn read_buffer(&self, buffer: RhiBufferHandle, offset: vk::DeviceSize, dst: &mut [u8]) -> RhiResult<()>;

    fn create_image(&mut self, desc: &RhiImageDesc, name: &str) -> RhiResult<RhiImageHandle>;

    fn destroy_image(&mut self, image: RhiImageHandle);

    fn create_image_view(
        &mut self,
        image: RhiImageHandle,
        desc: &RhiImageViewDesc,
        name: &str,
    ) -> RhiResult<RhiImageViewHandle>;

    fn destroy_image_view(&mut self, view: RhiImageViewHandle);

    fn create_sampler(&mut self, desc: &RhiSamplerDesc, name: &str) -> RhiResult<RhiSamplerHandle>;

    fn destroy_sampler(&mut self, sampler: RhiSamplerHandle);

    // ------------------------------------------------------------------------
    // render pass & pipeline
    // ------------------------------------------------------------------------
    fn create_render_pass(&mut self, desc: &RhiRenderPassDesc, name: &str) -> RhiResult<RhiRenderPassHandle>;

    fn destroy_render_pass(&mut self, render_pass: RhiRenderPassHandle);

    fn create_framebuffer(&mut self, desc: &RhiFramebufferDesc, name: &str) -> RhiResult<RhiFramebufferHandle>;

    fn destroy_framebuffer(&mut self, framebuffer: RhiFramebufferHandle);

    fn create_graphics_pipeline(&mut self, desc: &RhiPipelineDesc, name: &str) -> RhiResult<RhiPipelineHandle>;

    fn destroy_pipeline(&mut self, pipeline: RhiPipelineHandle);

    // ------------------------------------------------------------------------
    // descriptor
    // ------------------------------------------------------------------------
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[RhiDescriptorBinding],
        name: &str,
    ) -> RhiResult<RhiDescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&mut self, layout: RhiDescriptorSetLayoutHandle);

    fn create_descriptor_pool(&mut self, desc: &RhiDescriptorPoolDesc, name: &str)
    -> RhiResult<RhiDescriptorPoolHandle>;

    /// 从该 pool 分配的 set 一并释放
    fn destroy_descriptor_pool(&mut self, pool: RhiDescriptorPoolHandle);

    fn allocate_descriptor_set(
        &mut self,
        pool: RhiDescriptorPoolHandle,
        layout: RhiDescriptorSetLayoutHandle,
        name: &str,
    ) -> RhiResult<RhiDescriptorSetHandle>;

    fn update_descriptor_set(&mut self, set: RhiDescriptorSetHandle, writes: &[RhiDescriptorWrite]) -> RhiResult<()>;

    // ------------------------------------------------------------------------
    // sync
    // ------------------------------------------------------------------------
    fn create_fence(&mut self, signaled: bool, name: &str) -> RhiResult<RhiFenceHandle>;

    fn destroy_fence(&mut self, fence: RhiFenceHandle);

    fn wait_for_fences(&mut self, fences: &[RhiFenceHandle], timeout_ns: u64) -> RhiResult<()>;

    fn reset_fences(&mut self, fences: &[RhiFenceHandle]) -> RhiResult<()>;

    fn create_semaphore(&mut self, name: &str) -> RhiResult<RhiSemaphoreHandle>;

    fn destroy_semaphore(&mut self, semaphore: RhiSemaphoreHandle);

    // ------------------------------------------------------------------------
    // command buffer
    // ------------------------------------------------------------------------
    fn create_command_pool(&mut self, name: &str) -> RhiResult<RhiCommandPoolHandle>;

    /// 从该 pool 分配的 command buffer 一并释放
    fn destroy_command_pool(&mut self, pool: RhiCommandPoolHandle);

    /// pool 中所有的 command buffer 回到 initial 状态
    fn reset_command_pool(&mut self, pool: RhiCommandPoolHandle) -> RhiResult<()>;

    fn allocate_command_buffer(&mut self, pool: RhiCommandPoolHandle, name: &str) -> RhiResult<RhiCommandBufferHandle>;

    fn begin_command_buffer(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()>;

    fn end_command_buffer(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()>;

    // ------------------------------------------------------------------------
    // recording
    // ------------------------------------------------------------------------
    fn cmd_begin_render_pass(&mut self, cmd: RhiCommandBufferHandle, info: &RhiRenderPassBeginInfo);

    fn cmd_next_subpass(&mut self, cmd: RhiCommandBufferHandle);

    fn cmd_end_render_pass(&mut self, cmd: RhiCommandBufferHandle);

    fn cmd_bind_pipeline(&mut self, cmd: RhiCommandBufferHandle, pipeline: RhiPipelineHandle);

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: RhiCommandBufferHandle,
        pipeline: RhiPipelineHandle,
        first_set: u32,
        sets: &[RhiDescriptorSetHandle],
        dynamic_offsets: &[u32],
    );

    fn cmd_push_constants(&mut self, cmd: RhiCommandBufferHandle, pipeline: RhiPipelineHandle, data: &[u8]);

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: RhiCommandBufferHandle,
        first_binding: u32,
        buffers: &[(RhiBufferHandle, vk::DeviceSize)],
    );

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        buffer: RhiBufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    fn cmd_set_viewport(&mut self, cmd: RhiCommandBufferHandle, viewport: vk::Viewport);

    fn cmd_set_scissor(&mut self, cmd: RhiCommandBufferHandle, scissor: vk::Rect2D);

    fn cmd_draw(
        &mut self,
        cmd: RhiCommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn cmd_draw_indexed(
        &mut self,
        cmd: RhiCommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn cmd_copy_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiBufferHandle,
        dst: RhiBufferHandle,
        regions: &[vk::BufferCopy],
    );

    fn cmd_copy_buffer_to_image(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiBufferHandle,
        dst: RhiImageHandle,
        regions: &[RhiBufferImageCopy],
    );

    fn cmd_copy_image_to_buffer(
        &mut self,
        cmd: RhiCommandBufferHandle,
        src: RhiImageHandle,
        dst: RhiBufferHandle,
        regions: &[RhiBufferImageCopy],
    );

    /// 由 mip 0 逐级 blit 生成整个 mip 链，结束时所有 mip 处于 SHADER_READ_ONLY_OPTIMAL
    fn cmd_generate_mipmaps(&mut self, cmd: RhiCommandBufferHandle, image: RhiImageHandle);

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: RhiCommandBufferHandle,
        image_barriers: &[RhiImageBarrier],
        buffer_barriers: &[RhiBufferBarrier],
    );

    fn cmd_begin_label(&mut self, cmd: RhiCommandBufferHandle, label: &str, color: [f32; 4]);

    fn cmd_end_label(&mut self, cmd: RhiCommandBufferHandle);

    // ------------------------------------------------------------------------
    // queue
    // ------------------------------------------------------------------------
    /// 所有的 submit 完成后 signal `fence`
    fn queue_submit(&mut self, submits: &[RhiSubmitInfo], fence: Option<RhiFenceHandle>) -> RhiResult<()>;

    fn queue_wait_idle(&mut self) -> RhiResult<()>;

    /// 分配并开始录制一个临时的 command buffer
    fn begin_single_time_commands(&mut self) -> RhiResult<RhiCommandBufferHandle>;

    /// 结束录制、提交并阻塞等待完成，之后释放该 command buffer
    fn end_single_time_commands(&mut self, cmd: RhiCommandBufferHandle) -> RhiResult<()>;
}
