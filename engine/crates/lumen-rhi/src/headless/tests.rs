use super::*;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn one_pass(rhi: &mut HeadlessRhi, format: vk::Format) -> RhiRenderPassHandle {
    let desc = RhiRenderPassDesc {
        attachments: vec![RhiAttachmentDesc::clear_store(format, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)],
        subpasses: vec![RhiSubpassDesc {
            name: "main",
            color_attachments: vec![0],
            ..Default::default()
        }],
        dependencies: vec![],
    };
    rhi.create_render_pass(&desc, "test").unwrap()
}

fn recording_cmd(rhi: &mut HeadlessRhi) -> (RhiCommandPoolHandle, RhiCommandBufferHandle) {
    let pool = rhi.create_command_pool("test").unwrap();
    let cmd = rhi.allocate_command_buffer(pool, "test").unwrap();
    rhi.begin_command_buffer(cmd).unwrap();
    (pool, cmd)
}

#[test]
fn test_copy_buffer_executes_on_submit() {
    let mut rhi = HeadlessRhi::new();
    let stage = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(16), "stage").unwrap();
    let readback = rhi.create_buffer(&RhiBufferDesc::new_readback_buffer(16), "readback").unwrap();
    rhi.write_buffer(stage, 4, &[1, 2, 3, 4]).unwrap();

    let (pool, cmd) = recording_cmd(&mut rhi);
    rhi.cmd_copy_buffer(
        cmd,
        stage,
        readback,
        &[vk::BufferCopy {
            src_offset: 4,
            dst_offset: 8,
            size: 4,
        }],
    );
    rhi.end_command_buffer(cmd).unwrap();
    let fence = rhi.create_fence(false, "test").unwrap();
    rhi.queue_submit(&[RhiSubmitInfo::new(&[cmd])], Some(fence)).unwrap();
    rhi.wait_for_fences(&[fence], 1_000).unwrap();

    let mut out = [0u8; 4];
    rhi.read_buffer(readback, 8, &mut out).unwrap();
    assert_eq!(out, [1, 2, 3, 4]);
    assert_eq!(rhi.stats().copy_commands, 1);
    assert_eq!(rhi.stats().submits, 1);

    rhi.destroy_command_pool(pool);
    rhi.destroy_fence(fence);
    rhi.destroy_buffer(stage);
    rhi.destroy_buffer(readback);
    assert_eq!(rhi.live_object_count(), 0);
}

#[test]
fn test_device_local_buffer_is_not_host_writable() {
    let mut rhi = HeadlessRhi::new();
    let desc = RhiBufferDesc::new(64, vk::BufferUsageFlags::VERTEX_BUFFER, RhiMemoryLocation::GpuOnly);
    let buffer = rhi.create_buffer(&desc, "vertex").unwrap();
    assert!(matches!(rhi.write_buffer(buffer, 0, &[0; 4]), Err(RhiError::Validation(_))));
    rhi.destroy_buffer(buffer);
}

#[test]
fn test_destroy_is_idempotent() {
    let mut rhi = HeadlessRhi::new();
    let buffer = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(4), "stage").unwrap();
    rhi.destroy_buffer(buffer);
    rhi.destroy_buffer(buffer);
    rhi.destroy_buffer(RhiBufferHandle::default());
    assert!(matches!(rhi.write_buffer(buffer, 0, &[0]), Err(RhiError::InvalidHandle { .. })));
    assert_eq!(rhi.stats().validation_errors, 0);
}

#[test]
fn test_render_pass_clear_and_readback() {
    let mut rhi = HeadlessRhi::new();
    let render_pass = one_pass(&mut rhi, vk::Format::R32_UINT);
    let image = rhi
        .create_image(
            &RhiImageDesc::new_2d(
                extent(4, 4),
                vk::Format::R32_UINT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
            "id",
        )
        .unwrap();
    let view = rhi
        .create_image_view(image, &RhiImageViewDesc::new_2d(vk::Format::R32_UINT, vk::ImageAspectFlags::COLOR), "id")
        .unwrap();
    let framebuffer = rhi
        .create_framebuffer(
            &RhiFramebufferDesc {
                render_pass,
                attachments: vec![view],
                extent: extent(4, 4),
                layers: 1,
            },
            "id",
        )
        .unwrap();
    assert!(rhi.write_texel(image, 0, 2, 3, &7u32.to_le_bytes()));

    let readback = rhi.create_buffer(&RhiBufferDesc::new_readback_buffer(4), "readback").unwrap();
    let cmd = rhi.begin_single_time_commands().unwrap();
    rhi.cmd_copy_image_to_buffer(cmd, image, readback, &[RhiBufferImageCopy::single_texel(2, 3)]);
    rhi.end_single_time_commands(cmd).unwrap();
    let mut out = [0u8; 4];
    rhi.read_buffer(readback, 0, &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 7);

    let cmd = rhi.begin_single_time_commands().unwrap();
    rhi.cmd_begin_render_pass(
        cmd,
        &RhiRenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: extent(4, 4),
            },
            clear_values: vec![RhiClearValue::ColorUint([0; 4])],
        },
    );
    rhi.cmd_end_render_pass(cmd);
    rhi.cmd_copy_image_to_buffer(cmd, image, readback, &[RhiBufferImageCopy::single_texel(2, 3)]);
    rhi.end_single_time_commands(cmd).unwrap();
    rhi.read_buffer(readback, 0, &mut out).unwrap();
    assert_eq!(u32::from_le_bytes(out), 0);
    assert_eq!(rhi.stats().single_time_submits, 2);
    assert_eq!(rhi.stats().validation_errors, 0);
}

/// 覆盖左半边的矩形，写入 buffer 中的 id 加上 instance 序号
struct LeftHalfProgram;
impl HeadlessProgram for LeftHalfProgram {
    fn vertex(&self, _input: &HeadlessDrawInput, _instance: u32, vertex: u32) -> Option<[f32; 4]> {
        let corners = [[-1.0, -1.0], [0.0, -1.0], [0.0, 1.0], [-1.0, -1.0], [0.0, 1.0], [-1.0, 1.0]];
        let [x, y] = corners.get(vertex as usize)?;
        Some([*x, *y, 0.5, 1.0])
    }

    fn fragment(&self, input: &HeadlessDrawInput, instance: u32) -> Option<Vec<u8>> {
        let bytes = input.buffer(0, 0)?.get(0..4)?;
        let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) + instance;
        Some(id.to_le_bytes().to_vec())
    }
}

#[test]
fn test_registered_program_writes_covered_texels() {
    let mut rhi = HeadlessRhi::new();
    rhi.register_program("left-half.frag", Box::new(LeftHalfProgram));
    let render_pass = one_pass(&mut rhi, vk::Format::R32_UINT);
    let image = rhi
        .create_image(
            &RhiImageDesc::new_2d(extent(4, 4), vk::Format::R32_UINT, vk::ImageUsageFlags::COLOR_ATTACHMENT),
            "id",
        )
        .unwrap();
    let view = rhi
        .create_image_view(image, &RhiImageViewDesc::new_2d(vk::Format::R32_UINT, vk::ImageAspectFlags::COLOR), "id")
        .unwrap();
    let framebuffer = rhi
        .create_framebuffer(
            &RhiFramebufferDesc {
                render_pass,
                attachments: vec![view],
                extent: extent(4, 4),
                layers: 1,
            },
            "id",
        )
        .unwrap();

    let layout = rhi
        .create_descriptor_set_layout(
            &[RhiDescriptorBinding::new(
                0,
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                vk::ShaderStageFlags::FRAGMENT,
            )],
            "ids",
        )
        .unwrap();
    let pool = rhi
        .create_descriptor_pool(
            &RhiDescriptorPoolDesc {
                max_sets: 1,
                pool_sizes: vec![(vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1)],
            },
            "pool",
        )
        .unwrap();
    let set = rhi.allocate_descriptor_set(pool, layout, "ids").unwrap();
    let ids = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(512), "ids").unwrap();
    rhi.write_buffer(ids, 256, &9u32.to_le_bytes()).unwrap();
    rhi.update_descriptor_set(
        set,
        &[RhiDescriptorWrite::buffer(0, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, ids, 0, 4)],
    )
    .unwrap();
    let pipeline = rhi
        .create_graphics_pipeline(
            &RhiPipelineDesc::new("left-half.vert", render_pass, 0).fragment("left-half.frag").layouts(&[layout]),
            "left-half",
        )
        .unwrap();

    let cmd = rhi.begin_single_time_commands().unwrap();
    rhi.cmd_begin_render_pass(
        cmd,
        &RhiRenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: extent(4, 4),
            },
            clear_values: vec![RhiClearValue::ColorUint([0; 4])],
        },
    );
    rhi.cmd_bind_pipeline(cmd, pipeline);
    rhi.cmd_bind_descriptor_sets(cmd, pipeline, 0, &[set], &[256]);
    rhi.cmd_draw(cmd, 6, 1, 0, 0);
    rhi.cmd_end_render_pass(cmd);
    rhi.end_single_time_commands(cmd).unwrap();

    for y in 0..4 {
        assert_eq!(rhi.read_texel(image, 0, 1, y), Some(9u32.to_le_bytes().to_vec()));
        assert_eq!(rhi.read_texel(image, 0, 3, y), Some(vec![0; 4]));
    }
    assert_eq!(rhi.stats().draw_calls, 1);
    assert_eq!(rhi.stats().validation_errors, 0);
}

#[test]
fn test_upload_cube_layers() {
    let mut rhi = HeadlessRhi::new();
    let desc = RhiImageDesc::new_cube(extent(2, 2), vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED, 2);
    let image = rhi.create_image(&desc, "cube").unwrap();
    let stage = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(6 * 16), "stage").unwrap();
    let bytes = (0..6u8).flat_map(|face| std::iter::repeat_n(face, 16)).collect_vec();
    rhi.write_buffer(stage, 0, &bytes).unwrap();

    let cmd = rhi.begin_single_time_commands().unwrap();
    rhi.cmd_copy_buffer_to_image(cmd, stage, image, &[RhiBufferImageCopy::whole_layers(extent(2, 2), 0, 6)]);
    rhi.cmd_generate_mipmaps(cmd, image);
    rhi.end_single_time_commands(cmd).unwrap();

    assert_eq!(rhi.read_texel(image, 0, 0, 0), Some(vec![0; 4]));
    assert_eq!(rhi.read_texel(image, 4, 1, 1), Some(vec![4; 4]));
    assert_eq!(rhi.read_texel(image, 5, 1, 0), Some(vec![5; 4]));
}

#[test]
fn test_draw_outside_render_pass_is_reported() {
    let mut rhi = HeadlessRhi::new();
    let (_, cmd) = recording_cmd(&mut rhi);
    rhi.cmd_draw(cmd, 3, 1, 0, 0);
    assert_eq!(rhi.stats().validation_errors, 1);
    assert!(rhi.recorded_commands(cmd).unwrap().is_empty());
}

#[test]
fn test_next_subpass_beyond_last_is_reported() {
    let mut rhi = HeadlessRhi::new();
    rhi.create_swapchain(extent(8, 8)).unwrap();
    let render_pass = one_pass(&mut rhi, vk::Format::R8G8B8A8_SRGB);
    let framebuffer = rhi
        .create_framebuffer(
            &RhiFramebufferDesc {
                render_pass,
                attachments: vec![rhi.swapchain_image_views()[0]],
                extent: extent(8, 8),
                layers: 1,
            },
            "swapchain",
        )
        .unwrap();
    let (_, cmd) = recording_cmd(&mut rhi);
    rhi.cmd_begin_render_pass(
        cmd,
        &RhiRenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D::default(),
            clear_values: vec![RhiClearValue::Color([0.0; 4])],
        },
    );
    rhi.cmd_next_subpass(cmd);
    rhi.cmd_end_render_pass(cmd);
    assert_eq!(rhi.stats().validation_errors, 1);
    rhi.end_command_buffer(cmd).unwrap();
    assert_eq!(rhi.command_buffer_state(cmd), Some(CommandBufferState::Executable));
}

#[test]
fn test_fence_rules() {
    let mut rhi = HeadlessRhi::new();
    let fence = rhi.create_fence(false, "never-submitted").unwrap();
    assert!(matches!(rhi.wait_for_fences(&[fence], 10), Err(RhiError::FenceTimeout { timeout_ns: 10 })));

    let signaled = rhi.create_fence(true, "signaled").unwrap();
    rhi.wait_for_fences(&[signaled], 10).unwrap();
    assert!(matches!(rhi.queue_submit(&[RhiSubmitInfo::empty()], Some(signaled)), Err(RhiError::Validation(_))));

    rhi.reset_fences(&[signaled]).unwrap();
    rhi.queue_submit(&[RhiSubmitInfo::empty()], Some(signaled)).unwrap();
    assert_eq!(rhi.is_fence_signaled(signaled), Some(true));
}

#[test]
fn test_acquire_present_cycle() {
    let mut rhi = HeadlessRhi::new();
    let info = rhi.create_swapchain(extent(640, 480)).unwrap();
    assert_eq!(info.image_count, 3);
    assert_eq!(info.extent, extent(640, 480));

    let image_available = rhi.create_semaphore("image-available").unwrap();
    let render_finished = rhi.create_semaphore("render-finished").unwrap();
    let acquired = rhi.acquire_next_image(image_available, u64::MAX).unwrap();
    assert!(!acquired.suboptimal);

    let submit = RhiSubmitInfo::empty()
        .wait(image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
        .signal(render_finished);
    rhi.queue_submit(&[submit], None).unwrap();
    assert!(!rhi.queue_present(acquired.image_index, &[render_finished]).unwrap());

    assert_eq!(rhi.stats().presents, 1);
    assert_eq!(rhi.stats().validation_errors, 0);
    assert!(rhi.queue_present(acquired.image_index, &[]).is_err());
}

#[test]
fn test_injected_faults() {
    let mut rhi = HeadlessRhi::new();
    rhi.create_swapchain(extent(64, 64)).unwrap();
    let semaphore = rhi.create_semaphore("image-available").unwrap();

    rhi.inject_acquire_fault(HeadlessFault::OutOfDate);
    assert!(rhi.acquire_next_image(semaphore, u64::MAX).unwrap_err().is_out_of_date());

    rhi.inject_acquire_fault(HeadlessFault::Suboptimal);
    let acquired = rhi.acquire_next_image(semaphore, u64::MAX).unwrap();
    assert!(acquired.suboptimal);

    rhi.inject_present_fault(HeadlessFault::OutOfDate);
    assert!(rhi.queue_present(acquired.image_index, &[semaphore]).unwrap_err().is_out_of_date());
    assert_eq!(rhi.stats().presents, 0);

    rhi.inject_submit_fault(HeadlessFault::DeviceLost);
    assert!(rhi.queue_submit(&[RhiSubmitInfo::empty()], None).unwrap_err().is_device_lost());
    assert!(rhi.device_wait_idle().unwrap_err().is_device_lost());
}

#[test]
fn test_injected_create_fault_fails_once() {
    let mut rhi = HeadlessRhi::new();
    rhi.inject_create_fault(1);
    let fence = rhi.create_fence(true, "first").unwrap();
    assert!(matches!(rhi.create_semaphore("second"), Err(RhiError::OutOfMemory(_))));
    let semaphore = rhi.create_semaphore("third").unwrap();
    assert_eq!(rhi.live_object_count(), 2);

    rhi.destroy_fence(fence);
    rhi.destroy_semaphore(semaphore);
    assert_eq!(rhi.live_object_count(), 0);
}

#[test]
fn test_recreate_swapchain_uses_new_format() {
    let mut rhi = HeadlessRhi::new();
    let first = rhi.create_swapchain(extent(64, 64)).unwrap();
    let old_views = rhi.swapchain_image_views();
    rhi.set_surface_format(vk::Format::B8G8R8A8_SRGB);
    let second = rhi.create_swapchain(extent(128, 32)).unwrap();

    assert_eq!(first.image_format, vk::Format::R8G8B8A8_SRGB);
    assert_eq!(second.image_format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(second.extent, extent(128, 32));
    assert!(old_views.iter().all(|view| rhi.image_of_view(*view).is_none()));
    assert_eq!(rhi.stats().swapchains_created, 2);
}

#[test]
fn test_destroy_descriptor_pool_frees_sets() {
    let mut rhi = HeadlessRhi::new();
    let layout = rhi
        .create_descriptor_set_layout(
            &[RhiDescriptorBinding::new(
                0,
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                vk::ShaderStageFlags::VERTEX,
            )],
            "layout",
        )
        .unwrap();
    let pool = rhi
        .create_descriptor_pool(
            &RhiDescriptorPoolDesc {
                max_sets: 1,
                pool_sizes: vec![(vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, 1)],
            },
            "pool",
        )
        .unwrap();
    let buffer = rhi.create_buffer(&RhiBufferDesc::new_stage_buffer(256), "ssbo").unwrap();
    let set = rhi.allocate_descriptor_set(pool, layout, "set").unwrap();
    rhi.update_descriptor_set(
        set,
        &[RhiDescriptorWrite::buffer(0, vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, buffer, 0, 64)],
    )
    .unwrap();
    assert!(matches!(rhi.allocate_descriptor_set(pool, layout, "overflow"), Err(RhiError::OutOfMemory(_))));

    rhi.destroy_descriptor_pool(pool);
    assert_eq!(rhi.live_descriptor_set_count(), 0);
    assert!(rhi.update_descriptor_set(set, &[]).is_err());
}
