//! 创建 GPU 对象时使用的描述结构
//!
//! 这些结构只使用 `ash::vk` 中的枚举与 flags，不持有任何原生句柄。

use ash::vk;

use crate::handles::{
    RhiBufferHandle, RhiDescriptorSetLayoutHandle, RhiFramebufferHandle, RhiImageHandle, RhiImageViewHandle,
    RhiRenderPassHandle, RhiSamplerHandle,
};

/// 设备能力的子集
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiLimits {
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
    pub max_storage_buffer_range: vk::DeviceSize,
    pub max_sampler_anisotropy: f32,
}
impl Default for RhiLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            max_storage_buffer_range: 1 << 27,
            max_sampler_anisotropy: 16.0,
        }
    }
}

// ----------------------------------------------------------------------------
// buffer & image
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhiMemoryLocation {
    /// device local，只能通过 copy 写入
    GpuOnly,
    /// host visible，持久映射，用于上传
    CpuToGpu,
    /// host visible，用于回读
    GpuToCpu,
}

#[derive(Debug, Clone)]
pub struct RhiBufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: RhiMemoryLocation,
}
impl RhiBufferDesc {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: RhiMemoryLocation) -> Self {
        Self { size, usage, memory }
    }

    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, RhiMemoryLocation::CpuToGpu)
    }

    #[inline]
    pub fn new_readback_buffer(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_DST, RhiMemoryLocation::GpuToCpu)
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.memory != RhiMemoryLocation::GpuOnly
    }
}

#[derive(Debug, Clone)]
pub struct RhiImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub flags: vk::ImageCreateFlags,
}
impl RhiImageDesc {
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    pub fn new_cube(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags, mip_levels: u32) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels,
            array_layers: 6,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
        }
    }

    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RhiImageViewDesc {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}
impl RhiImageViewDesc {
    pub fn new_2d(format: vk::Format, aspect: vk::ImageAspectFlags) -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    pub fn new_2d_array(format: vk::Format, aspect: vk::ImageAspectFlags, layer_count: u32) -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D_ARRAY,
            layer_count,
            ..Self::new_2d(format, aspect)
        }
    }

    pub fn new_cube(format: vk::Format, mip_levels: u32) -> Self {
        Self {
            view_type: vk::ImageViewType::CUBE,
            level_count: mip_levels,
            layer_count: 6,
            ..Self::new_2d(format, vk::ImageAspectFlags::COLOR)
        }
    }

    #[inline]
    pub fn level_count(mut self, level_count: u32) -> Self {
        self.level_count = level_count;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_lod: f32,
    pub max_anisotropy: Option<f32>,
}
impl RhiSamplerDesc {
    pub fn linear_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0.0,
            max_anisotropy: None,
        }
    }

    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            ..Self::linear_clamp()
        }
    }

    pub fn mipmap_repeat(max_lod: f32, max_anisotropy: f32) -> Self {
        Self {
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_lod,
            max_anisotropy: Some(max_anisotropy),
            ..Self::linear_clamp()
        }
    }
}

// ----------------------------------------------------------------------------
// render pass & framebuffer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiAttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}
impl RhiAttachmentDesc {
    /// 每帧清空、渲染后保留
    pub fn clear_store(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// 只在 render pass 内部使用
    pub fn transient(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            ..Self::clear_store(format, final_layout)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RhiSubpassDesc {
    pub name: &'static str,
    pub input_attachments: Vec<u32>,
    pub color_attachments: Vec<u32>,
    pub depth_attachment: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiSubpassDependency {
    /// `vk::SUBPASS_EXTERNAL` 表示 render pass 之外
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}
impl RhiSubpassDependency {
    /// 前一个 subpass 写 color，后一个 subpass 以 input attachment 读取
    pub fn color_to_input(src_subpass: u32, dst_subpass: u32) -> Self {
        Self {
            src_subpass,
            dst_subpass,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RhiRenderPassDesc {
    pub attachments: Vec<RhiAttachmentDesc>,
    pub subpasses: Vec<RhiSubpassDesc>,
    pub dependencies: Vec<RhiSubpassDependency>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RhiFramebufferDesc {
    pub render_pass: RhiRenderPassHandle,
    pub attachments: Vec<RhiImageViewHandle>,
    pub extent: vk::Extent2D,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RhiClearValue {
    Color([f32; 4]),
    ColorUint([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RhiRenderPassBeginInfo {
    pub render_pass: RhiRenderPassHandle,
    pub framebuffer: RhiFramebufferHandle,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<RhiClearValue>,
}

// ----------------------------------------------------------------------------
// descriptor
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhiDescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}
impl RhiDescriptorBinding {
    #[inline]
    pub const fn new(binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhiDescriptorPoolDesc {
    pub max_sets: u32,
    pub pool_sizes: Vec<(vk::DescriptorType, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RhiDescriptorResource {
    Buffer {
        buffer: RhiBufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        view: RhiImageViewHandle,
        sampler: Option<RhiSamplerHandle>,
        layout: vk::ImageLayout,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiDescriptorWrite {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub resource: RhiDescriptorResource,
}
impl RhiDescriptorWrite {
    pub fn buffer(
        binding: u32,
        ty: vk::DescriptorType,
        buffer: RhiBufferHandle,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Self {
        Self {
            binding,
            ty,
            resource: RhiDescriptorResource::Buffer { buffer, offset, range },
        }
    }

    pub fn sampled_image(binding: u32, view: RhiImageViewHandle, sampler: RhiSamplerHandle) -> Self {
        Self {
            binding,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            resource: RhiDescriptorResource::Image {
                view,
                sampler: Some(sampler),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }
    }

    pub fn input_attachment(binding: u32, view: RhiImageViewHandle) -> Self {
        Self {
            binding,
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            resource: RhiDescriptorResource::Image {
                view,
                sampler: None,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        }
    }
}

// ----------------------------------------------------------------------------
// pipeline
// ----------------------------------------------------------------------------

/// 顶点输入布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhiVertexLayout {
    /// 不使用顶点 buffer（全屏三角形、天空盒）
    None,
    /// position / normal / tangent / uv
    Mesh,
    /// Mesh 再加上 joint index 与 weight
    MeshSkinned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RhiPipelineDesc {
    /// 着色器的名称，由外部的着色器系统负责解析
    pub vertex_shader: &'static str,
    pub fragment_shader: Option<&'static str>,
    pub vertex_layout: RhiVertexLayout,
    pub descriptor_set_layouts: Vec<RhiDescriptorSetLayoutHandle>,
    pub push_constant_size: u32,
    pub render_pass: RhiRenderPassHandle,
    pub subpass: u32,
    pub color_attachment_count: u32,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_mode: vk::CullModeFlags,
    pub blend: bool,
    pub topology: vk::PrimitiveTopology,
}
impl RhiPipelineDesc {
    /// 默认：三角形列表、不剔除、无混合、无深度
    pub fn new(vertex_shader: &'static str, render_pass: RhiRenderPassHandle, subpass: u32) -> Self {
        Self {
            vertex_shader,
            fragment_shader: None,
            vertex_layout: RhiVertexLayout::None,
            descriptor_set_layouts: Vec::new(),
            push_constant_size: 0,
            render_pass,
            subpass,
            color_attachment_count: 1,
            depth_test: false,
            depth_write: false,
            cull_mode: vk::CullModeFlags::NONE,
            blend: false,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }

    #[inline]
    pub fn fragment(mut self, fragment_shader: &'static str) -> Self {
        self.fragment_shader = Some(fragment_shader);
        self
    }

    #[inline]
    pub fn vertex_layout(mut self, vertex_layout: RhiVertexLayout) -> Self {
        self.vertex_layout = vertex_layout;
        self
    }

    #[inline]
    pub fn layouts(mut self, layouts: &[RhiDescriptorSetLayoutHandle]) -> Self {
        self.descriptor_set_layouts = layouts.to_vec();
        self
    }

    #[inline]
    pub fn color_attachments(mut self, count: u32) -> Self {
        self.color_attachment_count = count;
        self
    }

    #[inline]
    pub fn depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    #[inline]
    pub fn cull(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    #[inline]
    pub fn blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }

    #[inline]
    pub fn push_constants(mut self, size: u32) -> Self {
        self.push_constant_size = size;
        self
    }
}

// ----------------------------------------------------------------------------
// transfer & barrier
// ----------------------------------------------------------------------------

/// buffer 与 image 之间的拷贝区域，buffer 中的数据是紧密排列的
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiBufferImageCopy {
    pub buffer_offset: vk::DeviceSize,
    pub image_offset: vk::Offset2D,
    pub image_extent: vk::Extent2D,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}
impl RhiBufferImageCopy {
    /// 整个 mip 0 的拷贝
    pub fn whole_layers(extent: vk::Extent2D, base_array_layer: u32, layer_count: u32) -> Self {
        Self {
            buffer_offset: 0,
            image_offset: vk::Offset2D::default(),
            image_extent: extent,
            mip_level: 0,
            base_array_layer,
            layer_count,
        }
    }

    /// 单个 texel 的拷贝，用于回读
    pub fn single_texel(x: i32, y: i32) -> Self {
        Self {
            buffer_offset: 0,
            image_offset: vk::Offset2D { x, y },
            image_extent: vk::Extent2D { width: 1, height: 1 },
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    #[inline]
    pub fn buffer_offset(mut self, offset: vk::DeviceSize) -> Self {
        self.buffer_offset = offset;
        self
    }
}

/// image 的 layout 转换与同步
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiImageBarrier {
    pub image: RhiImageHandle,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}
impl Default for RhiImageBarrier {
    fn default() -> Self {
        Self {
            image: RhiImageHandle::default(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            aspect: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}
impl RhiImageBarrier {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn image(mut self, image: RhiImageHandle) -> Self {
        self.image = image;
        self
    }

    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    #[inline]
    pub fn src_mask(mut self, stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        self.src_stage = stage;
        self.src_access = access;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        self.dst_stage = stage;
        self.dst_access = access;
        self
    }

    #[inline]
    pub fn image_aspect_flag(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}

/// buffer 的同步，例如上传的 copy 与之后读取它的 draw 之间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhiBufferBarrier {
    pub buffer: RhiBufferHandle,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}
impl RhiBufferBarrier {
    /// transfer write -> 任意读取
    pub fn after_upload(buffer: RhiBufferHandle, dst_stage: vk::PipelineStageFlags2, dst_access: vk::AccessFlags2) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_stage: vk::PipelineStageFlags2::TRANSFER,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_stage,
            dst_access,
        }
    }
}
