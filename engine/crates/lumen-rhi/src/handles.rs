use slotmap::new_key_type;

new_key_type! { pub struct RhiBufferHandle; }
new_key_type! { pub struct RhiImageHandle; }
new_key_type! { pub struct RhiImageViewHandle; }
new_key_type! { pub struct RhiSamplerHandle; }

new_key_type! { pub struct RhiRenderPassHandle; }
new_key_type! { pub struct RhiFramebufferHandle; }
new_key_type! { pub struct RhiPipelineHandle; }

new_key_type! { pub struct RhiDescriptorSetLayoutHandle; }
new_key_type! { pub struct RhiDescriptorPoolHandle; }
new_key_type! { pub struct RhiDescriptorSetHandle; }

new_key_type! { pub struct RhiCommandPoolHandle; }
new_key_type! { pub struct RhiCommandBufferHandle; }

new_key_type! { pub struct RhiFenceHandle; }
new_key_type! { pub struct RhiSemaphoreHandle; }
