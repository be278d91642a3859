pub mod bounding_box;
pub mod deferred_destroy;
pub mod frame_counter;
pub mod frame_resources;
pub mod guid_allocator;
pub mod per_frame_data;
pub mod render_settings;
pub mod ring_buffer;
