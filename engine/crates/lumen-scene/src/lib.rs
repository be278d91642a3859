pub mod camera;
pub mod culling;
pub mod game_object;
pub mod light;
pub mod render_entity;
pub mod render_scene;
pub mod swap_context;
