pub mod backend;
pub mod frame_context;
pub mod present;
pub mod pso;
pub mod renderer;
pub mod settings;
