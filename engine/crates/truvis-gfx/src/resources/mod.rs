pub mod buffer;
pub mod image;
pub mod shader_module;
