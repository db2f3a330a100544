mod merge;
mod program;
mod reflect;

pub use merge::merge_stage_bindings;
pub use program::{ShaderProgram, ShaderStage};
pub use reflect::{NagaReflector, SetBindings, ShaderReflector, combined_image_sampler_bindings};
