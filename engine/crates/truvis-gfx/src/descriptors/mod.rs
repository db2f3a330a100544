pub mod binding;
pub mod layout_cache;
pub mod pool_allocator;
pub mod write;
pub mod writer;
