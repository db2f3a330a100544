mod config;
mod staging_pool;
mod token;
mod transfer_manager;

pub use config::TransferManagerConfig;
pub use staging_pool::{StagingBufferKey, StagingBufferPool, StagingPoolStats};
pub use token::TransferToken;
pub use transfer_manager::TransferManager;
