pub mod context;
pub mod device_functions;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod vulkan_device;
