use std::collections::HashMap;
use std::mem::ManuallyDrop;

use ash::prelude::VkResult;
use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::descriptors::write::GfxWriteDescriptorSet;
use crate::error::{GfxError, GfxResult};
use crate::foundation::device_functions::{DeviceFunctions, GfxImageDesc, GfxQueueType, MemoryLocation};

/// 队列以及保护它的锁
///
/// vkQueueSubmit 要求外部同步，多个线程各自录制完成后在这里串行提交
struct VulkanQueue {
    family_index: u32,
    handle: vk::Queue,
    submit_lock: Mutex<()>,
}

/// 基于 ash + vk-mem 的设备实现
///
/// 持有 logical device 与 vma allocator；instance 由调用方持有，并且需要比本对象活得更久
pub struct VulkanDevice {
    instance: ash::Instance,
    pdevice: vk::PhysicalDevice,
    device: ash::Device,
    allocator: ManuallyDrop<vk_mem::Allocator>,

    buffers: Mutex<HashMap<vk::Buffer, vk_mem::Allocation>>,
    images: Mutex<HashMap<vk::Image, vk_mem::Allocation>>,

    graphics_queue: VulkanQueue,
    transfer_queue: Option<VulkanQueue>,
}

// init & destroy
impl VulkanDevice {
    /// 在给定的 physical device 上创建 logical device
    ///
    /// # 参数
    /// - instance: 需要以 Vulkan 1.3 创建
    /// - pdevice: 需要支持 synchronization2
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanDevice::new");

        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let graphics_family = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or(GfxError::Vulkan(vk::Result::ERROR_FEATURE_NOT_PRESENT))? as u32;
        // 优先选择纯 transfer 的队列族，其次是不带 graphics 的队列族
        let transfer_family = families
            .iter()
            .position(|f| {
                f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !f.queue_flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .or_else(|| {
                families.iter().position(|f| {
                    f.queue_flags.contains(vk::QueueFlags::TRANSFER) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
            })
            .map(|i| i as u32);

        let priorities = [1.0_f32];
        let queue_create_infos = std::iter::once(graphics_family)
            .chain(transfer_family)
            .map(|family| vk::DeviceQueueCreateInfo::default().queue_family_index(family).queue_priorities(&priorities))
            .collect_vec();

        let mut sync2_features = vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .push_next(&mut sync2_features);
        let device =
            unsafe { instance.create_device(pdevice, &device_create_info, None) }.map_err(GfxError::Vulkan)?;

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = match unsafe { vk_mem::Allocator::new(vma_ci) } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(GfxError::from_alloc_result(e, "vma allocator"));
            }
        };

        let make_queue = |family_index: u32| VulkanQueue {
            family_index,
            handle: unsafe { device.get_device_queue(family_index, 0) },
            submit_lock: Mutex::new(()),
        };
        let graphics_queue = make_queue(graphics_family);
        let transfer_queue = transfer_family.map(make_queue);

        let props = unsafe { instance.get_physical_device_properties(pdevice) };
        log::info!(
            "vulkan device created: {:?}, graphics family: {}, transfer family: {:?}",
            props.device_name_as_c_str().unwrap_or(c"<unknown>"),
            graphics_family,
            transfer_family
        );

        Ok(Self {
            instance: instance.clone(),
            pdevice,
            device,
            allocator: ManuallyDrop::new(allocator),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            graphics_queue,
            transfer_queue,
        })
    }

    fn queue(&self, queue: GfxQueueType) -> &VulkanQueue {
        match queue {
            GfxQueueType::Transfer => self.transfer_queue.as_ref().unwrap_or(&self.graphics_queue),
            GfxQueueType::Graphics => &self.graphics_queue,
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Dropping VulkanDevice");
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during drop: {:?}", e);
            }

            let leaked_buffers = std::mem::take(&mut *self.buffers.lock());
            if !leaked_buffers.is_empty() {
                log::warn!("{} buffers still alive when dropping device", leaked_buffers.len());
            }
            for (buffer, mut allocation) in leaked_buffers {
                self.allocator.destroy_buffer(buffer, &mut allocation);
            }
            for (image, mut allocation) in std::mem::take(&mut *self.images.lock()) {
                self.allocator.destroy_image(image, &mut allocation);
            }

            // allocator 必须先于 device 销毁
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

impl DeviceFunctions for VulkanDevice {
    fn queue_family_index(&self, queue: GfxQueueType) -> u32 {
        self.queue(queue).family_index
    }

    fn has_dedicated_transfer_queue(&self) -> bool {
        self.transfer_queue.is_some()
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe { self.instance.get_physical_device_format_properties(self.pdevice, format) }.optimal_tiling_features
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        debug_name: &str,
    ) -> VkResult<vk::Buffer> {
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = match location {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            MemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        };

        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        log::debug!("created buffer {}: {:?}, {} bytes", debug_name, buffer, size);
        self.buffers.lock().insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        if let Some(mut allocation) = self.buffers.lock().remove(&buffer) {
            unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers.get_mut(&buffer).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        unsafe {
            let ptr = self.allocator.map_memory(allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
            let flushed = self.allocator.flush_allocation(allocation, offset, data.len() as vk::DeviceSize);
            self.allocator.unmap_memory(allocation);
            flushed
        }
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &mut [u8]) -> VkResult<()> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers.get_mut(&buffer).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        unsafe {
            let ptr = self.allocator.map_memory(allocation)?;
            let invalidated = self.allocator.invalidate_allocation(allocation, offset, data.len() as vk::DeviceSize);
            if invalidated.is_ok() {
                std::ptr::copy_nonoverlapping(ptr.add(offset as usize), data.as_mut_ptr(), data.len());
            }
            self.allocator.unmap_memory(allocation);
            invalidated
        }
    }

    fn create_image(&self, desc: &GfxImageDesc, debug_name: &str) -> VkResult<vk::Image> {
        let image_type = if desc.extent.depth > 1 { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci)? };
        log::debug!("created image {}: {:?}, {:?}", debug_name, image, desc.extent);
        self.images.lock().insert(image, allocation);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        if let Some(mut allocation) = self.images.lock().remove(&image) {
            unsafe { self.allocator.destroy_image(image, &mut allocation) };
        }
    }

    fn create_command_pool(
        &self,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let ci = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index).flags(flags);
        unsafe { self.device.create_command_pool(&ci, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        command_buffers.into_iter().next().ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, std::slice::from_ref(&command_buffer)) }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &info) }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer_to_image(command_buffer, src, dst, dst_layout, regions) }
    }

    fn cmd_image_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2<'_>]) {
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(barriers);
        unsafe { self.device.cmd_pipeline_barrier2(command_buffer, &dependency_info) }
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe { self.device.cmd_blit_image(command_buffer, src, src_layout, dst, dst_layout, regions, filter) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(&fence)) }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool> {
        match unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn queue_submit(
        &self,
        queue: GfxQueueType,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let queue = self.queue(queue);
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer)];
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);

        let _guard = queue.submit_lock.lock();
        unsafe { self.device.queue_submit2(queue.handle, std::slice::from_ref(&submit_info), fence) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        unsafe { self.device.create_descriptor_set_layout(&ci, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        flags: vk::DescriptorPoolCreateFlags,
    ) -> VkResult<vk::DescriptorPool> {
        let ci = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes).flags(flags);
        unsafe { self.device.create_descriptor_pool(&ci, None) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe { self.device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
    }

    fn update_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]) {
        let vk_writes = writes.iter().map(GfxWriteDescriptorSet::to_vk_type).collect_vec();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let ci = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&ci, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }
}

