use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};

use crate::descriptors::write::GfxWriteDescriptorSet;
use crate::foundation::device_functions::{DeviceFunctions, GfxImageDesc, GfxQueueType, MemoryLocation};

/// 被录制到 command buffer 中的命令
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    ImageBarrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
        base_mip_level: u32,
        level_count: u32,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        src_mip_level: u32,
        dst_mip_level: u32,
        filter: vk::Filter,
    },
}

/// 一次队列提交的记录
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub queue: GfxQueueType,
    pub commands: Vec<RecordedCommand>,
}

struct CommandBufferState {
    pool: vk::CommandPool,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

struct DescriptorPoolState {
    capacity: u32,
    allocated: u32,
}

struct HeadlessState {
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    images: HashMap<vk::Image, GfxImageDesc>,
    command_pools: HashMap<vk::CommandPool, u32>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    fences: HashMap<vk::Fence, bool>,
    unsignaled_submits: Vec<vk::Fence>,
    layouts: HashSet<vk::DescriptorSetLayout>,
    descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolState>,
    shader_modules: HashSet<vk::ShaderModule>,

    submissions: Vec<SubmissionRecord>,
    descriptor_writes: Vec<GfxWriteDescriptorSet>,
    update_calls: usize,
    buffers_created: usize,
    layouts_created: usize,
    descriptor_pools_created: usize,

    manual_fences: bool,
    device_lost: bool,
    pool_capacity: Option<u32>,
    format_overrides: HashMap<vk::Format, vk::FormatFeatureFlags>,
    dedicated_transfer: bool,
}

/// 在 CPU 上模拟的设备
///
/// - buffer 是一段 host 内存，copy 命令在提交时真正执行
/// - fence 默认在提交时立即 signal；`set_manual_fences(true)` 后需要手动 `signal_all_fences`，
///   在此之前 `wait_fence` 会阻塞到 signal、device lost 或超时
/// - 可以注入 device lost、描述符池容量与 format 特性
pub struct HeadlessDevice {
    next_handle: AtomicU64,
    state: Mutex<HeadlessState>,
    /// signal 或 device lost 时唤醒等待 fence 的线程
    fence_changed: Condvar,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

// init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(HeadlessState {
                buffers: HashMap::new(),
                images: HashMap::new(),
                command_pools: HashMap::new(),
                command_buffers: HashMap::new(),
                fences: HashMap::new(),
                unsignaled_submits: Vec::new(),
                layouts: HashSet::new(),
                descriptor_pools: HashMap::new(),
                shader_modules: HashSet::new(),
                submissions: Vec::new(),
                descriptor_writes: Vec::new(),
                update_calls: 0,
                buffers_created: 0,
                layouts_created: 0,
                descriptor_pools_created: 0,
                manual_fences: false,
                device_lost: false,
                pool_capacity: None,
                format_overrides: HashMap::new(),
                dedicated_transfer: true,
            }),
            fence_changed: Condvar::new(),
        }
    }

    #[inline]
    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

// 故障注入与控制
impl HeadlessDevice {
    /// 为 true 时提交不会 signal fence，需要调用 `signal_all_fences`
    pub fn set_manual_fences(&self, manual: bool) {
        self.state.lock().manual_fences = manual;
    }

    /// signal 所有已经提交但尚未完成的 fence
    pub fn signal_all_fences(&self) {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.unsignaled_submits);
        for fence in pending {
            if let Some(signaled) = state.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
        self.fence_changed.notify_all();
    }

    pub fn set_device_lost(&self, lost: bool) {
        self.state.lock().device_lost = lost;
        self.fence_changed.notify_all();
    }

    /// 覆盖之后新建的描述符池能分配的 set 数量
    pub fn set_descriptor_pool_capacity(&self, capacity: Option<u32>) {
        self.state.lock().pool_capacity = capacity;
    }

    pub fn set_format_features(&self, format: vk::Format, features: vk::FormatFeatureFlags) {
        self.state.lock().format_overrides.insert(format, features);
    }

    pub fn set_dedicated_transfer_queue(&self, dedicated: bool) {
        self.state.lock().dedicated_transfer = dedicated;
    }
}

// 计数与检查
impl HeadlessDevice {
    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn buffers_created(&self) -> usize {
        self.state.lock().buffers_created
    }

    pub fn live_layout_count(&self) -> usize {
        self.state.lock().layouts.len()
    }

    pub fn layouts_created(&self) -> usize {
        self.state.lock().layouts_created
    }

    pub fn live_fence_count(&self) -> usize {
        self.state.lock().fences.len()
    }

    pub fn live_command_pool_count(&self) -> usize {
        self.state.lock().command_pools.len()
    }

    pub fn live_descriptor_pool_count(&self) -> usize {
        self.state.lock().descriptor_pools.len()
    }

    pub fn descriptor_pools_created(&self) -> usize {
        self.state.lock().descriptor_pools_created
    }

    pub fn live_shader_module_count(&self) -> usize {
        self.state.lock().shader_modules.len()
    }

    pub fn update_call_count(&self) -> usize {
        self.state.lock().update_calls
    }

    /// 所有 `update_descriptor_sets` 调用写入的内容，按调用顺序展开
    pub fn descriptor_writes(&self) -> Vec<GfxWriteDescriptorSet> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer).cloned()
    }
}

impl HeadlessState {
    fn record(&mut self, command_buffer: vk::CommandBuffer, command: RecordedCommand) {
        match self.command_buffers.get_mut(&command_buffer) {
            Some(cmd) if cmd.recording => cmd.commands.push(command),
            _ => log::error!("headless: command recorded outside of begin/end: {:?}", command_buffer),
        }
    }

    fn execute(&mut self, command: &RecordedCommand) -> VkResult<()> {
        if let RecordedCommand::CopyBuffer { src, dst, regions } = command {
            for region in regions {
                let src_range = region.src_offset as usize..(region.src_offset + region.size) as usize;
                let dst_range = region.dst_offset as usize..(region.dst_offset + region.size) as usize;
                let bytes = self
                    .buffers
                    .get(src)
                    .and_then(|b| b.get(src_range))
                    .ok_or(vk::Result::ERROR_UNKNOWN)?
                    .to_vec();
                self.buffers
                    .get_mut(dst)
                    .and_then(|b| b.get_mut(dst_range))
                    .ok_or(vk::Result::ERROR_UNKNOWN)?
                    .copy_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

impl DeviceFunctions for HeadlessDevice {
    fn queue_family_index(&self, queue: GfxQueueType) -> u32 {
        match queue {
            GfxQueueType::Transfer if self.has_dedicated_transfer_queue() => 1,
            _ => 0,
        }
    }

    fn has_dedicated_transfer_queue(&self) -> bool {
        self.state.lock().dedicated_transfer
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        self.state.lock().format_overrides.get(&format).copied().unwrap_or(
            vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::TRANSFER_SRC
                | vk::FormatFeatureFlags::TRANSFER_DST,
        )
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _location: MemoryLocation,
        _debug_name: &str,
    ) -> VkResult<vk::Buffer> {
        let buffer = vk::Buffer::from_raw(self.next_raw());
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.buffers.insert(buffer, vec![0; size as usize]);
        state.buffers_created += 1;
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()> {
        let mut state = self.state.lock();
        let offset = offset as usize;
        state
            .buffers
            .get_mut(&buffer)
            .and_then(|b| b.get_mut(offset..offset + data.len()))
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?
            .copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &mut [u8]) -> VkResult<()> {
        let state = self.state.lock();
        let offset = offset as usize;
        let src = state
            .buffers
            .get(&buffer)
            .and_then(|b| b.get(offset..offset + data.len()))
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        data.copy_from_slice(src);
        Ok(())
    }

    fn create_image(&self, desc: &GfxImageDesc, _debug_name: &str) -> VkResult<vk::Image> {
        let image = vk::Image::from_raw(self.next_raw());
        self.state.lock().images.insert(image, *desc);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state.lock().images.remove(&image);
    }

    fn create_command_pool(
        &self,
        queue_family_index: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        let pool = vk::CommandPool::from_raw(self.next_raw());
        self.state.lock().command_pools.insert(pool, queue_family_index);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        state.command_pools.remove(&pool);
        state.command_buffers.retain(|_, cmd| cmd.pool != pool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        if !state.command_pools.contains_key(&pool) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let command_buffer = vk::CommandBuffer::from_raw(self.next_raw());
        state.command_buffers.insert(
            command_buffer,
            CommandBufferState {
                pool,
                recording: false,
                commands: Vec::new(),
            },
        );
        Ok(command_buffer)
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        self.state.lock().command_buffers.remove(&command_buffer);
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        let cmd = state.command_buffers.get_mut(&command_buffer).ok_or(vk::Result::ERROR_UNKNOWN)?;
        cmd.recording = true;
        cmd.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        let cmd = state.command_buffers.get_mut(&command_buffer).ok_or(vk::Result::ERROR_UNKNOWN)?;
        cmd.recording = false;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_image_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[vk::ImageMemoryBarrier2<'_>]) {
        let mut state = self.state.lock();
        for barrier in barriers {
            state.record(
                command_buffer,
                RecordedCommand::ImageBarrier {
                    image: barrier.image,
                    old_layout: barrier.old_layout,
                    new_layout: barrier.new_layout,
                    src_stage: barrier.src_stage_mask,
                    src_access: barrier.src_access_mask,
                    dst_stage: barrier.dst_stage_mask,
                    dst_access: barrier.dst_access_mask,
                    base_mip_level: barrier.subresource_range.base_mip_level,
                    level_count: barrier.subresource_range.level_count,
                },
            );
        }
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        let mut state = self.state.lock();
        for region in regions {
            state.record(
                command_buffer,
                RecordedCommand::BlitImage {
                    src,
                    dst,
                    src_mip_level: region.src_subresource.mip_level,
                    dst_mip_level: region.dst_subresource.mip_level,
                    filter,
                },
            );
        }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let fence = vk::Fence::from_raw(self.next_raw());
        self.state.lock().fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.fences.remove(&fence);
        state.unsignaled_submits.retain(|f| *f != fence);
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        *state.fences.get_mut(&fence).ok_or(vk::Result::ERROR_UNKNOWN)? = false;
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let state = self.state.lock();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        state.fences.get(&fence).copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    /// 已提交但未 signal 的 fence 会阻塞；从未提交的 fence 永远不会 signal，直接视为超时
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<bool> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        let mut state = self.state.lock();
        loop {
            if state.device_lost {
                return Err(vk::Result::ERROR_DEVICE_LOST);
            }
            match state.fences.get(&fence) {
                None => return Err(vk::Result::ERROR_UNKNOWN),
                Some(true) => return Ok(true),
                Some(false) if !state.unsignaled_submits.contains(&fence) => return Ok(false),
                Some(false) => {}
            }
            match deadline {
                Some(deadline) => {
                    if self.fence_changed.wait_until(&mut state, deadline).timed_out() {
                        return if state.device_lost {
                            Err(vk::Result::ERROR_DEVICE_LOST)
                        } else {
                            Ok(state.fences.get(&fence).copied().unwrap_or(false))
                        };
                    }
                }
                None => self.fence_changed.wait(&mut state),
            }
        }
    }

    fn queue_submit(
        &self,
        queue: GfxQueueType,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        // fence 在提交前必须处于 unsignaled 状态
        match state.fences.get(&fence) {
            Some(false) => {}
            _ => return Err(vk::Result::ERROR_UNKNOWN),
        }
        let commands = match state.command_buffers.get(&command_buffer) {
            Some(cmd) if !cmd.recording => cmd.commands.clone(),
            _ => return Err(vk::Result::ERROR_UNKNOWN),
        };
        for command in &commands {
            state.execute(command)?;
        }
        state.submissions.push(SubmissionRecord { queue, commands });

        if state.manual_fences {
            state.unsignaled_submits.push(fence);
        } else if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = true;
            self.fence_changed.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        if self.state.lock().device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        self.signal_all_fences();
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let layout = vk::DescriptorSetLayout::from_raw(self.next_raw());
        let mut state = self.state.lock();
        state.layouts.insert(layout);
        state.layouts_created += 1;
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().layouts.remove(&layout);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
        _flags: vk::DescriptorPoolCreateFlags,
    ) -> VkResult<vk::DescriptorPool> {
        let pool = vk::DescriptorPool::from_raw(self.next_raw());
        let mut state = self.state.lock();
        let capacity = state.pool_capacity.unwrap_or(max_sets);
        state.descriptor_pools.insert(pool, DescriptorPoolState { capacity, allocated: 0 });
        state.descriptor_pools_created += 1;
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        let mut state = self.state.lock();
        state.descriptor_pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?.allocated = 0;
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().descriptor_pools.remove(&pool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        if layouts.iter().any(|layout| !state.layouts.contains(layout)) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let pool_state = state.descriptor_pools.get_mut(&pool).ok_or(vk::Result::ERROR_UNKNOWN)?;
        if pool_state.allocated + layouts.len() as u32 > pool_state.capacity {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        pool_state.allocated += layouts.len() as u32;
        Ok(layouts.iter().map(|_| vk::DescriptorSet::from_raw(self.next_raw())).collect())
    }

    fn update_descriptor_sets(&self, writes: &[GfxWriteDescriptorSet]) {
        let mut state = self.state.lock();
        state.update_calls += 1;
        state.descriptor_writes.extend_from_slice(writes);
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        let module = vk::ShaderModule::from_raw(self.next_raw());
        self.state.lock().shader_modules.insert(module);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.lock().shader_modules.remove(&module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_executes_buffer_copy() {
        let device = HeadlessDevice::new();
        let src = device.create_buffer(8, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, "src").unwrap();
        let dst = device.create_buffer(8, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly, "dst").unwrap();
        device.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        let pool = device.create_command_pool(0, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let fence = device.create_fence(false).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.cmd_copy_buffer(
            cmd,
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 4,
                size: 4,
            }],
        );
        device.end_command_buffer(cmd).unwrap();
        device.queue_submit(GfxQueueType::Transfer, cmd, fence).unwrap();

        assert!(device.fence_status(fence).unwrap());
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_manual_fence_and_device_lost() {
        let device = HeadlessDevice::new();
        device.set_manual_fences(true);
        let pool = device.create_command_pool(0, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let fence = device.create_fence(false).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.end_command_buffer(cmd).unwrap();
        device.queue_submit(GfxQueueType::Graphics, cmd, fence).unwrap();

        assert!(!device.wait_fence(fence, 0).unwrap());
        device.signal_all_fences();
        assert!(device.wait_fence(fence, 0).unwrap());

        // 已经 signaled 的 fence 不能直接再次提交
        assert!(device.queue_submit(GfxQueueType::Graphics, cmd, fence).is_err());

        device.set_device_lost(true);
        assert_eq!(device.fence_status(fence), Err(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_wait_fence_blocks_until_signaled() {
        let device = HeadlessDevice::new();
        device.set_manual_fences(true);
        let pool = device.create_command_pool(0, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let fence = device.create_fence(false).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.end_command_buffer(cmd).unwrap();
        device.queue_submit(GfxQueueType::Graphics, cmd, fence).unwrap();

        let start = Instant::now();
        assert!(!device.wait_fence(fence, 10_000_000).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(10));

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                device.signal_all_fences();
            });
            assert!(device.wait_fence(fence, u64::MAX).unwrap());
        });
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let device = HeadlessDevice::new();
        device.set_descriptor_pool_capacity(Some(1));
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(16, &[], vk::DescriptorPoolCreateFlags::empty()).unwrap();

        assert_eq!(device.allocate_descriptor_sets(pool, &[layout]).unwrap().len(), 1);
        assert_eq!(
            device.allocate_descriptor_sets(pool, &[layout]),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        );
        device.reset_descriptor_pool(pool).unwrap();
        assert!(device.allocate_descriptor_sets(pool, &[layout]).is_ok());
    }
}
