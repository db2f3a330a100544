use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;

use crate::commands::barrier::GfxImageBarrier;
use crate::commands::command_buffer::GfxCommandBuffer;
use crate::commands::command_pool::GfxCommandPool;
use crate::commands::fence::GfxFence;
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::foundation::device_functions::GfxQueueType;
use crate::resources::buffer::GfxBuffer;
use crate::resources::image::GfxImage;
use crate::transfer::config::TransferManagerConfig;
use crate::transfer::staging_pool::{StagingBufferKey, StagingBufferPool, StagingPoolStats};
use crate::transfer::token::{TokenState, TransferToken};

/// 已经提交、尚未回收的一次传输
struct PendingSubmission {
    command_buffer: GfxCommandBuffer,
    /// 持有提交使用的 fence
    token: Arc<TokenState>,
    staging: Vec<StagingBufferKey>,
}

/// 每个线程独占的传输资源
///
/// command pool 不能被多个线程同时使用，所以每个线程各有一套
struct ThreadResources {
    active_submissions: Vec<PendingSubmission>,
    fence_pool: Vec<GfxFence>,
    staging_pool: StagingBufferPool,
    /// 设备没有专用 transfer 队列时为 None，所有工作都走 graphics
    transfer_pool: Option<GfxCommandPool>,
    graphics_pool: GfxCommandPool,

    ctx: GfxContext,
}

impl Drop for ThreadResources {
    fn drop(&mut self) {
        // 字段按声明顺序销毁：先等待并释放提交记录，最后销毁 command pool
        self.wait_all();
    }
}

// init
impl ThreadResources {
    fn new(ctx: &GfxContext, config: &TransferManagerConfig) -> GfxResult<Self> {
        let thread_name = thread::current().name().unwrap_or("<unnamed>").to_string();
        let transfer_pool = if ctx.has_dedicated_transfer_queue() {
            Some(GfxCommandPool::new(
                ctx,
                GfxQueueType::Transfer,
                vk::CommandPoolCreateFlags::TRANSIENT,
                format!("transfer-{thread_name}"),
            )?)
        } else {
            None
        };
        let graphics_pool = GfxCommandPool::new(
            ctx,
            GfxQueueType::Graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
            format!("graphics-{thread_name}"),
        )?;
        log::info!("transfer resources created for thread {}", thread_name);

        Ok(Self {
            active_submissions: Vec::new(),
            fence_pool: Vec::new(),
            staging_pool: StagingBufferPool::new(ctx, config),
            transfer_pool,
            graphics_pool,
            ctx: ctx.clone(),
        })
    }
}

// tools
impl ThreadResources {
    #[inline]
    fn pool(&self, queue: GfxQueueType) -> &GfxCommandPool {
        match queue {
            GfxQueueType::Transfer => self.transfer_pool.as_ref().unwrap_or(&self.graphics_pool),
            GfxQueueType::Graphics => &self.graphics_pool,
        }
    }

    fn acquire_fence(&mut self) -> GfxResult<GfxFence> {
        match self.fence_pool.pop() {
            Some(fence) => Ok(fence),
            None => GfxFence::new(&self.ctx, false),
        }
    }

    fn release_staging(&mut self, staging: &[StagingBufferKey]) {
        for key in staging {
            self.staging_pool.release(*key);
        }
    }

    /// 回收已经完成且没有外部 token 引用的提交
    ///
    /// # 返回值
    /// 本次回收的提交数量
    fn reclaim_finished(&mut self) -> GfxResult<usize> {
        let _span = tracy_client::span!("ThreadResources::reclaim_finished");

        let mut reclaimed = 0;
        let mut idx = 0;
        while idx < self.active_submissions.len() {
            let submission = &self.active_submissions[idx];
            let done = submission.token.is_settled() || submission.token.fence().is_signaled()?;
            if !done || Arc::strong_count(&submission.token) > 1 {
                idx += 1;
                continue;
            }

            let submission = self.active_submissions.remove(idx);
            self.release_staging(&submission.staging);
            self.pool(submission.command_buffer.queue()).free_command_buffer(submission.command_buffer);
            if let Ok(state) = Arc::try_unwrap(submission.token) {
                let fence = state.into_fence();
                fence.reset()?;
                self.fence_pool.push(fence);
            }
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// 录制并提交一次性命令
    ///
    /// 失败时归还 `staging` 与 command buffer，调用方不需要额外清理
    fn submit_one_time(
        &mut self,
        queue: GfxQueueType,
        staging: Vec<StagingBufferKey>,
        debug_name: &str,
        record: impl FnOnce(&GfxCommandBuffer, &StagingBufferPool) -> GfxResult<()>,
    ) -> GfxResult<TransferToken> {
        let command_buffer = match self.pool(queue).allocate(debug_name) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.release_staging(&staging);
                return Err(e);
            }
        };

        let recorded = command_buffer
            .begin()
            .and_then(|_| record(&command_buffer, &self.staging_pool))
            .and_then(|_| command_buffer.end())
            // 提交新的工作之前先回收之前完成的提交
            .and_then(|_| self.reclaim_finished().map(|_| ()))
            .and_then(|_| self.acquire_fence());
        let fence = match recorded {
            Ok(fence) => fence,
            Err(e) => {
                self.pool(queue).free_command_buffer(command_buffer);
                self.release_staging(&staging);
                return Err(e);
            }
        };

        if let Err(e) = self.ctx.queue_submit(queue, command_buffer.vk_handle(), fence.handle()) {
            self.pool(queue).free_command_buffer(command_buffer);
            self.release_staging(&staging);
            self.fence_pool.push(fence);
            return Err(GfxError::from_sync_result(e));
        }

        let token = Arc::new(TokenState::new(fence));
        self.active_submissions.push(PendingSubmission {
            command_buffer,
            token: token.clone(),
            staging,
        });
        self.staging_pool.cleanup_unused_staging_buffers();
        Ok(TransferToken::pending(token))
    }

    /// 等待所有提交完成并释放它们
    ///
    /// 等待的结果记录在 token 上：失败的提交之后查询 token 都会得到同一个错误
    fn wait_all(&mut self) {
        for submission in std::mem::take(&mut self.active_submissions) {
            let token = &submission.token;
            if !token.is_settled() {
                let result = token.fence().wait(u64::MAX).map_err(TransferToken::fence_failure);
                if let Err(e) = token.settle(result) {
                    log::error!("waiting transfer fence failed during teardown: {}", e);
                }
            }
            self.release_staging(&submission.staging);
            self.pool(submission.command_buffer.queue()).free_command_buffer(submission.command_buffer);
        }
    }
}

/// 异步的 host -> device 传输引擎
///
/// - 每个调用线程拥有独立的 command pool、staging 池与提交列表
/// - 所有操作都返回 `TransferToken`，调用方自行决定是否等待
/// - 设备没有专用 transfer 队列时，所有工作透明地退化到 graphics 队列
pub struct TransferManager {
    ctx: GfxContext,
    config: TransferManagerConfig,
    threads: Mutex<HashMap<ThreadId, Arc<Mutex<ThreadResources>>>>,
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        log::info!("Dropping TransferManager");
        self.cleanup();
    }
}

// init & destroy
impl TransferManager {
    pub fn new(ctx: &GfxContext, config: TransferManagerConfig) -> Self {
        log::info!("TransferManager created: {:?}", config);
        Self {
            ctx: ctx.clone(),
            config,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// 等待所有线程的提交完成，并销毁所有线程的资源
    pub fn cleanup(&self) {
        let _span = tracy_client::span!("TransferManager::cleanup");
        let threads = std::mem::take(&mut *self.threads.lock());
        for (_, resources) in threads {
            let mut resources = resources.lock();
            resources.wait_all();
            resources.fence_pool.clear();
            resources.staging_pool.destroy_all();
        }
    }

    /// 等待并销毁当前线程的资源；线程退出前调用
    pub fn release_thread_resources(&self) {
        let removed = self.threads.lock().remove(&thread::current().id());
        if let Some(resources) = removed {
            resources.lock().wait_all();
        }
    }
}

// getters
impl TransferManager {
    #[inline]
    pub fn config(&self) -> &TransferManagerConfig {
        &self.config
    }

    /// 当前线程尚未回收的提交数量
    pub fn active_submission_count(&self) -> GfxResult<usize> {
        Ok(self.thread_resources()?.lock().active_submissions.len())
    }

    /// 当前线程可复用的 fence 数量
    pub fn fence_pool_len(&self) -> GfxResult<usize> {
        Ok(self.thread_resources()?.lock().fence_pool.len())
    }

    pub fn staging_stats(&self) -> GfxResult<StagingPoolStats> {
        Ok(self.thread_resources()?.lock().staging_pool.stats())
    }
}

// 传输操作
impl TransferManager {
    /// 将 data 通过 staging buffer 上传到 `dst` 的 `offset` 处
    pub fn upload_to_buffer(&self, dst: &GfxBuffer, data: &[u8], offset: vk::DeviceSize) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::upload_to_buffer");
        let size = data.len() as vk::DeviceSize;
        GfxError::check_range(offset, size, dst.size())?;
        if data.is_empty() {
            return Ok(TransferToken::completed());
        }

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        let staging = Self::stage(&mut resources, data)?;
        resources.submit_one_time(self.route(false), vec![staging], "upload-buffer", |cmd, pool| {
            let src = pool.buffer(staging).ok_or(GfxError::Vulkan(vk::Result::ERROR_UNKNOWN))?;
            cmd.cmd_copy_buffer(
                src.vk_buffer(),
                dst,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: offset,
                    size,
                }],
            );
            Ok(())
        })
    }

    #[inline]
    pub fn upload_slice<T: bytemuck::Pod>(
        &self,
        dst: &GfxBuffer,
        data: &[T],
        offset: vk::DeviceSize,
    ) -> GfxResult<TransferToken> {
        self.upload_to_buffer(dst, bytemuck::cast_slice(data), offset)
    }

    #[inline]
    pub fn upload_object<T: bytemuck::Pod>(
        &self,
        dst: &GfxBuffer,
        data: &T,
        offset: vk::DeviceSize,
    ) -> GfxResult<TransferToken> {
        self.upload_to_buffer(dst, bytemuck::bytes_of(data), offset)
    }

    /// 将像素数据上传到 image 的一个 mip level / layer
    ///
    /// 上传前 image 从 UNDEFINED 转换到 TRANSFER_DST，上传后转换到 SHADER_READ_ONLY
    ///
    /// `extent` 必须落在该 mip level 之内，`data` 至少要覆盖 `extent` 个 texel
    pub fn upload_to_image(
        &self,
        dst: &GfxImage,
        data: &[u8],
        extent: vk::Extent3D,
        mip_level: u32,
        array_layer: u32,
    ) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::upload_to_image");
        if mip_level >= dst.mip_levels() {
            return Err(GfxError::OutOfRange {
                offset: mip_level as vk::DeviceSize,
                size: 1,
                capacity: dst.mip_levels() as vk::DeviceSize,
            });
        }
        if array_layer >= dst.array_layers() {
            return Err(GfxError::OutOfRange {
                offset: array_layer as vk::DeviceSize,
                size: 1,
                capacity: dst.array_layers() as vk::DeviceSize,
            });
        }
        if data.is_empty() {
            return Ok(TransferToken::completed());
        }

        let mip_extent = dst.mip_extent(mip_level);
        GfxError::check_range(0, extent.width as vk::DeviceSize, mip_extent.width as vk::DeviceSize)?;
        GfxError::check_range(0, extent.height as vk::DeviceSize, mip_extent.height as vk::DeviceSize)?;
        GfxError::check_range(0, extent.depth as vk::DeviceSize, mip_extent.depth as vk::DeviceSize)?;
        let texel_size = GfxImage::texel_size(dst.format()).ok_or(GfxError::UnsupportedFormat {
            format: dst.format(),
            required: vk::FormatFeatureFlags::TRANSFER_DST,
        })?;
        let required = extent.width as vk::DeviceSize
            * extent.height as vk::DeviceSize
            * extent.depth as vk::DeviceSize
            * texel_size;
        GfxError::check_range(0, required, data.len() as vk::DeviceSize)?;

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: dst.aspect(),
            base_mip_level: mip_level,
            level_count: 1,
            base_array_layer: array_layer,
            layer_count: 1,
        };
        let copy_region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect(),
                mip_level,
                base_array_layer: array_layer,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: extent,
        };

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        let staging = Self::stage(&mut resources, data)?;
        // 最终的 SHADER_READ_ONLY 需要 fragment stage，只能在 graphics 队列上执行
        resources.submit_one_time(self.route(true), vec![staging], "upload-image", |cmd, pool| {
            let src = pool.buffer(staging).ok_or(GfxError::Vulkan(vk::Result::ERROR_UNKNOWN))?;
            cmd.image_memory_barrier(&[GfxImageBarrier::new()
                .image(dst.handle())
                .subresource_range(subresource_range)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)]);
            cmd.cmd_copy_buffer_to_image(src.vk_buffer(), dst, std::slice::from_ref(&copy_region));
            cmd.image_memory_barrier(&[GfxImageBarrier::new()
                .image(dst.handle())
                .subresource_range(subresource_range)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)]);
            Ok(())
        })
    }

    /// device 内的 buffer 拷贝，两端的范围都会被检查
    pub fn copy_buffer(
        &self,
        src: &GfxBuffer,
        dst: &GfxBuffer,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::copy_buffer");
        GfxError::check_range(src_offset, size, src.size())?;
        GfxError::check_range(dst_offset, size, dst.size())?;
        if size == 0 {
            return Ok(TransferToken::completed());
        }

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        resources.submit_one_time(self.route(false), Vec::new(), "copy-buffer", |cmd, _| {
            cmd.cmd_copy_buffer(
                src.vk_buffer(),
                dst,
                &[vk::BufferCopy {
                    src_offset,
                    dst_offset,
                    size,
                }],
            );
            Ok(())
        })
    }

    /// 将 buffer 拷贝到已经处于 TRANSFER_DST 的 image
    pub fn copy_buffer_to_image(
        &self,
        src: &GfxBuffer,
        dst: &GfxImage,
        regions: &[vk::BufferImageCopy],
    ) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::copy_buffer_to_image");
        if regions.is_empty() {
            return Ok(TransferToken::completed());
        }

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        resources.submit_one_time(self.route(false), Vec::new(), "copy-buffer-to-image", |cmd, _| {
            cmd.cmd_copy_buffer_to_image(src.vk_buffer(), dst, regions);
            Ok(())
        })
    }

    /// image layout 转换
    ///
    /// # 参数
    /// - range: `None` 表示整个 image
    /// - force_graphics: 即使两端 stage 都能在 transfer 队列执行，也使用 graphics 队列
    pub fn transition_image_layout(
        &self,
        image: &GfxImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        range: Option<vk::ImageSubresourceRange>,
        force_graphics: bool,
    ) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::transition_image_layout");
        let barrier = GfxImageBarrier::new()
            .image(image.handle())
            .subresource_range(range.unwrap_or_else(|| image.full_range()))
            .layout_transfer(old_layout, new_layout);
        let queue = self.route(force_graphics || barrier.requires_graphics_queue());

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        resources.submit_one_time(queue, Vec::new(), "transition-image", |cmd, _| {
            cmd.image_memory_barrier(std::slice::from_ref(&barrier));
            Ok(())
        })
    }

    /// 逐级 blit 生成 mip chain
    ///
    /// 调用前所有 mip level 都需要处于 TRANSFER_DST，完成后都处于 SHADER_READ_ONLY
    pub fn generate_mipmaps(&self, image: &GfxImage) -> GfxResult<TransferToken> {
        let _span = tracy_client::span!("TransferManager::generate_mipmaps");
        let required = vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        if !self.ctx.format_features(image.format()).contains(required) {
            return Err(GfxError::UnsupportedFormat {
                format: image.format(),
                required,
            });
        }

        let mip_levels = image.mip_levels();
        let extent = image.extent();
        let aspect = image.aspect();
        let to_offset = |w: u32, h: u32| vk::Offset3D {
            x: w as i32,
            y: h as i32,
            z: 1,
        };

        let resources = self.thread_resources()?;
        let mut resources = resources.lock();
        // blit 不保证在纯 transfer 队列上可用
        resources.submit_one_time(GfxQueueType::Graphics, Vec::new(), "generate-mipmaps", |cmd, _| {
            let barrier = |level: u32, old_layout, new_layout| {
                GfxImageBarrier::new().image(image.handle()).mip_level(level).layout_transfer(old_layout, new_layout)
            };

            let mut mip_width = extent.width;
            let mut mip_height = extent.height;
            for level in 1..mip_levels {
                cmd.image_memory_barrier(&[barrier(
                    level - 1,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                )]);

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);
                let subresource = |mip_level| vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                cmd.cmd_blit_mip(
                    image,
                    vk::ImageBlit {
                        src_subresource: subresource(level - 1),
                        src_offsets: [vk::Offset3D::default(), to_offset(mip_width, mip_height)],
                        dst_subresource: subresource(level),
                        dst_offsets: [vk::Offset3D::default(), to_offset(next_width, next_height)],
                    },
                );

                cmd.image_memory_barrier(&[barrier(
                    level - 1,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )]);
                mip_width = next_width;
                mip_height = next_height;
            }

            cmd.image_memory_barrier(&[barrier(
                mip_levels.saturating_sub(1),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )]);
            Ok(())
        })
    }

    /// 直接通过 mem map 写入 host visible 的 buffer，不经过队列
    pub fn write_to_uniform_buffer(&self, dst: &GfxBuffer, data: &[u8], offset: vk::DeviceSize) -> GfxResult<()> {
        dst.write(offset, data)
    }

    /// 主动回收当前线程已经完成的提交
    pub fn reclaim_finished(&self) -> GfxResult<usize> {
        self.thread_resources()?.lock().reclaim_finished()
    }
}

// 内部工具
impl TransferManager {
    /// 需要 graphics 能力，或者设备没有专用 transfer 队列时，使用 graphics 队列
    #[inline]
    fn route(&self, needs_graphics: bool) -> GfxQueueType {
        if needs_graphics || !self.ctx.has_dedicated_transfer_queue() {
            GfxQueueType::Graphics
        } else {
            GfxQueueType::Transfer
        }
    }

    fn thread_resources(&self) -> GfxResult<Arc<Mutex<ThreadResources>>> {
        let id = thread::current().id();
        let mut threads = self.threads.lock();
        if let Some(resources) = threads.get(&id) {
            return Ok(resources.clone());
        }
        let resources = Arc::new(Mutex::new(ThreadResources::new(&self.ctx, &self.config)?));
        threads.insert(id, resources.clone());
        Ok(resources)
    }

    /// 获取 staging buffer 并写入数据，失败时归还
    fn stage(resources: &mut ThreadResources, data: &[u8]) -> GfxResult<StagingBufferKey> {
        let key = resources.staging_pool.acquire(data.len() as vk::DeviceSize)?;
        let written = match resources.staging_pool.buffer(key) {
            Some(buffer) => buffer.write(0, data),
            None => Err(GfxError::Vulkan(vk::Result::ERROR_UNKNOWN)),
        };
        if let Err(e) = written {
            resources.staging_pool.release(key);
            return Err(e);
        }
        Ok(key)
    }
}

/// 当前所有线程中尚未回收的提交数量，仅用于调试输出
impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let threads = self.threads.lock();
        let pending = threads.values().map(|r| r.lock().active_submissions.len()).collect_vec();
        f.debug_struct("TransferManager").field("config", &self.config).field("pending", &pending).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::foundation::device_functions::MemoryLocation;
    use crate::foundation::headless::RecordedCommand;

    fn read_back(buffer: &GfxBuffer) -> Vec<u8> {
        let mut out = vec![0u8; buffer.size() as usize];
        buffer.read(0, &mut out).unwrap();
        out
    }

    #[test]
    fn test_upload_round_trip() {
        truvis_crate_tools::init_log::init_test_log();
        let (ctx, _device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 32, vk::BufferUsageFlags::VERTEX_BUFFER, "dst").unwrap();

        let data: Vec<u8> = (0..16).collect();
        let token = manager.upload_to_buffer(&dst, &data, 8).unwrap();
        token.wait(None).unwrap();
        assert!(token.is_complete().unwrap());

        let contents = read_back(&dst);
        assert_eq!(&contents[8..24], data.as_slice());
        assert!(contents[..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_upload_offset_at_end_is_out_of_range() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::UNIFORM_BUFFER, "dst").unwrap();

        assert!(matches!(manager.upload_to_buffer(&dst, &[1, 2, 3], 64), Err(GfxError::OutOfRange { .. })));
        assert!(matches!(manager.upload_to_buffer(&dst, &[0; 65], 0), Err(GfxError::OutOfRange { .. })));
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn test_empty_upload_completes_without_submit() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::UNIFORM_BUFFER, "dst").unwrap();

        let token = manager.upload_to_buffer(&dst, &[], 0).unwrap();
        assert!(token.is_complete().unwrap());
        assert_eq!(device.submission_count(), 0);
    }

    #[test]
    fn test_reclamation_over_many_cycles() {
        let (ctx, device) = GfxContext::headless();
        let config = TransferManagerConfig {
            max_pooled_staging_buffers: 4,
            min_staging_buffer_size: 256,
            ..Default::default()
        };
        let manager = TransferManager::new(&ctx, config);
        let dst = GfxBuffer::new_device_buffer(&ctx, 256, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        for i in 0..1000u32 {
            let token = manager.upload_object(&dst, &i, 0).unwrap();
            drop(token);
        }
        manager.reclaim_finished().unwrap();

        let stats = manager.staging_stats().unwrap();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.releases, 1000);
        assert!(stats.total <= 4);
        assert!(stats.allocations <= 2);
        assert_eq!(manager.active_submission_count().unwrap(), 0);
        // 1 个目标 buffer + 池内的 staging buffer
        assert_eq!(device.live_buffer_count(), 1 + stats.total);
        assert!(device.live_fence_count() <= 2);
        assert_eq!(&read_back(&dst)[..4], bytemuck::bytes_of(&999u32));
    }

    #[test]
    fn test_held_token_blocks_reclamation() {
        let (ctx, _device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        let held = manager.upload_to_buffer(&dst, &[1; 8], 0).unwrap();
        let held_clone = held.clone();
        manager.upload_to_buffer(&dst, &[2; 8], 8).unwrap();
        manager.reclaim_finished().unwrap();
        assert_eq!(manager.active_submission_count().unwrap(), 1);
        assert_eq!(manager.staging_stats().unwrap().in_use, 1);

        drop(held);
        manager.reclaim_finished().unwrap();
        assert_eq!(manager.active_submission_count().unwrap(), 1);

        drop(held_clone);
        manager.reclaim_finished().unwrap();
        assert_eq!(manager.active_submission_count().unwrap(), 0);
        assert_eq!(manager.staging_stats().unwrap().in_use, 0);
    }

    #[test]
    fn test_wait_timeout_and_device_lost() {
        let (ctx, device) = GfxContext::headless();
        device.set_manual_fences(true);
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        let token = manager.upload_to_buffer(&dst, &[7; 4], 0).unwrap();
        assert!(!token.is_complete().unwrap());
        assert_eq!(token.wait(Some(Duration::from_millis(1))), Err(GfxError::Timeout));

        // 未完成的提交不会被回收
        manager.reclaim_finished().unwrap();
        assert_eq!(manager.active_submission_count().unwrap(), 1);

        device.signal_all_fences();
        token.wait(Some(Duration::from_millis(1))).unwrap();
        // 完成之后的查询不再访问 fence
        device.set_device_lost(true);
        assert!(token.is_complete().unwrap());

        let second = {
            device.set_device_lost(false);
            manager.upload_to_buffer(&dst, &[8; 4], 4).unwrap()
        };
        device.set_device_lost(true);
        assert!(matches!(second.wait(None), Err(GfxError::DeviceLost(_))));
        device.set_device_lost(false);
    }

    #[test]
    fn test_failed_teardown_wait_is_reported_by_token() {
        let (ctx, device) = GfxContext::headless();
        device.set_manual_fences(true);
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        let token = manager.upload_to_buffer(&dst, &[3; 4], 0).unwrap();
        device.set_device_lost(true);
        manager.release_thread_resources();
        device.set_device_lost(false);

        // 设备恢复之后，token 依然报告之前的失败
        assert!(matches!(token.wait(None), Err(GfxError::DeviceLost(_))));
        assert!(matches!(token.wait(Some(Duration::ZERO)), Err(GfxError::DeviceLost(_))));
        assert!(matches!(token.is_complete(), Err(GfxError::DeviceLost(_))));

        assert_eq!(device.live_fence_count(), 1);
        drop(token);
        assert_eq!(device.live_fence_count(), 0);
    }

    #[test]
    fn test_wait_blocks_until_another_thread_signals() {
        let (ctx, device) = GfxContext::headless();
        device.set_manual_fences(true);
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        let token = manager.upload_to_buffer(&dst, &[9; 4], 0).unwrap();
        thread::scope(|s| {
            let waiter = token.clone();
            let handle = s.spawn(move || waiter.wait(Some(Duration::from_secs(5))));
            thread::sleep(Duration::from_millis(20));
            device.signal_all_fences();
            assert_eq!(handle.join().unwrap(), Ok(()));
        });
        assert!(token.is_complete().unwrap());
    }

    #[test]
    fn test_queue_routing_without_dedicated_transfer() {
        let (ctx, device) = GfxContext::headless();
        device.set_dedicated_transfer_queue(false);
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        manager.upload_to_buffer(&dst, &[1; 4], 0).unwrap();
        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].queue, GfxQueueType::Graphics);
        assert_eq!(device.live_command_pool_count(), 1);
    }

    #[test]
    fn test_upload_to_image_records_transitions() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let image = GfxImage::new_texture_2d(&ctx, 4, 4, vk::Format::R8G8B8A8_UNORM, 1, "tex").unwrap();

        manager
            .upload_to_image(
                &image,
                &[255; 64],
                vk::Extent3D {
                    width: 4,
                    height: 4,
                    depth: 1,
                },
                0,
                0,
            )
            .unwrap();

        let submissions = device.submissions();
        assert_eq!(submissions[0].queue, GfxQueueType::Graphics);
        let commands = &submissions[0].commands;
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            commands[0],
            RecordedCommand::ImageBarrier {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                dst_access: vk::AccessFlags2::TRANSFER_WRITE,
                ..
            }
        ));
        assert!(matches!(commands[1], RecordedCommand::CopyBufferToImage { .. }));
        assert!(matches!(
            commands[2],
            RecordedCommand::ImageBarrier {
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                dst_stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                ..
            }
        ));

        let out_of_range = manager.upload_to_image(&image, &[0; 4], vk::Extent3D::default(), 1, 0);
        assert!(matches!(out_of_range, Err(GfxError::OutOfRange { .. })));
    }

    #[test]
    fn test_upload_to_image_rejects_short_data_and_bad_layer() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let image = GfxImage::new_texture_2d(&ctx, 4, 4, vk::Format::R8G8B8A8_UNORM, 2, "tex").unwrap();
        let full = vk::Extent3D {
            width: 4,
            height: 4,
            depth: 1,
        };

        // 4x4 RGBA8 需要 64 字节
        assert!(matches!(manager.upload_to_image(&image, &[0; 63], full, 0, 0), Err(GfxError::OutOfRange { .. })));
        // 单层 image 不存在 layer 1
        assert!(matches!(manager.upload_to_image(&image, &[0; 64], full, 0, 1), Err(GfxError::OutOfRange { .. })));
        // mip 1 只有 2x2
        assert!(matches!(manager.upload_to_image(&image, &[0; 64], full, 1, 0), Err(GfxError::OutOfRange { .. })));
        assert_eq!(device.submission_count(), 0);

        let half = vk::Extent3D {
            width: 2,
            height: 2,
            depth: 1,
        };
        manager.upload_to_image(&image, &[0; 16], half, 1, 0).unwrap().wait(None).unwrap();
        assert_eq!(device.submission_count(), 1);
    }

    #[test]
    fn test_generate_mipmaps() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let image = GfxImage::new_texture_2d(&ctx, 8, 4, vk::Format::R8G8B8A8_UNORM, 4, "mips").unwrap();

        manager.generate_mipmaps(&image).unwrap();
        let submissions = device.submissions();
        assert_eq!(submissions[0].queue, GfxQueueType::Graphics);
        let blits = submissions[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BlitImage {
                    src_mip_level,
                    dst_mip_level,
                    filter,
                    ..
                } => Some((*src_mip_level, *dst_mip_level, *filter)),
                _ => None,
            })
            .collect_vec();
        assert_eq!(blits, vec![(0, 1, vk::Filter::LINEAR), (1, 2, vk::Filter::LINEAR), (2, 3, vk::Filter::LINEAR)]);
        // 每级 2 个 barrier，最后一级 1 个
        assert_eq!(submissions[0].commands.len(), 3 * 3 + 1);

        device.set_format_features(vk::Format::R8G8B8A8_SRGB, vk::FormatFeatureFlags::SAMPLED_IMAGE);
        let srgb = GfxImage::new_texture_2d(&ctx, 8, 8, vk::Format::R8G8B8A8_SRGB, 4, "srgb").unwrap();
        assert!(matches!(manager.generate_mipmaps(&srgb), Err(GfxError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_transition_routing() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let image = GfxImage::new_texture_2d(&ctx, 4, 4, vk::Format::R8G8B8A8_UNORM, 1, "tex").unwrap();

        manager
            .transition_image_layout(
                &image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                None,
                false,
            )
            .unwrap();
        manager
            .transition_image_layout(
                &image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::GENERAL,
                None,
                false,
            )
            .unwrap();
        manager
            .transition_image_layout(
                &image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                None,
                true,
            )
            .unwrap();

        let queues = device.submissions().iter().map(|s| s.queue).collect_vec();
        assert_eq!(queues, vec![GfxQueueType::Transfer, GfxQueueType::Graphics, GfxQueueType::Graphics]);
    }

    #[test]
    fn test_copy_buffer_checks_both_ranges() {
        let (ctx, _device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let src = GfxBuffer::new(&ctx, 16, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, "src")
            .unwrap();
        let dst = GfxBuffer::new_device_buffer(&ctx, 8, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();
        src.write(0, &[5; 16]).unwrap();

        assert!(matches!(manager.copy_buffer(&src, &dst, 16, 0, 0), Err(GfxError::OutOfRange { .. })));
        assert!(matches!(manager.copy_buffer(&src, &dst, 4, 14, 0), Err(GfxError::OutOfRange { .. })));

        manager.copy_buffer(&src, &dst, 8, 4, 0).unwrap().wait(None).unwrap();
        assert_eq!(read_back(&dst), vec![5; 8]);
    }

    #[test]
    fn test_concurrent_uploads_use_per_thread_pools() {
        let (ctx, device) = GfxContext::headless();
        let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
        let dst = GfxBuffer::new_device_buffer(&ctx, 1024, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();

        thread::scope(|s| {
            for t in 0..4u8 {
                let manager = &manager;
                let dst = &dst;
                s.spawn(move || {
                    for _ in 0..16 {
                        manager.upload_to_buffer(dst, &[t; 64], t as u64 * 64).unwrap().wait(None).unwrap();
                    }
                    manager.release_thread_resources();
                });
            }
        });

        // 每个线程 2 个 pool，退出前都已释放
        assert_eq!(device.live_command_pool_count(), 0);
        assert_eq!(device.submission_count(), 64);
        let contents = read_back(&dst);
        for t in 0..4usize {
            assert!(contents[t * 64..(t + 1) * 64].iter().all(|b| *b == t as u8));
        }
    }

    #[test]
    fn test_cleanup_releases_everything() {
        let (ctx, device) = GfxContext::headless();
        let dst = GfxBuffer::new_device_buffer(&ctx, 64, vk::BufferUsageFlags::STORAGE_BUFFER, "dst").unwrap();
        let token = {
            let manager = TransferManager::new(&ctx, TransferManagerConfig::default());
            manager.upload_to_buffer(&dst, &[1; 4], 0).unwrap()
        };
        // manager 已经销毁，token 依然可以安全查询，fence 随最后一个 token 销毁
        assert!(token.is_complete().unwrap());
        assert_eq!(device.live_fence_count(), 1);
        drop(token);
        assert_eq!(device.live_fence_count(), 0);
        assert_eq!(device.live_command_pool_count(), 0);
        assert_eq!(device.live_buffer_count(), 1);
    }
}
