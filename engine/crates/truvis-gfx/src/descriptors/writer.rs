use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use crate::descriptors::binding::{DescriptorBindingInfo, DescriptorSetSchema};
use crate::descriptors::write::GfxWriteDescriptorSet;
use crate::error::{GfxError, GfxResult};
use crate::foundation::context::GfxContext;
use crate::resources::buffer::GfxBuffer;

/// 通过 binding 名字写入 descriptor set
///
/// - 同一个 binding 在 `update` 之前多次写入，只保留最后一次
/// - 数组 binding 传入的元素多于声明的数量时，保留**最后** `count` 个
/// - `update` 一次性提交所有写入，然后清空，writer 可以在下一帧复用
pub struct DescriptorSetWriter {
    ctx: GfxContext,
    schema: Arc<DescriptorSetSchema>,
    set: vk::DescriptorSet,
    pending: BTreeMap<u32, GfxWriteDescriptorSet>,
}

// init
impl DescriptorSetWriter {
    pub fn begin(ctx: &GfxContext, schema: Arc<DescriptorSetSchema>, set: vk::DescriptorSet) -> Self {
        Self {
            ctx: ctx.clone(),
            schema,
            set,
            pending: BTreeMap::new(),
        }
    }
}

// getters
impl DescriptorSetWriter {
    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn schema(&self) -> &Arc<DescriptorSetSchema> {
        &self.schema
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// 写入
impl DescriptorSetWriter {
    #[inline]
    pub fn write_buffer(&mut self, name: &str, info: vk::DescriptorBufferInfo) -> GfxResult<&mut Self> {
        self.write_buffers(name, std::slice::from_ref(&info))
    }

    pub fn write_buffers(&mut self, name: &str, infos: &[vk::DescriptorBufferInfo]) -> GfxResult<&mut Self> {
        let binding = self.binding(name)?;
        let infos = Self::keep_last(infos, binding.descriptor_count).to_vec();
        let write = GfxWriteDescriptorSet {
            dst_set: self.set,
            dst_binding: binding.binding,
            dst_array_element: 0,
            descriptor_type: binding.descriptor_type,
            buffer_infos: infos,
            image_infos: Vec::new(),
        };
        Ok(self.push(write))
    }

    #[inline]
    pub fn write_image(&mut self, name: &str, info: vk::DescriptorImageInfo) -> GfxResult<&mut Self> {
        self.write_images(name, std::slice::from_ref(&info))
    }

    pub fn write_images(&mut self, name: &str, infos: &[vk::DescriptorImageInfo]) -> GfxResult<&mut Self> {
        let binding = self.binding(name)?;
        let infos = Self::keep_last(infos, binding.descriptor_count).to_vec();
        let write = GfxWriteDescriptorSet {
            dst_set: self.set,
            dst_binding: binding.binding,
            dst_array_element: 0,
            descriptor_type: binding.descriptor_type,
            buffer_infos: Vec::new(),
            image_infos: infos,
        };
        Ok(self.push(write))
    }

    /// 绑定 buffer 从 `offset` 开始的全部内容
    #[inline]
    pub fn write_buffer_whole(
        &mut self,
        name: &str,
        buffer: &GfxBuffer,
        offset: vk::DeviceSize,
    ) -> GfxResult<&mut Self> {
        self.write_buffer(
            name,
            vk::DescriptorBufferInfo {
                buffer: buffer.vk_buffer(),
                offset,
                range: vk::WHOLE_SIZE,
            },
        )
    }

    #[inline]
    pub fn write_sampled_image(
        &mut self,
        name: &str,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> GfxResult<&mut Self> {
        self.write_image(
            name,
            vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            },
        )
    }

    #[inline]
    pub fn write_storage_image(
        &mut self,
        name: &str,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> GfxResult<&mut Self> {
        self.write_image(
            name,
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: layout,
            },
        )
    }

    /// 一次性提交所有写入，然后清空
    pub fn update(&mut self) {
        let _span = tracy_client::span!("DescriptorSetWriter::update");
        if self.pending.is_empty() {
            return;
        }
        let writes = std::mem::take(&mut self.pending).into_values().collect::<Vec<_>>();
        self.ctx.update_descriptor_sets(&writes);
    }
}

// 内部工具
impl DescriptorSetWriter {
    fn binding(&self, name: &str) -> GfxResult<DescriptorBindingInfo> {
        self.schema.find_binding(name).cloned().ok_or_else(|| GfxError::UnknownBinding {
            schema: self.schema.name.clone(),
            set_index: self.schema.set_index,
            binding: name.to_string(),
        })
    }

    /// 超出数组大小时保留最后 `count` 个元素
    #[inline]
    fn keep_last<T>(items: &[T], count: u32) -> &[T] {
        let start = items.len().saturating_sub(count as usize);
        &items[start..]
    }

    fn push(&mut self, write: GfxWriteDescriptorSet) -> &mut Self {
        if write.descriptor_count() == 0 {
            log::warn!("empty write to binding {} of {} ignored", write.dst_binding, self.schema.name);
            return self;
        }
        self.pending.insert(write.dst_binding, write);
        self
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::descriptors::layout_cache::DescriptorSetLayoutCache;
    use crate::descriptors::pool_allocator::{DescriptorPoolAllocator, DescriptorPoolConfig};
    use crate::foundation::headless::HeadlessDevice;

    type Fixture = (GfxContext, Arc<HeadlessDevice>, Arc<DescriptorSetSchema>, vk::DescriptorSet);

    fn setup() -> Fixture {
        let (ctx, device) = GfxContext::headless();
        let cache = DescriptorSetLayoutCache::new(&ctx);
        let schema = cache
            .register_layout(
                "lit",
                0,
                vec![
                    DescriptorBindingInfo::new(
                        "camera",
                        0,
                        vk::DescriptorType::UNIFORM_BUFFER,
                        1,
                        vk::ShaderStageFlags::VERTEX,
                    ),
                    DescriptorBindingInfo::new(
                        "lights",
                        1,
                        vk::DescriptorType::STORAGE_BUFFER,
                        2,
                        vk::ShaderStageFlags::FRAGMENT,
                    ),
                    DescriptorBindingInfo::new(
                        "albedo",
                        2,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        1,
                        vk::ShaderStageFlags::FRAGMENT,
                    ),
                ],
            )
            .unwrap();
        let allocator = DescriptorPoolAllocator::new(&ctx, DescriptorPoolConfig::default());
        let set = allocator.allocate_one(&schema).unwrap();
        (ctx, device, schema, set)
    }

    fn buffer_info(raw: u64) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    #[test]
    fn test_array_write_keeps_last_elements() {
        let (ctx, device, schema, set) = setup();
        let mut writer = DescriptorSetWriter::begin(&ctx, schema, set);

        let infos = (100..105).map(buffer_info).collect::<Vec<_>>();
        writer.write_buffers("lights", &infos).unwrap();
        writer.update();

        let writes = device.descriptor_writes();
        assert_eq!(writes.len(), 1);
        let buffers = writes[0].buffer_infos.iter().map(|b| b.buffer.as_raw()).collect::<Vec<_>>();
        assert_eq!(buffers, vec![103, 104]);
        assert_eq!(writes[0].dst_binding, 1);
        assert_eq!(writes[0].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
    }

    #[test]
    fn test_last_write_wins_and_single_batch() {
        let (ctx, device, schema, set) = setup();
        let mut writer = DescriptorSetWriter::begin(&ctx, schema, set);

        writer
            .write_buffer("camera", buffer_info(1))
            .unwrap()
            .write_buffer("camera", buffer_info(2))
            .unwrap()
            .write_sampled_image(
                "albedo",
                vk::ImageView::from_raw(7),
                vk::Sampler::from_raw(8),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
            .unwrap();
        assert_eq!(writer.pending_count(), 2);
        writer.update();

        assert_eq!(device.update_call_count(), 1);
        let writes = device.descriptor_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].buffer_infos[0].buffer.as_raw(), 2);
        assert_eq!(writes[1].image_infos[0].image_view.as_raw(), 7);

        // update 之后 pending 被清空，再次 update 不会提交
        assert_eq!(writer.pending_count(), 0);
        writer.update();
        assert_eq!(device.update_call_count(), 1);
    }

    #[test]
    fn test_unknown_binding() {
        let (ctx, _device, schema, set) = setup();
        let mut writer = DescriptorSetWriter::begin(&ctx, schema, set);
        let err = writer.write_buffer("missing", buffer_info(1)).err();
        assert_eq!(
            err,
            Some(GfxError::UnknownBinding {
                schema: "lit".to_string(),
                set_index: 0,
                binding: "missing".to_string(),
            })
        );
    }
}
