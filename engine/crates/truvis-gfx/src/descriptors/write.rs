use ash::vk;

/// 对某个 descriptor set 的某个 binding 的一次写入
///
/// buffer_infos 与 image_infos 只能有一个非空，由 descriptor_type 决定使用哪一个
#[derive(Debug, Clone)]
pub struct GfxWriteDescriptorSet {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
}

impl GfxWriteDescriptorSet {
    #[inline]
    pub fn descriptor_count(&self) -> u32 {
        self.buffer_infos.len().max(self.image_infos.len()) as u32
    }

    pub fn to_vk_type(&self) -> vk::WriteDescriptorSet<'_> {
        debug_assert!(
            self.buffer_infos.is_empty() || self.image_infos.is_empty(),
            "only one of buffer_infos and image_infos should be set"
        );
        vk::WriteDescriptorSet {
            dst_set: self.dst_set,
            dst_binding: self.dst_binding,
            dst_array_element: self.dst_array_element,
            descriptor_count: self.descriptor_count(),
            descriptor_type: self.descriptor_type,
            // 选择 buffer ptr 还是 image ptr，是由 descriptor type 控制的
            p_buffer_info: self.buffer_infos.as_ptr(),
            p_image_info: self.image_infos.as_ptr(),
            ..Default::default()
        }
    }
}
