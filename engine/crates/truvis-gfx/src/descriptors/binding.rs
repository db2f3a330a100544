use ash::vk;
use itertools::Itertools;

/// 一个 binding 槽位的描述，与发现它的 shader stage 无关
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    /// shader 中的变量名
    pub name: String,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// 数组大小，非数组为 1
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl DescriptorBindingInfo {
    pub fn new(
        name: impl Into<String>,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            name: name.into(),
            binding,
            descriptor_type,
            descriptor_count,
            stage_flags,
        }
    }

    #[inline]
    pub fn to_vk_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.descriptor_count)
            .stage_flags(self.stage_flags)
    }

    /// 结构上的比较，忽略名字
    #[inline]
    fn structure(&self) -> (u32, vk::DescriptorType, u32, vk::ShaderStageFlags) {
        (self.binding, self.descriptor_type, self.descriptor_count, self.stage_flags)
    }
}

/// layout 的结构化 key：相同结构、不同名字的 binding 得到同一个 key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    pub set_index: u32,
    pub bindings: Vec<(u32, vk::DescriptorType, u32, vk::ShaderStageFlags)>,
}

impl LayoutKey {
    /// `bindings` 需要已经按 binding 排序
    pub fn new(set_index: u32, bindings: &[DescriptorBindingInfo]) -> Self {
        Self {
            set_index,
            bindings: bindings.iter().map(DescriptorBindingInfo::structure).collect_vec(),
        }
    }
}

/// 一个 descriptor set 的结构描述
///
/// 外部通过 `(name, set_index)` 区分；`layout` 可能被多个 schema 共享，由 layout cache 持有
#[derive(Debug)]
pub struct DescriptorSetSchema {
    pub name: String,
    pub set_index: u32,
    pub layout: vk::DescriptorSetLayout,
    /// 按 binding 升序
    pub bindings: Vec<DescriptorBindingInfo>,
}

impl DescriptorSetSchema {
    pub fn find_binding(&self, name: &str) -> Option<&DescriptorBindingInfo> {
        self.bindings.iter().find(|b| b.name == name)
    }

    #[inline]
    pub fn layout_key(&self) -> LayoutKey {
        LayoutKey::new(self.set_index, &self.bindings)
    }
}

/// 按 binding 升序排序
pub fn canonicalize(mut bindings: Vec<DescriptorBindingInfo>) -> Vec<DescriptorBindingInfo> {
    bindings.sort_by_key(|b| b.binding);
    bindings
}
