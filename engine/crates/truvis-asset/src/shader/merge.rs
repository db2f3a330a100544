use std::collections::BTreeMap;

use truvis_gfx::descriptors::binding::DescriptorBindingInfo;

use crate::error::{AssetError, AssetResult};
use crate::shader::reflect::SetBindings;

/// 合并多个 stage 的反射结果
///
/// - 同一个 `(set, binding)` 的 stage_flags 取并集
/// - descriptor 类型或数组大小不一致时返回 `BindingConflict`
/// - 名字不一致时保留先出现的名字
///
/// # 返回值
/// 每个 set 内按 binding 升序排列
pub fn merge_stage_bindings(stages: &[SetBindings]) -> AssetResult<SetBindings> {
    let mut merged: BTreeMap<u32, BTreeMap<u32, DescriptorBindingInfo>> = BTreeMap::new();
    for stage in stages {
        for (&set_index, bindings) in stage {
            let set = merged.entry(set_index).or_default();
            for binding in bindings {
                let Some(existing) = set.get_mut(&binding.binding) else {
                    set.insert(binding.binding, binding.clone());
                    continue;
                };
                if existing.descriptor_type != binding.descriptor_type {
                    return Err(AssetError::kind_mismatch(
                        set_index,
                        binding.binding,
                        &binding.name,
                        existing.descriptor_type,
                        binding.descriptor_type,
                    ));
                }
                if existing.descriptor_count != binding.descriptor_count {
                    return Err(AssetError::count_mismatch(
                        set_index,
                        binding.binding,
                        &binding.name,
                        existing.descriptor_count,
                        binding.descriptor_count,
                    ));
                }
                existing.stage_flags |= binding.stage_flags;
                if existing.name != binding.name {
                    log::warn!(
                        "set {} binding {} is named '{}' and '{}' in different stages, keeping '{}'",
                        set_index,
                        binding.binding,
                        existing.name,
                        binding.name,
                        existing.name
                    );
                }
            }
        }
    }

    Ok(merged.into_iter().map(|(set_index, bindings)| (set_index, bindings.into_values().collect())).collect())
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;

    fn binding(
        name: &str,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage: vk::ShaderStageFlags,
    ) -> DescriptorBindingInfo {
        DescriptorBindingInfo::new(name, binding, ty, count, stage)
    }

    fn stage(set_index: u32, bindings: Vec<DescriptorBindingInfo>) -> SetBindings {
        SetBindings::from([(set_index, bindings)])
    }

    #[test]
    fn test_stage_flags_are_unioned_and_sorted() {
        let vs = stage(
            0,
            vec![
                binding("lights", 3, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
                binding("camera", 0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
            ],
        );
        let fs = stage(
            0,
            vec![
                binding("view", 0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::FRAGMENT),
                binding("albedo", 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1, vk::ShaderStageFlags::FRAGMENT),
            ],
        );

        let merged = merge_stage_bindings(&[vs, fs]).unwrap();
        let set0 = &merged[&0];
        assert_eq!(set0.iter().map(|b| b.binding).collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(set0[0].name, "camera");
        assert_eq!(set0[0].stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(set0[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_count_mismatch_is_conflict() {
        let vs = stage(
            1,
            vec![binding("bones", 0, vk::DescriptorType::UNIFORM_BUFFER, 4, vk::ShaderStageFlags::VERTEX)],
        );
        let fs = stage(
            1,
            vec![binding("bones", 0, vk::DescriptorType::UNIFORM_BUFFER, 8, vk::ShaderStageFlags::FRAGMENT)],
        );
        let err = merge_stage_bindings(&[vs, fs]).unwrap_err();
        assert!(matches!(err, AssetError::BindingConflict { set_index: 1, binding: 0, .. }));
    }

    #[test]
    fn test_kind_mismatch_is_conflict() {
        let uniform = vk::DescriptorType::UNIFORM_BUFFER;
        let storage = vk::DescriptorType::STORAGE_BUFFER;
        let vs = stage(0, vec![binding("data", 2, uniform, 1, vk::ShaderStageFlags::VERTEX)]);
        let fs = stage(0, vec![binding("data", 2, storage, 1, vk::ShaderStageFlags::FRAGMENT)]);
        assert!(matches!(merge_stage_bindings(&[vs, fs]), Err(AssetError::BindingConflict { .. })));
    }

    #[test]
    fn test_sets_are_kept_apart() {
        let vs = stage(0, vec![binding("a", 0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)]);
        let fs = stage(1, vec![binding("b", 0, vk::DescriptorType::SAMPLER, 1, vk::ShaderStageFlags::FRAGMENT)]);
        let merged = merge_stage_bindings(&[vs, fs]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&1][0].descriptor_type, vk::DescriptorType::SAMPLER);
    }
}
