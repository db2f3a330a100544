use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Context;
use ash::vk;
use truvis_gfx::descriptors::binding::DescriptorBindingInfo;

/// `set index -> bindings`
pub type SetBindings = BTreeMap<u32, Vec<DescriptorBindingInfo>>;

/// 从单个 stage 的 SPIR-V 中提取 binding 信息
///
/// 返回的每个 binding 的 stage_flags 只包含传入的 `stage`
pub trait ShaderReflector: Send + Sync {
    fn reflect(&self, spirv: &[u32], stage: vk::ShaderStageFlags) -> anyhow::Result<SetBindings>;
}

/// 基于 naga SPIR-V 前端的反射
#[derive(Debug, Default, Clone, Copy)]
pub struct NagaReflector;

impl ShaderReflector for NagaReflector {
    fn reflect(&self, spirv: &[u32], stage: vk::ShaderStageFlags) -> anyhow::Result<SetBindings> {
        let _span = tracy_client::span!("NagaReflector::reflect");
        let module = naga::front::spv::parse_u8_slice(bytemuck::cast_slice(spirv), &Default::default())
            .context("failed to parse spir-v")?;
        // naga 会把 combined image sampler 视为普通 image，需要从原始指令中区分出来
        let combined = combined_image_sampler_bindings(spirv);

        let mut sets = SetBindings::new();
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let (inner, count) = match &module.types[var.ty].inner {
                naga::TypeInner::BindingArray { base, size } => {
                    let count = match size {
                        naga::ArraySize::Constant(n) => n.get(),
                        _ => 1,
                    };
                    (&module.types[*base].inner, count)
                }
                other => (other, 1),
            };

            let descriptor_type = match (var.space, inner) {
                (naga::AddressSpace::Uniform, _) => vk::DescriptorType::UNIFORM_BUFFER,
                (naga::AddressSpace::Storage { .. }, _) => vk::DescriptorType::STORAGE_BUFFER,
                (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => vk::DescriptorType::SAMPLER,
                (
                    naga::AddressSpace::Handle,
                    naga::TypeInner::Image {
                        class: naga::ImageClass::Storage { .. },
                        ..
                    },
                ) => vk::DescriptorType::STORAGE_IMAGE,
                (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => {
                    if combined.contains(&(binding.group, binding.binding)) {
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                    } else {
                        vk::DescriptorType::SAMPLED_IMAGE
                    }
                }
                (naga::AddressSpace::Handle, naga::TypeInner::AccelerationStructure { .. }) => {
                    vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
                }
                (space, _) => {
                    log::debug!("skip global {:?} in address space {:?}", var.name, space);
                    continue;
                }
            };

            sets.entry(binding.group).or_default().push(DescriptorBindingInfo::new(
                var.name.clone().unwrap_or_default(),
                binding.binding,
                descriptor_type,
                count,
                stage,
            ));
        }
        Ok(sets)
    }
}

mod op {
    pub const TYPE_SAMPLED_IMAGE: u32 = 27;
    pub const TYPE_ARRAY: u32 = 28;
    pub const TYPE_RUNTIME_ARRAY: u32 = 29;
    pub const TYPE_POINTER: u32 = 32;
    pub const VARIABLE: u32 = 59;
    pub const DECORATE: u32 = 71;

    pub const DECORATION_BINDING: u32 = 33;
    pub const DECORATION_DESCRIPTOR_SET: u32 = 34;
}

/// 扫描 SPIR-V 指令流，找出类型为 combined image sampler（或其数组）的变量的 `(set, binding)`
pub fn combined_image_sampler_bindings(spirv: &[u32]) -> HashSet<(u32, u32)> {
    let mut sampled_image_types = HashSet::new();
    // array type -> element type
    let mut element_types = HashMap::new();
    // pointer type -> pointee type
    let mut pointee_types = HashMap::new();
    let mut variables = Vec::new();
    let mut sets = HashMap::new();
    let mut bindings = HashMap::new();

    // 前 5 个 word 是 header
    let mut cursor = 5;
    while cursor < spirv.len() {
        let word_count = (spirv[cursor] >> 16) as usize;
        let opcode = spirv[cursor] & 0xffff;
        if word_count == 0 || cursor + word_count > spirv.len() {
            break;
        }
        let inst = &spirv[cursor..cursor + word_count];
        match (opcode, inst.len()) {
            (op::TYPE_SAMPLED_IMAGE, 3..) => {
                sampled_image_types.insert(inst[1]);
            }
            (op::TYPE_ARRAY | op::TYPE_RUNTIME_ARRAY, 3..) => {
                element_types.insert(inst[1], inst[2]);
            }
            (op::TYPE_POINTER, 4..) => {
                pointee_types.insert(inst[1], inst[3]);
            }
            (op::VARIABLE, 4..) => variables.push((inst[2], inst[1])),
            (op::DECORATE, 4..) => match inst[2] {
                op::DECORATION_DESCRIPTOR_SET => {
                    sets.insert(inst[1], inst[3]);
                }
                op::DECORATION_BINDING => {
                    bindings.insert(inst[1], inst[3]);
                }
                _ => {}
            },
            _ => {}
        }
        cursor += word_count;
    }

    variables
        .into_iter()
        .filter_map(|(var, pointer_type)| {
            let mut ty = *pointee_types.get(&pointer_type)?;
            while let Some(&element) = element_types.get(&ty) {
                ty = element;
            }
            if !sampled_image_types.contains(&ty) {
                return None;
            }
            Some((*sets.get(&var)?, *bindings.get(&var)?))
        })
        .collect()
}
