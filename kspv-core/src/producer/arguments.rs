// Kernel arguments become module-scope variables: resources wrapped in a
// single-field struct, opaque handles, or workgroup arrays for local pointers.

use std::collections::{BTreeSet, HashMap};

use kir::{AddressSpace, ArgMapping, Constant, Global, OpaqueType, PointerType, Type};
use log::debug;
use spirv::{Decoration, Op};

use super::{ArgVar, LocalArg, LoweringContext};
use crate::{bail_inconsistent_at, bail_internal};
use crate::descriptor_map::{ArgKind, DescriptorEntry};
use crate::error::Result;
use crate::instruction::{self, Operand};
use crate::layout;
use crate::tables::ValueKey;

/// How a kernel parameter is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgClass {
    /// Sampler or image handle.
    Handle(OpaqueType),
    /// Pointer into workgroup memory.
    Local,
    /// Pointer to a buffer in any other space.
    Buffer(AddressSpace),
    /// Plain old data, passed by value.
    Pod,
}

impl ArgClass {
    fn of(ty: &Type) -> ArgClass {
        match ty.as_pointer() {
            Some(p) => match p.pointee.as_opaque() {
                Some(opaque) => ArgClass::Handle(opaque),
                None if p.address_space == AddressSpace::Local => ArgClass::Local,
                None => ArgClass::Buffer(p.address_space),
            },
            None => ArgClass::Pod,
        }
    }
}

/// Descriptor map kind of a parameter of type `ty`.
pub(super) fn arg_kind(ty: &Type) -> ArgKind {
    match ArgClass::of(ty) {
        ArgClass::Handle(OpaqueType::Sampler) => ArgKind::Sampler,
        ArgClass::Handle(o) if o.is_write_only_image() => ArgKind::WriteOnlyImage,
        ArgClass::Handle(_) => ArgKind::ReadOnlyImage,
        ArgClass::Local => ArgKind::Local,
        ArgClass::Buffer(_) => ArgKind::Buffer,
        ArgClass::Pod => ArgKind::Pod,
    }
}

/// Argument variables available for reuse by later kernels.
#[derive(Debug, Default)]
pub(super) struct ArgVarPool {
    /// Parameter type (with `constant` read as `global`) to its wrapper struct.
    wrapper_types: HashMap<Type, Type>,
    /// Wrapped type to (kernel ordinal, binding, variable ordinal).
    vars_for_type: HashMap<Type, BTreeSet<(usize, u32, usize)>>,
    /// Variable names by ordinal, starting at 1.
    names: Vec<String>,
}

impl ArgVarPool {
    /// Takes a variable of `ty` bound at `binding` by another kernel.
    fn claim(&mut self, ty: &Type, kernel: usize, binding: u32) -> Option<usize> {
        let set = self.vars_for_type.get_mut(ty)?;
        let found = set
            .iter()
            .copied()
            .find(|&(owner, b, _)| owner != kernel && b == binding)?;
        set.remove(&found);
        Some(found.2)
    }

    /// Single-field struct wrapping a parameter, shared by all parameters of
    /// the same type.
    fn wrapper_type(&mut self, ty: &Type) -> Type {
        let key = match ty.as_pointer() {
            Some(p) if p.address_space == AddressSpace::Constant => {
                Type::pointer(AddressSpace::Global, (*p.pointee).clone())
            }
            _ => ty.clone(),
        };
        self.wrapper_types
            .entry(key)
            .or_insert_with(|| Type::Struct(vec![ty.clone()]))
            .clone()
    }

    fn name(&self, ordinal: usize) -> Option<&str> {
        self.names.get(ordinal - 1).map(String::as_str)
    }
}

impl LoweringContext<'_> {
    /// Creates or reuses the variables behind the parameters of kernel `fi`.
    /// Returns true if any materialized parameter is used.
    pub(super) fn materialize_kernel_args(
        &mut self,
        fi: usize,
        kernel_ordinal: usize,
        pool: &mut ArgVarPool,
    ) -> Result<bool> {
        let func = self.module.functions[fi].clone();
        let mut has_arg_user = false;
        let mut binding = 0u32;

        for (pi, param) in func.params.iter().enumerate() {
            let class = ArgClass::of(&param.ty);
            let (space, var_type) = match class {
                ArgClass::Handle(opaque) => (AddressSpace::UniformConstant, Type::Opaque(opaque)),
                ArgClass::Local => {
                    self.reserve_local_arg(fi, pi, &param.ty)?;
                    if func.is_used(&param.name) {
                        has_arg_user = true;
                    }
                    continue;
                }
                ArgClass::Buffer(space) => (space, pool.wrapper_type(&param.ty)),
                ArgClass::Pod => {
                    let space = if self.options.pod_args_in_uniform_buffer {
                        AddressSpace::Uniform
                    } else {
                        AddressSpace::Global
                    };
                    (space, pool.wrapper_type(&param.ty))
                }
            };

            let reusable = !matches!(class, ArgClass::Handle(_))
                && !self.options.distinct_kernel_descriptor_sets;
            let claimed = if reusable {
                pool.claim(&var_type, kernel_ordinal, binding)
            } else {
                None
            };
            let var_ordinal = match claimed {
                Some(ordinal) => ordinal,
                None => {
                    let name = format!("{}.arg.{}", func.name, binding);
                    self.module.globals.push(Global {
                        name: name.clone(),
                        ty: PointerType {
                            address_space: space,
                            pointee: Box::new(var_type.clone()),
                        },
                        initializer: Some(Constant::Undef(var_type.clone())),
                    });
                    pool.names.push(name);
                    pool.names.len()
                }
            };
            pool.vars_for_type
                .entry(var_type.clone())
                .or_default()
                .insert((kernel_ordinal, binding, var_ordinal));

            let global = match pool.name(var_ordinal) {
                Some(name) => name.to_string(),
                None => bail_internal!("argument variable {} missing", var_ordinal),
            };
            debug!("@{} %{} -> @{}", func.name, param.name, global);
            self.find_type(&Type::pointer(space, var_type));
            self.arg_vars.insert(
                (fi, pi),
                ArgVar {
                    param_type: param.ty.clone(),
                    global,
                },
            );
            binding += 1;

            if func.is_used(&param.name) {
                if param.ty.as_pointer().is_none() {
                    self.find_type(&Type::pointer(space, param.ty.clone()));
                }
                has_arg_user = true;
            }
        }
        Ok(has_arg_user)
    }

    fn reserve_local_arg(&mut self, fi: usize, pi: usize, ty: &Type) -> Result<()> {
        let Some(&spec_id) = self.arg_spec_ids.get(&(fi, pi)) else {
            bail_internal!("no specialization id for local argument {} of function {}", pi, fi);
        };
        let Some(p) = ty.as_pointer() else {
            bail_internal!("local argument of non-pointer type {}", ty);
        };
        let first = self.ids.reserve(5);
        self.local_args.insert(
            (fi, pi),
            LocalArg {
                elem_type: (*p.pointee).clone(),
                spec_id,
                array_size_id: first,
                array_type_id: first + 1,
                ptr_array_type_id: first + 2,
                variable_id: first + 3,
                first_elem_ptr_id: first + 4,
            },
        );
        Ok(())
    }

    /// Descriptor map lines and binding decorations for kernel `fi`.
    pub(super) fn bind_kernel_args(&mut self, fi: usize) -> Result<()> {
        let descriptor_set = self.next_descriptor_set;
        if self.options.distinct_kernel_descriptor_sets {
            self.next_descriptor_set += 1;
        }
        let func = self.module.functions[fi].clone();
        if let Some(mappings) = &func.arg_map {
            self.map_clustered_args(&func, mappings, descriptor_set)?;
        }
        let mut binding = 0u32;

        for (pi, param) in func.params.iter().enumerate() {
            let kind = self.remap_pod(arg_kind(&param.ty));

            if let Some(local) = self.local_args.get(&(fi, pi)) {
                if func.arg_map.is_none() {
                    self.descriptor_map.push(DescriptorEntry::LocalArg {
                        kernel: func.name.clone(),
                        arg: param.name.clone(),
                        ordinal: pi,
                        elem_size: layout::alloc_size(&local.elem_type),
                        spec_id: local.spec_id,
                    });
                }
                continue;
            }

            if func.arg_map.is_none() {
                self.descriptor_map.push(DescriptorEntry::KernelArg {
                    kernel: func.name.clone(),
                    arg: param.name.clone(),
                    ordinal: pi,
                    descriptor_set,
                    binding,
                    offset: 0,
                    kind,
                });
            }

            let Some(arg) = self.arg_vars.get(&(fi, pi)).cloned() else {
                bail_internal!("parameter %{} of @{} has no variable", param.name, func.name);
            };
            let var_id = self.value_id(fi, &kir::Value::Global(arg.global.clone()))?;
            self.values
                .insert(ValueKey::local(fi, &param.name), var_id);
            self.arg_var_ids.insert((fi, pi), var_id);

            if self.decorated_vars.insert(arg.global.clone()) {
                self.decorate(var_id, Decoration::DescriptorSet, &[descriptor_set]);
                self.decorate(var_id, Decoration::Binding, &[binding]);
                match kind {
                    ArgKind::ReadOnlyImage => self.decorate(var_id, Decoration::NonWritable, &[]),
                    ArgKind::WriteOnlyImage => self.decorate(var_id, Decoration::NonReadable, &[]),
                    _ => {}
                }
                let space = self.module.global(&arg.global).map(Global::address_space);
                if space == Some(AddressSpace::Constant) {
                    self.decorate(var_id, Decoration::NonWritable, &[]);
                }
            }
            binding += 1;
        }
        Ok(())
    }

    fn remap_pod(&self, kind: ArgKind) -> ArgKind {
        if kind == ArgKind::Pod && self.options.pod_args_in_uniform_buffer {
            ArgKind::PodUbo
        } else {
            kind
        }
    }

    /// Descriptor map lines for a kernel whose arguments were rearranged
    /// before lowering. The binding is the new parameter index less the
    /// pointer-to-local arguments before it.
    fn map_clustered_args(
        &mut self,
        func: &kir::Function,
        mappings: &[ArgMapping],
        descriptor_set: u32,
    ) -> Result<()> {
        let mut num_ptr_local = 0u32;
        for mapping in mappings {
            let Some(kind) = ArgKind::from_name(&mapping.kind) else {
                bail_inconsistent_at!(
                    self.here(),
                    "unknown argument kind '{}' for argument {}",
                    mapping.kind,
                    mapping.name
                );
            };
            let kind = self.remap_pod(kind);

            if mapping.spec_id > 0 {
                num_ptr_local += 1;
                let pointee = func
                    .params
                    .get(mapping.new_index as usize)
                    .and_then(|p| p.ty.as_pointer())
                    .map(|p| (*p.pointee).clone());
                let Some(elem_type) = pointee else {
                    bail_inconsistent_at!(
                        self.here(),
                        "local argument {} maps to parameter {}, which is not a pointer",
                        mapping.name,
                        mapping.new_index
                    );
                };
                self.descriptor_map.push(DescriptorEntry::LocalArg {
                    kernel: func.name.clone(),
                    arg: mapping.name.clone(),
                    ordinal: mapping.old_index as usize,
                    elem_size: layout::alloc_size(&elem_type),
                    spec_id: mapping.spec_id as u32,
                });
                continue;
            }

            let Some(binding) = mapping.new_index.checked_sub(num_ptr_local) else {
                bail_inconsistent_at!(
                    self.here(),
                    "argument {} maps before the local arguments preceding it",
                    mapping.name
                );
            };
            self.descriptor_map.push(DescriptorEntry::KernelArg {
                kernel: func.name.clone(),
                arg: mapping.name.clone(),
                ordinal: mapping.old_index as usize,
                descriptor_set,
                binding,
                offset: mapping.offset,
                kind,
            });
        }
        Ok(())
    }

    /// Entry-block instructions that turn argument variables into the
    /// values the kernel body reads.
    pub(super) fn lower_arguments(&mut self, fi: usize) -> Result<()> {
        let func = self.module.functions[fi].clone();
        for (pi, param) in func.params.iter().enumerate() {
            if !func.is_used(&param.name) {
                continue;
            }
            let key = ValueKey::local(fi, &param.name);

            if let Some(local) = self.local_args.get(&(fi, pi)).cloned() {
                let ptr_type = self.type_id(&param.ty)?;
                let zero = self.constant_id(&Constant::i32(0))?;
                self.body.push(instruction::build_with_result(
                    Op::AccessChain,
                    local.first_elem_ptr_id,
                    vec![
                        Operand::IdRef(ptr_type),
                        Operand::IdRef(local.variable_id),
                        Operand::IdRef(zero),
                    ],
                ));
                self.values.insert(key, local.first_elem_ptr_id);
                continue;
            }

            let var = self.value_id(fi, &kir::Value::Register(param.name.clone()))?;
            let lowered = match ArgClass::of(&param.ty) {
                ArgClass::Handle(opaque) => {
                    let ty = self.type_id(&Type::Opaque(opaque))?;
                    self.emit_value(Op::Load, vec![Operand::IdRef(ty), Operand::IdRef(var)])
                }
                ArgClass::Buffer(_) | ArgClass::Local => {
                    let only_gep_uses = func
                        .uses_of(&param.name)
                        .all(|u| u.as_instruction().is_some_and(|i| i.op.is_gep()));
                    if only_gep_uses {
                        continue;
                    }
                    let ty = self.type_id(&param.ty)?;
                    let zero = self.i32_zero()?;
                    self.emit_value(
                        Op::AccessChain,
                        vec![
                            Operand::IdRef(ty),
                            Operand::IdRef(var),
                            Operand::IdRef(zero),
                            Operand::IdRef(zero),
                        ],
                    )
                }
                ArgClass::Pod => {
                    let space = if self.options.pod_args_in_uniform_buffer {
                        AddressSpace::Uniform
                    } else {
                        AddressSpace::Global
                    };
                    let ptr_type = self.type_id(&Type::pointer(space, param.ty.clone()))?;
                    let zero = self.i32_zero()?;
                    let field = self.emit_value(
                        Op::AccessChain,
                        vec![Operand::IdRef(ptr_type), Operand::IdRef(var), Operand::IdRef(zero)],
                    );
                    let ty = self.type_id(&param.ty)?;
                    self.emit_value(Op::Load, vec![Operand::IdRef(ty), Operand::IdRef(field)])
                }
            };
            self.values.insert(key, lowered);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_kinds() {
        let parse = |s| kir::parse_type(s).unwrap();
        assert_eq!(arg_kind(&parse("ptr[global]<f32>")), ArgKind::Buffer);
        assert_eq!(arg_kind(&parse("ptr[constant]<i32>")), ArgKind::Buffer);
        assert_eq!(arg_kind(&parse("ptr[local]<f32>")), ArgKind::Local);
        assert_eq!(arg_kind(&parse("<4 x f32>")), ArgKind::Pod);
        assert_eq!(arg_kind(&parse("ptr[global]<sampler_t>")), ArgKind::Sampler);
        assert_eq!(arg_kind(&parse("ptr[global]<image3d_ro_t>")), ArgKind::ReadOnlyImage);
        assert_eq!(arg_kind(&parse("ptr[global]<image2d_wo_t>")), ArgKind::WriteOnlyImage);
    }

    #[test]
    fn test_pool_claims_matching_binding_from_other_kernel() {
        let mut pool = ArgVarPool::default();
        let ty = Type::Struct(vec![Type::f32()]);
        pool.names.push("a.arg.0".into());
        pool.vars_for_type
            .entry(ty.clone())
            .or_default()
            .insert((1, 0, 1));

        assert_eq!(pool.claim(&ty, 1, 0), None);
        assert_eq!(pool.claim(&ty, 2, 1), None);
        assert_eq!(pool.claim(&ty, 2, 0), Some(1));
        // Claimed variables leave the pool until re-registered.
        assert_eq!(pool.claim(&ty, 3, 0), None);
        assert_eq!(pool.name(1), Some("a.arg.0"));
    }
}
