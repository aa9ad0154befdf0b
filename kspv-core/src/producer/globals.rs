// Module-scope variables: literal samplers, globals (including builtins and
// the module constant buffer) and workgroup arrays for local arguments.

use kir::{AddressSpace, Constant, Operation, Type};
use log::debug;
use spirv::{BuiltIn, Decoration, Op, StorageClass};

use super::{sampler_pointer_type, storage_class, LoweringContext};
use crate::builtins::{builtin_variable, SAMPLER_INITIALIZER};
use crate::descriptor_map::DescriptorEntry;
use crate::error::Result;
use crate::instruction::{self, Operand};
use crate::layout;
use crate::tables::ValueKey;
use crate::{bail_inconsistent, bail_internal};

impl LoweringContext<'_> {
    /// One variable per sampler map entry, then every sampler initializer
    /// call is matched to the variable for its literal.
    pub(super) fn emit_samplers(&mut self) -> Result<()> {
        let pointer_type = self.type_id(&sampler_pointer_type())?;
        let descriptor_set = self.next_descriptor_set;
        let mut vars = Vec::new();

        let entries = self.options.sampler_map.entries.clone();
        for (binding, entry) in entries.iter().enumerate() {
            let id = self.emit_value(
                Op::Variable,
                vec![
                    Operand::IdRef(pointer_type),
                    Operand::LiteralBit32(StorageClass::UniformConstant as u32),
                ],
            );
            self.decorate(id, Decoration::DescriptorSet, &[descriptor_set]);
            self.decorate(id, Decoration::Binding, &[binding as u32]);
            self.descriptor_map.push(DescriptorEntry::Sampler {
                literal: entry.literal,
                expression: entry.expression.clone(),
                descriptor_set,
                binding: binding as u32,
            });
            vars.push((entry.literal, id));
        }
        if !vars.is_empty() {
            self.next_descriptor_set += 1;
        }

        for (fi, func) in self.module.functions.iter().enumerate() {
            for inst in func.instructions() {
                let Operation::Call { func: callee, args } = &inst.op else {
                    continue;
                };
                if callee != SAMPLER_INITIALIZER {
                    continue;
                }
                let Some(literal) = args.first().and_then(|a| a.as_constant()).and_then(Constant::as_int)
                else {
                    bail_inconsistent!("Argument of sampler initializer was non-constant!");
                };
                let Some(&(_, var)) = vars.iter().find(|(l, _)| *l as u64 == literal) else {
                    bail_inconsistent!(
                        "Sampler literal {} was not found in sampler map!",
                        literal
                    );
                };
                if let Some(result) = &inst.result {
                    self.sampler_init_vars
                        .insert(ValueKey::local(fi, result), var);
                }
            }
        }
        Ok(())
    }

    pub(super) fn emit_global_var(&mut self, gi: usize) -> Result<()> {
        let global = self.module.globals[gi].clone();
        let builtin = builtin_variable(&global.name);
        let mut initializer = None;

        if builtin == Some(BuiltIn::WorkgroupSize) {
            initializer = Some(self.emit_workgroup_size(&global.value_type().clone())?);
        }

        let var_id = self.ids.peek();
        self.values.insert(ValueKey::Global(global.name.clone()), var_id);

        if let Some(init) = &global.initializer {
            initializer = self.values.constant(init);
        }
        let space = global.address_space();
        let module_constant = initializer.is_some()
            && space == AddressSpace::Constant
            && self.options.module_constants_in_storage_buffer;

        let pointer_type = self.type_id(&global.pointer_type())?;
        let mut operands = vec![
            Operand::IdRef(pointer_type),
            Operand::LiteralBit32(storage_class(space) as u32),
        ];
        if let (Some(init), false) = (initializer, module_constant) {
            operands.push(Operand::IdRef(init));
        }
        self.emit_value(Op::Variable, operands);

        if let Some(builtin) = builtin {
            let mut target = var_id;
            if builtin == BuiltIn::WorkgroupSize {
                let Some(value) = initializer else {
                    bail_internal!("workgroup size has no value");
                };
                target = value;
                self.workgroup_size_value = Some(value);
                self.workgroup_size_var = Some(var_id);
            }
            self.decorate(target, Decoration::BuiltIn, &[builtin as u32]);
        } else if module_constant {
            let descriptor_set = self.next_descriptor_set;
            self.next_descriptor_set += 1;
            let bytes = match &global.initializer {
                Some(init) => layout::constant_bytes(init)?,
                None => Vec::new(),
            };
            self.descriptor_map.push(DescriptorEntry::Constant {
                descriptor_set,
                hex_bytes: layout::hex_bytes(&bytes),
            });
            self.decorate(var_id, Decoration::DescriptorSet, &[descriptor_set]);
            self.decorate(var_id, Decoration::Binding, &[0]);
        }
        Ok(())
    }

    /// The value of the workgroup size builtin: a constant composite when
    /// kernels require a size, else a spec constant composite.
    fn emit_workgroup_size(&mut self, value_type: &Type) -> Result<u32> {
        let mut required: Option<[u32; 3]> = None;
        let mut has_size = Vec::new();
        let mut initializer = None;

        for fi in 0..self.module.functions.len() {
            let func = &self.module.functions[fi];
            if !func.is_kernel() || func.is_declaration() {
                continue;
            }
            let Some(size) = func.reqd_work_group_size() else {
                has_size.push(false);
                continue;
            };
            match required {
                Some(existing) if existing != size => {
                    bail_inconsistent!("reqd_work_group_size must be the same across all kernels")
                }
                Some(_) => continue,
                None => {}
            }
            required = Some(size);
            has_size.push(true);

            let composite_type = self.type_id(value_type)?;
            let mut operands = vec![Operand::IdRef(composite_type)];
            for dim in size {
                operands.push(Operand::IdRef(self.constant_id(&Constant::i32(dim))?));
            }
            initializer = Some(self.emit_value(Op::ConstantComposite, operands));
        }

        if has_size.windows(2).any(|w| w[0] != w[1]) {
            bail_inconsistent!("Kernels should have consistent work group size definition");
        }
        if let Some(id) = initializer {
            return Ok(id);
        }

        debug!("workgroup size is specialized");
        let elem = match value_type {
            Type::Vector(elem, _) | Type::Array(elem, _) => self.type_id(elem)?,
            other => bail_internal!("workgroup size of type {}", other),
        };
        for _ in 0..3 {
            let dim = self.emit_value(Op::SpecConstant, vec![Operand::IdRef(elem), Operand::LiteralBit32(1)]);
            self.builtin_dims.push(dim);
        }
        let mut operands = vec![Operand::IdRef(self.type_id(value_type)?)];
        operands.extend(self.builtin_dims.iter().map(|&d| Operand::IdRef(d)));
        Ok(self.emit_value(Op::SpecConstantComposite, operands))
    }

    pub(super) fn emit_workgroup_vars(&mut self) {
        let locals: Vec<_> = self.local_args.values().cloned().collect();
        for local in locals {
            self.body.push(instruction::build_with_result(
                Op::Variable,
                local.variable_id,
                vec![
                    Operand::IdRef(local.ptr_array_type_id),
                    Operand::LiteralBit32(StorageClass::Workgroup as u32),
                ],
            ));
        }
    }
}
