// Function prologue, block layout and epilogue.

use kir::{AddressSpace, FunctionAttr, Operation, Type};
use log::info;
use spirv::{FunctionControl, Op};

use super::LoweringContext;
use crate::error::{Location, Result};
use crate::instruction::{self, Operand};
use crate::tables::ValueKey;

impl LoweringContext<'_> {
    pub(super) fn emit_function_prologue(&mut self, fi: usize) -> Result<()> {
        let func = self.module.functions[fi].clone();
        self.location = Some(Location::function(&func.name));

        if func.is_kernel() {
            self.bind_kernel_args(fi)?;
        }

        let mut control = FunctionControl::NONE;
        for (attr, bit) in [
            (FunctionAttr::Inline, FunctionControl::INLINE),
            (FunctionAttr::NoInline, FunctionControl::DONT_INLINE),
            (FunctionAttr::ReadOnly, FunctionControl::PURE),
            (FunctionAttr::ReadNone, FunctionControl::CONST),
        ] {
            if func.has_attr(attr) {
                control |= bit;
            }
        }

        let return_type = self.type_id(&func.return_type)?;
        let signature = self.type_id(&self.signature_type(fi))?;
        let id = self.emit_value(
            Op::Function,
            vec![
                Operand::IdRef(return_type),
                Operand::LiteralBit32(control.bits()),
                Operand::IdRef(signature),
            ],
        );
        if func.is_kernel() {
            self.entry_points.push((fi, id));
        }
        self.values.insert(ValueKey::Function(func.name.clone()), id);
        if self.options.show_ids {
            info!("Function {} is {}", func.name, id);
        }

        if !func.is_kernel() {
            let global_const = self.global_const_args.get(&func.name).copied();
            for (pi, param) in func.params.iter().enumerate() {
                let ty = match (global_const, param.ty.as_pointer()) {
                    (Some(index), Some(p)) if index == pi => {
                        Type::pointer(AddressSpace::ModulePrivate, (*p.pointee).clone())
                    }
                    _ => param.ty.clone(),
                };
                let ty = self.type_id(&ty)?;
                let param_id = self.emit_value(Op::FunctionParameter, vec![Operand::IdRef(ty)]);
                self.values.insert(ValueKey::local(fi, &param.name), param_id);
            }
        }
        Ok(())
    }

    pub(super) fn emit_function_body(&mut self, fi: usize) -> Result<()> {
        let func = self.module.functions[fi].clone();
        for (bi, block) in func.blocks.iter().enumerate() {
            self.location = Some(Location::block(&func.name, &block.label));
            let label = self.ids.allocate();
            self.values.insert(ValueKey::block(fi, &block.label), label);
            self.body.push(instruction::build_with_result(Op::Label, label, vec![]));

            let (allocas, rest): (Vec<_>, Vec<_>) = block
                .instructions
                .iter()
                .enumerate()
                .partition(|(_, inst)| matches!(inst.op, Operation::Alloca));
            for (ii, inst) in allocas {
                self.lower_instruction(fi, bi, ii, inst)?;
            }

            if bi == 0 && func.is_kernel() {
                if self.options.hack_initializers {
                    if let (Some(var), Some(value)) =
                        (self.workgroup_size_var, self.workgroup_size_value)
                    {
                        self.emit(Op::Store, vec![Operand::IdRef(var), Operand::IdRef(value)]);
                    }
                }
                self.lower_arguments(fi)?;
            }

            for (ii, inst) in rest {
                self.lower_instruction(fi, bi, ii, inst)?;
            }
            self.lower_terminator(fi, bi, &block.terminator)?;
        }
        Ok(())
    }

    pub(super) fn emit_function_epilogue(&mut self) {
        self.emit(Op::FunctionEnd, vec![]);
    }
}
