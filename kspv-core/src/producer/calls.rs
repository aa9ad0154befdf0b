// Calls to builtins with a fixed lowering. Anything else is deferred until
// every function has an id.

use kir::{Constant, Type, Value};
use spirv::{MemoryAccess, Op, Word};

use super::deferred::{Deferred, DeferredKind};
use super::LoweringContext;
use crate::builtins::{
    atomic_op, image_query_component, indirect_ext_inst, is_image_query, is_read_imagef,
    is_unsigned_abs, is_write_imagef, relational_op, SAMPLER_INITIALIZER,
};
use crate::error::Result;
use crate::instruction::Operand;
use crate::tables::ValueKey;
use crate::{bail_inconsistent_at, bail_internal, bail_unsupported_at};

impl LoweringContext<'_> {
    fn call_arg(&self, fi: usize, args: &[Value], n: usize) -> Result<Word> {
        match args.get(n) {
            Some(arg) => self.value_id(fi, arg),
            None => bail_internal!("call is missing argument {}", n),
        }
    }

    fn call_args(&self, fi: usize, args: &[Value]) -> Result<Vec<Operand>> {
        args.iter()
            .map(|a| Ok(Operand::IdRef(self.value_id(fi, a)?)))
            .collect()
    }

    pub(super) fn lower_call(
        &mut self,
        fi: usize,
        bi: usize,
        ii: usize,
        inst: &kir::Instruction,
        callee: &str,
        args: &[Value],
    ) -> Result<()> {
        let key = inst.result.as_ref().map(|name| ValueKey::local(fi, name));
        let result = match self.lower_builtin_call(fi, inst, callee, args)? {
            Some(result) => result,
            None => {
                let (first, result) = if indirect_ext_inst(callee).is_some() {
                    let first = self.ids.reserve(2);
                    (first, first + 1)
                } else {
                    let id = self.ids.allocate();
                    (id, id)
                };
                self.deferred.push(Deferred {
                    function: fi,
                    block: bi,
                    position: self.body.len(),
                    kind: DeferredKind::Call {
                        instruction: ii,
                        result: first,
                    },
                });
                Some(result)
            }
        };
        if let (Some(key), Some(result)) = (key, result) {
            self.values.insert(key, result);
        }
        Ok(())
    }

    /// Lowers calls with a fixed meaning. `Ok(None)` means the call is not one
    /// of them; `Ok(Some(None))` means it produced no value.
    fn lower_builtin_call(
        &mut self,
        fi: usize,
        inst: &kir::Instruction,
        callee: &str,
        args: &[Value],
    ) -> Result<Option<Option<Word>>> {
        if callee == SAMPLER_INITIALIZER {
            if self.options.sampler_map.is_empty() {
                bail_inconsistent_at!(self.here(), "Sampler literal in source without sampler map!");
            }
            let Some(var) = inst
                .result
                .as_ref()
                .and_then(|name| self.sampler_init_vars.get(&ValueKey::local(fi, name)))
                .copied()
            else {
                bail_internal!("sampler initializer has no variable");
            };
            let sampler = self.type_id(&Type::Opaque(kir::OpaqueType::Sampler))?;
            let id = self.emit_value(Op::Load, vec![Operand::IdRef(sampler), Operand::IdRef(var)]);
            return Ok(Some(Some(id)));
        }

        if callee.starts_with("spirv.atomic") {
            let Some(opcode) = atomic_op(callee) else {
                bail_unsupported_at!(self.here(), "unknown atomic builtin @{}", callee);
            };
            let mut operands = vec![Operand::IdRef(self.type_id(&inst.ty)?)];
            operands.extend(self.call_args(fi, args)?);
            return Ok(Some(Some(self.emit_value(opcode, operands))));
        }

        if callee.starts_with("_Z3dot") {
            let vector_args = match args.first() {
                Some(arg) => self.value_type(fi, arg)?.vector_len().is_some(),
                None => false,
            };
            let opcode = if vector_args { Op::Dot } else { Op::FMul };
            let mut operands = vec![Operand::IdRef(self.type_id(&inst.ty)?)];
            operands.extend(self.call_args(fi, args)?);
            return Ok(Some(Some(self.emit_value(opcode, operands))));
        }

        if callee.starts_with("_Z4fmod") {
            let mut operands = vec![Operand::IdRef(self.type_id(&inst.ty)?)];
            operands.extend(self.call_args(fi, args)?);
            return Ok(Some(Some(self.emit_value(Op::FRem, operands))));
        }

        if callee.starts_with("spirv.store_null") {
            let ptr = self.call_arg(fi, args, 0)?;
            let value = self.call_arg(fi, args, 1)?;
            self.emit(Op::Store, vec![Operand::IdRef(ptr), Operand::IdRef(value)]);
            return Ok(Some(None));
        }

        if callee.starts_with("spirv.copy_memory") {
            let literal = |n: usize| args.get(n).and_then(|a| a.as_constant()).and_then(Constant::as_int);
            let (Some(alignment), Some(volatile)) = (literal(2), literal(3)) else {
                bail_unsupported_at!(
                    self.here(),
                    "copy_memory alignment and volatility must be constants"
                );
            };
            let mut access = MemoryAccess::ALIGNED;
            if volatile != 0 {
                access |= MemoryAccess::VOLATILE;
            }
            let dst = self.call_arg(fi, args, 0)?;
            let src = self.call_arg(fi, args, 1)?;
            self.emit(
                Op::CopyMemory,
                vec![
                    Operand::IdRef(dst),
                    Operand::IdRef(src),
                    Operand::LiteralBit32(access.bits()),
                    Operand::LiteralBit32(alignment as u32),
                ],
            );
            return Ok(Some(None));
        }

        if is_unsigned_abs(callee) {
            return Ok(Some(Some(self.call_arg(fi, args, 0)?)));
        }

        if callee == "__spirv_control_barrier" {
            let operands = vec![
                Operand::IdRef(self.call_arg(fi, args, 0)?),
                Operand::IdRef(self.call_arg(fi, args, 1)?),
                Operand::IdRef(self.call_arg(fi, args, 2)?),
            ];
            self.emit(Op::ControlBarrier, operands);
            return Ok(Some(None));
        }

        if callee == "__spirv_memory_barrier" {
            let operands = vec![
                Operand::IdRef(self.call_arg(fi, args, 0)?),
                Operand::IdRef(self.call_arg(fi, args, 1)?),
            ];
            self.emit(Op::MemoryBarrier, operands);
            return Ok(Some(None));
        }

        if let Some(opcode) = relational_op(callee) {
            let operands = vec![
                Operand::IdRef(self.type_id(&inst.ty)?),
                Operand::IdRef(self.call_arg(fi, args, 0)?),
            ];
            return Ok(Some(Some(self.emit_value(opcode, operands))));
        }

        if is_read_imagef(callee) {
            let image_ty = match args.first() {
                Some(image) => self.value_type(fi, image)?,
                None => bail_internal!("read_imagef without an image"),
            };
            let sampled_image_type = image_ty
                .pointee_opaque()
                .or_else(|| image_ty.as_opaque())
                .and_then(|o| self.image_types.get(&o).copied());
            let Some(sampled_image_type) = sampled_image_type else {
                bail_internal!("no sampled image type for {}", image_ty);
            };
            let image = self.call_arg(fi, args, 0)?;
            let sampler = self.call_arg(fi, args, 1)?;
            let sampled = self.emit_value(
                Op::SampledImage,
                vec![
                    Operand::IdRef(sampled_image_type),
                    Operand::IdRef(image),
                    Operand::IdRef(sampler),
                ],
            );
            let operands = vec![
                Operand::IdRef(self.type_id(&inst.ty)?),
                Operand::IdRef(sampled),
                Operand::IdRef(self.call_arg(fi, args, 2)?),
                Operand::LiteralBit32(spirv::ImageOperands::LOD.bits()),
                Operand::IdRef(self.constant_id(&Constant::f32(0.0))?),
            ];
            return Ok(Some(Some(self.emit_value(Op::ImageSampleExplicitLod, operands))));
        }

        if is_write_imagef(callee) {
            let operands = vec![
                Operand::IdRef(self.call_arg(fi, args, 0)?),
                Operand::IdRef(self.call_arg(fi, args, 1)?),
                Operand::IdRef(self.call_arg(fi, args, 2)?),
            ];
            self.emit(Op::ImageWrite, operands);
            return Ok(Some(None));
        }

        if is_image_query(callee) {
            let size_type = self.type_id(&Type::vector(Type::i32(), 2))?;
            let image = self.call_arg(fi, args, 0)?;
            let sizes = self.emit_value(
                Op::ImageQuerySize,
                vec![Operand::IdRef(size_type), Operand::IdRef(image)],
            );
            let operands = vec![
                Operand::IdRef(self.type_id(&inst.ty)?),
                Operand::IdRef(sizes),
                Operand::LiteralBit32(image_query_component(callee)),
            ];
            return Ok(Some(Some(self.emit_value(Op::CompositeExtract, operands))));
        }

        Ok(None)
    }
}
