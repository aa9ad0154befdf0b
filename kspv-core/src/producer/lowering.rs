// Instruction lowering. Phis and branches are queued for later; calls are
// handled in `calls`.

use kir::{
    AddressSpace, AtomicOp, BinaryOp, CastOp, Constant, FloatPredicate, IntPredicate, Operation,
    Terminator, Type, Value,
};
use spirv::{Op, StorageClass, Word};

use super::deferred::{Deferred, DeferredKind};
use super::discovery::bool_widening_constants;
use super::{storage_class, LoweringContext};
use crate::error::Result;
use crate::instruction::Operand;
use crate::tables::ValueKey;
use crate::{bail_internal, bail_unsupported_at};

fn cast_opcode(op: CastOp) -> Op {
    match op {
        CastOp::Trunc | CastOp::ZExt => Op::UConvert,
        CastOp::SExt => Op::SConvert,
        CastOp::FpToUi => Op::ConvertFToU,
        CastOp::FpToSi => Op::ConvertFToS,
        CastOp::UiToFp => Op::ConvertUToF,
        CastOp::SiToFp => Op::ConvertSToF,
        CastOp::FpTrunc | CastOp::FpExt => Op::FConvert,
        CastOp::Bitcast => Op::Bitcast,
    }
}

fn binary_opcode(op: BinaryOp, ty: &Type) -> Op {
    if ty.is_bool() {
        match op {
            BinaryOp::Or => return Op::LogicalOr,
            BinaryOp::And => return Op::LogicalAnd,
            BinaryOp::Xor => return Op::LogicalNotEqual,
            _ => {}
        }
    }
    match op {
        BinaryOp::Add => Op::IAdd,
        BinaryOp::FAdd => Op::FAdd,
        BinaryOp::Sub => Op::ISub,
        BinaryOp::FSub => Op::FSub,
        BinaryOp::Mul => Op::IMul,
        BinaryOp::FMul => Op::FMul,
        BinaryOp::UDiv => Op::UDiv,
        BinaryOp::SDiv => Op::SDiv,
        BinaryOp::FDiv => Op::FDiv,
        BinaryOp::URem => Op::UMod,
        BinaryOp::SRem => Op::SRem,
        BinaryOp::FRem => Op::FRem,
        BinaryOp::Or => Op::BitwiseOr,
        BinaryOp::Xor => Op::BitwiseXor,
        BinaryOp::And => Op::BitwiseAnd,
        BinaryOp::Shl => Op::ShiftLeftLogical,
        BinaryOp::LShr => Op::ShiftRightLogical,
        BinaryOp::AShr => Op::ShiftRightArithmetic,
    }
}

fn int_compare_opcode(pred: IntPredicate) -> Op {
    match pred {
        IntPredicate::Eq => Op::IEqual,
        IntPredicate::Ne => Op::INotEqual,
        IntPredicate::Ugt => Op::UGreaterThan,
        IntPredicate::Uge => Op::UGreaterThanEqual,
        IntPredicate::Ult => Op::ULessThan,
        IntPredicate::Ule => Op::ULessThanEqual,
        IntPredicate::Sgt => Op::SGreaterThan,
        IntPredicate::Sge => Op::SGreaterThanEqual,
        IntPredicate::Slt => Op::SLessThan,
        IntPredicate::Sle => Op::SLessThanEqual,
    }
}

fn float_compare_opcode(pred: FloatPredicate) -> Op {
    match pred {
        FloatPredicate::Oeq => Op::FOrdEqual,
        FloatPredicate::Ogt => Op::FOrdGreaterThan,
        FloatPredicate::Oge => Op::FOrdGreaterThanEqual,
        FloatPredicate::Olt => Op::FOrdLessThan,
        FloatPredicate::Ole => Op::FOrdLessThanEqual,
        FloatPredicate::One => Op::FOrdNotEqual,
        FloatPredicate::Ueq => Op::FUnordEqual,
        FloatPredicate::Ugt => Op::FUnordGreaterThan,
        FloatPredicate::Uge => Op::FUnordGreaterThanEqual,
        FloatPredicate::Ult => Op::FUnordLessThan,
        FloatPredicate::Ule => Op::FUnordLessThanEqual,
        FloatPredicate::Une => Op::FUnordNotEqual,
    }
}

fn atomic_opcode(op: AtomicOp) -> Op {
    match op {
        AtomicOp::Add => Op::AtomicIAdd,
        AtomicOp::Sub => Op::AtomicISub,
        AtomicOp::Xchg => Op::AtomicExchange,
        AtomicOp::Min => Op::AtomicSMin,
        AtomicOp::Max => Op::AtomicSMax,
        AtomicOp::UMin => Op::AtomicUMin,
        AtomicOp::UMax => Op::AtomicUMax,
        AtomicOp::And => Op::AtomicAnd,
        AtomicOp::Or => Op::AtomicOr,
        AtomicOp::Xor => Op::AtomicXor,
    }
}

fn constant_lane(index: &Value) -> Option<u32> {
    index
        .as_constant()
        .and_then(Constant::as_int)
        .map(|lane| lane as u32)
}

impl LoweringContext<'_> {
    pub(super) fn lower_instruction(
        &mut self,
        fi: usize,
        bi: usize,
        ii: usize,
        inst: &kir::Instruction,
    ) -> Result<()> {
        let result = match &inst.op {
            Operation::Call { func, args } => return self.lower_call(fi, bi, ii, inst, func, args),
            Operation::Phi { .. } => {
                let id = self.ids.allocate();
                self.deferred.push(Deferred {
                    function: fi,
                    block: bi,
                    position: self.body.len(),
                    kind: DeferredKind::Phi {
                        instruction: ii,
                        result: id,
                    },
                });
                Some(id)
            }
            Operation::Store { value, ptr } => {
                let ptr = self.value_id(fi, ptr)?;
                let value = self.value_id(fi, value)?;
                self.emit(Op::Store, vec![Operand::IdRef(ptr), Operand::IdRef(value)]);
                None
            }
            // The result type may be rewritten, so it is resolved inside.
            Operation::Gep { base, indices } => Some(self.lower_gep(fi, inst, base, indices)?),
            op => Some(self.lower_value(fi, inst, op)?),
        };
        if let (Some(id), Some(name)) = (result, &inst.result) {
            self.values.insert(ValueKey::local(fi, name), id);
        }
        Ok(())
    }

    fn operand(&self, fi: usize, value: &Value) -> Result<Operand> {
        Ok(Operand::IdRef(self.value_id(fi, value)?))
    }

    fn i32_operand(&self, value: u32) -> Result<Operand> {
        Ok(Operand::IdRef(self.constant_id(&Constant::i32(value))?))
    }

    /// Lowers an instruction producing a value and returns its id.
    fn lower_value(&mut self, fi: usize, inst: &kir::Instruction, op: &Operation) -> Result<Word> {
        let ty = self.type_id(&inst.ty)?;
        let id = match op {
            Operation::Cast(cast, value) => {
                let from = self.value_type(fi, value)?;
                let widens_bool = matches!(cast, CastOp::ZExt | CastOp::SExt | CastOp::UiToFp)
                    && from.is_bool_or_bool_vector();
                if widens_bool {
                    let (on, off) = bool_widening_constants(*cast, &inst.ty)?;
                    let operands = vec![
                        Operand::IdRef(ty),
                        self.operand(fi, value)?,
                        Operand::IdRef(self.constant_id(&on)?),
                        Operand::IdRef(self.constant_id(&off)?),
                    ];
                    self.emit_value(Op::Select, operands)
                } else if *cast == CastOp::Trunc && from.is_int(32) && inst.ty.is_int(8) {
                    let operands = vec![
                        Operand::IdRef(self.type_id(&from)?),
                        self.operand(fi, value)?,
                        self.i32_operand(0xff)?,
                    ];
                    self.emit_value(Op::BitwiseAnd, operands)
                } else {
                    let operands = vec![Operand::IdRef(ty), self.operand(fi, value)?];
                    self.emit_value(cast_opcode(*cast), operands)
                }
            }
            Operation::Binary(BinaryOp::Xor, a, b)
                if inst.ty.is_bool() && (a.as_constant().is_some() || b.as_constant().is_some()) =>
            {
                let negated = if a.as_constant().is_some() { b } else { a };
                let operands = vec![Operand::IdRef(ty), self.operand(fi, negated)?];
                self.emit_value(Op::LogicalNot, operands)
            }
            Operation::Binary(binop, a, b) => {
                let operands = vec![Operand::IdRef(ty), self.operand(fi, a)?, self.operand(fi, b)?];
                self.emit_value(binary_opcode(*binop, &inst.ty), operands)
            }
            Operation::ICmp(pred, a, b) => {
                self.reject_pointer_compare(fi, a)?;
                let operands = vec![Operand::IdRef(ty), self.operand(fi, a)?, self.operand(fi, b)?];
                self.emit_value(int_compare_opcode(*pred), operands)
            }
            Operation::FCmp(pred, a, b) => {
                self.reject_pointer_compare(fi, a)?;
                let operands = vec![Operand::IdRef(ty), self.operand(fi, a)?, self.operand(fi, b)?];
                self.emit_value(float_compare_opcode(*pred), operands)
            }
            Operation::ExtractValue { aggregate, indices } => {
                let mut operands = vec![Operand::IdRef(ty), self.operand(fi, aggregate)?];
                operands.extend(indices.iter().map(|&i| Operand::LiteralBit32(i)));
                self.emit_value(Op::CompositeExtract, operands)
            }
            Operation::InsertValue {
                aggregate,
                element,
                indices,
            } => {
                let mut operands = vec![
                    Operand::IdRef(ty),
                    self.operand(fi, element)?,
                    self.operand(fi, aggregate)?,
                ];
                operands.extend(indices.iter().map(|&i| Operand::LiteralBit32(i)));
                self.emit_value(Op::CompositeInsert, operands)
            }
            Operation::Select(cond, on, off) => {
                let ty = match inst.ty.pointee_opaque() {
                    Some(opaque) => self.type_id(&Type::Opaque(opaque))?,
                    None => ty,
                };
                let operands = vec![
                    Operand::IdRef(ty),
                    self.operand(fi, cond)?,
                    self.operand(fi, on)?,
                    self.operand(fi, off)?,
                ];
                self.emit_value(Op::Select, operands)
            }
            Operation::ExtractElement { vector, index } => {
                self.lower_extract_element(fi, ty, vector, index)?
            }
            Operation::InsertElement {
                vector,
                element,
                index,
            } => self.lower_insert_element(fi, ty, vector, element, index)?,
            Operation::ShuffleVector { lhs, rhs, mask } => {
                let mut operands = vec![Operand::IdRef(ty), self.operand(fi, lhs)?, self.operand(fi, rhs)?];
                operands.extend(mask.iter().map(|lane| Operand::LiteralBit32(lane.unwrap_or(0xFFFF_FFFF))));
                self.emit_value(Op::VectorShuffle, operands)
            }
            Operation::Alloca => self.emit_value(
                Op::Variable,
                vec![Operand::IdRef(ty), Operand::LiteralBit32(StorageClass::Function as u32)],
            ),
            Operation::Load(ptr) => {
                let ptr = self.value_id(fi, ptr)?;
                if Some(ptr) == self.workgroup_size_var {
                    // The builtin is a constant; read the value directly.
                    let value = match self.workgroup_size_value {
                        Some(value) => value,
                        None => bail_internal!("workgroup size variable without a value"),
                    };
                    self.emit_value(
                        Op::BitwiseAnd,
                        vec![Operand::IdRef(ty), Operand::IdRef(value), Operand::IdRef(value)],
                    )
                } else {
                    self.emit_value(Op::Load, vec![Operand::IdRef(ty), Operand::IdRef(ptr)])
                }
            }
            Operation::AtomicRmw { op, ptr, value } => {
                let operands = vec![
                    Operand::IdRef(ty),
                    self.operand(fi, ptr)?,
                    self.i32_operand(1)?,
                    self.i32_operand(0x48)?,
                    self.operand(fi, value)?,
                ];
                self.emit_value(atomic_opcode(*op), operands)
            }
            Operation::Store { .. }
            | Operation::Call { .. }
            | Operation::Phi { .. }
            | Operation::Gep { .. } => {
                bail_internal!("{:?} is not a plain value", op)
            }
        };
        Ok(id)
    }

    fn reject_pointer_compare(&self, fi: usize, operand: &Value) -> Result<()> {
        if self.value_type(fi, operand)?.as_pointer().is_some() {
            bail_unsupported_at!(self.here(), "Pointer equality check is invalid");
        }
        Ok(())
    }

    fn lower_gep(
        &mut self,
        fi: usize,
        inst: &kir::Instruction,
        base: &Value,
        indices: &[Value],
    ) -> Result<Word> {
        let base_ty = self.value_type(fi, base)?;
        let mut result_ty = inst.ty.clone();
        let private_base = base_ty.address_space() == Some(AddressSpace::ModulePrivate)
            || self.is_global_const_param(fi, base);
        if let (true, Some(p)) = (private_base, inst.ty.as_pointer()) {
            result_ty = Type::pointer(AddressSpace::ModulePrivate, (*p.pointee).clone());
        }
        let result_type = self.type_id(&result_ty)?;

        let arg_base = base
            .as_register()
            .and_then(|name| self.param_index(fi, name))
            .and_then(|pi| self.arg_var_ids.get(&(fi, pi)).copied());
        if arg_base.is_some() && base_ty.as_pointer().is_none() {
            bail_unsupported_at!(
                self.here(),
                "GEP's pointer operand is argument of non-pointer type"
            );
        }

        let mut operands = vec![Operand::IdRef(result_type)];
        let mut opcode = Op::AccessChain;
        let mut skip = 0;
        match arg_base {
            Some(var) => {
                // Step through the wrapper struct.
                operands.push(Operand::IdRef(var));
                operands.push(self.i32_operand(0)?);
            }
            None => {
                operands.push(self.operand(fi, base)?);
                match indices.first() {
                    Some(first) => match first.as_constant().and_then(Constant::as_int) {
                        Some(0) => skip = 1,
                        _ => opcode = Op::PtrAccessChain,
                    },
                    None => bail_internal!("GEP without indices"),
                }
            }
        }
        for index in &indices[skip..] {
            operands.push(self.operand(fi, index)?);
        }

        if opcode == Op::PtrAccessChain {
            self.has_variable_pointers = true;
            if let Some(space) = result_ty.address_space() {
                if storage_class(space) == StorageClass::StorageBuffer {
                    self.array_stride_types.insert(result_ty.clone());
                }
            }
        }
        Ok(self.emit_value(opcode, operands))
    }

    /// Shift selecting lane `index` of a packed 4 x i8 word.
    fn lane_shift(&mut self, fi: usize, index: &Value) -> Result<Word> {
        match constant_lane(index) {
            Some(lane) => self.constant_id(&Constant::i32(lane * 8)),
            None => {
                let i32_type = self.type_id(&Type::i32())?;
                let operands = vec![
                    Operand::IdRef(i32_type),
                    self.operand(fi, index)?,
                    self.i32_operand(8)?,
                ];
                Ok(self.emit_value(Op::IMul, operands))
            }
        }
    }

    fn lower_extract_element(
        &mut self,
        fi: usize,
        ty: Word,
        vector: &Value,
        index: &Value,
    ) -> Result<Word> {
        let vector_ty = self.value_type(fi, vector)?;
        if vector_ty.is_4xi8() {
            let packed_type = self.type_id(&vector_ty)?;
            let shift = self.lane_shift(fi, index)?;
            let operands = vec![
                Operand::IdRef(packed_type),
                self.operand(fi, vector)?,
                Operand::IdRef(shift),
            ];
            let shifted = self.emit_value(Op::ShiftRightLogical, operands);
            let operands = vec![Operand::IdRef(ty), Operand::IdRef(shifted), self.i32_operand(0xFF)?];
            return Ok(self.emit_value(Op::BitwiseAnd, operands));
        }

        let mut operands = vec![Operand::IdRef(ty), self.operand(fi, vector)?];
        match constant_lane(index) {
            Some(lane) => {
                operands.push(Operand::LiteralBit32(lane));
                Ok(self.emit_value(Op::CompositeExtract, operands))
            }
            None => {
                operands.push(self.operand(fi, index)?);
                Ok(self.emit_value(Op::VectorExtractDynamic, operands))
            }
        }
    }

    fn lower_insert_element(
        &mut self,
        fi: usize,
        ty: Word,
        vector: &Value,
        element: &Value,
        index: &Value,
    ) -> Result<Word> {
        let vector_ty = self.value_type(fi, vector)?;
        if vector_ty.is_4xi8() {
            let shift = self.lane_shift(fi, index)?;
            let operands = vec![Operand::IdRef(ty), self.i32_operand(0xFF)?, Operand::IdRef(shift)];
            let mask = self.emit_value(Op::ShiftLeftLogical, operands);
            let inverted = self.emit_value(Op::Not, vec![Operand::IdRef(ty), Operand::IdRef(mask)]);
            let operands = vec![Operand::IdRef(ty), self.operand(fi, vector)?, Operand::IdRef(inverted)];
            let cleared = self.emit_value(Op::BitwiseAnd, operands);
            let operands = vec![Operand::IdRef(ty), self.operand(fi, element)?, Operand::IdRef(shift)];
            let placed = self.emit_value(Op::ShiftLeftLogical, operands);
            let operands = vec![Operand::IdRef(ty), Operand::IdRef(cleared), Operand::IdRef(placed)];
            return Ok(self.emit_value(Op::BitwiseOr, operands));
        }

        match constant_lane(index) {
            Some(lane) => {
                let operands = vec![
                    Operand::IdRef(ty),
                    self.operand(fi, element)?,
                    self.operand(fi, vector)?,
                    Operand::LiteralBit32(lane),
                ];
                Ok(self.emit_value(Op::CompositeInsert, operands))
            }
            None => {
                let operands = vec![
                    Operand::IdRef(ty),
                    self.operand(fi, vector)?,
                    self.operand(fi, element)?,
                    self.operand(fi, index)?,
                ];
                Ok(self.emit_value(Op::VectorInsertDynamic, operands))
            }
        }
    }

    pub(super) fn lower_terminator(
        &mut self,
        fi: usize,
        bi: usize,
        terminator: &Terminator,
    ) -> Result<()> {
        match terminator {
            Terminator::Br(_) | Terminator::BrIf { .. } => {
                self.deferred.push(Deferred {
                    function: fi,
                    block: bi,
                    position: self.body.len(),
                    kind: DeferredKind::Branch,
                });
            }
            Terminator::Ret(None) => self.emit(Op::Return, vec![]),
            Terminator::Ret(Some(value)) => {
                let value = self.value_id(fi, value)?;
                self.emit(Op::ReturnValue, vec![Operand::IdRef(value)]);
            }
        }
        Ok(())
    }
}
