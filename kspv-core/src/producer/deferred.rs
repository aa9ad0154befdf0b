// Instructions that need ids of blocks or functions not yet emitted when
// they are first seen. Each is queued with its insertion point in `body`
// and filled in once every function has been lowered.

use std::collections::HashMap;

use kir::{Constant, Operation, Terminator, Type};
use log::{trace, warn};
use spirv::{Decoration, Op, Word};

use super::{ids, LoweringContext};
use crate::builtins::{
    direct_ext_inst, indirect_ext_inst, indirect_fixup, is_popcount, IndirectFixup,
    COMPOSITE_CONSTRUCT_PREFIX,
};
use crate::cfg::{BlockId, ControlFlow};
use crate::error::{Location, Result};
use crate::instruction::{self, Instruction, Operand};
use crate::layout;
use crate::tables::ValueKey;
use crate::{bail_inconsistent_at, bail_internal};

#[derive(Debug, Clone)]
pub(super) struct Deferred {
    pub function: usize,
    pub block: usize,
    /// Length of `body` when the instruction was reached.
    pub position: usize,
    pub kind: DeferredKind,
}

#[derive(Debug, Clone, Copy)]
pub(super) enum DeferredKind {
    /// The block terminator.
    Branch,
    Phi { instruction: usize, result: Word },
    /// `result` is the first reserved id; extended instructions with a fixup
    /// reserve two.
    Call { instruction: usize, result: Word },
}

impl LoweringContext<'_> {
    fn label_id(&self, fi: usize, label: &str) -> Result<Word> {
        match self.values.get(&ValueKey::block(fi, label)) {
            Some(id) => Ok(id),
            None => bail_internal!("no label for block '{}'", label),
        }
    }

    pub(super) fn resolve_deferred(&mut self) -> Result<()> {
        let mut graphs: HashMap<usize, ControlFlow> = HashMap::new();
        let deferred = std::mem::take(&mut self.deferred);
        for entry in deferred.iter().rev() {
            let func = &self.module.functions[entry.function];
            let Some(block) = func.blocks.get(entry.block) else {
                bail_internal!("deferred entry in unknown block {}", entry.block);
            };
            self.location = Some(Location::block(&func.name, &block.label));

            let mut position = entry.position;
            while self
                .body
                .get(position)
                .is_some_and(|inst| inst.class.opcode == Op::Phi)
            {
                position += 1;
            }

            let resolved = match entry.kind {
                DeferredKind::Branch => {
                    if !graphs.contains_key(&entry.function) {
                        graphs.insert(entry.function, ControlFlow::build(func)?);
                    }
                    let cfg = &graphs[&entry.function];
                    self.resolve_branch(entry.function, entry.block, cfg)?
                }
                DeferredKind::Phi {
                    instruction,
                    result,
                } => vec![self.resolve_phi(entry.function, entry.block, instruction, result)?],
                DeferredKind::Call {
                    instruction,
                    result,
                } => self.resolve_call(entry.function, entry.block, instruction, result)?,
            };
            for (offset, inst) in resolved.into_iter().enumerate() {
                self.body.insert(position + offset, inst);
            }
        }
        self.location = None;
        Ok(())
    }

    /// The merge instruction (if any) followed by the branch itself.
    fn resolve_branch(&self, fi: usize, bi: usize, cfg: &ControlFlow) -> Result<Vec<Instruction>> {
        let func = &self.module.functions[fi];
        let block = BlockId(bi);
        let mut out = Vec::new();

        if let Some(natural) = cfg.loop_for_header(block) {
            let Some(exit) = natural.exit_block(cfg) else {
                bail_inconsistent_at!(self.here(), "Loop has multiple exits");
            };
            let continue_block = if natural.is_latch(block) {
                block
            } else {
                let Some(latch) = natural.latch() else {
                    bail_inconsistent_at!(self.here(), "Loop has multiple latches");
                };
                let found = natural
                    .blocks
                    .iter()
                    .rev()
                    .find(|&&b| b != block && cfg.dominates(b, latch))
                    .copied();
                match found {
                    Some(b) => b,
                    None => bail_inconsistent_at!(
                        self.here(),
                        "Loop has no block dominating its latch"
                    ),
                }
            };
            let merge = self.label_id(fi, &func.blocks[exit.0].label)?;
            let cont = self.label_id(fi, &func.blocks[continue_block.0].label)?;
            trace!("loop at {}: merge {} continue {}", self.here(), merge, cont);
            out.push(instruction::build(
                Op::LoopMerge,
                vec![Operand::IdRef(merge), Operand::IdRef(cont), Operand::LiteralBit32(0)],
            ));
        }

        match &func.blocks[bi].terminator {
            Terminator::BrIf {
                cond,
                true_label,
                false_label,
            } => {
                let to_loop_header = cfg
                    .successors(block)
                    .iter()
                    .any(|&s| cfg.is_loop_header(s));
                let true_id = self.label_id(fi, true_label)?;
                let false_id = self.label_id(fi, false_label)?;
                if out.is_empty() && !to_loop_header {
                    out.push(instruction::build(
                        Op::SelectionMerge,
                        vec![Operand::IdRef(false_id), Operand::LiteralBit32(0)],
                    ));
                }
                out.push(instruction::build(
                    Op::BranchConditional,
                    vec![
                        Operand::IdRef(self.value_id(fi, cond)?),
                        Operand::IdRef(true_id),
                        Operand::IdRef(false_id),
                    ],
                ));
            }
            Terminator::Br(target) => {
                out.push(instruction::build(
                    Op::Branch,
                    vec![Operand::IdRef(self.label_id(fi, target)?)],
                ));
            }
            Terminator::Ret(_) => bail_internal!("return queued as a branch"),
        }
        Ok(out)
    }

    fn resolve_phi(&self, fi: usize, bi: usize, ii: usize, result: Word) -> Result<Instruction> {
        let inst = &self.module.functions[fi].blocks[bi].instructions[ii];
        let Operation::Phi { incoming } = &inst.op else {
            bail_internal!("queued phi is a {:?}", inst.op);
        };
        let mut operands = vec![Operand::IdRef(self.type_id(&inst.ty)?)];
        for (value, label) in incoming {
            operands.push(Operand::IdRef(self.value_id(fi, value)?));
            operands.push(Operand::IdRef(self.label_id(fi, label)?));
        }
        Ok(instruction::build_with_result(Op::Phi, result, operands))
    }

    fn resolve_call(
        &self,
        fi: usize,
        bi: usize,
        ii: usize,
        result: Word,
    ) -> Result<Vec<Instruction>> {
        let inst = &self.module.functions[fi].blocks[bi].instructions[ii];
        let Operation::Call { func: callee, args } = &inst.op else {
            bail_internal!("queued call is a {:?}", inst.op);
        };
        let result_type = self.type_id(&inst.ty)?;
        let arg_ids = args
            .iter()
            .map(|a| self.value_id(fi, a))
            .collect::<Result<Vec<_>>>()?;

        if let Some(op) = direct_ext_inst(callee).or_else(|| indirect_ext_inst(callee)) {
            let Some(import) = self.ext_inst_import else {
                bail_internal!("extended instruction without an import");
            };
            let mut operands = vec![
                Operand::IdRef(result_type),
                Operand::IdRef(import),
                Operand::LiteralBit32(op as u32),
            ];
            operands.extend(ids(&arg_ids));
            let mut out = vec![instruction::build_with_result(Op::ExtInst, result, operands)];

            if indirect_ext_inst(callee).is_some() {
                let (opcode, scalar) = match indirect_fixup(op) {
                    Some(IndirectFixup::SubtractFrom(v)) => (Op::ISub, Constant::i32(v)),
                    Some(IndirectFixup::MultiplyBy(f)) => (Op::FMul, Constant::f32(f)),
                    None => bail_internal!("no fixup for {:?}", op),
                };
                let constant = match inst.ty.vector_len() {
                    Some(lanes) => {
                        Constant::splat(&Type::vector(scalar.ty(), lanes), scalar)
                    }
                    None => scalar,
                };
                out.push(instruction::build_with_result(
                    opcode,
                    result + 1,
                    vec![
                        Operand::IdRef(result_type),
                        Operand::IdRef(self.constant_id(&constant)?),
                        Operand::IdRef(result),
                    ],
                ));
            }
            return Ok(out);
        }

        if is_popcount(callee) {
            let Some(&value) = arg_ids.first() else {
                bail_internal!("popcount without an argument");
            };
            return Ok(vec![instruction::build_with_result(
                Op::BitCount,
                result,
                vec![Operand::IdRef(result_type), Operand::IdRef(value)],
            )]);
        }

        if callee.starts_with(COMPOSITE_CONSTRUCT_PREFIX) {
            let mut operands = vec![Operand::IdRef(result_type)];
            operands.extend(ids(&arg_ids));
            return Ok(vec![instruction::build_with_result(
                Op::CompositeConstruct,
                result,
                operands,
            )]);
        }

        let callee_id = match self.values.get(&ValueKey::Function(callee.clone())) {
            Some(id) => id,
            None => {
                warn!("{}: no definition for called function @{}", self.here(), callee);
                0
            }
        };
        let mut operands = vec![Operand::IdRef(result_type), Operand::IdRef(callee_id)];
        operands.extend(ids(&arg_ids));
        Ok(vec![instruction::build_with_result(
            Op::FunctionCall,
            result,
            operands,
        )])
    }

    /// Array strides for every type that needed one, then the
    /// specialization ids sizing workgroup arrays.
    pub(super) fn emit_deferred_decorations(&mut self) -> Result<()> {
        let strided: Vec<Type> = self.array_stride_types.iter().cloned().collect();
        for ty in strided {
            let elem = match &ty {
                Type::Pointer(p) => p.pointee.as_ref(),
                Type::Array(elem, _) | Type::Vector(elem, _) => elem.as_ref(),
                other => bail_internal!("array stride on {}", other),
            };
            let stride = layout::alloc_size(elem) as u32;
            let target = self.type_id(&ty)?;
            self.decorate(target, Decoration::ArrayStride, &[stride]);
        }

        let locals: Vec<(Word, u32)> = self
            .local_args
            .values()
            .map(|l| (l.array_size_id, l.spec_id))
            .collect();
        for (size, spec_id) in locals {
            self.decorate(size, Decoration::SpecId, &[spec_id]);
        }
        Ok(())
    }
}
