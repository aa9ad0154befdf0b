// Constant declarations, emitted in discovery order.

use kir::Constant;
use spirv::Op;

use super::LoweringContext;
use crate::error::Result;
use crate::instruction::{self, Operand};
use crate::tables::ValueKey;
use crate::{bail_internal, bail_unsupported};

/// Packs a 4 x i8 vector into one word, first element most significant.
/// Undefined lanes read as zero.
pub(super) fn pack_4xi8(elements: &[Constant]) -> u32 {
    elements.iter().fold(0u32, |packed, element| {
        let lane = element.as_int().unwrap_or(0) as u32;
        (packed << 8) | (lane & 0xff)
    })
}

impl LoweringContext<'_> {
    pub(super) fn emit_constants(&mut self) -> Result<()> {
        let constants: Vec<Constant> = self.constants.iter().cloned().collect();
        for constant in constants {
            if self.allocated_constants.contains(&constant) {
                continue;
            }
            let id = self.emit_constant(&constant)?;
            if constant == Constant::i32(0) {
                self.i32_zero = Some(id);
            }
            self.values.insert(ValueKey::Constant(constant), id);
        }
        Ok(())
    }

    fn emit_constant(&mut self, constant: &Constant) -> Result<u32> {
        let ty = constant.ty();
        let type_id = self.type_id(&ty)?;
        let (opcode, operands) = match constant {
            Constant::Undef(_) => {
                let numeric = ty.is_int_or_int_vector() || ty.is_fp_or_fp_vector();
                if self.options.hack_undef && numeric {
                    (Op::ConstantNull, vec![Operand::IdRef(type_id)])
                } else {
                    (Op::Undef, vec![Operand::IdRef(type_id)])
                }
            }
            Constant::Int { width: 1, value } => {
                let opcode = if *value != 0 {
                    Op::ConstantTrue
                } else {
                    Op::ConstantFalse
                };
                (opcode, vec![Operand::IdRef(type_id)])
            }
            Constant::Int { width, value } => {
                if *width == 32 {
                    if let Some(&id) = self.packed_4xi8.get(&(*value as u32)) {
                        return Ok(id);
                    }
                }
                let literal = if *width > 32 {
                    Operand::LiteralBit64(*value)
                } else {
                    Operand::LiteralBit32(*value as u32)
                };
                (Op::Constant, vec![Operand::IdRef(type_id), literal])
            }
            Constant::Float { width: 32, bits } => (
                Op::Constant,
                vec![Operand::IdRef(type_id), Operand::LiteralBit32(*bits as u32)],
            ),
            Constant::Float { width, .. } => {
                bail_unsupported!("{}-bit floating point constant", width)
            }
            Constant::Aggregate { elements, .. } if ty.is_4xi8() => {
                let packed = pack_4xi8(elements);
                let existing = self
                    .values
                    .constant(&Constant::i32(packed))
                    .or_else(|| self.packed_4xi8.get(&packed).copied());
                if let Some(id) = existing {
                    return Ok(id);
                }
                let id = self.ids.allocate();
                self.body.push(instruction::build_with_result(
                    Op::Constant,
                    id,
                    vec![Operand::IdRef(type_id), Operand::LiteralBit32(packed)],
                ));
                self.packed_4xi8.insert(packed, id);
                return Ok(id);
            }
            Constant::Aggregate { elements, .. } => {
                let mut operands = vec![Operand::IdRef(type_id)];
                for element in elements {
                    match self.values.constant(element) {
                        Some(id) => operands.push(Operand::IdRef(id)),
                        None => bail_internal!("element {:?} emitted after its aggregate", element),
                    }
                }
                (Op::ConstantComposite, operands)
            }
            Constant::Null(_) => (Op::ConstantNull, vec![Operand::IdRef(type_id)]),
        };
        let id = self.ids.allocate();
        self.body
            .push(instruction::build_with_result(opcode, id, operands));
        Ok(id)
    }
}
