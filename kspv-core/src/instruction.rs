//! Instruction construction on top of `rspirv`'s data representation.
//!
//! Producer code lists operands in assembly order, so a value-producing
//! instruction starts with its result type. `build_with_result` consults the
//! core grammar to move that leading id into `result_type`.

use rspirv::grammar::{CoreInstructionTable, OperandKind};
use spirv::{Op, Word};

pub use rspirv::dr::{Instruction, Operand};

pub fn build(opcode: Op, operands: Vec<Operand>) -> Instruction {
    Instruction::new(opcode, None, None, operands)
}

pub fn build_with_result(opcode: Op, result_id: Word, mut operands: Vec<Operand>) -> Instruction {
    let result_type = match operands.first() {
        Some(&Operand::IdRef(ty)) if has_result_type(opcode) => {
            operands.remove(0);
            Some(ty)
        }
        _ => None,
    };
    Instruction::new(opcode, result_type, Some(result_id), operands)
}

/// True if the grammar gives `opcode` a result type operand.
pub fn has_result_type(opcode: Op) -> bool {
    CoreInstructionTable::get(opcode)
        .operands
        .first()
        .is_some_and(|operand| operand.kind == OperandKind::IdResultType)
}

pub fn literal(operand: &Operand) -> Option<u32> {
    match operand {
        Operand::LiteralBit32(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rspirv::binary::Assemble;

    #[test]
    fn test_value_instruction_splits_result_type() {
        let inst = build_with_result(
            Op::IAdd,
            7,
            vec![Operand::IdRef(2), Operand::IdRef(5), Operand::IdRef(6)],
        );
        assert_eq!(inst.result_type, Some(2));
        assert_eq!(inst.operands, vec![Operand::IdRef(5), Operand::IdRef(6)]);
        assert_eq!(inst.assemble(), vec![(5 << 16) | Op::IAdd as u32, 2, 7, 5, 6]);
    }

    #[test]
    fn test_declaration_keeps_operands() {
        let inst = build_with_result(
            Op::TypeInt,
            3,
            vec![Operand::LiteralBit32(32), Operand::LiteralBit32(0)],
        );
        assert_eq!(inst.result_type, None);
        assert_eq!(inst.assemble(), vec![(4 << 16) | Op::TypeInt as u32, 3, 32, 0]);
    }

    #[test]
    fn test_type_pointer_takes_no_result_type() {
        // The storage class is a literal, the pointee an id.
        let inst = build_with_result(
            Op::TypePointer,
            4,
            vec![Operand::LiteralBit32(12), Operand::IdRef(3)],
        );
        assert_eq!(inst.result_type, None);
        assert_eq!(inst.operands.len(), 2);
    }

    #[test]
    fn test_string_operand_padding() {
        let inst = build(Op::Extension, vec![Operand::from("main")]);
        assert_eq!(
            inst.assemble(),
            vec![(3 << 16) | Op::Extension as u32, 0x6e69_616d, 0]
        );
    }
}
