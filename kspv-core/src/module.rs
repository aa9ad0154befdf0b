use spirv::Word;

use crate::instruction::Instruction;

/// A finished SPIR-V module: instructions in their final section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirvModule {
    /// One past the largest result id.
    pub bound: Word,
    pub instructions: Vec<Instruction>,
}

impl SpirvModule {
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    /// Instructions with the given opcode, in order.
    pub fn with_opcode(&self, opcode: spirv::Op) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().filter(move |i| i.class.opcode == opcode)
    }

    pub fn count(&self, opcode: spirv::Op) -> usize {
        self.with_opcode(opcode).count()
    }

    /// The instruction defining `id`, if any.
    pub fn definition(&self, id: Word) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.result_id == Some(id))
    }

    pub fn position(&self, opcode: spirv::Op) -> Option<usize> {
        self.instructions.iter().position(|i| i.class.opcode == opcode)
    }
}
