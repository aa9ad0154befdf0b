// Module header and final section order.

use kir::Type;
use spirv::{
    AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, MemoryModel, Op,
    SourceLanguage, Word,
};

use super::LoweringContext;
use crate::builtins::IMAGE_QUERIES;
use crate::error::Result;
use crate::instruction::{self, Instruction, Operand};
use crate::tables::ValueKey;
use crate::{bail_inconsistent, bail_internal};

const OPENCL_C_VERSION: u32 = 120;

fn capability(cap: Capability) -> Instruction {
    instruction::build(Op::Capability, vec![Operand::LiteralBit32(cap as u32)])
}

impl LoweringContext<'_> {
    fn capabilities(&self) -> Vec<Instruction> {
        let mut out = vec![capability(Capability::Shader)];
        for ty in self.types.iter() {
            let cap = match ty {
                Type::Int(16) => Capability::Int16,
                Type::Int(64) => Capability::Int64,
                Type::Float(16) => Capability::Float16,
                Type::Float(64) => Capability::Float64,
                Type::Opaque(o) if o.is_write_only_image() => {
                    Capability::StorageImageWriteWithoutFormat
                }
                _ => continue,
            };
            out.push(capability(cap));
        }

        let queries_images = IMAGE_QUERIES
            .iter()
            .any(|name| self.module.function(name).is_some() || self.module.calls_function(name));
        if queries_images {
            out.push(capability(Capability::ImageQuery));
        }

        if self.has_variable_pointers {
            out.push(capability(Capability::VariablePointers));
            for ext in [
                "SPV_KHR_storage_buffer_storage_class",
                "SPV_KHR_variable_pointers",
            ] {
                out.push(instruction::build(Op::Extension, vec![Operand::from(ext)]));
            }
        }
        out
    }

    fn entry_points(&self) -> Result<Vec<Instruction>> {
        let mut interface = Vec::new();
        for name in &self.entry_interfaces {
            match self.values.get(&ValueKey::Global(name.clone())) {
                Some(id) => interface.push(Operand::IdRef(id)),
                None => bail_internal!("interface variable @{} has no id", name),
            }
        }

        let mut out = Vec::new();
        for &(fi, id) in &self.entry_points {
            let mut operands = vec![
                Operand::LiteralBit32(ExecutionModel::GLCompute as u32),
                Operand::IdRef(id),
                Operand::LiteralString(self.module.functions[fi].name.clone()),
            ];
            operands.extend(interface.iter().cloned());
            out.push(instruction::build(Op::EntryPoint, operands));
        }

        for &(fi, id) in &self.entry_points {
            let Some([x, y, z]) = self.module.functions[fi].reqd_work_group_size() else {
                continue;
            };
            if !self.builtin_dims.is_empty() {
                bail_inconsistent!(
                    "Kernels should have consistent work group size definition"
                );
            }
            out.push(instruction::build(
                Op::ExecutionMode,
                vec![
                    Operand::IdRef(id),
                    Operand::LiteralBit32(ExecutionMode::LocalSize as u32),
                    Operand::LiteralBit32(x),
                    Operand::LiteralBit32(y),
                    Operand::LiteralBit32(z),
                ],
            ));
        }
        Ok(out)
    }

    /// Every section in order: capabilities and extensions, the extended
    /// instruction import, memory model, entry points and execution modes,
    /// source, decorations and finally types, values and functions.
    pub(super) fn assemble_module(&self) -> Result<Vec<Instruction>> {
        let mut out = self.capabilities();

        if let Some(import) = self.ext_inst_import {
            out.push(instruction::build_with_result(
                Op::ExtInstImport,
                import,
                vec![Operand::from("GLSL.std.450")],
            ));
        }
        out.push(instruction::build(
            Op::MemoryModel,
            vec![
                Operand::LiteralBit32(AddressingModel::Logical as u32),
                Operand::LiteralBit32(MemoryModel::GLSL450 as u32),
            ],
        ));
        out.extend(self.entry_points()?);
        out.push(instruction::build(
            Op::Source,
            vec![
                Operand::LiteralBit32(SourceLanguage::OpenCL_C as u32),
                Operand::LiteralBit32(OPENCL_C_VERSION),
            ],
        ));

        for (spec_id, &dim) in self.builtin_dims.iter().enumerate() {
            out.push(instruction::build(
                Op::Decorate,
                vec![
                    Operand::IdRef(dim),
                    Operand::LiteralBit32(Decoration::SpecId as u32),
                    Operand::LiteralBit32(spec_id as Word),
                ],
            ));
        }

        out.extend(self.annotations.iter().cloned());
        out.extend(self.body.iter().cloned());
        Ok(out)
    }
}
