//! Serialization of a produced module: binary words, assembly text, or a C
//! initializer list.
//!
//! Both the binary and the assembly header are written with a placeholder
//! bound that is patched in place once the instructions have been written.

use std::collections::HashSet;

use rspirv::binary::Assemble;
use rspirv::dr::ModuleHeader;
use spirv::{Op, Word};

use crate::instruction::{literal, Instruction, Operand};
use crate::module::SpirvModule;
use crate::options::OutputFormat;

pub const SPIRV_VERSION: Word = 0x0001_0000;
/// Codeplay's vendor id in the high half, tool version 0.
pub const GENERATOR: Word = 3 << 16;
/// Byte offset of the bound word in the binary header.
pub const BINARY_BOUND_OFFSET: usize = 12;
const BOUND_FIELD_WIDTH: usize = 10;

pub fn write(module: &SpirvModule, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Binary => write_binary(module),
        OutputFormat::Assembly => write_assembly(module).into_bytes(),
        OutputFormat::CInitList => write_c_init_list(module).into_bytes(),
    }
}

/// Header with a zero bound followed by every instruction.
fn assemble_words(module: &SpirvModule) -> Vec<Word> {
    let mut header = ModuleHeader::new(0);
    header.version = SPIRV_VERSION;
    header.generator = GENERATOR;
    let mut words = header.assemble();
    for inst in &module.instructions {
        inst.assemble_into(&mut words);
    }
    words
}

pub fn write_binary(module: &SpirvModule) -> Vec<u8> {
    let mut bytes: Vec<u8> = assemble_words(module)
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect();
    patch_binary_bound(&mut bytes, module.bound);
    bytes
}

fn patch_binary_bound(bytes: &mut [u8], bound: Word) {
    bytes[BINARY_BOUND_OFFSET..BINARY_BOUND_OFFSET + 4].copy_from_slice(&bound.to_le_bytes());
}

pub fn words_from_bytes(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks_exact(4)
        .map(|c| Word::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn write_c_init_list(module: &SpirvModule) -> String {
    let words = words_from_bytes(&write_binary(module));
    let body: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    format!("{{{}}}\n", body.join(",\n"))
}

pub fn write_assembly(module: &SpirvModule) -> String {
    let mut out = String::new();
    out.push_str("; SPIR-V\n");
    out.push_str(&format!(
        "; Version: {}.{}\n",
        (SPIRV_VERSION >> 16) & 0xff,
        (SPIRV_VERSION >> 8) & 0xff
    ));
    out.push_str("; Generator: Codeplay; 0\n");
    out.push_str("; Bound: ");
    let bound_offset = out.len();
    out.push_str(&" ".repeat(BOUND_FIELD_WIDTH));
    out.push('\n');
    out.push_str("; Schema: 0\n");

    let float_types: HashSet<Word> = module
        .with_opcode(Op::TypeFloat)
        .filter(|t| t.operands.first().and_then(literal) == Some(32))
        .filter_map(|t| t.result_id)
        .collect();
    for inst in &module.instructions {
        out.push_str(&format_line(inst, &float_types));
        out.push('\n');
    }

    let digits = module.bound.to_string();
    let end = bound_offset + digits.len().min(BOUND_FIELD_WIDTH);
    out.replace_range(bound_offset..end, &digits[..end - bound_offset]);
    out
}

/// One assembly line, without the trailing newline. Constant literals print
/// as integers; `write_assembly` knows which types are floats.
pub fn format_instruction(inst: &Instruction) -> String {
    format_line(inst, &HashSet::new())
}

fn format_line(inst: &Instruction, float_types: &HashSet<Word>) -> String {
    let opcode = inst.class.opcode;
    let mut line = String::new();
    if let Some(id) = inst.result_id {
        line.push_str(&format!("%{} = ", id));
    }
    line.push_str(&format!("Op{:?}", opcode));
    if let Some(ty) = inst.result_type {
        line.push_str(&format!(" %{}", ty));
    }

    let float_literal = matches!(opcode, Op::Constant | Op::SpecConstant)
        && inst.result_type.is_some_and(|ty| float_types.contains(&ty));
    let ops = &inst.operands;
    for (i, op) in ops.iter().enumerate() {
        line.push(' ');
        match (float_literal, op) {
            (true, Operand::LiteralBit32(bits)) => line.push_str(&format_float(*bits)),
            _ => line.push_str(&format_operand_at(opcode, ops, i, op)),
        }
    }
    line
}

fn format_operand_at(opcode: Op, ops: &[Operand], index: usize, op: &Operand) -> String {
    let num = literal(op);
    let named = match (opcode, index) {
        (Op::Capability, 0) => num.and_then(spirv::Capability::from_u32).map(|c| format!("{:?}", c)),
        (Op::MemoryModel, 0) => num
            .and_then(spirv::AddressingModel::from_u32)
            .map(|m| format!("{:?}", m)),
        (Op::MemoryModel, 1) => num.and_then(spirv::MemoryModel::from_u32).map(|m| format!("{:?}", m)),
        (Op::EntryPoint, 0) => num
            .and_then(spirv::ExecutionModel::from_u32)
            .map(|m| format!("{:?}", m)),
        (Op::ExecutionMode, 1) => num
            .and_then(spirv::ExecutionMode::from_u32)
            .map(|m| format!("{:?}", m)),
        (Op::Source, 0) => num
            .and_then(spirv::SourceLanguage::from_u32)
            .map(|l| format!("{:?}", l)),
        (Op::Decorate, 1) | (Op::MemberDecorate, 2) => {
            num.and_then(spirv::Decoration::from_u32).map(|d| format!("{:?}", d))
        }
        (Op::Decorate, 2) if is_builtin_decoration(ops) => {
            num.and_then(spirv::BuiltIn::from_u32).map(|b| format!("{:?}", b))
        }
        (Op::TypePointer, 0) | (Op::Variable, 0) => num
            .and_then(spirv::StorageClass::from_u32)
            .map(|s| format!("{:?}", s)),
        (Op::TypeImage, 1) => num.map(dim_name),
        (Op::TypeImage, 6) => num.and_then(spirv::ImageFormat::from_u32).map(|f| format!("{:?}", f)),
        (Op::Function, 0) => num.map(function_control_name),
        (Op::SelectionMerge, 1) | (Op::LoopMerge, 2) => num.map(|n| {
            if n == 0 {
                "None".to_string()
            } else {
                n.to_string()
            }
        }),
        (Op::ImageSampleExplicitLod, 2) => num.map(image_operands_name),
        (Op::ExtInst, 1) => num.and_then(spirv::GLOp::from_u32).map(|g| format!("{:?}", g)),
        (Op::CopyMemory, 2) => num.map(memory_access_name),
        _ => None,
    };
    named.unwrap_or_else(|| format_operand(op))
}

fn is_builtin_decoration(ops: &[Operand]) -> bool {
    ops.get(1).and_then(literal) == Some(spirv::Decoration::BuiltIn as u32)
}

pub fn format_operand(op: &Operand) -> String {
    match op {
        Operand::IdRef(id) => format!("%{}", id),
        Operand::LiteralString(s) => format!("\"{}\"", s),
        Operand::LiteralBit32(value) => value.to_string(),
        Operand::LiteralBit64(value) => value.to_string(),
        other => other.to_string(),
    }
}

fn dim_name(value: u32) -> String {
    match spirv::Dim::from_u32(value) {
        Some(spirv::Dim::Dim1D) => "1D".to_string(),
        Some(spirv::Dim::Dim2D) => "2D".to_string(),
        Some(spirv::Dim::Dim3D) => "3D".to_string(),
        Some(other) => format!("{:?}", other),
        None => value.to_string(),
    }
}

fn mask_name(value: u32, bits: &[(u32, &str)]) -> String {
    if value == 0 {
        return "None".to_string();
    }
    let names: Vec<&str> = bits
        .iter()
        .filter(|(bit, _)| value & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    names.join("|")
}

fn function_control_name(value: u32) -> String {
    mask_name(
        value,
        &[(1, "Inline"), (2, "DontInline"), (4, "Pure"), (8, "Const")],
    )
}

fn memory_access_name(value: u32) -> String {
    mask_name(value, &[(1, "Volatile"), (2, "Aligned"), (4, "Nontemporal")])
}

fn image_operands_name(value: u32) -> String {
    mask_name(value, &[(1, "Bias"), (2, "Lod"), (4, "Grad")])
}

/// Renders a 32-bit float with at most six significant digits, switching to
/// scientific notation when more than two padding zeros would be needed.
pub fn format_float(bits: Word) -> String {
    const PRECISION: i32 = 6;
    const MAX_PADDING: i32 = 2;

    let value = f32::from_bits(bits);
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-Inf" } else { "+Inf" }.to_string();
    }

    let mut out = String::new();
    if value.is_sign_negative() {
        out.push('-');
    }
    if value == 0.0 {
        out.push('0');
        return out;
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value.abs());
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let mut digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let mut exp = exponent - (digits.len() as i32 - 1);
    while digits.len() > 1 && digits.ends_with('0') {
        digits.pop();
        exp += 1;
    }
    let n = digits.len() as i32;

    let scientific = if exp >= 0 {
        exp > MAX_PADDING || n + exp > PRECISION
    } else {
        let msd = exp + n - 1;
        msd < 0 && -msd > MAX_PADDING
    };

    if scientific {
        let e = exp + n - 1;
        out.push_str(&digits[..1]);
        out.push('.');
        if n == 1 {
            out.push('0');
        } else {
            out.push_str(&digits[1..]);
        }
        out.push('E');
        out.push(if e >= 0 { '+' } else { '-' });
        out.push_str(&e.abs().to_string());
    } else if exp >= 0 {
        out.push_str(&digits);
        out.push_str(&"0".repeat(exp as usize));
    } else {
        let whole = exp + n;
        if whole > 0 {
            out.push_str(&digits[..whole as usize]);
            out.push('.');
            out.push_str(&digits[whole as usize..]);
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat((-whole) as usize));
            out.push_str(&digits);
        }
    }
    out
}
