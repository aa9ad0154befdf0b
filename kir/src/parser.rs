use std::collections::HashSet;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace0, multispace1, one_of, satisfy},
    combinator::{map, map_res, not, opt, recognize, value as nom_value},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
};

use crate::error::{ParseError, Result};
use crate::ir::*;

type ParseResult<'a, T> = IResult<&'a str, T>;

// Whitespace and comments
fn ws<'a, F, O>(f: F) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: FnMut(&'a str) -> ParseResult<'a, O>,
{
    delimited(multispace0, f, multispace0)
}

fn comment(input: &str) -> ParseResult<'_, &str> {
    preceded(char(';'), take_while(|c| c != '\n'))(input)
}

fn ws_with_comments(input: &str) -> ParseResult<'_, &str> {
    recognize(many0(alt((multispace1, comment))))(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// `kw` not followed by another identifier character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> ParseResult<'a, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

// Identifiers
fn identifier(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(
            alt((tag("_"), take_while1(|c: char| c.is_alphabetic()))),
            take_while(is_ident_char),
        )),
        |s: &str| s.to_string(),
    )(input)
}

fn symbol(input: &str) -> ParseResult<'_, String> {
    map(take_while1(is_ident_char), |s: &str| s.to_string())(input)
}

fn register_name(input: &str) -> ParseResult<'_, String> {
    preceded(char('%'), symbol)(input)
}

fn global_name(input: &str) -> ParseResult<'_, String> {
    preceded(char('@'), symbol)(input)
}

fn label_name(input: &str) -> ParseResult<'_, String> {
    identifier(input)
}

// Types
fn scalar_type(input: &str) -> ParseResult<'_, Type> {
    alt((
        nom_value(Type::Void, keyword("void")),
        nom_value(Type::Int(1), keyword("i1")),
        nom_value(Type::Int(8), keyword("i8")),
        nom_value(Type::Int(16), keyword("i16")),
        nom_value(Type::Int(32), keyword("i32")),
        nom_value(Type::Int(64), keyword("i64")),
        nom_value(Type::Float(16), keyword("f16")),
        nom_value(Type::Float(32), keyword("f32")),
        nom_value(Type::Float(64), keyword("f64")),
    ))(input)
}

fn opaque_type(input: &str) -> ParseResult<'_, OpaqueType> {
    alt((
        nom_value(OpaqueType::Sampler, keyword("sampler_t")),
        nom_value(OpaqueType::Image2DRead, keyword("image2d_ro_t")),
        nom_value(OpaqueType::Image2DWrite, keyword("image2d_wo_t")),
        nom_value(OpaqueType::Image3DRead, keyword("image3d_ro_t")),
        nom_value(OpaqueType::Image3DWrite, keyword("image3d_wo_t")),
    ))(input)
}

fn address_space(input: &str) -> ParseResult<'_, AddressSpace> {
    alt((
        nom_value(AddressSpace::Private, keyword("private")),
        nom_value(AddressSpace::Global, keyword("global")),
        nom_value(AddressSpace::Constant, keyword("constant")),
        nom_value(AddressSpace::Local, keyword("local")),
        nom_value(AddressSpace::Input, keyword("input")),
        nom_value(AddressSpace::UniformConstant, keyword("uniform_constant")),
        nom_value(AddressSpace::Uniform, keyword("uniform")),
        nom_value(AddressSpace::ModulePrivate, keyword("module_private")),
    ))(input)
}

fn pointer_type(input: &str) -> ParseResult<'_, PointerType> {
    map(
        tuple((
            tag("ptr["),
            ws(address_space),
            tag("]<"),
            ws(type_parser),
            char('>'),
        )),
        |(_, space, _, pointee, _)| PointerType {
            address_space: space,
            pointee: Box::new(pointee),
        },
    )(input)
}

fn vector_type(input: &str) -> ParseResult<'_, Type> {
    map(
        delimited(
            char('<'),
            separated_pair(ws(parse_u32_literal), char('x'), ws(type_parser)),
            char('>'),
        ),
        |(n, elem)| Type::Vector(Box::new(elem), n),
    )(input)
}

fn array_type(input: &str) -> ParseResult<'_, Type> {
    map(
        delimited(
            char('['),
            separated_pair(ws(parse_u64_literal), char('x'), ws(type_parser)),
            char(']'),
        ),
        |(n, elem)| Type::Array(Box::new(elem), n),
    )(input)
}

fn struct_type(input: &str) -> ParseResult<'_, Type> {
    map(
        delimited(
            char('{'),
            separated_list0(ws(char(',')), ws(type_parser)),
            ws(char('}')),
        ),
        Type::Struct,
    )(input)
}

fn type_parser(input: &str) -> ParseResult<'_, Type> {
    alt((
        map(pointer_type, |pt| Type::Pointer(Box::new(pt))),
        vector_type,
        array_type,
        struct_type,
        map(opaque_type, Type::Opaque),
        scalar_type,
    ))(input)
}

// Literals
fn parse_u32_literal(input: &str) -> ParseResult<'_, u32> {
    alt((
        map_res(preceded(tag("0x"), hex_digit1), |s: &str| {
            u32::from_str_radix(s, 16)
        }),
        map_res(digit1, |s: &str| s.parse::<u32>()),
    ))(input)
}

fn parse_u64_literal(input: &str) -> ParseResult<'_, u64> {
    alt((
        map_res(preceded(tag("0x"), hex_digit1), |s: &str| {
            u64::from_str_radix(s, 16)
        }),
        map_res(digit1, |s: &str| s.parse::<u64>()),
    ))(input)
}

fn int_width(input: &str) -> ParseResult<'_, u32> {
    preceded(char('i'), map_res(digit1, |s: &str| s.parse::<u32>()))(input)
}

fn float_width(input: &str) -> ParseResult<'_, u32> {
    preceded(char('f'), map_res(digit1, |s: &str| s.parse::<u32>()))(input)
}

fn float_text(input: &str) -> ParseResult<'_, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

/// Narrows an f32 to IEEE half precision, rounding toward zero.
fn f32_to_f16_bits(value: f32) -> u64 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u64;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x7f_ffff;
    let half = if exp == 0xff {
        0x7c00 | if mantissa != 0 { 0x200 } else { 0 }
    } else {
        let e = exp - 127 + 15;
        if e >= 0x1f {
            0x7c00
        } else if e <= 0 {
            if e < -10 {
                0
            } else {
                ((mantissa | 0x80_0000) >> (14 - e)) as u64
            }
        } else {
            ((e as u64) << 10) | (mantissa >> 13) as u64
        }
    };
    sign | half
}

fn float_constant(input: &str) -> ParseResult<'_, Constant> {
    map_res(pair(float_text, float_width), |(text, width)| {
        let bits = match width {
            16 => text.parse::<f32>().map(f32_to_f16_bits),
            32 => text.parse::<f32>().map(|v| v.to_bits() as u64),
            64 => text.parse::<f64>().map(f64::to_bits),
            _ => return Err(ParseError::InvalidLiteral(format!("{}f{}", text, width))),
        };
        bits.map(|bits| Constant::Float { width, bits })
            .map_err(|e| ParseError::InvalidLiteral(e.to_string()))
    })(input)
}

fn int_constant(input: &str) -> ParseResult<'_, Constant> {
    alt((
        map(
            pair(preceded(tag("0x"), map_res(hex_digit1, |s: &str| u64::from_str_radix(s, 16))), int_width),
            |(value, width)| Constant::int(width, value),
        ),
        map_res(
            pair(recognize(pair(opt(char('-')), digit1)), int_width),
            |(text, width): (&str, u32)| {
                text.parse::<i128>()
                    .map(|v| Constant::int(width, v as u64))
                    .map_err(|e| ParseError::InvalidLiteral(e.to_string()))
            },
        ),
    ))(input)
}

fn constant(input: &str) -> ParseResult<'_, Constant> {
    alt((
        nom_value(Constant::bool(true), keyword("true")),
        nom_value(Constant::bool(false), keyword("false")),
        map(
            preceded(keyword("undef"), delimited(ws(char('(')), type_parser, ws(char(')')))),
            Constant::Undef,
        ),
        map(
            preceded(keyword("null"), delimited(ws(char('(')), type_parser, ws(char(')')))),
            |ty| Constant::null_value(&ty),
        ),
        map(
            tuple((
                preceded(keyword("agg"), delimited(ws(char('(')), type_parser, ws(char(')')))),
                delimited(
                    ws(char('[')),
                    separated_list0(ws(char(',')), ws(constant)),
                    ws(char(']')),
                ),
            )),
            |(ty, elements)| Constant::aggregate(ty, elements),
        ),
        int_constant,
        float_constant,
    ))(input)
}

// Values
fn parse_value(input: &str) -> ParseResult<'_, Value> {
    alt((
        map(register_name, Value::Register),
        map(global_name, Value::Global),
        map(constant, Value::Constant),
    ))(input)
}

fn comma_value(input: &str) -> ParseResult<'_, Value> {
    preceded(ws(char(',')), ws(parse_value))(input)
}

fn literal_index_list(input: &str) -> ParseResult<'_, Vec<u32>> {
    delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), ws(parse_u32_literal)),
        ws(char(']')),
    )(input)
}

// Opcode keywords
fn binary_opcode(input: &str) -> ParseResult<'_, BinaryOp> {
    alt((
        nom_value(BinaryOp::Add, keyword("add")),
        nom_value(BinaryOp::Sub, keyword("sub")),
        nom_value(BinaryOp::Mul, keyword("mul")),
        nom_value(BinaryOp::UDiv, keyword("udiv")),
        nom_value(BinaryOp::SDiv, keyword("sdiv")),
        nom_value(BinaryOp::URem, keyword("urem")),
        nom_value(BinaryOp::SRem, keyword("srem")),
        nom_value(BinaryOp::Shl, keyword("shl")),
        nom_value(BinaryOp::LShr, keyword("lshr")),
        nom_value(BinaryOp::AShr, keyword("ashr")),
        nom_value(BinaryOp::And, keyword("and")),
        nom_value(BinaryOp::Or, keyword("or")),
        nom_value(BinaryOp::Xor, keyword("xor")),
        nom_value(BinaryOp::FAdd, keyword("fadd")),
        nom_value(BinaryOp::FSub, keyword("fsub")),
        nom_value(BinaryOp::FMul, keyword("fmul")),
        nom_value(BinaryOp::FDiv, keyword("fdiv")),
        nom_value(BinaryOp::FRem, keyword("frem")),
    ))(input)
}

fn int_predicate(input: &str) -> ParseResult<'_, IntPredicate> {
    alt((
        nom_value(IntPredicate::Eq, keyword("eq")),
        nom_value(IntPredicate::Ne, keyword("ne")),
        nom_value(IntPredicate::Ugt, keyword("ugt")),
        nom_value(IntPredicate::Uge, keyword("uge")),
        nom_value(IntPredicate::Ult, keyword("ult")),
        nom_value(IntPredicate::Ule, keyword("ule")),
        nom_value(IntPredicate::Sgt, keyword("sgt")),
        nom_value(IntPredicate::Sge, keyword("sge")),
        nom_value(IntPredicate::Slt, keyword("slt")),
        nom_value(IntPredicate::Sle, keyword("sle")),
    ))(input)
}

fn float_predicate(input: &str) -> ParseResult<'_, FloatPredicate> {
    alt((
        nom_value(FloatPredicate::Oeq, keyword("oeq")),
        nom_value(FloatPredicate::Ogt, keyword("ogt")),
        nom_value(FloatPredicate::Oge, keyword("oge")),
        nom_value(FloatPredicate::Olt, keyword("olt")),
        nom_value(FloatPredicate::Ole, keyword("ole")),
        nom_value(FloatPredicate::One, keyword("one")),
        nom_value(FloatPredicate::Ueq, keyword("ueq")),
        nom_value(FloatPredicate::Ugt, keyword("ugt")),
        nom_value(FloatPredicate::Uge, keyword("uge")),
        nom_value(FloatPredicate::Ult, keyword("ult")),
        nom_value(FloatPredicate::Ule, keyword("ule")),
        nom_value(FloatPredicate::Une, keyword("une")),
    ))(input)
}

fn cast_opcode(input: &str) -> ParseResult<'_, CastOp> {
    alt((
        nom_value(CastOp::Trunc, keyword("trunc")),
        nom_value(CastOp::ZExt, keyword("zext")),
        nom_value(CastOp::SExt, keyword("sext")),
        nom_value(CastOp::FpToUi, keyword("fptoui")),
        nom_value(CastOp::FpToSi, keyword("fptosi")),
        nom_value(CastOp::UiToFp, keyword("uitofp")),
        nom_value(CastOp::SiToFp, keyword("sitofp")),
        nom_value(CastOp::FpTrunc, keyword("fptrunc")),
        nom_value(CastOp::FpExt, keyword("fpext")),
        nom_value(CastOp::Bitcast, keyword("bitcast")),
    ))(input)
}

fn atomic_opcode(input: &str) -> ParseResult<'_, AtomicOp> {
    alt((
        nom_value(AtomicOp::Add, keyword("add")),
        nom_value(AtomicOp::Sub, keyword("sub")),
        nom_value(AtomicOp::Xchg, keyword("xchg")),
        nom_value(AtomicOp::Min, keyword("min")),
        nom_value(AtomicOp::Max, keyword("max")),
        nom_value(AtomicOp::UMin, keyword("umin")),
        nom_value(AtomicOp::UMax, keyword("umax")),
        nom_value(AtomicOp::And, keyword("and")),
        nom_value(AtomicOp::Or, keyword("or")),
        nom_value(AtomicOp::Xor, keyword("xor")),
    ))(input)
}

// Operations: every form is `mnemonic T operands`, returning the result type too.
type TypedOp = (Type, Operation);

fn arithmetic_ops(input: &str) -> ParseResult<'_, TypedOp> {
    alt((
        map(
            tuple((binary_opcode, ws(type_parser), ws(parse_value), comma_value)),
            |(op, ty, a, b)| (ty, Operation::Binary(op, a, b)),
        ),
        map(
            tuple((
                preceded(tag("icmp."), int_predicate),
                ws(type_parser),
                ws(parse_value),
                comma_value,
            )),
            |(pred, ty, a, b)| (ty, Operation::ICmp(pred, a, b)),
        ),
        map(
            tuple((
                preceded(tag("fcmp."), float_predicate),
                ws(type_parser),
                ws(parse_value),
                comma_value,
            )),
            |(pred, ty, a, b)| (ty, Operation::FCmp(pred, a, b)),
        ),
        map(
            tuple((cast_opcode, ws(type_parser), ws(parse_value))),
            |(op, ty, v)| (ty, Operation::Cast(op, v)),
        ),
        map(
            tuple((
                keyword("select"),
                ws(type_parser),
                ws(parse_value),
                comma_value,
                comma_value,
            )),
            |(_, ty, c, t, f)| (ty, Operation::Select(c, t, f)),
        ),
    ))(input)
}

fn memory_ops(input: &str) -> ParseResult<'_, TypedOp> {
    alt((
        map(preceded(keyword("alloca"), ws(type_parser)), |ty| {
            (ty, Operation::Alloca)
        }),
        map(
            tuple((keyword("load"), ws(type_parser), ws(parse_value))),
            |(_, ty, ptr)| (ty, Operation::Load(ptr)),
        ),
        map(
            tuple((keyword("store"), ws(parse_value), comma_value)),
            |(_, value, ptr)| (Type::Void, Operation::Store { value, ptr }),
        ),
        map(
            tuple((
                keyword("gep"),
                ws(type_parser),
                ws(parse_value),
                many0(comma_value),
            )),
            |(_, ty, base, indices)| (ty, Operation::Gep { base, indices }),
        ),
        map(
            tuple((
                preceded(tag("atomicrmw."), atomic_opcode),
                ws(type_parser),
                ws(parse_value),
                comma_value,
            )),
            |(op, ty, ptr, value)| (ty, Operation::AtomicRmw { op, ptr, value }),
        ),
    ))(input)
}

fn shuffle_mask(input: &str) -> ParseResult<'_, Vec<Option<u32>>> {
    delimited(
        ws(char('[')),
        separated_list0(
            ws(char(',')),
            ws(alt((
                nom_value(None, keyword("undef")),
                map(parse_u32_literal, Some),
            ))),
        ),
        ws(char(']')),
    )(input)
}

fn aggregate_ops(input: &str) -> ParseResult<'_, TypedOp> {
    alt((
        map(
            tuple((
                keyword("extractelement"),
                ws(type_parser),
                ws(parse_value),
                comma_value,
            )),
            |(_, ty, vector, index)| (ty, Operation::ExtractElement { vector, index }),
        ),
        map(
            tuple((
                keyword("insertelement"),
                ws(type_parser),
                ws(parse_value),
                comma_value,
                comma_value,
            )),
            |(_, ty, vector, element, index)| {
                (
                    ty,
                    Operation::InsertElement {
                        vector,
                        element,
                        index,
                    },
                )
            },
        ),
        map(
            tuple((
                keyword("shufflevector"),
                ws(type_parser),
                ws(parse_value),
                comma_value,
                preceded(ws(char(',')), shuffle_mask),
            )),
            |(_, ty, lhs, rhs, mask)| (ty, Operation::ShuffleVector { lhs, rhs, mask }),
        ),
        map(
            tuple((
                keyword("extractvalue"),
                ws(type_parser),
                ws(parse_value),
                preceded(ws(char(',')), literal_index_list),
            )),
            |(_, ty, aggregate, indices)| (ty, Operation::ExtractValue { aggregate, indices }),
        ),
        map(
            tuple((
                keyword("insertvalue"),
                ws(type_parser),
                ws(parse_value),
                comma_value,
                preceded(ws(char(',')), literal_index_list),
            )),
            |(_, ty, aggregate, element, indices)| {
                (
                    ty,
                    Operation::InsertValue {
                        aggregate,
                        element,
                        indices,
                    },
                )
            },
        ),
    ))(input)
}

fn call_op(input: &str) -> ParseResult<'_, TypedOp> {
    map(
        tuple((
            keyword("call"),
            ws(type_parser),
            ws(global_name),
            delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), ws(parse_value)),
                ws(char(')')),
            ),
        )),
        |(_, ty, func, args)| (ty, Operation::Call { func, args }),
    )(input)
}

fn parse_phi(input: &str) -> ParseResult<'_, TypedOp> {
    map(
        tuple((
            keyword("phi"),
            ws(type_parser),
            separated_list1(
                ws(char(',')),
                delimited(
                    ws(char('[')),
                    separated_pair(ws(parse_value), ws(char(',')), ws(label_name)),
                    ws(char(']')),
                ),
            ),
        )),
        |(_, ty, incoming)| (ty, Operation::Phi { incoming }),
    )(input)
}

fn operation(input: &str) -> ParseResult<'_, TypedOp> {
    alt((arithmetic_ops, memory_ops, aggregate_ops, call_op, parse_phi))(input)
}

// Instructions
fn instruction(input: &str) -> ParseResult<'_, Instruction> {
    map(
        tuple((opt(terminated(register_name, ws(char('=')))), ws(operation))),
        |(result, (ty, op))| Instruction { result, ty, op },
    )(input)
}

// Terminators
fn terminator(input: &str) -> ParseResult<'_, Terminator> {
    alt((
        map(
            tuple((
                keyword("br_if"),
                ws(parse_value),
                preceded(ws(char(',')), ws(label_name)),
                preceded(ws(char(',')), ws(label_name)),
            )),
            |(_, cond, true_label, false_label)| Terminator::BrIf {
                cond,
                true_label,
                false_label,
            },
        ),
        map(preceded(keyword("br"), ws(label_name)), Terminator::Br),
        map(preceded(keyword("ret"), opt(ws(parse_value))), Terminator::Ret),
    ))(input)
}

// Basic blocks
fn basic_block(input: &str) -> ParseResult<'_, BasicBlock> {
    map(
        tuple((
            terminated(ws(label_name), ws(char(':'))),
            many0(preceded(
                opt(ws_with_comments),
                terminated(instruction, opt(ws_with_comments)),
            )),
            preceded(opt(ws_with_comments), ws(terminator)),
        )),
        |(label, instructions, terminator)| BasicBlock {
            label,
            instructions,
            terminator,
        },
    )(input)
}

// Function attributes
fn function_attr(input: &str) -> ParseResult<'_, FunctionAttr> {
    alt((
        nom_value(FunctionAttr::Kernel, keyword("kernel")),
        nom_value(FunctionAttr::Inline, keyword("inline")),
        nom_value(FunctionAttr::NoInline, keyword("noinline")),
        nom_value(FunctionAttr::ReadOnly, keyword("readonly")),
        nom_value(FunctionAttr::ReadNone, keyword("readnone")),
        map(
            preceded(
                keyword("reqd_work_group_size"),
                delimited(
                    ws(char('(')),
                    tuple((
                        ws(parse_u32_literal),
                        preceded(ws(char(',')), ws(parse_u32_literal)),
                        preceded(ws(char(',')), ws(parse_u32_literal)),
                    )),
                    ws(char(')')),
                ),
            ),
            |(x, y, z)| FunctionAttr::ReqdWorkGroupSize(x, y, z),
        ),
    ))(input)
}

// Parameters
fn param(input: &str) -> ParseResult<'_, Param> {
    map(
        separated_pair(register_name, ws(char(':')), ws(type_parser)),
        |(name, ty)| Param { name, ty },
    )(input)
}

fn param_list(input: &str) -> ParseResult<'_, Vec<Param>> {
    separated_list0(ws(char(',')), ws(param))(input)
}

// Kernel argument map
fn parse_i32_literal(input: &str) -> ParseResult<'_, i32> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| s.parse::<i32>())(input)
}

/// `(name, old_index, new_index, offset, kind, spec_id)`
fn arg_mapping(input: &str) -> ParseResult<'_, ArgMapping> {
    map(
        delimited(
            ws(char('(')),
            tuple((
                ws(symbol),
                preceded(ws(char(',')), ws(parse_u32_literal)),
                preceded(ws(char(',')), ws(parse_u32_literal)),
                preceded(ws(char(',')), ws(parse_u32_literal)),
                preceded(ws(char(',')), ws(identifier)),
                preceded(ws(char(',')), ws(parse_i32_literal)),
            )),
            ws(char(')')),
        ),
        |(name, old_index, new_index, offset, kind, spec_id)| ArgMapping {
            name,
            old_index,
            new_index,
            offset,
            kind,
            spec_id,
        },
    )(input)
}

fn kernel_arg_map(input: &str) -> ParseResult<'_, Vec<ArgMapping>> {
    preceded(
        keyword("kernel_arg_map"),
        delimited(
            ws(char('[')),
            separated_list0(ws(char(',')), arg_mapping),
            ws(char(']')),
        ),
    )(input)
}

// Function
fn function(input: &str) -> ParseResult<'_, Function> {
    map(
        tuple((
            keyword("func"),
            many0(ws(function_attr)),
            ws(global_name),
            delimited(ws(char('(')), param_list, ws(char(')'))),
            preceded(ws(tag("->")), ws(type_parser)),
            opt(ws(kernel_arg_map)),
            delimited(
                ws(char('{')),
                many0(preceded(opt(ws_with_comments), basic_block)),
                preceded(opt(ws_with_comments), ws(char('}'))),
            ),
        )),
        |(_, attributes, name, params, return_type, arg_map, blocks)| Function {
            name,
            attributes,
            params,
            return_type,
            arg_map,
            blocks,
        },
    )(input)
}

// Globals
fn global(input: &str) -> ParseResult<'_, Global> {
    map(
        tuple((
            keyword("global"),
            ws(global_name),
            preceded(ws(char(':')), ws(pointer_type)),
            opt(preceded(ws(char('=')), ws(constant))),
        )),
        |(_, name, ty, initializer)| Global {
            name,
            ty,
            initializer,
        },
    )(input)
}

// Module
pub fn module(input: &str) -> ParseResult<'_, Module> {
    map(
        preceded(
            opt(ws_with_comments),
            many0(preceded(
                opt(ws_with_comments),
                alt((
                    map(global, |g| (Some(g), None)),
                    map(function, |f| (None, Some(f))),
                )),
            )),
        ),
        |items| {
            let mut globals = Vec::new();
            let mut functions = Vec::new();
            for (g, f) in items {
                if let Some(g) = g {
                    globals.push(g);
                }
                if let Some(f) = f {
                    functions.push(f);
                }
            }
            Module { globals, functions }
        },
    )(input)
}

fn check_function(func: &Function) -> Result<()> {
    let mut labels = HashSet::new();
    for block in &func.blocks {
        if !labels.insert(block.label.as_str()) {
            return Err(ParseError::DuplicateLabel(block.label.clone(), func.name.clone()));
        }
    }
    Ok(())
}

fn check_module(module: &Module) -> Result<()> {
    let mut names = HashSet::new();
    for name in module
        .globals
        .iter()
        .map(|g| &g.name)
        .chain(module.functions.iter().map(|f| &f.name))
    {
        if !names.insert(name.as_str()) {
            return Err(ParseError::DuplicateDefinition(format!("@{}", name)));
        }
    }
    module.functions.iter().try_for_each(check_function)
}

fn leftover_error(what: &str, leftover: &str) -> ParseError {
    let mut end = 100.min(leftover.len());
    while !leftover.is_char_boundary(end) {
        end -= 1;
    }
    ParseError::NomError(format!(
        "Unexpected content after parsing {}. Remaining input ({} bytes): {:?}...",
        what,
        leftover.len(),
        &leftover[..end]
    ))
}

// Public API
pub fn parse_module(input: &str) -> Result<Module> {
    match module(input) {
        Ok((remaining, module)) => {
            // Only whitespace and comments may follow
            let (leftover, _) = opt(ws_with_comments)(remaining).unwrap_or((remaining, None));
            if !leftover.is_empty() {
                return Err(leftover_error("module", leftover));
            }
            check_module(&module)?;
            Ok(module)
        }
        Err(e) => Err(ParseError::NomError(e.to_string())),
    }
}

pub fn parse_function(input: &str) -> Result<Function> {
    match preceded(opt(ws_with_comments), function)(input) {
        Ok((remaining, func)) => {
            let (leftover, _) = opt(ws_with_comments)(remaining).unwrap_or((remaining, None));
            if !leftover.is_empty() {
                return Err(leftover_error("function", leftover));
            }
            check_function(&func)?;
            Ok(func)
        }
        Err(e) => Err(ParseError::NomError(e.to_string())),
    }
}

/// Parses a standalone type, e.g. `ptr[global]<{ i32, <4 x f32> }>`.
pub fn parse_type(input: &str) -> Result<Type> {
    match ws(type_parser)(input) {
        Ok(("", ty)) => Ok(ty),
        Ok((rest, _)) => Err(ParseError::InvalidType(rest.to_string())),
        Err(e) => Err(ParseError::InvalidType(e.to_string())),
    }
}
