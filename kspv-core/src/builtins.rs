//! Name tables for builtin calls and builtin variables.
//!
//! Lookups walk an ordered table and the first matching entry wins, so the
//! order of entries below is significant.

use spirv::{BuiltIn, GLOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact(&'static str),
    Prefix(&'static str),
}

impl NameMatch {
    pub fn matches(self, name: &str) -> bool {
        match self {
            NameMatch::Exact(s) => name == s,
            NameMatch::Prefix(p) => name.starts_with(p),
        }
    }
}

use NameMatch::{Exact, Prefix};

/// Calls lowered to a single GLSL.std.450 instruction.
static DIRECT_EXT_INSTS: &[(NameMatch, GLOp)] = &[
    (Exact("_Z3absi"), GLOp::SAbs),
    (Exact("_Z3absDv2_i"), GLOp::SAbs),
    (Exact("_Z3absDv3_i"), GLOp::SAbs),
    (Exact("_Z3absDv4_i"), GLOp::SAbs),
    (Exact("_Z5clampiii"), GLOp::SClamp),
    (Exact("_Z5clampDv2_iS_S_"), GLOp::SClamp),
    (Exact("_Z5clampDv3_iS_S_"), GLOp::SClamp),
    (Exact("_Z5clampDv4_iS_S_"), GLOp::SClamp),
    (Exact("_Z5clampjjj"), GLOp::UClamp),
    (Exact("_Z5clampDv2_jS_S_"), GLOp::UClamp),
    (Exact("_Z5clampDv3_jS_S_"), GLOp::UClamp),
    (Exact("_Z5clampDv4_jS_S_"), GLOp::UClamp),
    (Exact("_Z5clampfff"), GLOp::FClamp),
    (Exact("_Z5clampDv2_fS_S_"), GLOp::FClamp),
    (Exact("_Z5clampDv3_fS_S_"), GLOp::FClamp),
    (Exact("_Z5clampDv4_fS_S_"), GLOp::FClamp),
    (Exact("_Z3maxii"), GLOp::SMax),
    (Exact("_Z3maxDv2_iS_"), GLOp::SMax),
    (Exact("_Z3maxDv3_iS_"), GLOp::SMax),
    (Exact("_Z3maxDv4_iS_"), GLOp::SMax),
    (Exact("_Z3maxjj"), GLOp::UMax),
    (Exact("_Z3maxDv2_jS_"), GLOp::UMax),
    (Exact("_Z3maxDv3_jS_"), GLOp::UMax),
    (Exact("_Z3maxDv4_jS_"), GLOp::UMax),
    (Exact("_Z3maxff"), GLOp::FMax),
    (Exact("_Z3maxDv2_fS_"), GLOp::FMax),
    (Exact("_Z3maxDv3_fS_"), GLOp::FMax),
    (Exact("_Z3maxDv4_fS_"), GLOp::FMax),
    (Prefix("_Z4fmax"), GLOp::FMax),
    (Exact("_Z3minii"), GLOp::SMin),
    (Exact("_Z3minDv2_iS_"), GLOp::SMin),
    (Exact("_Z3minDv3_iS_"), GLOp::SMin),
    (Exact("_Z3minDv4_iS_"), GLOp::SMin),
    (Exact("_Z3minjj"), GLOp::UMin),
    (Exact("_Z3minDv2_jS_"), GLOp::UMin),
    (Exact("_Z3minDv3_jS_"), GLOp::UMin),
    (Exact("_Z3minDv4_jS_"), GLOp::UMin),
    (Exact("_Z3minff"), GLOp::FMin),
    (Exact("_Z3minDv2_fS_"), GLOp::FMin),
    (Exact("_Z3minDv3_fS_"), GLOp::FMin),
    (Exact("_Z3minDv4_fS_"), GLOp::FMin),
    (Prefix("_Z4fmin"), GLOp::FMin),
    (Prefix("_Z7degrees"), GLOp::Degrees),
    (Prefix("_Z7radians"), GLOp::Radians),
    (Prefix("_Z3mix"), GLOp::FMix),
    (Prefix("_Z4acos"), GLOp::Acos),
    (Prefix("_Z5acosh"), GLOp::Acosh),
    (Prefix("_Z4asin"), GLOp::Asin),
    (Prefix("_Z5asinh"), GLOp::Asinh),
    (Prefix("_Z4atan"), GLOp::Atan),
    (Prefix("_Z5atan2"), GLOp::Atan2),
    (Prefix("_Z5atanh"), GLOp::Atanh),
    (Prefix("_Z4ceil"), GLOp::Ceil),
    (Prefix("_Z3sin"), GLOp::Sin),
    (Prefix("_Z4sinh"), GLOp::Sinh),
    (Prefix("_Z8half_sin"), GLOp::Sin),
    (Prefix("_Z10native_sin"), GLOp::Sin),
    (Prefix("_Z3cos"), GLOp::Cos),
    (Prefix("_Z4cosh"), GLOp::Cosh),
    (Prefix("_Z8half_cos"), GLOp::Cos),
    (Prefix("_Z10native_cos"), GLOp::Cos),
    (Prefix("_Z3tan"), GLOp::Tan),
    (Prefix("_Z4tanh"), GLOp::Tanh),
    (Prefix("_Z8half_tan"), GLOp::Tan),
    (Prefix("_Z10native_tan"), GLOp::Tan),
    (Prefix("_Z3exp"), GLOp::Exp),
    (Prefix("_Z8half_exp"), GLOp::Exp),
    (Prefix("_Z10native_exp"), GLOp::Exp),
    (Prefix("_Z4exp2"), GLOp::Exp2),
    (Prefix("_Z9half_exp2"), GLOp::Exp2),
    (Prefix("_Z11native_exp2"), GLOp::Exp2),
    (Prefix("_Z3log"), GLOp::Log),
    (Prefix("_Z8half_log"), GLOp::Log),
    (Prefix("_Z10native_log"), GLOp::Log),
    (Prefix("_Z4log2"), GLOp::Log2),
    (Prefix("_Z9half_log2"), GLOp::Log2),
    (Prefix("_Z11native_log2"), GLOp::Log2),
    (Prefix("_Z4fabs"), GLOp::FAbs),
    (Prefix("_Z5floor"), GLOp::Floor),
    (Prefix("_Z5ldexp"), GLOp::Ldexp),
    (Prefix("_Z3pow"), GLOp::Pow),
    (Prefix("_Z4powr"), GLOp::Pow),
    (Prefix("_Z9half_powr"), GLOp::Pow),
    (Prefix("_Z11native_powr"), GLOp::Pow),
    (Prefix("_Z5round"), GLOp::Round),
    (Prefix("_Z4sqrt"), GLOp::Sqrt),
    (Prefix("_Z9half_sqrt"), GLOp::Sqrt),
    (Prefix("_Z11native_sqrt"), GLOp::Sqrt),
    (Prefix("_Z5rsqrt"), GLOp::InverseSqrt),
    (Prefix("_Z10half_rsqrt"), GLOp::InverseSqrt),
    (Prefix("_Z12native_rsqrt"), GLOp::InverseSqrt),
    (Prefix("_Z5trunc"), GLOp::Trunc),
    (Prefix("_Z5frexp"), GLOp::Frexp),
    (Prefix("_Z4sign"), GLOp::FSign),
    (Prefix("_Z6length"), GLOp::Length),
    (Prefix("_Z8distance"), GLOp::Distance),
    (Prefix("_Z4step"), GLOp::Step),
    (Exact("_Z5crossDv3_fS_"), GLOp::Cross),
    (Prefix("_Z9normalize"), GLOp::Normalize),
    (Prefix("llvm.fmuladd."), GLOp::Fma),
    (Exact("spirv.unpack.v2f16"), GLOp::UnpackHalf2x16),
    (Exact("spirv.pack.v2f16"), GLOp::PackHalf2x16),
    (Exact("clspv.fract.f"), GLOp::Fract),
    (Exact("clspv.fract.v2f"), GLOp::Fract),
    (Exact("clspv.fract.v3f"), GLOp::Fract),
    (Exact("clspv.fract.v4f"), GLOp::Fract),
];

/// Calls lowered to an extended instruction followed by one fix-up
/// instruction on its result.
static INDIRECT_EXT_INSTS: &[(NameMatch, GLOp)] = &[
    (Prefix("_Z3clz"), GLOp::FindUMsb),
    (Exact("_Z6acospif"), GLOp::Acos),
    (Exact("_Z6acospiDv2_f"), GLOp::Acos),
    (Exact("_Z6acospiDv3_f"), GLOp::Acos),
    (Exact("_Z6acospiDv4_f"), GLOp::Acos),
    (Exact("_Z6asinpif"), GLOp::Asin),
    (Exact("_Z6asinpiDv2_f"), GLOp::Asin),
    (Exact("_Z6asinpiDv3_f"), GLOp::Asin),
    (Exact("_Z6asinpiDv4_f"), GLOp::Asin),
    (Exact("_Z7atan2piff"), GLOp::Atan2),
    (Exact("_Z7atan2piDv2_fS_"), GLOp::Atan2),
    (Exact("_Z7atan2piDv3_fS_"), GLOp::Atan2),
    (Exact("_Z7atan2piDv4_fS_"), GLOp::Atan2),
];

fn lookup(table: &[(NameMatch, GLOp)], name: &str) -> Option<GLOp> {
    table
        .iter()
        .find(|(matcher, _)| matcher.matches(name))
        .map(|(_, op)| *op)
}

pub fn direct_ext_inst(name: &str) -> Option<GLOp> {
    lookup(DIRECT_EXT_INSTS, name)
}

pub fn indirect_ext_inst(name: &str) -> Option<GLOp> {
    lookup(INDIRECT_EXT_INSTS, name)
}

/// Direct table first, then the indirect one.
pub fn ext_inst(name: &str) -> Option<GLOp> {
    direct_ext_inst(name).or_else(|| indirect_ext_inst(name))
}

/// The constant an indirect extended instruction's result is combined with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndirectFixup {
    /// `31 - result`
    SubtractFrom(u32),
    /// `result * factor`
    MultiplyBy(f32),
}

pub fn indirect_fixup(op: GLOp) -> Option<IndirectFixup> {
    match op {
        GLOp::FindUMsb => Some(IndirectFixup::SubtractFrom(31)),
        GLOp::Acos | GLOp::Asin | GLOp::Atan2 => {
            Some(IndirectFixup::MultiplyBy(std::f32::consts::FRAC_1_PI))
        }
        _ => None,
    }
}

pub const SAMPLER_INITIALIZER: &str = "__translate_sampler_initializer";
pub const COMPOSITE_CONSTRUCT_PREFIX: &str = "clspv.composite_construct.";

pub const READ_IMAGEF_2D: &str = "_Z11read_imagef14ocl_image2d_ro11ocl_samplerDv2_f";
pub const READ_IMAGEF_3D: &str = "_Z11read_imagef14ocl_image3d_ro11ocl_samplerDv4_f";
pub const WRITE_IMAGEF_2D: &str = "_Z12write_imagef14ocl_image2d_woDv2_iDv4_f";
pub const WRITE_IMAGEF_3D: &str = "_Z12write_imagef14ocl_image3d_woDv4_iDv4_f";

pub fn is_read_imagef(name: &str) -> bool {
    name == READ_IMAGEF_2D || name == READ_IMAGEF_3D
}

pub fn is_write_imagef(name: &str) -> bool {
    name == WRITE_IMAGEF_2D || name == WRITE_IMAGEF_3D
}

/// Image size queries; each needs the `<2 x i32>` size vector type.
pub static IMAGE_QUERIES: &[&str] = &[
    "_Z15get_image_width14ocl_image2d_ro",
    "_Z15get_image_width14ocl_image2d_wo",
    "_Z16get_image_height14ocl_image2d_ro",
    "_Z16get_image_height14ocl_image2d_wo",
];

pub fn is_image_query(name: &str) -> bool {
    IMAGE_QUERIES.contains(&name)
}

/// Component of the size vector an image query extracts.
pub fn image_query_component(name: &str) -> u32 {
    if name.contains("height") {
        1
    } else {
        0
    }
}

pub fn atomic_op(name: &str) -> Option<spirv::Op> {
    use spirv::Op;
    let op = match name {
        "spirv.atomic_add" => Op::AtomicIAdd,
        "spirv.atomic_sub" => Op::AtomicISub,
        "spirv.atomic_exchange" => Op::AtomicExchange,
        "spirv.atomic_inc" => Op::AtomicIIncrement,
        "spirv.atomic_dec" => Op::AtomicIDecrement,
        "spirv.atomic_compare_exchange" => Op::AtomicCompareExchange,
        "spirv.atomic_umin" => Op::AtomicUMin,
        "spirv.atomic_smin" => Op::AtomicSMin,
        "spirv.atomic_umax" => Op::AtomicUMax,
        "spirv.atomic_smax" => Op::AtomicSMax,
        "spirv.atomic_and" => Op::AtomicAnd,
        "spirv.atomic_or" => Op::AtomicOr,
        "spirv.atomic_xor" => Op::AtomicXor,
        _ => return None,
    };
    Some(op)
}

pub fn is_unsigned_abs(name: &str) -> bool {
    matches!(
        name,
        "_Z3absj" | "_Z3absDv2_j" | "_Z3absDv3_j" | "_Z3absDv4_j"
    )
}

/// Relational builtins that map one-to-one onto a core opcode.
pub fn relational_op(name: &str) -> Option<spirv::Op> {
    use spirv::Op;
    let op = match name {
        "__spirv_isinff" | "__spirv_isinfDv2_f" | "__spirv_isinfDv3_f" | "__spirv_isinfDv4_f" => {
            Op::IsInf
        }
        "__spirv_isnanf" | "__spirv_isnanDv2_f" | "__spirv_isnanDv3_f" | "__spirv_isnanDv4_f" => {
            Op::IsNan
        }
        "__spirv_allDv2_i" | "__spirv_allDv3_i" | "__spirv_allDv4_i" => Op::All,
        "__spirv_anyDv2_i" | "__spirv_anyDv3_i" | "__spirv_anyDv4_i" => Op::Any,
        _ => return None,
    };
    Some(op)
}

pub fn is_popcount(name: &str) -> bool {
    matches!(
        name,
        "_Z8popcounti"
            | "_Z8popcountj"
            | "_Z8popcountDv2_i"
            | "_Z8popcountDv3_i"
            | "_Z8popcountDv4_i"
            | "_Z8popcountDv2_j"
            | "_Z8popcountDv3_j"
            | "_Z8popcountDv4_j"
    )
}

/// Builtin variable a global stands for, by name.
pub fn builtin_variable(name: &str) -> Option<BuiltIn> {
    let builtin = match name {
        "__spirv_GlobalInvocationId" => BuiltIn::GlobalInvocationId,
        "__spirv_LocalInvocationId" => BuiltIn::LocalInvocationId,
        "__spirv_WorkgroupSize" => BuiltIn::WorkgroupSize,
        "__spirv_NumWorkgroups" => BuiltIn::NumWorkgroups,
        "__spirv_WorkgroupId" => BuiltIn::WorkgroupId,
        _ => return None,
    };
    Some(builtin)
}

pub const WORKGROUP_SIZE_VARIABLE: &str = "__spirv_WorkgroupSize";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        // `_Z4fmaxff` is not in the exact list but matches the prefix entry.
        assert_eq!(direct_ext_inst("_Z4fmaxff"), Some(GLOp::FMax));
        assert_eq!(direct_ext_inst("_Z3maxjj"), Some(GLOp::UMax));
        assert_eq!(direct_ext_inst("_Z5atan2ff"), Some(GLOp::Atan2));
        assert_eq!(direct_ext_inst("_Z4atanf"), Some(GLOp::Atan));
        assert_eq!(direct_ext_inst("_Z4sinhf"), Some(GLOp::Sinh));
        assert_eq!(direct_ext_inst("_Z4exp2f"), Some(GLOp::Exp2));
    }

    #[test]
    fn test_indirect_only_after_direct() {
        assert_eq!(direct_ext_inst("_Z3clzj"), None);
        assert_eq!(ext_inst("_Z3clzj"), Some(GLOp::FindUMsb));
        assert_eq!(indirect_ext_inst("_Z6acospif"), Some(GLOp::Acos));
        // Only the float spellings need the multiply.
        assert_eq!(indirect_ext_inst("_Z6acospid"), None);
        assert_eq!(
            indirect_fixup(GLOp::FindUMsb),
            Some(IndirectFixup::SubtractFrom(31))
        );
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(ext_inst("my_helper"), None);
        assert_eq!(atomic_op("spirv.atomic_nand"), None);
        assert_eq!(builtin_variable("__spirv_Foo"), None);
        assert!(is_popcount("_Z8popcountDv4_j"));
        assert_eq!(image_query_component("_Z16get_image_height14ocl_image2d_wo"), 1);
    }
}
