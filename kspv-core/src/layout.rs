//! Target data layout: little-endian, 32-bit pointers, vectors aligned to
//! their size rounded up to a power of two.

use kir::{Constant, Type};

use crate::bail_unsupported;
use crate::error::Result;

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Bytes needed to store a value, without tail padding.
pub fn store_size(ty: &Type) -> u64 {
    match ty {
        Type::Void | Type::Function(_) | Type::Opaque(_) => 0,
        Type::Int(w) | Type::Float(w) => (*w as u64).div_ceil(8),
        Type::Pointer(_) => 4,
        Type::Vector(elem, n) => (bit_width(elem) * *n as u64).div_ceil(8),
        Type::Array(elem, n) => alloc_size(elem) * n,
        Type::Struct(fields) => struct_layout(fields).size,
    }
}

fn bit_width(ty: &Type) -> u64 {
    match ty {
        Type::Int(w) | Type::Float(w) => *w as u64,
        other => store_size(other) * 8,
    }
}

pub fn align_of(ty: &Type) -> u64 {
    match ty {
        Type::Void | Type::Function(_) | Type::Opaque(_) => 1,
        Type::Int(_) | Type::Float(_) => store_size(ty).max(1).next_power_of_two(),
        Type::Pointer(_) => 4,
        Type::Vector(..) => store_size(ty).max(1).next_power_of_two(),
        Type::Array(elem, _) => align_of(elem),
        Type::Struct(fields) => struct_layout(fields).align,
    }
}

/// Distance between consecutive elements of type `ty` in an array.
pub fn alloc_size(ty: &Type) -> u64 {
    round_up(store_size(ty), align_of(ty))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub offsets: Vec<u64>,
    pub size: u64,
    pub align: u64,
}

pub fn struct_layout(fields: &[Type]) -> StructLayout {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0;
    let mut align = 1;
    for field in fields {
        let field_align = align_of(field);
        offset = round_up(offset, field_align);
        offsets.push(offset);
        offset += alloc_size(field);
        align = align.max(field_align);
    }
    StructLayout {
        offsets,
        size: round_up(offset, align),
        align,
    }
}

/// In-memory image of a constant, `alloc_size` bytes long.
pub fn constant_bytes(constant: &Constant) -> Result<Vec<u8>> {
    let ty = constant.ty();
    let mut bytes = vec![0u8; alloc_size(&ty) as usize];
    write_constant(constant, &ty, &mut bytes)?;
    Ok(bytes)
}

fn write_constant(constant: &Constant, ty: &Type, out: &mut [u8]) -> Result<()> {
    match constant {
        Constant::Undef(_) | Constant::Null(_) => Ok(()),
        Constant::Int { value, .. } => {
            write_le(*value, store_size(ty) as usize, out);
            Ok(())
        }
        Constant::Float { bits, .. } => {
            write_le(*bits, store_size(ty) as usize, out);
            Ok(())
        }
        Constant::Aggregate { elements, .. } => {
            let offsets: Vec<u64> = match ty {
                Type::Struct(fields) => struct_layout(fields).offsets,
                Type::Array(elem, _) => {
                    let stride = alloc_size(elem);
                    (0..elements.len() as u64).map(|i| i * stride).collect()
                }
                Type::Vector(elem, _) if elem.is_bool() => {
                    bail_unsupported!("boolean vector constant of type {} in memory", ty)
                }
                Type::Vector(elem, _) => {
                    let stride = store_size(elem);
                    (0..elements.len() as u64).map(|i| i * stride).collect()
                }
                other => bail_unsupported!("aggregate constant of type {}", other),
            };
            for (element, offset) in elements.iter().zip(offsets) {
                let elem_ty = element.ty();
                let start = (offset as usize).min(out.len());
                let end = (start + alloc_size(&elem_ty) as usize).min(out.len());
                write_constant(element, &elem_ty, &mut out[start..end])?;
            }
            Ok(())
        }
    }
}

fn write_le(value: u64, len: usize, out: &mut [u8]) {
    for (i, byte) in out.iter_mut().take(len.min(8)).enumerate() {
        *byte = (value >> (8 * i)) as u8;
    }
}

/// Lower-case hex rendering used by the descriptor map.
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_is_padded_to_four_lanes() {
        let v3 = Type::vector(Type::f32(), 3);
        assert_eq!(store_size(&v3), 12);
        assert_eq!(alloc_size(&v3), 16);
        assert_eq!(align_of(&v3), 16);
    }

    #[test]
    fn test_struct_offsets() {
        let layout = struct_layout(&[Type::Int(8), Type::i32(), Type::vector(Type::f32(), 2)]);
        assert_eq!(layout.offsets, vec![0, 4, 8]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn test_array_constant_bytes() {
        let ty = Type::Array(Box::new(Type::i32()), 2);
        let c = Constant::aggregate(ty, vec![Constant::i32(1), Constant::i32(0x0a0b0c0d)]);
        let bytes = constant_bytes(&c).unwrap();
        assert_eq!(hex_bytes(&bytes), "010000000d0c0b0a");
    }

    #[test]
    fn test_bool_vector_constant_rejected() {
        let ty = Type::vector(Type::i1(), 8);
        let c = Constant::aggregate(ty, vec![Constant::bool(true); 8]);
        assert!(matches!(
            constant_bytes(&c),
            Err(crate::error::ProducerError::Unsupported(..))
        ));
    }

    #[test]
    fn test_bool_takes_a_byte() {
        assert_eq!(alloc_size(&Type::i1()), 1);
    }
}
