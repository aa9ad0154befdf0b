// Type declarations, emitted in discovery order.

use kir::{AddressSpace, Constant, OpaqueType, PointerType, Type};
use spirv::{Decoration, Dim, ImageFormat, Op, Word};

use super::{storage_class, LoweringContext};
use crate::{bail_unsupported, bail_unsupported_at};
use crate::error::Result;
use crate::instruction::{self, Operand};
use crate::layout;
use crate::tables::ValueKey;

impl LoweringContext<'_> {
    fn declare(&mut self, opcode: Op, operands: Vec<Operand>) -> Word {
        let id = self.ids.allocate();
        self.body
            .push(instruction::build_with_result(opcode, id, operands));
        id
    }

    pub(super) fn emit_types(&mut self) -> Result<()> {
        let types: Vec<Type> = self.types.iter().cloned().collect();
        for ty in types {
            // Aliased types overwrite this below.
            self.types.set_id(ty.clone(), self.ids.peek());
            match &ty {
                Type::Pointer(p) => self.emit_pointer_type(&ty, p)?,
                Type::Opaque(opaque) => self.emit_opaque_type(*opaque)?,
                Type::Struct(fields) => self.emit_struct_type(&ty, fields)?,
                Type::Int(1) => {
                    self.declare(Op::TypeBool, vec![]);
                }
                Type::Int(width) => self.emit_int_type(&ty, *width),
                Type::Float(width) => {
                    self.declare(Op::TypeFloat, vec![Operand::LiteralBit32(*width)]);
                }
                Type::Array(elem, len) => self.emit_array_type(&ty, elem, *len)?,
                Type::Vector(elem, lanes) => {
                    if elem.is_int(8) {
                        if *lanes != 4 {
                            bail_unsupported!("Support above i8 vector type: {}", ty);
                        }
                        let id = self.type_id(elem)?;
                        self.types.set_id(ty.clone(), id);
                    } else {
                        let elem = self.type_id(elem)?;
                        self.declare(Op::TypeVector, vec![Operand::IdRef(elem), Operand::LiteralBit32(*lanes)]);
                    }
                }
                Type::Void => {
                    self.declare(Op::TypeVoid, vec![]);
                }
                Type::Function(f) => {
                    let mut operands = vec![Operand::IdRef(self.type_id(&f.return_type)?)];
                    for param in &f.params {
                        let id = match param.pointee_opaque() {
                            Some(opaque) => self.type_id(&Type::Opaque(opaque))?,
                            None => self.type_id(param)?,
                        };
                        operands.push(Operand::IdRef(id));
                    }
                    self.declare(Op::TypeFunction, operands);
                }
            }
        }

        let images: Vec<OpaqueType> = self.image_types.keys().copied().collect();
        for opaque in images {
            let image = self.type_id(&Type::Opaque(opaque))?;
            let id = self.declare(Op::TypeSampledImage, vec![Operand::IdRef(image)]);
            self.image_types.insert(opaque, id);
        }

        let locals: Vec<_> = self.local_args.values().cloned().collect();
        let i32_type = if locals.is_empty() {
            0
        } else {
            self.type_id(&Type::i32())?
        };
        for local in locals {
            let elem = self.type_id(&local.elem_type)?;
            self.body.push(instruction::build_with_result(
                Op::SpecConstant,
                local.array_size_id,
                vec![Operand::IdRef(i32_type), Operand::LiteralBit32(1)],
            ));
            self.body.push(instruction::build_with_result(
                Op::TypeArray,
                local.array_type_id,
                vec![Operand::IdRef(elem), Operand::IdRef(local.array_size_id)],
            ));
            self.body.push(instruction::build_with_result(
                Op::TypePointer,
                local.ptr_array_type_id,
                vec![
                    Operand::LiteralBit32(spirv::StorageClass::Workgroup as u32),
                    Operand::IdRef(local.array_type_id),
                ],
            ));
        }
        Ok(())
    }

    /// Pointers to `constant` and `global` share one declaration. A pointer
    /// that is the type of a buffer argument is also declared as a runtime
    /// array of its pointee.
    fn emit_pointer_type(&mut self, ty: &Type, p: &PointerType) -> Result<()> {
        let mut use_existing = false;
        let mirror_space = match p.address_space {
            AddressSpace::Constant => Some(AddressSpace::Global),
            AddressSpace::Global => Some(AddressSpace::Constant),
            _ => None,
        };
        if let Some(mirror_space) = mirror_space {
            let mirror = Type::pointer(mirror_space, (*p.pointee).clone());
            if let Some(id) = self.types.id(&mirror) {
                self.types.set_id(ty.clone(), id);
                if p.address_space == AddressSpace::Constant {
                    return Ok(());
                }
                use_existing = true;
            }
        }

        let space = p.address_space;
        let mut runtime_array = false;
        let mut has_arg_user = false;
        for (&(fi, pi), arg) in &self.arg_vars {
            if &arg.param_type != ty {
                continue;
            }
            if space != AddressSpace::UniformConstant {
                runtime_array = true;
            }
            let func = &self.module.functions[fi];
            let name = &func.params[pi].name;
            // Anything other than a GEP of a different type reads the
            // argument as a pointer.
            if func.uses_of(name).any(|u| match u.as_instruction() {
                Some(inst) => !inst.op.is_gep() || &inst.ty == ty,
                None => true,
            }) {
                has_arg_user = true;
            }
        }

        if (!runtime_array || has_arg_user) && !use_existing {
            let pointee = self.type_id(&p.pointee)?;
            self.declare(
                Op::TypePointer,
                vec![
                    Operand::LiteralBit32(storage_class(space) as u32),
                    Operand::IdRef(pointee),
                ],
            );
        }

        if runtime_array {
            let pointee = self.type_id(&p.pointee)?;
            let id = self.declare(Op::TypeRuntimeArray, vec![Operand::IdRef(pointee)]);
            self.runtime_array_types.insert(ty.clone(), id);
            let stride = layout::alloc_size(&p.pointee) as u32;
            self.decorate(id, Decoration::ArrayStride, &[stride]);
        }
        Ok(())
    }

    fn emit_opaque_type(&mut self, opaque: OpaqueType) -> Result<()> {
        if opaque == OpaqueType::Sampler {
            self.declare(Op::TypeSampler, vec![]);
            return Ok(());
        }
        let sampled_type = self.type_id(&Type::f32())?;
        let dim = if opaque.is_3d() { Dim::Dim3D } else { Dim::Dim2D };
        let sampled = if opaque.is_read_only_image() { 1 } else { 2 };
        self.declare(
            Op::TypeImage,
            vec![
                Operand::IdRef(sampled_type),
                Operand::LiteralBit32(dim as u32),
                Operand::LiteralBit32(0),
                Operand::LiteralBit32(0),
                Operand::LiteralBit32(0),
                Operand::LiteralBit32(sampled),
                Operand::LiteralBit32(ImageFormat::Unknown as u32),
            ],
        );
        Ok(())
    }

    fn emit_struct_type(&mut self, ty: &Type, fields: &[Type]) -> Result<()> {
        let mut members = Vec::with_capacity(fields.len());
        for field in fields {
            let mut id = self.type_id(field)?;
            if field.as_pointer().is_some()
                && self.arg_vars.values().any(|a| &a.param_type == field)
            {
                if let Some(&runtime_array) = self.runtime_array_types.get(field) {
                    id = runtime_array;
                }
            }
            members.push(Operand::IdRef(id));
        }
        let id = self.declare(Op::TypeStruct, members);

        let offsets = layout::struct_layout(fields).offsets;
        for (member, offset) in offsets.into_iter().enumerate() {
            self.annotations.push(instruction::build(
                Op::MemberDecorate,
                vec![
                    Operand::IdRef(id),
                    Operand::LiteralBit32(member as u32),
                    Operand::LiteralBit32(Decoration::Offset as u32),
                    Operand::LiteralBit32(offset as u32),
                ],
            ));
        }

        let is_arg_body = self.arg_vars.values().any(|arg| {
            self.module
                .global(&arg.global)
                .is_some_and(|g| g.value_type() == ty)
        });
        if is_arg_body {
            self.decorate(id, Decoration::Block, &[]);
        }
        Ok(())
    }

    /// i8 and i32 are one 32-bit type; whichever comes first declares it.
    fn emit_int_type(&mut self, ty: &Type, width: u32) {
        let alias = match width {
            8 => Some(32),
            32 => Some(8),
            _ => None,
        };
        if let Some(alias) = alias {
            let other = Type::Int(alias);
            match self.types.id(&other) {
                Some(existing) => {
                    self.types.set_id(ty.clone(), existing);
                    return;
                }
                None => self.types.set_id(other, self.ids.peek()),
            }
        }
        let width = if width == 8 { 32 } else { width };
        self.declare(Op::TypeInt, vec![Operand::LiteralBit32(width), Operand::LiteralBit32(0)]);
    }

    fn emit_array_type(&mut self, ty: &Type, elem: &Type, len: u64) -> Result<()> {
        let Ok(words) = u32::try_from(len) else {
            bail_unsupported_at!(self.here(), "array length {} of {} exceeds 32 bits", len, ty);
        };
        let i32_type = self.type_id(&Type::i32())?;
        let length = Constant::i32(words);
        let length_id = self.declare(
            Op::Constant,
            vec![Operand::IdRef(i32_type), Operand::LiteralBit32(words)],
        );
        if length == Constant::i32(0) {
            self.i32_zero = Some(length_id);
        }
        self.allocated_constants.insert(length.clone());
        self.values.insert(ValueKey::Constant(length), length_id);
        self.array_stride_types.insert(ty.clone());

        let elem = self.type_id(elem)?;
        self.types.set_id(ty.clone(), self.ids.peek());
        self.declare(Op::TypeArray, vec![Operand::IdRef(elem), Operand::IdRef(length_id)]);
        Ok(())
    }
}
