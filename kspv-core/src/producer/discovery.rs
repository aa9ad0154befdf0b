// Discovery: records every type and constant the module needs, in the order
// they receive ids.

use kir::{AddressSpace, BinaryOp, CastOp, Constant, Operation, Terminator, Type, Value};
use log::debug;
use spirv::BuiltIn;

use super::arguments::ArgVarPool;
use super::{LoweringContext, FIRST_LOCAL_SPEC_ID};
use crate::builtins::{
    builtin_variable, direct_ext_inst, indirect_ext_inst, indirect_fixup, is_image_query,
    is_read_imagef, IndirectFixup, SAMPLER_INITIALIZER,
};
use crate::error::Result;
use crate::layout;
use crate::{bail_inconsistent, bail_internal, bail_unsupported};

/// Largest module-scope constant buffer, in bytes.
const MAX_CONSTANT_BUFFER_SIZE: u64 = 65536;

/// Direct subtypes of `ty`, in the order they are discovered.
fn subtypes(ty: &Type) -> Vec<&Type> {
    match ty {
        Type::Pointer(p) => vec![p.pointee.as_ref()],
        Type::Vector(elem, _) | Type::Array(elem, _) => vec![elem.as_ref()],
        Type::Struct(fields) => fields.iter().collect(),
        Type::Function(f) => std::iter::once(&f.return_type)
            .chain(f.params.iter())
            .collect(),
        _ => vec![],
    }
}

fn mentions_image(ty: &Type) -> bool {
    match ty {
        Type::Opaque(o) => o.is_image(),
        other => subtypes(other).into_iter().any(mentions_image),
    }
}

fn module_mentions_images(module: &kir::Module) -> bool {
    module.globals.iter().any(|g| mentions_image(&g.pointer_type()))
        || module.functions.iter().any(|f| {
            mentions_image(&f.return_type)
                || f.params.iter().any(|p| mentions_image(&p.ty))
                || f.instructions().any(|i| mentions_image(&i.ty))
        })
}

fn primitive_bits(ty: &Type) -> u32 {
    match ty {
        Type::Int(w) | Type::Float(w) => *w,
        Type::Vector(elem, n) => primitive_bits(elem) * n,
        _ => 0,
    }
}

fn is_local_pointer(ty: &Type) -> bool {
    ty.address_space() == Some(AddressSpace::Local)
}

/// The (true, false) constants selected between when widening a boolean.
pub(super) fn bool_widening_constants(op: CastOp, ty: &Type) -> Result<(Constant, Constant)> {
    let scalar = ty.scalar_type();
    let (on, off) = match (op, scalar) {
        (CastOp::ZExt, Type::Int(w)) => (Constant::int(*w, 1), Constant::int(*w, 0)),
        (CastOp::SExt, Type::Int(w)) => (Constant::int(*w, u64::MAX), Constant::int(*w, 0)),
        (CastOp::UiToFp, Type::Float(32)) => (Constant::f32(1.0), Constant::f32(0.0)),
        _ => bail_unsupported!("boolean {:?} to {}", op, ty),
    };
    Ok((Constant::splat(ty, on), Constant::splat(ty, off)))
}

impl LoweringContext<'_> {
    /// Hands out specialization ids to pointer-to-local kernel parameters.
    pub(super) fn allocate_spec_ids(&mut self) {
        let mut next = FIRST_LOCAL_SPEC_ID;
        for (fi, func) in self.module.functions.iter().enumerate() {
            if !func.is_kernel() || func.is_declaration() {
                continue;
            }
            for (pi, param) in func.params.iter().enumerate() {
                if is_local_pointer(&param.ty) {
                    self.arg_spec_ids.insert((fi, pi), next);
                    next += 1;
                }
            }
        }
    }

    pub(super) fn find_type(&mut self, ty: &Type) {
        if self.types.contains(ty) {
            return;
        }
        if let Type::Pointer(p) = ty {
            if matches!(p.address_space, AddressSpace::Global | AddressSpace::Constant) {
                if let Some(opaque) = p.pointee.as_opaque() {
                    self.find_type(&Type::Opaque(opaque));
                    self.find_type(&Type::pointer(
                        AddressSpace::UniformConstant,
                        Type::Opaque(opaque),
                    ));
                    return;
                }
            }
        }
        if matches!(ty, Type::Array(..)) {
            self.find_type(&Type::i32());
        }
        for sub in subtypes(ty) {
            self.find_type(sub);
        }
        self.types.insert(ty.clone());
    }

    pub(super) fn find_constant(&mut self, constant: &Constant) {
        if self.constants.contains(constant) {
            return;
        }
        // A packed 4 x i8 vector does not reference its elements, so it
        // takes its id first.
        if constant.ty().is_4xi8() {
            self.constants.insert(constant.clone());
        }
        if let Constant::Aggregate { elements, .. } = constant {
            for element in elements {
                self.find_constant(element);
            }
        }
        self.constants.insert(constant.clone());
    }

    fn find_value_constant(&mut self, value: &Value) {
        if let Some(c) = value.as_constant() {
            self.find_constant(c);
        }
    }

    /// Prepares module-scope constants, then walks kernels and other
    /// functions recording what each one needs.
    pub(super) fn generate_ir_info(&mut self) -> Result<()> {
        self.prepare_module_constants()?;
        self.has_workgroup_builtin = self
            .module
            .globals
            .iter()
            .any(|g| builtin_variable(&g.name) == Some(BuiltIn::WorkgroupSize));
        self.module_has_images = module_mentions_images(&self.module);

        let defined: Vec<usize> = (0..self.module.functions.len())
            .filter(|&fi| !self.module.functions[fi].is_declaration())
            .collect();
        let (kernels, others): (Vec<usize>, Vec<usize>) = defined
            .into_iter()
            .partition(|&fi| self.module.functions[fi].is_kernel());

        let mut pool = ArgVarPool::default();
        for (ordinal, &fi) in kernels.iter().enumerate() {
            self.scan_function_needs(fi)?;
            if self.module_has_images {
                self.find_type(&Type::f32());
            }
            if let Some([x, y, z]) = self.module.functions[fi].reqd_work_group_size() {
                if self.has_workgroup_builtin {
                    self.find_constant(&Constant::i32(x));
                    self.find_constant(&Constant::i32(y));
                    self.find_constant(&Constant::i32(z));
                }
            }
            if self.materialize_kernel_args(fi, ordinal + 1, &mut pool)? {
                self.find_constant(&Constant::i32(0));
                self.find_type(&Type::i32());
            }
            self.find_types_in_function(fi)?;
            self.find_constants_in_function(fi)?;
        }

        for fi in others {
            self.scan_function_needs(fi)?;
            if self.module_has_images {
                self.find_type(&Type::f32());
            }
            self.find_types_in_function(fi)?;
            self.find_constants_in_function(fi)?;
        }
        Ok(())
    }

    /// Drops unused `constant` globals and either checks the single one
    /// allowed in a storage buffer or relocates them to private memory.
    fn prepare_module_constants(&mut self) -> Result<()> {
        let functions = &self.module.functions;
        self.module.globals.retain(|g| {
            g.address_space() != AddressSpace::Constant || global_is_used(functions, &g.name)
        });

        let names: Vec<String> = self
            .module
            .globals
            .iter()
            .filter(|g| g.address_space() == AddressSpace::Constant)
            .map(|g| g.name.clone())
            .collect();

        if self.options.module_constants_in_storage_buffer {
            if names.len() > 1 {
                bail_inconsistent!(
                    "only one module-scope constant buffer is supported, found {}",
                    names.len()
                );
            }
            if let Some(global) = names.first().and_then(|n| self.module.global(n)) {
                let size = global
                    .initializer
                    .as_ref()
                    .map_or(0, |init| layout::store_size(&init.ty()));
                if size > MAX_CONSTANT_BUFFER_SIZE {
                    bail_inconsistent!(
                        "Max __constant capacity of {} bytes exceeded: {} bytes used",
                        MAX_CONSTANT_BUFFER_SIZE,
                        size
                    );
                }
            }
            return Ok(());
        }

        for name in names {
            self.record_global_const_callees(&name);
            if let Some(pos) = self.module.globals.iter().position(|g| g.name == name) {
                let mut global = self.module.globals.remove(pos);
                global.ty.address_space = AddressSpace::ModulePrivate;
                debug!("relocating @{} to module_private", global.name);
                self.module.globals.push(global);
            }
        }
        Ok(())
    }

    /// Records which parameter of each callee receives the global `name`,
    /// either directly or through a GEP of it.
    fn record_global_const_callees(&mut self, name: &str) {
        let mut found = Vec::new();
        for func in &self.module.functions {
            let mut derived: Vec<&str> = Vec::new();
            for inst in func.instructions() {
                if let (Operation::Gep { base, .. }, Some(result)) = (&inst.op, &inst.result) {
                    if base.is_global(name) {
                        derived.push(result.as_str());
                    }
                }
            }
            for inst in func.instructions() {
                let Operation::Call { func: callee, args } = &inst.op else {
                    continue;
                };
                let index = args.iter().rposition(|a| {
                    a.is_global(name) || derived.iter().any(|d| a.is_register(d))
                });
                if let Some(index) = index {
                    found.push((callee.clone(), index));
                }
            }
        }
        self.global_const_args.extend(found);
    }

    /// Globals: builtin variables lose their initializers, and every global
    /// records its pointer type and initializer.
    pub(super) fn discover_globals(&mut self) {
        for gi in 0..self.module.globals.len() {
            if self.module.globals[gi].name.starts_with("__spirv_") {
                self.module.globals[gi].initializer = None;
            }
            let global = self.module.globals[gi].clone();
            self.find_type(&global.pointer_type());
            if let Some(init) = &global.initializer {
                if !init.is_undef() {
                    self.find_constant(init);
                }
            }
            if global.address_space() == AddressSpace::Input {
                self.entry_interfaces.push(global.name.clone());
            }
        }
    }

    /// Constants and types needed by boolean widening casts and image
    /// builtins inside function `fi`.
    fn scan_function_needs(&mut self, fi: usize) -> Result<()> {
        let func = self.module.functions[fi].clone();
        for inst in func.instructions() {
            match &inst.op {
                Operation::Cast(op @ (CastOp::ZExt | CastOp::SExt | CastOp::UiToFp), value) => {
                    if self.value_type(fi, value)?.is_bool_or_bool_vector() {
                        let (on, off) = bool_widening_constants(*op, &inst.ty)?;
                        self.find_constant(&off);
                        self.find_constant(&on);
                    }
                }
                Operation::Call { func: callee, args } => {
                    if is_read_imagef(callee) {
                        let image = match args.first() {
                            Some(image) => self.value_type(fi, image)?,
                            None => bail_internal!("read_imagef without an image operand"),
                        };
                        match image.pointee_opaque().or_else(|| image.as_opaque()) {
                            Some(opaque) => {
                                self.image_types.entry(opaque).or_insert(0);
                            }
                            None => bail_unsupported!("read_imagef from {}", image),
                        }
                        self.find_constant(&Constant::f32(0.0));
                    }
                    if is_image_query(callee) {
                        self.find_type(&Type::vector(Type::i32(), 2));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Function type as it is declared in SPIR-V: kernels take no
    /// parameters, and a parameter receiving a relocated constant points
    /// into module-private memory.
    pub(super) fn signature_type(&self, fi: usize) -> Type {
        let func = &self.module.functions[fi];
        let mut signature = func.function_type();
        if func.is_kernel() {
            signature.params.clear();
        } else if let Some(&index) = self.global_const_args.get(&func.name) {
            if let Some(Type::Pointer(p)) = signature.params.get_mut(index) {
                p.address_space = AddressSpace::ModulePrivate;
            }
        }
        Type::Function(Box::new(signature))
    }

    fn find_types_in_function(&mut self, fi: usize) -> Result<()> {
        let signature = self.signature_type(fi);
        self.find_type(&signature);

        let func = self.module.functions[fi].clone();
        for block in &func.blocks {
            for inst in &block.instructions {
                self.find_instruction_types(fi, inst)?;
            }
            // Terminators have no result, which is void.
            let operands = block.terminator.operands();
            for value in &operands {
                if let Some(c) = value.as_constant() {
                    self.find_type(&c.ty());
                }
            }
            for value in &operands {
                let ty = self.value_type(fi, value)?;
                self.find_type(&ty);
            }
            self.find_type(&Type::Void);
        }
        Ok(())
    }

    fn find_instruction_types(&mut self, fi: usize, inst: &kir::Instruction) -> Result<()> {
        if let Operation::ShuffleVector { lhs, rhs, .. } = &inst.op {
            let lhs = self.value_type(fi, lhs)?;
            let rhs = self.value_type(fi, rhs)?;
            self.find_type(&lhs);
            self.find_type(&rhs);
            self.find_type(&inst.ty);
            return Ok(());
        }

        // The element count of an alloca is an implicit i32 operand.
        if matches!(inst.op, Operation::Alloca) {
            self.find_type(&Type::i32());
        }
        let operands = inst.op.operands();
        for value in &operands {
            if let Some(c) = value.as_constant() {
                self.find_type(&c.ty());
            }
        }
        let is_call = matches!(inst.op, Operation::Call { .. });
        if !is_call {
            for value in &operands {
                let ty = self.value_type(fi, value)?;
                self.find_type(&ty);
            }
        }

        match &inst.op {
            Operation::Call { func, .. } if func == SAMPLER_INITIALIZER => {}
            Operation::Gep { base, .. } => {
                let base_ty = self.value_type(fi, base)?;
                let private_base = base_ty.address_space() == Some(AddressSpace::ModulePrivate)
                    || self.is_global_const_param(fi, base);
                match (private_base, inst.ty.as_pointer()) {
                    (true, Some(p)) => {
                        let ty = Type::pointer(AddressSpace::ModulePrivate, (*p.pointee).clone());
                        self.find_type(&ty);
                    }
                    _ => self.find_type(&inst.ty),
                }
            }
            _ => self.find_type(&inst.ty),
        }
        Ok(())
    }

    fn find_constants_in_function(&mut self, fi: usize) -> Result<()> {
        let func = self.module.functions[fi].clone();
        for block in &func.blocks {
            for inst in &block.instructions {
                self.find_instruction_constants(fi, inst)?;
            }
            if let Terminator::BrIf { cond, .. } | Terminator::Ret(Some(cond)) = &block.terminator
            {
                self.find_value_constant(cond);
            }
        }
        Ok(())
    }

    fn find_lane_shift(&mut self, index: &Value) {
        let shift = match index.as_constant().and_then(Constant::as_int) {
            Some(lane) => (lane as u32) * 8,
            None => 8,
        };
        self.find_constant(&Constant::i32(shift));
    }

    fn find_instruction_constants(&mut self, fi: usize, inst: &kir::Instruction) -> Result<()> {
        match &inst.op {
            Operation::Call { func, .. } if func == SAMPLER_INITIALIZER => return Ok(()),
            Operation::Alloca => return Ok(()),
            Operation::ShuffleVector { lhs, rhs, .. } => {
                self.find_value_constant(lhs);
                self.find_value_constant(rhs);
                return Ok(());
            }
            Operation::InsertElement {
                vector,
                element,
                index,
            } => {
                self.find_value_constant(vector);
                self.find_value_constant(element);
                if self.value_type(fi, vector)?.is_4xi8() {
                    self.find_constant(&Constant::i32(0xFF));
                    self.find_lane_shift(index);
                }
                return Ok(());
            }
            Operation::ExtractElement { vector, index } => {
                self.find_value_constant(vector);
                if self.value_type(fi, vector)?.is_4xi8() {
                    self.find_constant(&Constant::i32(0xFF));
                    self.find_lane_shift(index);
                }
                return Ok(());
            }
            Operation::Binary(BinaryOp::Xor, a, b) if inst.ty.is_bool() => {
                // The first non-zero constant becomes a logical not and
                // needs no id of its own.
                let mut found_true = false;
                for value in [a, b] {
                    if let Some(c) = value.as_constant() {
                        if c.is_null_value() || found_true {
                            self.find_constant(c);
                        } else {
                            found_true = true;
                        }
                    }
                }
                return Ok(());
            }
            Operation::Cast(CastOp::Trunc, _) if primitive_bits(&inst.ty) == 8 => {
                self.find_constant(&Constant::i32(0xff));
            }
            Operation::AtomicRmw { .. } => {
                self.find_constant(&Constant::i32(1));
                self.find_constant(&Constant::i32(0x48));
            }
            _ => {}
        }
        for value in inst.op.operands() {
            self.find_value_constant(value);
        }
        Ok(())
    }

    /// Records constants and types used by extended instructions; returns
    /// true if the extended instruction import is needed.
    pub(super) fn find_ext_inst(&mut self) -> Result<bool> {
        let mut has_ext_inst = false;
        let calls: Vec<(String, Type)> = self
            .module
            .functions
            .iter()
            .flat_map(|f| f.instructions())
            .filter_map(|i| i.op.called_function().map(|name| (name.to_string(), i.ty.clone())))
            .collect();
        for (name, result_ty) in calls {
            let direct = direct_ext_inst(&name);
            let indirect = indirect_ext_inst(&name);
            has_ext_inst |= direct.is_some() || indirect.is_some();
            let Some(op) = indirect else {
                continue;
            };
            let constant = match indirect_fixup(op) {
                Some(IndirectFixup::SubtractFrom(v)) => Constant::i32(v),
                Some(IndirectFixup::MultiplyBy(f)) => Constant::f32(f),
                None => bail_internal!("no fixup for indirect extended instruction {:?}", op),
            };
            self.find_type(&constant.ty());
            self.find_constant(&constant);
            if let Some(lanes) = result_ty.vector_len() {
                let splat = Constant::splat(&Type::vector(constant.ty(), lanes), constant);
                self.find_constant(&splat);
                self.find_type(&splat.ty());
            }
        }
        Ok(has_ext_inst)
    }
}

fn global_is_used(functions: &[kir::Function], name: &str) -> bool {
    functions.iter().any(|f| {
        f.instructions()
            .any(|i| i.op.operands().iter().any(|v| v.is_global(name)))
            || f.blocks
                .iter()
                .any(|b| b.terminator.operands().iter().any(|v| v.is_global(name)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtypes_of_function_put_return_first() {
        let f = Type::Function(Box::new(kir::FunctionType {
            return_type: Type::Int(8),
            params: vec![Type::i32(), Type::f32()],
        }));
        assert_eq!(
            subtypes(&f),
            vec![&Type::Int(8), &Type::i32(), &Type::f32()]
        );
    }

    #[test]
    fn test_bool_widening_constants() {
        let (on, off) = bool_widening_constants(CastOp::SExt, &Type::i32()).unwrap();
        assert_eq!(on, Constant::i32(u32::MAX));
        assert_eq!(off, Constant::i32(0));

        let v4 = Type::vector(Type::f32(), 4);
        let (on, off) = bool_widening_constants(CastOp::UiToFp, &v4).unwrap();
        assert_eq!(on.element(2), Some(Constant::f32(1.0)));
        assert_eq!(off, Constant::Null(v4));
    }

    #[test]
    fn test_images_are_found_through_pointers() {
        let ty = kir::parse_type("ptr[global]<image2d_wo_t>").unwrap();
        assert!(mentions_image(&ty));
        assert!(!mentions_image(&kir::parse_type("ptr[global]<sampler_t>").unwrap()));
    }
}
