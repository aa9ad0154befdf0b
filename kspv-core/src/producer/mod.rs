//! Lowering of a kernel IR module to a SPIR-V module.
//!
//! The producer runs in fixed phases over one `LoweringContext`:
//!
//! 1. discovery records every type and constant the module will need, in the
//!    order their ids are later assigned, and materializes kernel arguments as
//!    module-scope resource variables;
//! 2. types, constants, samplers and global variables are emitted;
//! 3. each function is lowered in module order; branches, phis and most calls
//!    are queued and resolved once the whole module has ids;
//! 4. decorations that depend on the whole module are appended and the
//!    sections are stitched together in their required order.
//!
//! Instructions live in three vectors: the extended instruction import,
//! `annotations` (decorations) and `body` (types, constants, globals and
//! functions). Module-level header instructions are built last.

mod arguments;
mod calls;
mod constants;
mod deferred;
mod discovery;
mod function;
mod globals;
mod lowering;
mod module_info;
mod types;

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use kir::{AddressSpace, Constant, OpaqueType, Type, Value};
use log::debug;
use spirv::{Decoration, Op, StorageClass, Word};

use crate::bail_internal;
use crate::descriptor_map::DescriptorMap;
use crate::error::{Location, Result};
use crate::ids::IdAllocator;
use crate::instruction::{self, Instruction, Operand};
use crate::module::SpirvModule;
use crate::options::Options;
use crate::tables::{ConstantTable, TypeTable, ValueKey, ValueMap};

use deferred::Deferred;

/// First specialization id handed to pointer-to-local kernel arguments;
/// 0, 1 and 2 belong to the workgroup size.
const FIRST_LOCAL_SPEC_ID: u32 = 3;

/// Everything one run of the producer returns.
#[derive(Debug, Clone)]
pub struct Output {
    pub module: SpirvModule,
    pub descriptor_map: DescriptorMap,
}

/// Lowers `module` to SPIR-V. The input is not modified; argument variables
/// and relocated constants are added to a working copy.
pub fn produce(module: &kir::Module, options: &Options) -> Result<Output> {
    let mut ctx = LoweringContext::new(module.clone(), options);
    ctx.run()?;
    ctx.finish()
}

/// A kernel parameter pointing into workgroup memory. It becomes a
/// specialization-sized array variable instead of a resource binding.
#[derive(Debug, Clone)]
struct LocalArg {
    elem_type: Type,
    spec_id: u32,
    array_size_id: Word,
    array_type_id: Word,
    ptr_array_type_id: Word,
    variable_id: Word,
    first_elem_ptr_id: Word,
}

/// The module-scope variable standing in for a kernel parameter.
#[derive(Debug, Clone)]
struct ArgVar {
    /// Declared type of the parameter.
    param_type: Type,
    /// Name of the global in the working module.
    global: String,
}

/// Lowering context holding all state of a single run.
pub(crate) struct LoweringContext<'o> {
    options: &'o Options,
    /// Working copy of the input module.
    module: kir::Module,
    ids: IdAllocator,
    types: TypeTable,
    constants: ConstantTable,
    values: ValueMap,
    /// Constants given ids while emitting types (array lengths).
    allocated_constants: HashSet<Constant>,

    ext_inst_import: Option<Word>,
    annotations: Vec<Instruction>,
    body: Vec<Instruction>,
    deferred: Vec<Deferred>,

    /// Kernels in emission order, with their function ids.
    entry_points: Vec<(usize, Word)>,
    /// Input-space globals listed on every entry point.
    entry_interfaces: Vec<String>,

    /// Image types read through a sampler, and their sampled-image type ids.
    image_types: IndexMap<OpaqueType, Word>,
    /// Keyed by (function index, parameter index).
    arg_spec_ids: IndexMap<(usize, usize), u32>,
    local_args: IndexMap<(usize, usize), LocalArg>,
    arg_vars: IndexMap<(usize, usize), ArgVar>,
    /// Ids of argument variables once the owning kernel's prologue ran.
    arg_var_ids: HashMap<(usize, usize), Word>,
    /// Callee name to the parameter receiving a relocated `constant` global.
    global_const_args: HashMap<String, usize>,
    array_stride_types: IndexSet<Type>,
    runtime_array_types: HashMap<Type, Word>,
    decorated_vars: HashSet<String>,
    sampler_init_vars: HashMap<ValueKey, Word>,
    /// Packed 4 x i8 constant values and their ids.
    packed_4xi8: HashMap<u32, Word>,

    builtin_dims: Vec<Word>,
    workgroup_size_value: Option<Word>,
    workgroup_size_var: Option<Word>,
    i32_zero: Option<Word>,
    has_variable_pointers: bool,
    has_workgroup_builtin: bool,
    module_has_images: bool,
    next_descriptor_set: u32,
    descriptor_map: DescriptorMap,
    location: Option<Location>,
}

impl<'o> LoweringContext<'o> {
    fn new(module: kir::Module, options: &'o Options) -> Self {
        LoweringContext {
            options,
            module,
            ids: IdAllocator::new(),
            types: TypeTable::default(),
            constants: ConstantTable::default(),
            values: ValueMap::default(),
            allocated_constants: HashSet::new(),
            ext_inst_import: None,
            annotations: Vec::new(),
            body: Vec::new(),
            deferred: Vec::new(),
            entry_points: Vec::new(),
            entry_interfaces: Vec::new(),
            image_types: IndexMap::new(),
            arg_spec_ids: IndexMap::new(),
            local_args: IndexMap::new(),
            arg_vars: IndexMap::new(),
            arg_var_ids: HashMap::new(),
            global_const_args: HashMap::new(),
            array_stride_types: IndexSet::new(),
            runtime_array_types: HashMap::new(),
            decorated_vars: HashSet::new(),
            sampler_init_vars: HashMap::new(),
            packed_4xi8: HashMap::new(),
            builtin_dims: Vec::new(),
            workgroup_size_value: None,
            workgroup_size_var: None,
            i32_zero: None,
            has_variable_pointers: false,
            has_workgroup_builtin: false,
            module_has_images: false,
            next_descriptor_set: 0,
            descriptor_map: DescriptorMap::default(),
            location: None,
        }
    }

    fn run(&mut self) -> Result<()> {
        self.allocate_spec_ids();
        self.generate_ir_info()?;

        if !self.options.sampler_map.is_empty() {
            self.find_type(&sampler_pointer_type());
        }
        self.discover_globals();
        let local_types: Vec<Type> = self
            .arg_spec_ids
            .keys()
            .map(|&(fi, pi)| self.module.functions[fi].params[pi].ty.clone())
            .collect();
        for ty in local_types {
            self.find_type(&ty);
            if let Some(p) = ty.as_pointer() {
                let pointee = (*p.pointee).clone();
                self.find_type(&pointee);
            }
        }
        if self.find_ext_inst()? {
            self.ext_inst_import = Some(self.ids.allocate());
        }
        debug!(
            "discovered {} types and {} constants",
            self.types.len(),
            self.constants.len()
        );

        self.emit_types()?;
        self.emit_constants()?;
        if !self.options.sampler_map.is_empty() {
            self.emit_samplers()?;
        }
        for gi in 0..self.module.globals.len() {
            self.emit_global_var(gi)?;
        }
        self.emit_workgroup_vars();

        for fi in 0..self.module.functions.len() {
            if self.module.functions[fi].is_declaration() {
                continue;
            }
            self.emit_function_prologue(fi)?;
            self.emit_function_body(fi)?;
            self.emit_function_epilogue();
        }
        self.location = None;

        self.resolve_deferred()?;
        self.emit_deferred_decorations()?;
        Ok(())
    }

    /// Location used for diagnostics raised while lowering instructions.
    fn here(&self) -> Location {
        self.location
            .clone()
            .unwrap_or_else(|| Location::function("<module>"))
    }

    /// Id of a discovered type. Non-uniform-constant pointers to opaque
    /// handles stand for the handle itself.
    fn type_id(&self, ty: &Type) -> Result<Word> {
        let ty = match ty {
            Type::Pointer(p)
                if p.address_space != AddressSpace::UniformConstant
                    && p.pointee.as_opaque().is_some() =>
            {
                p.pointee.as_ref()
            }
            other => other,
        };
        match self.types.id(ty) {
            Some(id) => Ok(id),
            None => bail_internal!("Unhandled type {}", ty),
        }
    }

    fn constant_id(&self, constant: &Constant) -> Result<Word> {
        match self.values.constant(constant) {
            Some(id) => Ok(id),
            None => bail_internal!("constant {:?} was not discovered", constant),
        }
    }

    fn value_key(fi: usize, value: &Value) -> ValueKey {
        match value {
            Value::Register(name) => ValueKey::local(fi, name),
            Value::Global(name) => ValueKey::Global(name.clone()),
            Value::Constant(c) => ValueKey::Constant(c.clone()),
        }
    }

    fn value_id(&self, fi: usize, value: &Value) -> Result<Word> {
        match self.values.get(&Self::value_key(fi, value)) {
            Some(id) => Ok(id),
            None => bail_internal!(
                "no id for {:?} in @{}",
                value,
                self.module.functions[fi].name
            ),
        }
    }

    fn value_type(&self, fi: usize, value: &Value) -> Result<Type> {
        match value {
            Value::Constant(c) => Ok(c.ty()),
            Value::Global(name) => match self.module.global(name) {
                Some(g) => Ok(g.pointer_type()),
                None => bail_internal!("unknown global @{}", name),
            },
            Value::Register(name) => {
                let func = &self.module.functions[fi];
                match func.local_type(name) {
                    Some(ty) => Ok(ty.clone()),
                    None => bail_internal!("unknown value %{} in @{}", name, func.name),
                }
            }
        }
    }

    fn i32_zero(&self) -> Result<Word> {
        match self.i32_zero {
            Some(id) => Ok(id),
            None => bail_internal!("i32 0 was not emitted"),
        }
    }

    /// Emits a value-producing instruction with a fresh result id.
    fn emit_value(&mut self, opcode: Op, operands: Vec<Operand>) -> Word {
        let id = self.ids.allocate();
        self.body
            .push(instruction::build_with_result(opcode, id, operands));
        id
    }

    fn emit(&mut self, opcode: Op, operands: Vec<Operand>) {
        self.body.push(instruction::build(opcode, operands));
    }

    fn decorate(&mut self, target: Word, decoration: Decoration, literals: &[u32]) {
        let mut operands = vec![Operand::IdRef(target), Operand::LiteralBit32(decoration as u32)];
        operands.extend(literals.iter().map(|&l| Operand::LiteralBit32(l)));
        self.annotations.push(instruction::build(Op::Decorate, operands));
    }

    /// Index of the parameter named `name` in function `fi`.
    fn param_index(&self, fi: usize, name: &str) -> Option<usize> {
        self.module.functions[fi]
            .params
            .iter()
            .position(|p| p.name == name)
    }

    /// True if `value` is the parameter of function `fi` that receives a
    /// relocated `constant` global.
    fn is_global_const_param(&self, fi: usize, value: &Value) -> bool {
        let Some(name) = value.as_register() else {
            return false;
        };
        let func = &self.module.functions[fi];
        match self.global_const_args.get(&func.name) {
            Some(&index) => self.param_index(fi, name) == Some(index),
            None => false,
        }
    }

    fn finish(self) -> Result<Output> {
        let instructions = self.assemble_module()?;
        Ok(Output {
            module: SpirvModule {
                bound: self.ids.bound(),
                instructions,
            },
            descriptor_map: self.descriptor_map,
        })
    }
}

/// Storage class a pointer in `space` lowers to.
fn storage_class(space: AddressSpace) -> StorageClass {
    match space {
        AddressSpace::Private => StorageClass::Function,
        AddressSpace::Global | AddressSpace::Constant => StorageClass::StorageBuffer,
        AddressSpace::Input => StorageClass::Input,
        AddressSpace::Local => StorageClass::Workgroup,
        AddressSpace::UniformConstant => StorageClass::UniformConstant,
        AddressSpace::Uniform => StorageClass::Uniform,
        AddressSpace::ModulePrivate => StorageClass::Private,
    }
}

fn sampler_pointer_type() -> Type {
    Type::pointer(
        AddressSpace::UniformConstant,
        Type::Opaque(OpaqueType::Sampler),
    )
}

fn ids(values: &[Word]) -> Vec<Operand> {
    values.iter().map(|&id| Operand::IdRef(id)).collect()
}
