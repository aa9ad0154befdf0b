/// KIR (kernel IR) - the restricted SSA form lowered to SPIR-V
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Kernels first, then every other function, each group in declaration order.
    pub fn functions_kernels_first(&self) -> impl Iterator<Item = &Function> {
        self.functions
            .iter()
            .filter(|f| f.is_kernel())
            .chain(self.functions.iter().filter(|f| !f.is_kernel()))
    }

    /// True if any call in the module targets `name`.
    pub fn calls_function(&self, name: &str) -> bool {
        self.functions.iter().flat_map(|f| f.instructions()).any(|inst| {
            matches!(&inst.op, Operation::Call { func, .. } if func == name)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: PointerType,
    pub initializer: Option<Constant>,
}

impl Global {
    pub fn address_space(&self) -> AddressSpace {
        self.ty.address_space
    }

    pub fn value_type(&self) -> &Type {
        &self.ty.pointee
    }

    /// Type of `@name` when used as a value.
    pub fn pointer_type(&self) -> Type {
        Type::Pointer(Box::new(self.ty.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub attributes: Vec<FunctionAttr>,
    pub params: Vec<Param>,
    pub return_type: Type,
    /// Where each source-level argument of a kernel ended up once its
    /// plain-old-data arguments were clustered into fewer parameters.
    pub arg_map: Option<Vec<ArgMapping>>,
    pub blocks: Vec<BasicBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionAttr {
    Kernel,
    Inline,
    NoInline,
    ReadOnly,
    ReadNone,
    ReqdWorkGroupSize(u32, u32, u32),
}

/// One entry of a kernel argument map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgMapping {
    pub name: String,
    /// Position in the source-level signature.
    pub old_index: u32,
    /// Parameter now carrying the argument.
    pub new_index: u32,
    /// Byte offset of the argument inside that parameter.
    pub offset: u32,
    pub kind: String,
    /// Positive for a pointer-to-local argument sized by this
    /// specialization id.
    pub spec_id: i32,
}

impl Function {
    pub fn is_kernel(&self) -> bool {
        self.has_attr(FunctionAttr::Kernel)
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn has_attr(&self, attr: FunctionAttr) -> bool {
        self.attributes.contains(&attr)
    }

    pub fn reqd_work_group_size(&self) -> Option<[u32; 3]> {
        self.attributes.iter().find_map(|a| match a {
            FunctionAttr::ReqdWorkGroupSize(x, y, z) => Some([*x, *y, *z]),
            _ => None,
        })
    }

    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            return_type: self.return_type.clone(),
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
        }
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Every instruction or terminator that reads `%name`, in program order.
    pub fn uses_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Use<'a>> + 'a {
        self.blocks.iter().flat_map(move |b| {
            b.instructions
                .iter()
                .filter(move |i| i.op.operands().iter().any(|v| v.is_register(name)))
                .map(Use::Instruction)
                .chain(
                    b.terminator
                        .operands()
                        .into_iter()
                        .any(|v| v.is_register(name))
                        .then_some(Use::Terminator(&b.terminator)),
                )
        })
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.uses_of(name).next().is_some()
    }

    /// Type of a value as seen inside this function, if it is known locally.
    pub fn local_type(&self, name: &str) -> Option<&Type> {
        if let Some(p) = self.param(name) {
            return Some(&p.ty);
        }
        self.instructions()
            .find(|i| i.result.as_deref() == Some(name))
            .map(|i| &i.ty)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Use<'a> {
    Instruction(&'a Instruction),
    Terminator(&'a Terminator),
}

impl<'a> Use<'a> {
    pub fn as_instruction(&self) -> Option<&'a Instruction> {
        match self {
            Use::Instruction(inst) => Some(inst),
            Use::Terminator(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// Types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    Float(u32),
    Vector(Box<Type>, u32),
    Array(Box<Type>, u64),
    /// Literal struct; two structs with the same fields are the same type.
    Struct(Vec<Type>),
    Pointer(Box<PointerType>),
    Function(Box<FunctionType>),
    Opaque(OpaqueType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerType {
    pub address_space: AddressSpace,
    pub pointee: Box<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub return_type: Type,
    pub params: Vec<Type>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueType {
    Sampler,
    Image2DRead,
    Image2DWrite,
    Image3DRead,
    Image3DWrite,
}

impl OpaqueType {
    pub fn is_image(self) -> bool {
        !matches!(self, OpaqueType::Sampler)
    }

    pub fn is_write_only_image(self) -> bool {
        matches!(self, OpaqueType::Image2DWrite | OpaqueType::Image3DWrite)
    }

    pub fn is_read_only_image(self) -> bool {
        matches!(self, OpaqueType::Image2DRead | OpaqueType::Image3DRead)
    }

    pub fn is_3d(self) -> bool {
        matches!(self, OpaqueType::Image3DRead | OpaqueType::Image3DWrite)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            OpaqueType::Sampler => "sampler_t",
            OpaqueType::Image2DRead => "image2d_ro_t",
            OpaqueType::Image2DWrite => "image2d_wo_t",
            OpaqueType::Image3DRead => "image3d_ro_t",
            OpaqueType::Image3DWrite => "image3d_wo_t",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Private,
    Global,
    Constant,
    Local,
    Input,
    UniformConstant,
    Uniform,
    ModulePrivate,
}

impl AddressSpace {
    pub fn keyword(self) -> &'static str {
        match self {
            AddressSpace::Private => "private",
            AddressSpace::Global => "global",
            AddressSpace::Constant => "constant",
            AddressSpace::Local => "local",
            AddressSpace::Input => "input",
            AddressSpace::UniformConstant => "uniform_constant",
            AddressSpace::Uniform => "uniform",
            AddressSpace::ModulePrivate => "module_private",
        }
    }
}

impl Type {
    pub fn i1() -> Type {
        Type::Int(1)
    }

    pub fn i32() -> Type {
        Type::Int(32)
    }

    pub fn f32() -> Type {
        Type::Float(32)
    }

    pub fn pointer(address_space: AddressSpace, pointee: Type) -> Type {
        Type::Pointer(Box::new(PointerType {
            address_space,
            pointee: Box::new(pointee),
        }))
    }

    pub fn vector(element: Type, count: u32) -> Type {
        Type::Vector(Box::new(element), count)
    }

    pub fn as_pointer(&self) -> Option<&PointerType> {
        match self {
            Type::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn address_space(&self) -> Option<AddressSpace> {
        self.as_pointer().map(|p| p.address_space)
    }

    pub fn as_opaque(&self) -> Option<OpaqueType> {
        match self {
            Type::Opaque(o) => Some(*o),
            _ => None,
        }
    }

    /// The handle kind behind a pointer to a sampler or image.
    pub fn pointee_opaque(&self) -> Option<OpaqueType> {
        self.as_pointer().and_then(|p| p.pointee.as_opaque())
    }

    pub fn is_int(&self, width: u32) -> bool {
        matches!(self, Type::Int(w) if *w == width)
    }

    pub fn is_bool(&self) -> bool {
        self.is_int(1)
    }

    /// Element type for vectors, the type itself otherwise.
    pub fn scalar_type(&self) -> &Type {
        match self {
            Type::Vector(elem, _) => elem,
            other => other,
        }
    }

    pub fn vector_len(&self) -> Option<u32> {
        match self {
            Type::Vector(_, n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_bool_or_bool_vector(&self) -> bool {
        self.scalar_type().is_bool()
    }

    pub fn is_int_or_int_vector(&self) -> bool {
        matches!(self.scalar_type(), Type::Int(_))
    }

    pub fn is_fp_or_fp_vector(&self) -> bool {
        matches!(self.scalar_type(), Type::Float(_))
    }

    /// `<4 x i8>`, which lives in a single 32-bit integer on the target.
    pub fn is_4xi8(&self) -> bool {
        matches!(self, Type::Vector(elem, 4) if elem.is_int(8))
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }

    /// Element type reached by a constant or dynamic index into this aggregate.
    pub fn indexed(&self, index: u32) -> Option<&Type> {
        match self {
            Type::Vector(elem, _) | Type::Array(elem, _) => Some(elem),
            Type::Struct(fields) => fields.get(index as usize),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{}", w),
            Type::Float(w) => write!(f, "f{}", w),
            Type::Vector(elem, n) => write!(f, "<{} x {}>", n, elem),
            Type::Array(elem, n) => write!(f, "[{} x {}]", n, elem),
            Type::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
            Type::Pointer(p) => write!(f, "ptr[{}]<{}>", p.address_space.keyword(), p.pointee),
            Type::Function(ft) => {
                write!(f, "fn(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ft.return_type)
            }
            Type::Opaque(o) => write!(f, "{}", o.keyword()),
        }
    }
}

/// Constants
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// `value` holds the zero-extended bit pattern, masked to `width`.
    Int { width: u32, value: u64 },
    /// `bits` is the IEEE encoding at `width`.
    Float { width: u32, bits: u64 },
    Undef(Type),
    /// All-zero value of an aggregate or pointer type.
    Null(Type),
    Aggregate { ty: Type, elements: Vec<Constant> },
}

fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Constant {
    pub fn int(width: u32, value: u64) -> Constant {
        Constant::Int {
            width,
            value: value & width_mask(width),
        }
    }

    pub fn i32(value: u32) -> Constant {
        Constant::int(32, value as u64)
    }

    pub fn bool(value: bool) -> Constant {
        Constant::int(1, value as u64)
    }

    pub fn f32(value: f32) -> Constant {
        Constant::Float {
            width: 32,
            bits: value.to_bits() as u64,
        }
    }

    /// Zero of `ty`: scalars become plain zero constants, everything else `Null`.
    pub fn null_value(ty: &Type) -> Constant {
        match ty {
            Type::Int(w) => Constant::int(*w, 0),
            Type::Float(w) => Constant::Float { width: *w, bits: 0 },
            other => Constant::Null(other.clone()),
        }
    }

    /// Builds an aggregate, folding all-zero and all-undef element lists.
    pub fn aggregate(ty: Type, elements: Vec<Constant>) -> Constant {
        if !elements.is_empty() && elements.iter().all(|e| e.is_null_value()) {
            return Constant::Null(ty);
        }
        if !elements.is_empty() && elements.iter().all(|e| matches!(e, Constant::Undef(_))) {
            return Constant::Undef(ty);
        }
        Constant::Aggregate { ty, elements }
    }

    /// `element` for scalar types, a splat of it for vector types.
    pub fn splat(ty: &Type, element: Constant) -> Constant {
        match ty {
            Type::Vector(_, n) => Constant::aggregate(ty.clone(), vec![element; *n as usize]),
            _ => element,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Int { width, .. } => Type::Int(*width),
            Constant::Float { width, .. } => Type::Float(*width),
            Constant::Undef(ty) | Constant::Null(ty) => ty.clone(),
            Constant::Aggregate { ty, .. } => ty.clone(),
        }
    }

    pub fn is_null_value(&self) -> bool {
        match self {
            Constant::Int { value, .. } => *value == 0,
            Constant::Float { bits, .. } => *bits == 0,
            Constant::Null(_) => true,
            Constant::Undef(_) => false,
            Constant::Aggregate { elements, .. } => elements.iter().all(|e| e.is_null_value()),
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Constant::Undef(_))
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Element `k` of a vector/array/struct constant.
    pub fn element(&self, k: usize) -> Option<Constant> {
        match self {
            Constant::Aggregate { elements, .. } => elements.get(k).cloned(),
            Constant::Null(ty) => ty.indexed(k as u32).map(Constant::null_value),
            Constant::Undef(ty) => ty.indexed(k as u32).cloned().map(Constant::Undef),
            _ => None,
        }
    }
}

/// Values (SSA)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Register(String),
    Global(String),
    Constant(Constant),
}

impl Value {
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&str> {
        match self {
            Value::Register(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_register(&self, name: &str) -> bool {
        self.as_register() == Some(name)
    }

    pub fn is_global(&self, name: &str) -> bool {
        matches!(self, Value::Global(g) if g == name)
    }
}

/// Instructions
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<String>,
    /// Result type; `void` for stores and calls with no result.
    pub ty: Type,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Binary(BinaryOp, Value, Value),
    ICmp(IntPredicate, Value, Value),
    FCmp(FloatPredicate, Value, Value),
    Cast(CastOp, Value),
    Select(Value, Value, Value),

    // Memory
    Alloca,
    Load(Value),
    Store {
        value: Value,
        ptr: Value,
    },
    Gep {
        base: Value,
        indices: Vec<Value>,
    },

    // Vectors and aggregates
    ExtractElement {
        vector: Value,
        index: Value,
    },
    InsertElement {
        vector: Value,
        element: Value,
        index: Value,
    },
    ShuffleVector {
        lhs: Value,
        rhs: Value,
        /// `None` is an undefined lane.
        mask: Vec<Option<u32>>,
    },
    ExtractValue {
        aggregate: Value,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: Value,
        element: Value,
        indices: Vec<u32>,
    },

    AtomicRmw {
        op: AtomicOp,
        ptr: Value,
        value: Value,
    },
    Call {
        func: String,
        args: Vec<Value>,
    },
    Phi {
        incoming: Vec<(Value, String)>,
    },
}

impl Operation {
    /// Value operands in their conventional order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Operation::Binary(_, a, b) | Operation::ICmp(_, a, b) | Operation::FCmp(_, a, b) => {
                vec![a, b]
            }
            Operation::Cast(_, v) | Operation::Load(v) => vec![v],
            Operation::Select(c, t, f) => vec![c, t, f],
            Operation::Alloca => vec![],
            Operation::Store { value, ptr } => vec![value, ptr],
            Operation::Gep { base, indices } => std::iter::once(base).chain(indices).collect(),
            Operation::ExtractElement { vector, index } => vec![vector, index],
            Operation::InsertElement {
                vector,
                element,
                index,
            } => vec![vector, element, index],
            Operation::ShuffleVector { lhs, rhs, .. } => vec![lhs, rhs],
            Operation::ExtractValue { aggregate, .. } => vec![aggregate],
            Operation::InsertValue {
                aggregate, element, ..
            } => vec![aggregate, element],
            Operation::AtomicRmw { ptr, value, .. } => vec![ptr, value],
            Operation::Call { args, .. } => args.iter().collect(),
            Operation::Phi { incoming } => incoming.iter().map(|(v, _)| v).collect(),
        }
    }

    pub fn is_gep(&self) -> bool {
        matches!(self, Operation::Gep { .. })
    }

    pub fn called_function(&self) -> Option<&str> {
        match self {
            Operation::Call { func, .. } => Some(func),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPredicate {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    Bitcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Sub,
    Xchg,
    Min,
    Max,
    UMin,
    UMax,
    And,
    Or,
    Xor,
}

/// Terminators
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br(String),
    BrIf {
        cond: Value,
        true_label: String,
        false_label: String,
    },
    Ret(Option<Value>),
}

impl Terminator {
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Terminator::Br(_) => vec![],
            Terminator::BrIf { cond, .. } => vec![cond],
            Terminator::Ret(v) => v.iter().collect(),
        }
    }

    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Br(target) => vec![target.as_str()],
            Terminator::BrIf {
                true_label,
                false_label,
                ..
            } => vec![true_label.as_str(), false_label.as_str()],
            Terminator::Ret(_) => vec![],
        }
    }
}
