use core::fmt::Display;
use std::rc::Rc;

use crate::error::{AnalysisError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedId(pub usize);

/// The position of an instruction in the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrRef {
    pub function: FunctionId,
    pub block: usize,
    pub index: usize,
}

impl Display for FunctionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl Display for ValueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl Display for InstrRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.function, self.block, self.index)
    }
}

//////////////////
// Type system. //
//////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BasicKind {
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    UnsafePointer,
}

impl BasicKind {
    pub fn is_integer(self) -> bool {
        use BasicKind::*;
        matches!(
            self,
            Int | Int8 | Int16 | Int32 | Int64 | Uint | Uint8 | Uint16 | Uint32 | Uint64 | Uintptr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BasicKind::Float32 | BasicKind::Float64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: Rc<str>,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub recv: Option<Type>,
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

/// Types of the analyzed language. Named types are interned in the
/// [Program] so recursive types can be expressed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Basic(BasicKind),
    Pointer(Rc<Type>),
    Chan(Rc<Type>, ChanDir),
    Map(Rc<Type>, Rc<Type>),
    Slice(Rc<Type>),
    Array(Rc<Type>, u64),
    Struct(Rc<[StructField]>),
    Tuple(Rc<[Type]>),
    Signature(Rc<Signature>),
    /// The method names of the interface.
    Interface(Rc<[Rc<str>]>),
    Named(NamedId),
}

impl Type {
    pub fn pointer(elem: Type) -> Self {
        Type::Pointer(Rc::new(elem))
    }

    pub fn chan(elem: Type) -> Self {
        Type::Chan(Rc::new(elem), ChanDir::Both)
    }

    pub fn slice(elem: Type) -> Self {
        Type::Slice(Rc::new(elem))
    }

    pub fn array(elem: Type, len: u64) -> Self {
        Type::Array(Rc::new(elem), len)
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::Map(Rc::new(key), Rc::new(value))
    }

    pub fn tuple(elems: Vec<Type>) -> Self {
        Type::Tuple(elems.into())
    }

    pub fn structure(fields: Vec<(&str, Type)>) -> Self {
        Type::Struct(
            fields
                .into_iter()
                .map(|(name, ty)| StructField {
                    name: name.into(),
                    ty,
                })
                .collect(),
        )
    }

    pub fn func(params: Vec<Type>, results: Vec<Type>) -> Self {
        Type::Signature(Rc::new(Signature {
            recv: None,
            params,
            results,
        }))
    }

    pub fn interface(methods: &[&str]) -> Self {
        Type::Interface(methods.iter().map(|&m| Rc::from(m)).collect())
    }

    pub fn int() -> Self {
        Type::Basic(BasicKind::Int)
    }

    pub fn bool() -> Self {
        Type::Basic(BasicKind::Bool)
    }

    pub fn string() -> Self {
        Type::Basic(BasicKind::String)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedType {
    pub package: Rc<str>,
    pub name: Rc<str>,
    pub underlying: Type,
}

/// The synchronization primitives of the `sync` package.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncKind {
    Mutex,
    RwMutex,
    Cond,
    WaitGroup,
    Locker,
}

//////////////////////
// Values and code. //
//////////////////////

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i128),
    Float(f64),
    String(Rc<str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    Close,
    Len,
    Cap,
    Append,
    Copy,
    Delete,
    Print,
    Println,
    Recover,
    Real,
    Imag,
    Complex,
    Min,
    Max,
    Clear,
    WrapNilCheck,
}

impl Builtin {
    pub fn from_name(name: &str) -> Result<Self> {
        use Builtin::*;
        Ok(match name {
            "close" => Close,
            "len" => Len,
            "cap" => Cap,
            "append" => Append,
            "copy" => Copy,
            "delete" => Delete,
            "print" => Print,
            "println" => Println,
            "recover" => Recover,
            "real" => Real,
            "imag" => Imag,
            "complex" => Complex,
            "min" => Min,
            "max" => Max,
            "clear" => Clear,
            "ssa:wrapnilchk" => WrapNilCheck,
            _ => return Err(AnalysisError::BuiltinUnknown(name.to_owned())),
        })
    }

    pub fn name(self) -> &'static str {
        use Builtin::*;
        match self {
            Close => "close",
            Len => "len",
            Cap => "cap",
            Append => "append",
            Copy => "copy",
            Delete => "delete",
            Print => "print",
            Println => "println",
            Recover => "recover",
            Real => "real",
            Imag => "imag",
            Complex => "complex",
            Min => "min",
            Max => "max",
            Clear => "clear",
            WrapNilCheck => "ssa:wrapnilchk",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    /// The value defined by an instruction.
    Instruction(InstrRef),
    Parameter(usize),
    FreeVar(usize),
    /// The address of a global variable.
    Global,
    Function(FunctionId),
    Builtin(Builtin),
    Const(Literal),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValueData {
    pub name: Rc<str>,
    pub ty: Type,
    pub kind: ValueKind,
    /// The function defining the value, [None] for globals, constants and
    /// functions.
    pub parent: Option<FunctionId>,
    pub referrers: Vec<InstrRef>,
    pub line: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Quo,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
    Eql,
    Neq,
    Lss,
    Leq,
    Gtr,
    Geq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOpKind {
    Not,
    Neg,
    /// Bitwise complement.
    Xor,
    Deref,
    /// Channel receive.
    Arrow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    /// A function, builtin or closure value.
    Value(ValueId),
    /// Dynamic method dispatch on an interface value.
    Invoke { recv: ValueId, method: Rc<str> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallCommon {
    pub callee: Callee,
    pub args: Vec<ValueId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectState {
    pub chan: ValueId,
    pub dir: ChanDir,
    pub send: Option<ValueId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstrKind {
    Alloc { heap: bool },
    BinOp { op: BinOpKind, x: ValueId, y: ValueId },
    UnOp { op: UnOpKind, x: ValueId, comma_ok: bool },
    Call(CallCommon),
    Go(CallCommon),
    Defer(CallCommon),
    ChangeType { x: ValueId },
    Convert { x: ValueId },
    MakeInterface { x: ValueId },
    TypeAssert { x: ValueId, asserted: Type, comma_ok: bool },
    Extract { tuple: ValueId, index: usize },
    Field { x: ValueId, field: usize },
    FieldAddr { x: ValueId, field: usize },
    IndexAddr { x: ValueId, index: ValueId },
    Lookup { x: ValueId, index: ValueId, comma_ok: bool },
    MakeChan { size: ValueId },
    MakeClosure { func: ValueId, bindings: Vec<ValueId> },
    MakeMap,
    MakeSlice { len: ValueId },
    Phi { edges: Vec<ValueId> },
    Range { x: ValueId },
    Next { iter: ValueId },
    Slice { x: ValueId },
    Select { states: Vec<SelectState>, blocking: bool },
    Send { chan: ValueId, x: ValueId },
    Store { addr: ValueId, val: ValueId },
    MapUpdate { map: ValueId, key: ValueId, value: ValueId },
    /// Branches to the first successor of the block when the condition
    /// holds, to the second otherwise.
    If { cond: ValueId },
    Jump,
    Return { results: Vec<ValueId> },
    Panic { x: ValueId },
    RunDefers,
    DebugRef { x: ValueId },
}

impl CallCommon {
    pub fn operands(&self) -> Vec<ValueId> {
        let mut result = match &self.callee {
            Callee::Value(v) => vec![*v],
            Callee::Invoke { recv, .. } => vec![*recv],
        };
        result.extend(self.args.iter().copied());
        result
    }
}

impl InstrKind {
    pub fn operands(&self) -> Vec<ValueId> {
        use InstrKind::*;
        match self {
            Alloc { .. } | MakeMap | Jump | RunDefers => Vec::new(),
            BinOp { x, y, .. } => vec![*x, *y],
            UnOp { x, .. }
            | ChangeType { x }
            | Convert { x }
            | MakeInterface { x }
            | TypeAssert { x, .. }
            | Field { x, .. }
            | FieldAddr { x, .. }
            | Range { x }
            | Slice { x }
            | Panic { x }
            | DebugRef { x } => vec![*x],
            Call(call) | Go(call) | Defer(call) => call.operands(),
            Extract { tuple, .. } => vec![*tuple],
            IndexAddr { x, index } | Lookup { x, index, .. } => vec![*x, *index],
            MakeChan { size } => vec![*size],
            MakeClosure { func, bindings } => {
                let mut result = vec![*func];
                result.extend(bindings.iter().copied());
                result
            }
            MakeSlice { len } => vec![*len],
            Phi { edges } => edges.clone(),
            Next { iter } => vec![*iter],
            Select { states, .. } => states
                .iter()
                .flat_map(|s| core::iter::once(s.chan).chain(s.send))
                .collect(),
            Send { chan, x } => vec![*chan, *x],
            Store { addr, val } => vec![*addr, *val],
            MapUpdate { map, key, value } => vec![*map, *key, *value],
            If { cond } => vec![*cond],
            Return { results } => results.clone(),
        }
    }

    pub fn call_common(&self) -> Option<&CallCommon> {
        match self {
            InstrKind::Call(call) | InstrKind::Go(call) | InstrKind::Defer(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstrKind,
    /// The value defined by the instruction, if any.
    pub value: Option<ValueId>,
    pub line: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicBlock {
    pub instrs: Vec<Instruction>,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: Rc<str>,
    pub package: Rc<str>,
    /// The type of the receiver for methods.
    pub receiver: Option<Type>,
    /// The function value referring to this function.
    pub value: ValueId,
    pub params: Vec<ValueId>,
    pub free_vars: Vec<ValueId>,
    /// External functions have no blocks.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// A whole program in SSA form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    functions: Vec<Function>,
    values: Vec<ValueData>,
    named: Vec<NamedType>,
}

impl Program {
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i), f))
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0]
    }

    pub fn type_of(&self, id: ValueId) -> &Type {
        &self.values[id.0].ty
    }

    pub fn named(&self, id: NamedId) -> &NamedType {
        &self.named[id.0]
    }

    pub fn block(&self, function: FunctionId, block: usize) -> &BasicBlock {
        &self.functions[function.0].blocks[block]
    }

    pub fn instr(&self, at: InstrRef) -> &Instruction {
        &self.block(at.function, at.block).instrs[at.index]
    }

    /// The instruction defining a value.
    pub fn defining_instr(&self, value: ValueId) -> Option<(InstrRef, &Instruction)> {
        match self.value(value).kind {
            ValueKind::Instruction(at) => Some((at, self.instr(at))),
            _ => None,
        }
    }

    /// The package qualified name of a function.
    pub fn qualified_name(&self, id: FunctionId) -> String {
        let function = self.function(id);
        format!("{}.{}", function.package, function.name)
    }

    /// Strips the named types.
    pub fn underlying<'a>(&'a self, mut ty: &'a Type) -> &'a Type {
        while let Type::Named(id) = ty {
            ty = &self.named(*id).underlying;
        }
        ty
    }

    /// The element type of pointers.
    pub fn pointee<'a>(&'a self, ty: &'a Type) -> Option<&'a Type> {
        match self.underlying(ty) {
            Type::Pointer(elem) => Some(elem),
            _ => None,
        }
    }

    /// Recognizes the synchronization primitives of the `sync` package.
    pub fn sync_kind(&self, ty: &Type) -> Option<SyncKind> {
        let Type::Named(id) = ty else {
            return None;
        };
        let named = self.named(*id);
        if &*named.package != "sync" {
            return None;
        }
        match &*named.name {
            "Mutex" => Some(SyncKind::Mutex),
            "RWMutex" => Some(SyncKind::RwMutex),
            "Cond" => Some(SyncKind::Cond),
            "WaitGroup" => Some(SyncKind::WaitGroup),
            "Locker" => Some(SyncKind::Locker),
            _ => None,
        }
    }

    /// Values of these types are represented by points-to sets.
    pub fn is_pointer_like(&self, ty: &Type) -> bool {
        matches!(
            self.underlying(ty),
            Type::Pointer(_)
                | Type::Chan(..)
                | Type::Map(..)
                | Type::Slice(_)
                | Type::Signature(_)
                | Type::Interface(_)
                | Type::Basic(BasicKind::UnsafePointer)
        )
    }

    pub fn display_type(&self, ty: &Type) -> String {
        match ty {
            Type::Basic(kind) => format!("{kind:?}").to_lowercase(),
            Type::Pointer(elem) => format!("*{}", self.display_type(elem)),
            Type::Chan(elem, ChanDir::Both) => format!("chan {}", self.display_type(elem)),
            Type::Chan(elem, ChanDir::Send) => format!("chan<- {}", self.display_type(elem)),
            Type::Chan(elem, ChanDir::Recv) => format!("<-chan {}", self.display_type(elem)),
            Type::Map(key, value) => format!(
                "map[{}]{}",
                self.display_type(key),
                self.display_type(value)
            ),
            Type::Slice(elem) => format!("[]{}", self.display_type(elem)),
            Type::Array(elem, len) => format!("[{len}]{}", self.display_type(elem)),
            Type::Struct(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{} {}", f.name, self.display_type(&f.ty)))
                    .collect();
                format!("struct{{{}}}", fields.join("; "))
            }
            Type::Tuple(elems) => {
                let elems: Vec<String> = elems.iter().map(|t| self.display_type(t)).collect();
                format!("({})", elems.join(", "))
            }
            Type::Signature(sig) => {
                let params: Vec<String> = sig.params.iter().map(|t| self.display_type(t)).collect();
                let results: Vec<String> = sig.results.iter().map(|t| self.display_type(t)).collect();
                format!("func({}) ({})", params.join(", "), results.join(", "))
            }
            Type::Interface(methods) => format!("interface{{{}}}", methods.join("; ")),
            Type::Named(id) => {
                let named = self.named(*id);
                format!("{}.{}", named.package, named.name)
            }
        }
    }

    /// Computes the block predecessors and the referrers of the values from
    /// the block successors and the instruction operands.
    pub fn finalize(&mut self) {
        for function in &mut self.functions {
            for block in &mut function.blocks {
                block.preds.clear();
            }
            let edges: Vec<(usize, usize)> = function
                .blocks
                .iter()
                .enumerate()
                .flat_map(|(b, block)| block.succs.iter().map(move |&s| (b, s)))
                .collect();
            for (from, to) in edges {
                if !function.blocks[to].preds.contains(&from) {
                    function.blocks[to].preds.push(from);
                }
            }
        }

        for value in &mut self.values {
            value.referrers.clear();
        }
        for (fid, function) in self.functions.iter().enumerate() {
            for (b, block) in function.blocks.iter().enumerate() {
                for (index, instr) in block.instrs.iter().enumerate() {
                    let at = InstrRef {
                        function: FunctionId(fid),
                        block: b,
                        index,
                    };
                    for operand in instr.kind.operands() {
                        let referrers = &mut self.values[operand.0].referrers;
                        if !referrers.contains(&at) {
                            referrers.push(at);
                        }
                    }
                }
            }
        }
    }
}

pub mod builder;
