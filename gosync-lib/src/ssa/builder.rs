use std::rc::Rc;

use crate::error::Result;
use crate::ssa::*;

/// Assembles a [Program] piece by piece. Front-ends translating from a
/// concrete SSA representation and the tests use it.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a named type. The underlying type can be set later with
    /// [ProgramBuilder::set_underlying] to express recursive types.
    pub fn named_type(&mut self, package: &str, name: &str, underlying: Type) -> Type {
        let id = NamedId(self.program.named.len());
        self.program.named.push(NamedType {
            package: package.into(),
            name: name.into(),
            underlying,
        });
        Type::Named(id)
    }

    pub fn set_underlying(&mut self, named: &Type, underlying: Type) {
        if let Type::Named(id) = named {
            self.program.named[id.0].underlying = underlying;
        }
    }

    /// Looks up an already declared named type.
    pub fn lookup_named(&self, package: &str, name: &str) -> Option<Type> {
        self.program
            .named
            .iter()
            .position(|n| &*n.package == package && &*n.name == name)
            .map(|i| Type::Named(NamedId(i)))
    }

    fn sync_type(&mut self, name: &str, underlying: Type) -> Type {
        self.lookup_named("sync", name)
            .unwrap_or_else(|| self.named_type("sync", name, underlying))
    }

    pub fn mutex_type(&mut self) -> Type {
        self.sync_type("Mutex", Type::structure(vec![("state", Type::int())]))
    }

    pub fn rw_mutex_type(&mut self) -> Type {
        self.sync_type(
            "RWMutex",
            Type::structure(vec![("w", Type::int()), ("readerCount", Type::int())]),
        )
    }

    pub fn locker_type(&mut self) -> Type {
        self.sync_type("Locker", Type::interface(&["Lock", "Unlock"]))
    }

    pub fn cond_type(&mut self) -> Type {
        let locker = self.locker_type();
        self.sync_type("Cond", Type::structure(vec![("L", locker)]))
    }

    pub fn wait_group_type(&mut self) -> Type {
        self.sync_type("WaitGroup", Type::structure(vec![("state", Type::int())]))
    }

    fn add_value(
        &mut self,
        name: &str,
        ty: Type,
        kind: ValueKind,
        parent: Option<FunctionId>,
    ) -> ValueId {
        let id = ValueId(self.program.values.len());
        self.program.values.push(ValueData {
            name: name.into(),
            ty,
            kind,
            parent,
            referrers: Vec::new(),
            line: 0,
        });
        id
    }

    /// A global variable. The type is the type of the variable, the value
    /// itself is its address.
    pub fn global(&mut self, name: &str, ty: Type) -> ValueId {
        self.add_value(name, Type::pointer(ty), ValueKind::Global, None)
    }

    pub fn constant(&mut self, literal: Literal, ty: Type) -> ValueId {
        let name = match &literal {
            Literal::Nil => "nil".to_owned(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::String(s) => format!("{s:?}"),
        };
        self.add_value(&name, ty, ValueKind::Const(literal), None)
    }

    pub fn int_const(&mut self, value: i128) -> ValueId {
        self.constant(Literal::Int(value), Type::int())
    }

    /// A reference to a builtin function. Fails for unknown builtins.
    pub fn builtin(&mut self, name: &str) -> Result<ValueId> {
        let builtin = Builtin::from_name(name)?;
        Ok(self.add_value(
            name,
            Type::func(Vec::new(), Vec::new()),
            ValueKind::Builtin(builtin),
            None,
        ))
    }

    /// Declares a function without a body. Blocks can be added later.
    pub fn declare_function(&mut self, package: &str, name: &str, ty: Type) -> FunctionId {
        self.declare_method(package, name, None, ty)
    }

    pub fn declare_method(
        &mut self,
        package: &str,
        name: &str,
        receiver: Option<Type>,
        ty: Type,
    ) -> FunctionId {
        let id = FunctionId(self.program.functions.len());
        let value = self.add_value(name, ty, ValueKind::Function(id), None);
        self.program.functions.push(Function {
            name: Rc::from(name),
            package: Rc::from(package),
            receiver,
            value,
            params: Vec::new(),
            free_vars: Vec::new(),
            blocks: Vec::new(),
        });
        id
    }

    /// The value referring to a function.
    pub fn func_value(&self, function: FunctionId) -> ValueId {
        self.program.functions[function.0].value
    }

    pub fn add_param(&mut self, function: FunctionId, name: &str, ty: Type) -> ValueId {
        let index = self.program.functions[function.0].params.len();
        let id = self.add_value(name, ty, ValueKind::Parameter(index), Some(function));
        self.program.functions[function.0].params.push(id);
        id
    }

    pub fn add_free_var(&mut self, function: FunctionId, name: &str, ty: Type) -> ValueId {
        let index = self.program.functions[function.0].free_vars.len();
        let id = self.add_value(name, ty, ValueKind::FreeVar(index), Some(function));
        self.program.functions[function.0].free_vars.push(id);
        id
    }

    /// Appends a new block to a function and returns its index.
    pub fn add_block(&mut self, function: FunctionId) -> usize {
        let blocks = &mut self.program.functions[function.0].blocks;
        blocks.push(BasicBlock::default());
        blocks.len() - 1
    }

    pub fn edge(&mut self, function: FunctionId, from: usize, to: usize) -> &mut Self {
        self.program.functions[function.0].blocks[from].succs.push(to);
        self
    }

    /// Appends an instruction that defines no value.
    pub fn instr(&mut self, function: FunctionId, block: usize, kind: InstrKind) -> InstrRef {
        let instrs = &mut self.program.functions[function.0].blocks[block].instrs;
        instrs.push(Instruction {
            kind,
            value: None,
            line: 0,
        });
        InstrRef {
            function,
            block,
            index: instrs.len() - 1,
        }
    }

    /// Appends an instruction defining a value of type `ty`.
    pub fn value_instr(
        &mut self,
        function: FunctionId,
        block: usize,
        name: &str,
        ty: Type,
        kind: InstrKind,
    ) -> ValueId {
        let at = self.instr(function, block, kind);
        let value = self.add_value(name, ty, ValueKind::Instruction(at), Some(function));
        self.program.functions[function.0].blocks[block].instrs[at.index].value = Some(value);
        value
    }

    /// Sets the source line of the last instruction of a block.
    pub fn at_line(&mut self, function: FunctionId, block: usize, line: u32) -> &mut Self {
        let instrs = &mut self.program.functions[function.0].blocks[block].instrs;
        if let Some(instr) = instrs.last_mut() {
            instr.line = line;
            if let Some(value) = instr.value {
                self.program.values[value.0].line = line;
            }
        }
        self
    }

    pub fn finish(mut self) -> Program {
        self.program.finalize();
        self.program
    }
}
