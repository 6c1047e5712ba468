//! Small programs shared by the tests, built the way a front-end would.

use std::collections::HashMap;

use crate::pointer::{Label, PointerResult};
use crate::ssa::builder::ProgramBuilder;
use crate::ssa::*;

pub struct Fixture {
    pub program: Program,
    pub pointer: PointerResult,
    pub main: FunctionId,
    values: HashMap<&'static str, ValueId>,
    instrs: HashMap<&'static str, InstrRef>,
    functions: HashMap<&'static str, FunctionId>,
}

impl Fixture {
    pub fn value(&self, name: &str) -> ValueId {
        self.values[name]
    }

    /// A named instruction, or the instruction defining a named value.
    pub fn instr(&self, name: &str) -> InstrRef {
        match self.instrs.get(name) {
            Some(&at) => at,
            None => match self.program.defining_instr(self.value(name)) {
                Some((at, _)) => at,
                None => panic!("{name} is not defined by an instruction"),
            },
        }
    }

    pub fn function(&self, name: &str) -> FunctionId {
        self.functions[name]
    }
}

struct Draft {
    b: ProgramBuilder,
    pointer: PointerResult,
    main: FunctionId,
    values: HashMap<&'static str, ValueId>,
    instrs: HashMap<&'static str, InstrRef>,
    functions: HashMap<&'static str, FunctionId>,
}

impl Draft {
    fn new() -> Self {
        let mut b = ProgramBuilder::new();
        let main = b.declare_function("main", "main", Type::func(vec![], vec![]));
        Self {
            b,
            pointer: PointerResult::new(),
            main,
            values: HashMap::new(),
            instrs: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    fn make_chan(&mut self, f: FunctionId, block: usize, name: &'static str, size: i128) -> ValueId {
        let size = self.b.int_const(size);
        let ch = self.b.value_instr(
            f,
            block,
            name,
            Type::chan(Type::int()),
            InstrKind::MakeChan { size },
        );
        self.values.insert(name, ch);
        self.pointer.add_label(ch, Label::new(ch));
        ch
    }

    fn call(&mut self, f: FunctionId, block: usize, name: &'static str, callee: ValueId, args: Vec<ValueId>) {
        let at = self.b.instr(
            f,
            block,
            InstrKind::Call(CallCommon {
                callee: Callee::Value(callee),
                args,
            }),
        );
        self.instrs.insert(name, at);
    }

    fn named_instr(&mut self, f: FunctionId, block: usize, name: &'static str, kind: InstrKind) {
        let at = self.b.instr(f, block, kind);
        self.instrs.insert(name, at);
    }

    fn finish(self) -> Fixture {
        Fixture {
            program: self.b.finish(),
            pointer: self.pointer,
            main: self.main,
            values: self.values,
            instrs: self.instrs,
            functions: self.functions,
        }
    }
}

/// ```go
/// ch := make(chan int, 1)
/// close(ch)
/// ch <- 1
/// ```
pub fn send_to_closed() -> Fixture {
    let mut d = Draft::new();
    let main = d.main;
    d.b.add_block(main);
    let ch = d.make_chan(main, 0, "ch", 1);
    let close = d.b.builtin("close").unwrap();
    d.call(main, 0, "close", close, vec![ch]);
    let one = d.b.int_const(1);
    d.named_instr(main, 0, "send", InstrKind::Send { chan: ch, x: one });
    d.named_instr(main, 0, "return", InstrKind::Return { results: vec![] });
    d.finish()
}

/// ```go
/// func main() {
///     ch := make(chan int)
///     go worker(ch)
///     <-ch
/// }
/// func worker(c chan int) { c <- 1 }
/// ```
pub fn unbuffered_sync() -> Fixture {
    let mut d = Draft::new();
    let main = d.main;
    let worker = d.b.declare_function(
        "main",
        "worker",
        Type::func(vec![Type::chan(Type::int())], vec![]),
    );
    d.functions.insert("worker", worker);
    let c = d.b.add_param(worker, "c", Type::chan(Type::int()));
    d.values.insert("c", c);

    d.b.add_block(main);
    let ch = d.make_chan(main, 0, "ch", 0);
    d.pointer.add_label(c, Label::new(ch));
    let worker_value = d.b.func_value(worker);
    d.named_instr(
        main,
        0,
        "go",
        InstrKind::Go(CallCommon {
            callee: Callee::Value(worker_value),
            args: vec![ch],
        }),
    );
    let received = d.b.value_instr(
        main,
        0,
        "t1",
        Type::int(),
        InstrKind::UnOp {
            op: UnOpKind::Arrow,
            x: ch,
            comma_ok: false,
        },
    );
    d.values.insert("received", received);
    d.named_instr(main, 0, "return", InstrKind::Return { results: vec![] });

    d.b.add_block(worker);
    let one = d.b.int_const(1);
    d.named_instr(worker, 0, "send", InstrKind::Send { chan: c, x: one });
    d.named_instr(worker, 0, "worker_return", InstrKind::Return { results: vec![] });
    d.finish()
}

/// ```go
/// ch := make(chan int)
/// select {
/// case <-ch:
/// default:
/// }
/// ```
pub fn select_with_default() -> Fixture {
    let mut d = Draft::new();
    let main = d.main;
    for _ in 0..4 {
        d.b.add_block(main);
    }
    d.b.edge(main, 0, 1).edge(main, 0, 2).edge(main, 1, 3).edge(main, 2, 3);

    let ch = d.make_chan(main, 0, "ch", 0);
    let selected = d.b.value_instr(
        main,
        0,
        "t1",
        Type::tuple(vec![Type::int(), Type::bool(), Type::int()]),
        InstrKind::Select {
            states: vec![SelectState {
                chan: ch,
                dir: ChanDir::Recv,
                send: None,
            }],
            blocking: false,
        },
    );
    d.values.insert("select", selected);
    let index = d.b.value_instr(
        main,
        0,
        "t2",
        Type::int(),
        InstrKind::Extract {
            tuple: selected,
            index: 0,
        },
    );
    let zero = d.b.int_const(0);
    let is_case = d.b.value_instr(
        main,
        0,
        "t3",
        Type::bool(),
        InstrKind::BinOp {
            op: BinOpKind::Eql,
            x: index,
            y: zero,
        },
    );
    d.b.instr(main, 0, InstrKind::If { cond: is_case });

    d.b.value_instr(
        main,
        1,
        "t4",
        Type::int(),
        InstrKind::Extract {
            tuple: selected,
            index: 2,
        },
    );
    d.named_instr(main, 1, "case_jump", InstrKind::Jump);
    d.named_instr(main, 2, "default_jump", InstrKind::Jump);
    d.named_instr(main, 3, "return", InstrKind::Return { results: vec![] });
    d.finish()
}

/// ```go
/// mu := new(sync.Mutex)
/// mu.Lock()
/// defer mu.Unlock()
/// if true { return }
/// panic(nil)
/// ```
pub fn mutex_with_defer() -> Fixture {
    let mut d = Draft::new();
    let main = d.main;
    let mutex = d.b.mutex_type();
    let mutex_ptr = Type::pointer(mutex);
    let unit = Type::func(vec![], vec![]);
    let lock = d
        .b
        .declare_method("sync", "Lock", Some(mutex_ptr.clone()), unit.clone());
    let unlock = d
        .b
        .declare_method("sync", "Unlock", Some(mutex_ptr.clone()), unit);
    d.functions.insert("lock", lock);
    d.functions.insert("unlock", unlock);

    for _ in 0..3 {
        d.b.add_block(main);
    }
    d.b.edge(main, 0, 1).edge(main, 0, 2);
    let mu = d
        .b
        .value_instr(main, 0, "mu", mutex_ptr, InstrKind::Alloc { heap: true });
    d.values.insert("mu", mu);
    d.pointer.add_label(mu, Label::new(mu));
    let lock_value = d.b.func_value(lock);
    d.call(main, 0, "lock", lock_value, vec![mu]);
    let unlock_value = d.b.func_value(unlock);
    d.named_instr(
        main,
        0,
        "defer",
        InstrKind::Defer(CallCommon {
            callee: Callee::Value(unlock_value),
            args: vec![mu],
        }),
    );
    let yes = d.b.constant(Literal::Bool(true), Type::bool());
    d.b.instr(main, 0, InstrKind::If { cond: yes });
    d.named_instr(main, 1, "return", InstrKind::Return { results: vec![] });
    let nil = d.b.constant(Literal::Nil, Type::interface(&[]));
    d.named_instr(main, 2, "panic", InstrKind::Panic { x: nil });
    d.finish()
}

/// ```go
/// func main(f func()) {
///     f()
///     ch := make(chan int)
/// }
/// ```
///
/// The points-to analysis found no callee for `f`.
pub fn call_without_callees() -> Fixture {
    let mut d = Draft::new();
    let main = d.main;
    let f = d.b.add_param(main, "f", Type::func(vec![], vec![]));
    d.b.add_block(main);
    d.call(main, 0, "call", f, vec![]);
    d.make_chan(main, 0, "ch", 0);
    d.named_instr(main, 0, "return", InstrKind::Return { results: vec![] });
    d.finish()
}
