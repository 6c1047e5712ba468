use std::rc::Rc;

use analysis::domains::Flat;

use crate::config::Options;
use crate::domains::{AbstractValue, ChannelInfo, FieldKey, PointsToSet};
use crate::location::Location;
use crate::memory::Memory;
use crate::pointer::{Label, PathStep, PointerResult};
use crate::ssa::builder::ProgramBuilder;
use crate::ssa::{CallCommon, Callee, FunctionId, InstrKind, Program, Type, ValueId};
use crate::wildcard::Materializer;

/// ```go
/// type T struct { a int; ch chan int }
/// var g T
/// func main(p *T, s []int, f func(), l sync.Locker, c chan int, pp **T) {
///     t0 := new(T)
///     t1 := new(int)
///     t2 := make([]int, 1)
///     t3 := append(s, 1)
///     t4 := func() { x }
///     mu := new(sync.Mutex)
///     t5 := sync.Locker(mu)
///     t6 := make(chan int)
///     cell := new(*T)
/// }
/// ```
struct Sample {
    program: Program,
    t: Type,
    closure_fn: FunctionId,
    values: Vec<(&'static str, ValueId)>,
}

impl Sample {
    fn new() -> Self {
        let mut b = ProgramBuilder::new();
        let t = b.named_type(
            "main",
            "T",
            Type::structure(vec![("a", Type::int()), ("ch", Type::chan(Type::int()))]),
        );
        let locker = b.locker_type();
        let mutex = b.mutex_type();
        let unit = Type::func(vec![], vec![]);
        let main = b.declare_function("main", "main", unit.clone());
        let closure_fn = b.declare_function("main", "main$1", unit.clone());
        b.add_free_var(closure_fn, "x", Type::int());

        let g = b.global("g", t.clone());
        let p = b.add_param(main, "p", Type::pointer(t.clone()));
        let s = b.add_param(main, "s", Type::slice(Type::int()));
        let f = b.add_param(main, "f", unit.clone());
        let l = b.add_param(main, "l", locker.clone());
        let c = b.add_param(main, "c", Type::chan(Type::int()));
        let pp = b.add_param(main, "pp", Type::pointer(Type::pointer(t.clone())));

        b.add_block(main);
        let alloc = |b: &mut ProgramBuilder, name: &str, ty: Type| {
            b.value_instr(main, 0, name, Type::pointer(ty), InstrKind::Alloc { heap: true })
        };
        let t0 = alloc(&mut b, "t0", t.clone());
        let t1 = alloc(&mut b, "t1", Type::int());
        let one = b.int_const(1);
        let t2 = b.value_instr(
            main,
            0,
            "t2",
            Type::slice(Type::int()),
            InstrKind::MakeSlice { len: one },
        );
        let append = b.builtin("append").unwrap();
        let t3 = b.value_instr(
            main,
            0,
            "t3",
            Type::slice(Type::int()),
            InstrKind::Call(CallCommon {
                callee: Callee::Value(append),
                args: vec![s, one],
            }),
        );
        let closure_value = b.func_value(closure_fn);
        let t4 = b.value_instr(
            main,
            0,
            "t4",
            unit,
            InstrKind::MakeClosure {
                func: closure_value,
                bindings: vec![one],
            },
        );
        let mu = alloc(&mut b, "mu", mutex);
        let t5 = b.value_instr(main, 0, "t5", locker, InstrKind::MakeInterface { x: mu });
        let zero = b.int_const(0);
        let t6 = b.value_instr(
            main,
            0,
            "t6",
            Type::chan(Type::int()),
            InstrKind::MakeChan { size: zero },
        );
        let cell = alloc(&mut b, "cell", Type::pointer(t.clone()));
        b.instr(main, 0, InstrKind::Return { results: vec![] });

        Self {
            program: b.finish(),
            t,
            closure_fn,
            values: vec![
                ("g", g),
                ("p", p),
                ("s", s),
                ("f", f),
                ("l", l),
                ("c", c),
                ("t0", t0),
                ("t1", t1),
                ("t2", t2),
                ("t3", t3),
                ("t4", t4),
                ("mu", mu),
                ("t5", t5),
                ("t6", t6),
                ("pp", pp),
                ("cell", cell),
            ],
        }
    }

    fn v(&self, name: &str) -> ValueId {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, v)| v)
            .unwrap()
    }

    fn top(&self, name: &str) -> Location {
        Location::top_alloc(self.v(name))
    }
}

#[test]
fn labels_become_top_locations_and_nil() {
    let sample = Sample::new();
    let mut pointer = PointerResult::new();
    pointer
        .add_label(sample.v("p"), Label::new(sample.v("t0")))
        .add_label(sample.v("p"), Label::new(sample.v("g")));
    let options = Options::default();
    let mut materializer = Materializer::new(&sample.program, Rc::new(pointer), &options);

    let expected = PointsToSet::nil()
        .add(sample.top("t0"))
        .add(Location::Global(sample.v("g")));
    assert_eq!(materializer.points_to(sample.v("p")), expected);

    // The global is bound already, only the allocation gets the top value.
    let bound = Memory::new()
        .update(&Location::Global(sample.v("g")), AbstractValue::top_struct())
        .unwrap();
    let (value, memory) = materializer.materialize(&bound, sample.v("p")).unwrap();
    assert_eq!(value, AbstractValue::Pointer(expected));
    let object = AbstractValue::top_of_type(&sample.t, &sample.program);
    assert_eq!(memory.get(&sample.top("t0")), object);
    assert_eq!(object.field(&FieldKey::Index(0)), AbstractValue::top_basic());
    assert_eq!(object.field(&FieldKey::Index(1)), AbstractValue::Wildcard);
    assert_eq!(
        memory.get(&Location::Global(sample.v("g"))),
        AbstractValue::top_struct()
    );
}

#[test]
fn field_paths_and_type_mismatches() {
    let sample = Sample::new();
    let mut pointer = PointerResult::new();
    // A pointer to the first field of t0, and a bogus label of type *int.
    let field = Label::with_path(sample.v("t0"), vec![PathStep::FieldAccess(0)]);
    pointer
        .add_label(sample.v("t1"), Label::new(sample.v("t1")))
        .add_label(sample.v("p"), Label::new(sample.v("t1")));
    let options = Options {
        verbose: true,
        ..Options::default()
    };
    let mut materializer = Materializer::new(&sample.program, Rc::new(pointer.clone()), &options);
    // `p` is a *T, the label is an int.
    assert_eq!(materializer.points_to(sample.v("p")), PointsToSet::nil());

    pointer.add_label(sample.v("t1"), field);
    let mut materializer = Materializer::new(&sample.program, Rc::new(pointer), &options);
    assert_eq!(
        materializer.points_to(sample.v("t1")),
        PointsToSet::nil()
            .add(sample.top("t1"))
            .add(sample.top("t0").field(0))
    );
    let (_, memory) = materializer.materialize(&Memory::new(), sample.v("t1")).unwrap();
    assert_eq!(memory.get(&sample.top("t1")), AbstractValue::top_basic());
    assert_eq!(
        memory.get(&sample.top("t0")).field(&FieldKey::Index(0)),
        AbstractValue::top_basic()
    );
}

#[test]
fn append_sites_are_filtered() {
    let sample = Sample::new();
    let mut pointer = PointerResult::new();
    pointer
        .add_label(sample.v("s"), Label::new(sample.v("t2")))
        .add_label(sample.v("s"), Label::new(sample.v("t3")));
    let pointer = Rc::new(pointer);

    let filtering = Options::default();
    let mut materializer = Materializer::new(&sample.program, pointer.clone(), &filtering);
    assert_eq!(
        materializer.points_to(sample.v("s")),
        PointsToSet::nil().add(sample.top("t2"))
    );
    let (_, memory) = materializer.materialize(&Memory::new(), sample.v("s")).unwrap();
    assert_eq!(
        memory.get(&sample.top("t2")),
        AbstractValue::array(AbstractValue::top_basic())
    );

    let keeping = Options {
        filter_append_sites: false,
        ..Options::default()
    };
    let mut materializer = Materializer::new(&sample.program, pointer, &keeping);
    assert_eq!(materializer.points_to(sample.v("s")).size(), 3);
}

#[test]
fn the_cache_follows_the_pointer_result() {
    let sample = Sample::new();
    let mut first = PointerResult::new();
    first.add_label(sample.v("c"), Label::new(sample.v("t6")));
    let first = Rc::new(first);
    let options = Options::default();
    let mut materializer = Materializer::new(&sample.program, first.clone(), &options);

    let cached = materializer.points_to(sample.v("c"));
    materializer.set_pointer(first.clone());
    assert!(materializer.points_to(sample.v("c")).ptr_eq(&cached));

    materializer.set_pointer(Rc::new(PointerResult::new()));
    assert_eq!(materializer.points_to(sample.v("c")), PointsToSet::nil());
    assert!(!Rc::ptr_eq(materializer.pointer(), &first));
}

#[test]
fn channels_closures_and_lockers() {
    let sample = Sample::new();
    let mut pointer = PointerResult::new();
    pointer
        .add_label(sample.v("c"), Label::new(sample.v("t6")))
        .add_label(sample.v("f"), Label::new(sample.v("t4")))
        .add_label(sample.v("f"), Label::new(sample.program.function(sample.closure_fn).value))
        .add_label(sample.v("l"), Label::new(sample.v("t5")))
        .add_label(sample.v("mu"), Label::new(sample.v("mu")));
    let options = Options::default();
    let mut materializer = Materializer::new(&sample.program, Rc::new(pointer), &options);

    let (_, memory) = materializer.materialize(&Memory::new(), sample.v("c")).unwrap();
    let mut info = ChannelInfo::new(Flat::Top).to_top();
    info.payload = AbstractValue::top_basic();
    assert_eq!(memory.get(&sample.top("t6")), AbstractValue::channel(info));

    let (value, memory) = materializer.materialize(&memory, sample.v("f")).unwrap();
    assert!(
        value
            .points_to()
            .unwrap()
            .contains(&Location::FunctionPointer(sample.closure_fn))
    );
    let closure = memory.get(&sample.top("t4"));
    assert_eq!(closure.closure_function(), Some(sample.closure_fn));
    assert_eq!(
        closure,
        AbstractValue::closure(sample.closure_fn, vec![AbstractValue::top_basic()])
    );

    // The locker interface points to the materialized mutex.
    let (value, memory) = materializer.materialize(&memory, sample.v("l")).unwrap();
    assert_eq!(
        value,
        AbstractValue::pointer_to([sample.top("t5"), Location::Nil])
    );
    assert_eq!(
        memory.get(&sample.top("t5")),
        AbstractValue::pointer_to([sample.top("mu"), Location::Nil])
    );
    assert_eq!(memory.get(&sample.top("mu")).mutex(), Some(Flat::Top));
}

#[test]
fn pointers_to_pointers_use_the_indirect_labels() {
    let sample = Sample::new();
    let mut pointer = PointerResult::new();
    pointer
        .add_label(sample.v("pp"), Label::new(sample.v("cell")))
        .add_indirect_label(sample.v("pp"), Label::new(sample.v("t0")))
        // An int cannot be pointed to by a *T.
        .add_indirect_label(sample.v("pp"), Label::new(sample.v("t1")));
    let options = Options::default();
    let mut materializer = Materializer::new(&sample.program, Rc::new(pointer), &options);

    let inner = PointsToSet::nil().add(sample.top("t0"));
    assert_eq!(materializer.indirect_points_to(sample.v("pp")), inner);
    // Single pointers have no indirect targets.
    assert_eq!(materializer.indirect_points_to(sample.v("p")), PointsToSet::nil());

    let (value, memory) = materializer.materialize(&Memory::new(), sample.v("pp")).unwrap();
    assert_eq!(
        value,
        AbstractValue::Pointer(PointsToSet::nil().add(sample.top("cell")))
    );
    assert_eq!(memory.get(&sample.top("cell")), AbstractValue::Pointer(inner));
    assert_eq!(
        memory.get(&sample.top("t0")),
        AbstractValue::top_of_type(&sample.t, &sample.program)
    );

    // Without indirect labels the cell holds an unknown pointer.
    let mut pointer = PointerResult::new();
    pointer.add_label(sample.v("pp"), Label::new(sample.v("cell")));
    materializer.set_pointer(Rc::new(pointer));
    let (_, memory) = materializer.materialize(&Memory::new(), sample.v("pp")).unwrap();
    assert_eq!(memory.get(&sample.top("cell")), AbstractValue::Wildcard);
}
