use analysis::domains::{Dropped, Flat, Height, Interval, JoinSemiLattice, Prod2};
use itertools::iproduct;

use crate::domains::*;
use crate::error::AnalysisError;
use crate::location::{AINDEX, Goroutine, Location};
use crate::ssa::builder::ProgramBuilder;
use crate::ssa::{FunctionId, Literal, Type, ValueId};

fn alloc(site: usize) -> Location {
    Location::alloc(Goroutine::Thread(0), None, ValueId(site))
}

/// Join laws within a family of compatible values.
fn check_join_laws(elements: &[AbstractValue]) {
    let ctx = ();
    for (a, b) in iproduct!(elements, elements) {
        let join = a.join(b, &ctx);
        assert_eq!(join, b.join(a, &ctx), "join of {a} and {b} is not commutative");
        assert!(&join >= a && &join >= b, "{join} is not an upper bound of {a} and {b}");
        let meet = a.meet(b);
        assert!(&meet <= a && &meet <= b, "{meet} is not a lower bound of {a} and {b}");
        assert_eq!(a.join(a, &ctx), *a);
        assert!(AbstractValue::Untyped <= *a);
        if a <= b {
            assert_eq!(&join, b);
        }
    }
    for (a, b, c) in iproduct!(elements, elements, elements) {
        assert_eq!(a.join(b, &ctx).join(c, &ctx), a.join(&b.join(c, &ctx), &ctx));
    }
}

#[test]
fn pointer_and_wildcard_laws() {
    check_join_laws(&[
        AbstractValue::Untyped,
        AbstractValue::nil(),
        AbstractValue::pointer_to([alloc(1)]),
        AbstractValue::pointer_to([alloc(1), alloc(2)]),
        AbstractValue::Wildcard,
    ]);
    let p = AbstractValue::pointer_to([alloc(1)]);
    assert_eq!(p.join(&AbstractValue::Wildcard, &()), AbstractValue::Wildcard);
    assert_eq!(p.meet(&AbstractValue::Wildcard), p);
    assert_eq!(AbstractValue::Wildcard.meet(&p), p);
}

#[test]
fn basic_and_lock_laws() {
    check_join_laws(&[
        AbstractValue::Untyped,
        AbstractValue::int(1),
        AbstractValue::int(2),
        AbstractValue::top_basic(),
    ]);
    check_join_laws(&[
        AbstractValue::Untyped,
        AbstractValue::unlocked_mutex(),
        AbstractValue::Mutex(LOCKED),
        AbstractValue::Mutex(Flat::Top),
    ]);
    check_join_laws(&[
        AbstractValue::unlocked_rw_mutex(),
        AbstractValue::RwMutex(Prod2(UNLOCKED, Flat::Element(2))),
        AbstractValue::RwMutex(Prod2(LOCKED, Flat::Element(0))),
    ]);
    check_join_laws(&[
        AbstractValue::cond(PointsToSet::nil()),
        AbstractValue::cond(PointsToSet::singleton(alloc(1))),
        AbstractValue::Cond(Dropped::Top),
    ]);
    check_join_laws(&[
        AbstractValue::wait_group(0),
        AbstractValue::wait_group(1),
        AbstractValue::WaitGroup(Flat::Top),
    ]);
}

#[test]
fn channel_laws() {
    let open = AbstractValue::new_channel(Flat::Element(1));
    let closed = open.with_channel(|ch| ch.status = CLOSED);
    let full = open.with_channel(|ch| {
        ch.buffer_flat = Flat::Element(1);
        ch.buffer_interval = Interval::from(1);
        ch.payload = AbstractValue::int(4);
    });
    check_join_laws(&[
        AbstractValue::Untyped,
        AbstractValue::Channel(None),
        AbstractValue::nil_channel(),
        open.clone(),
        closed.clone(),
        full.clone(),
        open.to_top(),
    ]);

    let joined = open.join(&full, &());
    let info = joined.channel_info().unwrap();
    assert_eq!(info.buffer_flat, Flat::Top);
    assert_eq!(info.buffer_interval, Interval::new(0, 1));
    assert_eq!(info.payload, AbstractValue::int(4));
    assert_eq!(open.join(&closed, &()).channel_info().unwrap().status, Flat::Top);
    // Joining with a smaller channel keeps the very same record.
    let AbstractValue::Channel(Some(rc)) = open.join(&AbstractValue::nil_channel(), &()) else {
        panic!("expected a channel");
    };
    let AbstractValue::Channel(Some(orig)) = &open else {
        panic!("expected a channel");
    };
    assert!(std::rc::Rc::ptr_eq(&rc, orig));
}

#[test]
fn struct_laws() {
    let a = AbstractValue::struct_of([(FieldKey::Index(0), AbstractValue::int(1))]);
    let b = AbstractValue::struct_of([(FieldKey::Index(1), AbstractValue::int(2))]);
    check_join_laws(&[
        AbstractValue::Untyped,
        AbstractValue::Struct(None),
        AbstractValue::struct_of([]),
        a.clone(),
        b.clone(),
        AbstractValue::top_struct(),
    ]);
    let ab = a.join(&b, &());
    assert_eq!(ab.field(&FieldKey::Index(0)), AbstractValue::int(1));
    assert_eq!(ab.field(&FieldKey::Index(1)), AbstractValue::int(2));
    assert_eq!(ab.meet(&a), a);
    assert!(AbstractValue::Struct(None) < AbstractValue::struct_of([]));
}

#[test]
#[should_panic(expected = "Cannot combine abstract values tagged mutex and channel")]
fn mismatched_tags_are_fatal() {
    let _ = AbstractValue::unlocked_mutex().join(&AbstractValue::nil_channel(), &());
}

#[test]
fn update_fixes_the_tag() {
    let untyped = AbstractValue::Untyped;
    let mutex = untyped.update(AbstractValue::unlocked_mutex()).unwrap();
    assert_eq!(mutex, AbstractValue::unlocked_mutex());
    assert_eq!(
        mutex.update(AbstractValue::int(1)),
        Err(AnalysisError::TagMismatch {
            left: Tag::Mutex,
            right: Tag::Basic
        })
    );
    assert!(AbstractValue::nil().update(AbstractValue::Wildcard).is_ok());
}

#[test]
fn shapes_are_structural() {
    let array = AbstractValue::array(AbstractValue::int(0));
    assert!(array.is_array() && array.is_known_struct() && !array.is_map());
    assert_eq!(array.field(&FieldKey::Index(AINDEX)), AbstractValue::int(0));

    let map = AbstractValue::map(AbstractValue::string("k"), AbstractValue::int(1));
    assert!(map.is_map() && !map.is_array());

    let closure = AbstractValue::closure(FunctionId(3), vec![AbstractValue::nil()]);
    assert!(closure.is_closure());
    assert_eq!(closure.closure_function(), Some(FunctionId(3)));
    assert_eq!(closure.field(&FieldKey::Index(0)), AbstractValue::nil());

    assert!(AbstractValue::top_struct().is_top_struct());
    assert!(AbstractValue::Struct(None).is_bot_struct());
    assert_eq!(AbstractValue::top_struct().field(&FieldKey::Index(7)), AbstractValue::Wildcard);
    assert_eq!(AbstractValue::struct_of([]).field(&FieldKey::Index(7)), AbstractValue::Untyped);
}

#[test]
fn to_top_per_tag() {
    assert_eq!(AbstractValue::nil().to_top(), AbstractValue::Wildcard);
    assert_eq!(AbstractValue::int(3).to_top(), AbstractValue::top_basic());

    let ch = AbstractValue::new_channel(Flat::Element(2)).with_channel(|ch| ch.payload = AbstractValue::int(1));
    let top = ch.to_top();
    let info = top.channel_info().unwrap();
    assert_eq!(info.status, Flat::Top);
    assert_eq!(info.capacity, Flat::Top);
    assert_eq!(info.buffer_flat, Flat::Top);
    assert!(info.buffer_interval.is_top());
    assert_eq!(info.payload, AbstractValue::top_basic());

    let s = AbstractValue::struct_of([
        (FieldKey::Index(0), AbstractValue::int(1)),
        (FieldKey::Index(1), AbstractValue::unlocked_mutex()),
    ]);
    let top = s.to_top();
    assert_eq!(top.field(&FieldKey::Index(0)), AbstractValue::top_basic());
    assert_eq!(top.field(&FieldKey::Index(1)), AbstractValue::Mutex(Flat::Top));
}

#[test]
#[should_panic(expected = "top of a closure")]
fn closures_have_no_top() {
    let _ = AbstractValue::closure(FunctionId(0), vec![]).to_top();
}

#[test]
fn difference_laws() {
    let values = [
        AbstractValue::Untyped,
        AbstractValue::int(1),
        AbstractValue::top_basic(),
        AbstractValue::struct_of([(FieldKey::Index(0), AbstractValue::int(1))]),
        AbstractValue::struct_of([
            (FieldKey::Index(0), AbstractValue::int(2)),
            (FieldKey::Index(1), AbstractValue::int(1)),
        ]),
        AbstractValue::top_struct(),
    ];
    for v in &values {
        assert_eq!(v.difference(v), (AbstractValue::Untyped, false));
    }
    for (v, w) in iproduct!(&values, &values) {
        if !v.is_compatible(w) {
            continue;
        }
        let (delta, relevant) = v.difference(w);
        assert_eq!(v.join(&delta, &()), v.join(w, &()), "difference of {v} and {w}");
        assert_eq!(relevant, !(w <= v));
    }

    // Only the changed fields are part of the delta.
    let old = AbstractValue::struct_of([
        (FieldKey::Index(0), AbstractValue::int(1)),
        (FieldKey::Index(1), AbstractValue::int(1)),
    ]);
    let new = old.with_field(FieldKey::Index(1), AbstractValue::int(2));
    let (delta, relevant) = old.difference(&new);
    assert!(relevant);
    assert_eq!(delta, AbstractValue::struct_of([(FieldKey::Index(1), AbstractValue::int(2))]));
}

#[test]
fn inject_top_location_recurses() {
    let top = Location::top_alloc(ValueId(1));
    let inner = AbstractValue::pointer_to([alloc(1), alloc(2)]);
    let ch = AbstractValue::new_channel(Flat::Element(0)).with_channel(|ch| ch.payload = inner.clone());
    let s = AbstractValue::struct_of([(FieldKey::Index(0), ch)]);
    let injected = s.inject_top_location(&top);
    let ch = injected.field(&FieldKey::Index(0));
    let payload = &ch.channel_info().unwrap().payload;
    assert_eq!(
        payload.points_to().unwrap(),
        &PointsToSet::new().add(top.clone()).add(alloc(2))
    );
}

#[test]
fn typed_values() {
    let mut b = ProgramBuilder::new();
    let mutex = b.mutex_type();
    let wg = b.wait_group_type();
    let pair = Type::structure(vec![("mu", mutex.clone()), ("n", Type::int())]);
    let program = b.finish();

    let top = AbstractValue::top_of_type(&pair, &program);
    assert_eq!(top.field(&FieldKey::Index(0)), AbstractValue::Mutex(Flat::Top));
    assert_eq!(top.field(&FieldKey::Index(1)), AbstractValue::top_basic());
    assert_eq!(
        AbstractValue::top_of_type(&Type::chan(Type::int()), &program),
        AbstractValue::Wildcard
    );

    let zero = AbstractValue::zero_of_type(&pair, &program);
    assert_eq!(zero.field(&FieldKey::Index(0)), AbstractValue::unlocked_mutex());
    assert_eq!(zero.field(&FieldKey::Index(1)), AbstractValue::int(0));
    assert_eq!(AbstractValue::zero_of_type(&wg, &program), AbstractValue::wait_group(0));
    assert_eq!(
        AbstractValue::zero_of_type(&Type::pointer(Type::int()), &program),
        AbstractValue::nil()
    );
    assert_eq!(
        AbstractValue::zero_of_type(&Type::array(Type::bool(), 3), &program),
        AbstractValue::array(AbstractValue::bool(false))
    );

    let bytes = Type::slice(Type::Basic(crate::ssa::BasicKind::Uint8));
    let s = AbstractValue::string("hi");
    assert_eq!(s.coerce(&Type::string(), &bytes, &program), AbstractValue::Wildcard);
    assert_eq!(
        s.coerce(&Type::string(), &Type::string(), &program),
        AbstractValue::string("hi")
    );

    assert_eq!(
        AbstractValue::from_literal(&Literal::Int(42), &Type::int(), &program),
        Ok(AbstractValue::int(42))
    );
    assert_eq!(
        AbstractValue::from_literal(&Literal::Int(1 << 70), &Type::int(), &program),
        Err(AnalysisError::UnrepresentableConstant((1_i128 << 70).to_string()))
    );
    assert_eq!(
        AbstractValue::from_literal(&Literal::Nil, &Type::chan(Type::int()), &program),
        Ok(AbstractValue::nil())
    );
}

#[test]
fn heights() {
    assert_eq!(AbstractValue::Untyped.height(), 0);
    assert_eq!(AbstractValue::int(1).height(), 1);
    assert_eq!(AbstractValue::Wildcard.height(), i64::MAX);
    assert_eq!(AbstractValue::pointer_to([alloc(1), alloc(2)]).height(), 2);
    assert!(AbstractValue::new_channel(Flat::Element(1)).to_top().height() < 0);
}
