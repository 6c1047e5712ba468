use analysis::domains::{Flat, INF, Interval, NEG_INF, Prod2};

use crate::config::{BufferAbstraction, Options};
use crate::domains::*;
use crate::error::AnalysisError;
use crate::location::{Goroutine, Location};
use crate::memory::Memory;
use crate::semantics::{self, EvalContext};
use crate::ssa::builder::ProgramBuilder;
use crate::ssa::{BasicKind, BinOpKind, Type, UnOpKind, ValueId};

fn chan(capacity: i64, status: Flat<ChanStatus>, buffer: i64, payload: AbstractValue) -> AbstractValue {
    AbstractValue::channel(ChannelInfo {
        capacity: Flat::Element(capacity),
        status,
        buffer_flat: Flat::Element(buffer),
        buffer_interval: Interval::from(buffer),
        payload,
    })
}

fn with_interval(value: &AbstractValue, interval: Interval) -> AbstractValue {
    value.with_channel(|ch| ch.buffer_interval = interval)
}

fn info(value: &AbstractValue) -> &ChannelInfo {
    value.channel_info().unwrap()
}

fn comma_ok(value: AbstractValue, ok: AbstractValue) -> AbstractValue {
    AbstractValue::struct_of([(FieldKey::Index(0), value), (FieldKey::Index(1), ok)])
}

fn alloc(site: usize) -> Location {
    Location::alloc(Goroutine::Thread(0), None, ValueId(site))
}

#[test]
fn close_depends_on_the_status() {
    let open = semantics::close(&chan(1, OPEN, 0, AbstractValue::Untyped)).unwrap();
    assert!(open.may_succeed() && !open.may_panic());
    assert_eq!(info(open.ok()).status, CLOSED);

    let closed = semantics::close(&chan(1, CLOSED, 0, AbstractValue::Untyped)).unwrap();
    assert!(closed.may_panic() && !closed.may_succeed());
    assert_eq!(info(closed.panicked()).status, CLOSED);

    let unknown = semantics::close(&chan(1, Flat::Top, 0, AbstractValue::Untyped)).unwrap();
    assert!(unknown.may_panic() && unknown.may_succeed());
    assert_eq!(info(unknown.panicked()).status, CLOSED);

    let nil = semantics::close(&AbstractValue::nil_channel()).unwrap();
    assert!(nil.may_panic() && !nil.may_succeed());
    assert!(!nil.blocks());
}

#[test]
fn send_into_free_buffer_slot() {
    let ch = chan(2, OPEN, 1, AbstractValue::Untyped);
    let result = semantics::send_flat(&AbstractValue::int(7), &ch).unwrap();
    assert!(result.may_succeed() && !result.may_panic());
    assert_eq!(info(result.ok()).buffer_flat, Flat::Element(2));
    assert_eq!(info(result.ok()).payload, AbstractValue::int(7));

    let full = chan(1, OPEN, 1, AbstractValue::int(1));
    assert!(semantics::send_flat(&AbstractValue::int(7), &full).unwrap().blocks());

    let unknown_capacity = AbstractValue::new_channel(Flat::Top);
    let result = semantics::send_flat(&AbstractValue::int(7), &unknown_capacity).unwrap();
    assert_eq!(info(result.ok()).buffer_flat, Flat::Top);
    assert_eq!(info(result.ok()).payload, AbstractValue::int(7));
}

#[test]
fn receive_from_a_closed_and_drained_channel() {
    let ch = chan(1, CLOSED, 0, AbstractValue::Untyped);
    let zero = AbstractValue::int(0);
    let result = semantics::receive_flat(&zero, true, &ch).unwrap();
    assert!(result.may_succeed() && !result.may_panic());
    assert_eq!(
        info(result.ok()).payload,
        comma_ok(AbstractValue::int(0), AbstractValue::bool(false))
    );

    let empty = chan(1, OPEN, 0, AbstractValue::Untyped);
    assert!(semantics::receive_flat(&zero, false, &empty).unwrap().blocks());
}

#[test]
fn received_values_are_split_from_the_channel() {
    let before = chan(2, OPEN, 1, AbstractValue::int(3));
    let result = semantics::receive_flat(&AbstractValue::int(0), false, &before).unwrap();
    let (after, received) = semantics::split_received(&before, result.ok());
    assert_eq!(received, AbstractValue::int(3));
    assert_eq!(info(&after).buffer_flat, Flat::Element(0));
    assert_eq!(info(&after).payload, AbstractValue::int(3));

    let (after, received) = semantics::split_received(&AbstractValue::Untyped, &AbstractValue::Untyped);
    assert_eq!((after, received), (AbstractValue::Untyped, AbstractValue::Untyped));
}

#[test]
fn lock_blocks_on_a_held_mutex() {
    let held = AbstractValue::Mutex(LOCKED);
    assert!(semantics::lock(&held).unwrap().blocks());

    let unknown = semantics::lock(&AbstractValue::Mutex(Flat::Top)).unwrap();
    assert_eq!(unknown, OpOutcomes::succeed(AbstractValue::Mutex(LOCKED)));
    assert!(semantics::lock(&AbstractValue::Untyped).unwrap().blocks());
    assert!(matches!(
        semantics::lock(&AbstractValue::int(0)),
        Err(AnalysisError::UnsupportedOperation(_))
    ));
}

#[test]
fn runlock_without_readers_panics() {
    let free = AbstractValue::unlocked_rw_mutex();
    let result = semantics::runlock(&free).unwrap();
    assert_eq!(result, OpOutcomes::panic(free.clone()));

    let read = semantics::rlock(&free).unwrap();
    assert_eq!(
        read.ok(),
        &AbstractValue::RwMutex(Prod2(UNLOCKED, Flat::Element(1)))
    );
    // Writers wait for the readers.
    assert!(semantics::lock(read.ok()).unwrap().blocks());
    let released = semantics::runlock(read.ok()).unwrap();
    assert_eq!(released, OpOutcomes::succeed(free.clone()));

    let written = semantics::lock(&free).unwrap();
    assert_eq!(
        written.ok(),
        &AbstractValue::RwMutex(Prod2(LOCKED, Flat::Element(0)))
    );
    assert!(semantics::rlock(written.ok()).unwrap().blocks());
    assert!(semantics::runlock(written.ok()).unwrap().may_panic());
}

#[test]
fn send_to_closed_channel_panics() {
    let made = AbstractValue::new_channel(Flat::Element(1));
    let closed = semantics::close(&made).unwrap();
    let result = semantics::send_flat(&AbstractValue::int(1), closed.ok()).unwrap();
    assert!(result.may_panic());
    assert!(!result.may_succeed());
    assert_eq!(info(result.panicked()).status, CLOSED);

    let options = Options {
        buffer_abstraction: BufferAbstraction::Interval,
        ..Options::default()
    };
    let result = semantics::send(&AbstractValue::int(1), closed.ok(), &options).unwrap();
    assert!(result.may_panic() && !result.may_succeed());
}

#[test]
fn unbuffered_rendezvous() {
    let made = AbstractValue::new_channel(Flat::Element(0));
    let result = semantics::sync(false, &made).unwrap();
    assert!(result.may_succeed() && !result.may_panic());
    let ch = info(result.ok());
    assert_eq!(ch.capacity, Flat::Element(0));
    assert_eq!(ch.buffer_flat, Flat::Element(0));
    assert_eq!(ch.buffer_interval, Interval::from(0));
    assert_eq!(ch.status, OPEN);

    let closed = chan(0, CLOSED, 0, AbstractValue::Untyped);
    assert!(semantics::sync(false, &closed).unwrap().blocks());

    let handed_over = chan(0, OPEN, 0, AbstractValue::int(1));
    let result = semantics::sync(true, &handed_over).unwrap();
    assert_eq!(
        info(result.ok()).payload,
        comma_ok(AbstractValue::int(1), AbstractValue::bool(true))
    );
}

#[test]
fn nil_channels_block() {
    let nil = AbstractValue::nil_channel();
    let one = AbstractValue::int(1);
    assert_eq!(semantics::send_flat(&one, &nil).unwrap(), OpOutcomes::block());
    assert!(semantics::send_interval(&one, &nil).unwrap().blocks());
    assert!(semantics::receive_flat(&one, false, &nil).unwrap().blocks());
    assert!(semantics::receive_interval(&one, false, &nil).unwrap().blocks());
    assert!(semantics::sync(false, &nil).unwrap().blocks());
    assert!(semantics::send_flat(&one, &AbstractValue::Channel(None)).unwrap().blocks());
    assert!(semantics::send_flat(&one, &AbstractValue::Untyped).unwrap().blocks());
    assert!(semantics::send_flat(&one, &one).is_err());
}

#[test]
fn double_unlock_panics() {
    let mutex = AbstractValue::unlocked_mutex();
    let locked = semantics::lock(&mutex).unwrap();
    let unlocked = semantics::unlock(locked.ok()).unwrap();
    assert_eq!(unlocked, OpOutcomes::succeed(mutex.clone()));

    let again = semantics::unlock(unlocked.ok()).unwrap();
    assert!(!again.may_succeed());
    assert_eq!(again.panicked(), &AbstractValue::Mutex(UNLOCKED));

    let unknown = semantics::unlock(&AbstractValue::Mutex(Flat::Top)).unwrap();
    assert!(unknown.may_succeed() && unknown.may_panic());
}

#[test]
fn interval_buffers() {
    let ch = with_interval(&chan(2, OPEN, 0, AbstractValue::int(1)), Interval::new(0, 1));
    let sent = semantics::send_interval(&AbstractValue::int(2), &ch).unwrap();
    assert_eq!(info(sent.ok()).buffer_interval, Interval::new(1, 2));
    assert_eq!(info(sent.ok()).payload, AbstractValue::top_basic());

    // Only the buffers that are not full can take the element.
    let sent = semantics::send_interval(&AbstractValue::int(1), sent.ok()).unwrap();
    assert_eq!(info(sent.ok()).buffer_interval, Interval::from(2));
    assert!(semantics::send_interval(&AbstractValue::int(1), sent.ok()).unwrap().blocks());

    let unbounded = with_interval(&AbstractValue::new_channel(Flat::Top), Interval::new(0, 3));
    let sent = semantics::send_interval(&AbstractValue::int(1), &unbounded).unwrap();
    assert_eq!(info(sent.ok()).buffer_interval, Interval::new(1, 4));

    // An unknown buffer stays unbounded below.
    let unknown = with_interval(&chan(2, OPEN, 0, AbstractValue::int(1)), Interval::new(NEG_INF, INF));
    let sent = semantics::send_interval(&AbstractValue::int(1), &unknown).unwrap();
    assert_eq!(info(sent.ok()).buffer_interval, Interval::new(NEG_INF, INF));

    let maybe_closed = with_interval(&chan(2, Flat::Top, 0, AbstractValue::int(3)), Interval::new(0, 1));
    let received = semantics::receive_interval(&AbstractValue::int(0), true, &maybe_closed).unwrap();
    assert!(received.may_succeed() && !received.may_panic());
    let ch = info(received.ok());
    assert_eq!(ch.buffer_interval, Interval::from(0));
    assert_eq!(ch.status, Flat::Top);
    assert_eq!(
        ch.payload,
        comma_ok(AbstractValue::top_basic(), AbstractValue::top_basic())
    );

    let empty = chan(2, OPEN, 0, AbstractValue::Untyped);
    assert!(semantics::receive_interval(&AbstractValue::int(0), false, &empty).unwrap().blocks());
    let options = Options {
        buffer_abstraction: BufferAbstraction::Interval,
        ..Options::default()
    };
    assert!(semantics::receive(&AbstractValue::int(0), false, &empty, &options).unwrap().blocks());
}

#[test]
fn wait_groups() {
    let one = AbstractValue::wait_group(1);
    assert!(semantics::wg_wait(&one).unwrap().blocks());
    let done = semantics::wg_done(&one).unwrap();
    assert_eq!(done, OpOutcomes::succeed(AbstractValue::wait_group(0)));
    assert!(semantics::wg_wait(done.ok()).unwrap().may_succeed());

    let negative = semantics::wg_done(done.ok()).unwrap();
    assert_eq!(negative, OpOutcomes::panic(AbstractValue::wait_group(0)));

    let unknown = semantics::wg_add(Flat::Top, &one).unwrap();
    assert_eq!(unknown.ok(), &AbstractValue::WaitGroup(Flat::Top));
    assert!(semantics::wg_wait(unknown.ok()).unwrap().may_succeed());
    let overflow = semantics::wg_add(Flat::Element(i64::MAX), &one).unwrap();
    assert_eq!(overflow.ok(), &AbstractValue::WaitGroup(Flat::Top));
}

#[test]
fn condition_variables() {
    let held = AbstractValue::Mutex(LOCKED);
    let waited = semantics::cond_wait(&held).unwrap();
    assert_eq!(waited, OpOutcomes::succeed(AbstractValue::unlocked_mutex()));
    let woken = semantics::cond_wake(waited.ok()).unwrap();
    assert_eq!(woken.ok(), &held);

    let free = AbstractValue::unlocked_mutex();
    assert_eq!(semantics::cond_wait(&free).unwrap(), OpOutcomes::panic(free));
    let unknown = semantics::cond_wait(&AbstractValue::Mutex(Flat::Top)).unwrap();
    assert!(unknown.may_succeed() && unknown.may_panic());

    let cond = AbstractValue::cond(PointsToSet::singleton(alloc(1)));
    assert_eq!(semantics::cond_signal(&cond).unwrap().ok(), &cond);
    assert_eq!(semantics::cond_broadcast(&cond).unwrap().ok(), &cond);
    assert!(semantics::cond_signal(&AbstractValue::int(0)).is_err());
}

#[test]
fn dereferencing_pointers() {
    let a = alloc(1);
    let maybe_nil = AbstractValue::pointer_to([a.clone(), Location::Nil]);
    let result = semantics::dereference(&maybe_nil).unwrap();
    assert_eq!(result.ok(), &AbstractValue::pointer_to([a.clone()]));
    assert_eq!(result.panicked(), &AbstractValue::nil());

    let unknown = semantics::dereference(&AbstractValue::Wildcard).unwrap();
    assert!(unknown.may_succeed() && unknown.may_panic());
    assert!(semantics::dereference(&AbstractValue::nil()).unwrap().may_panic());

    let mem = Memory::new().update(&a, AbstractValue::int(4)).unwrap();
    assert_eq!(
        semantics::load(&AbstractValue::pointer_to([a]), &mem).unwrap(),
        AbstractValue::int(4)
    );
    assert!(semantics::load(&AbstractValue::Wildcard, &mem).is_err());
}

#[test]
fn arithmetic_on_constants() {
    let program = ProgramBuilder::new().finish();
    let memory = Memory::new();
    let ctx = EvalContext {
        program: &program,
        memory: &memory,
    };
    let int = Type::int();
    let binop = |op, x: &AbstractValue, y: &AbstractValue, ty: &Type, result: &Type| {
        semantics::binop(ctx, op, x, y, ty, result).unwrap()
    };
    let (two, three) = (AbstractValue::int(2), AbstractValue::int(3));
    assert_eq!(binop(BinOpKind::Add, &two, &three, &int, &int), AbstractValue::int(5));
    assert_eq!(
        binop(BinOpKind::Quo, &two, &AbstractValue::int(0), &int, &int),
        AbstractValue::top_basic()
    );
    assert_eq!(
        binop(BinOpKind::Lss, &two, &three, &int, &Type::bool()),
        AbstractValue::bool(true)
    );
    assert_eq!(
        binop(BinOpKind::Eql, &AbstractValue::top_basic(), &three, &int, &Type::bool()),
        AbstractValue::top_basic()
    );
    assert_eq!(
        binop(BinOpKind::Add, &AbstractValue::Untyped, &three, &int, &int),
        AbstractValue::Untyped
    );

    let byte = Type::Basic(BasicKind::Uint8);
    assert_eq!(
        binop(BinOpKind::Add, &AbstractValue::int(250), &AbstractValue::int(10), &byte, &byte),
        AbstractValue::int(4)
    );

    let unop = |op, x: &AbstractValue, ty: &Type| semantics::unop(&program, op, x, ty);
    assert_eq!(unop(UnOpKind::Neg, &two, &int).unwrap(), AbstractValue::int(-2));
    assert_eq!(
        unop(UnOpKind::Not, &AbstractValue::bool(true), &Type::bool()).unwrap(),
        AbstractValue::bool(false)
    );
    assert!(matches!(
        unop(UnOpKind::Deref, &two, &int),
        Err(AnalysisError::UnsupportedOperation(_))
    ));
}

#[test]
fn pointer_equality() {
    let program = ProgramBuilder::new().finish();
    let (a, b) = (alloc(1), alloc(2));
    let memory = Memory::new()
        .allocate(&a, AbstractValue::int(0), false)
        .and_then(|m| m.allocate(&b, AbstractValue::int(0), false))
        .and_then(|m| m.allocate(&b, AbstractValue::int(0), false))
        .unwrap();
    let ctx = EvalContext {
        program: &program,
        memory: &memory,
    };
    let ptr = Type::pointer(Type::int());
    let eq = |x: &AbstractValue, y: &AbstractValue| {
        semantics::binop(ctx, BinOpKind::Eql, x, y, &ptr, &Type::bool()).unwrap()
    };
    let pa = AbstractValue::pointer_to([a.clone()]);
    assert_eq!(eq(&pa, &pa), AbstractValue::bool(true));
    assert_eq!(eq(&pa, &AbstractValue::pointer_to([b.clone()])), AbstractValue::bool(false));
    assert_eq!(eq(&pa, &AbstractValue::nil()), AbstractValue::bool(false));
    assert_eq!(eq(&pa, &AbstractValue::Wildcard), AbstractValue::top_basic());
    // Distinct cells of a multialloc site can differ.
    let pb = AbstractValue::pointer_to([b]);
    assert_eq!(eq(&pb, &pb), AbstractValue::top_basic());
}
