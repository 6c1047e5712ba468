//! Each operation maps the abstract value of its operand (a channel, a
//! lock, a wait-group, or a pointer) to the possible [OpOutcomes]. A bottom
//! operand blocks, operands of an unexpected tag are errors.

use analysis::domains::{
    saturating_shift, Flat, FlatInt, Interval, JoinSemiLattice, Lattice, Prod2, INF, NEG_INF,
};

use crate::config::{BufferAbstraction, Options};
use crate::domains::{
    AbstractValue, CLOSED, ChannelInfo, Constant, FieldKey, LOCKED, OPEN, OpOutcomes, PointsToSet,
    UNLOCKED,
};
use crate::error::{AnalysisError, Result};
use crate::location::Location;
use crate::memops;
use crate::memory::Memory;
use crate::ssa::{BasicKind, BinOpKind, InstrKind, Program, Type, UnOpKind};

fn unsupported(operation: &str, value: &AbstractValue) -> AnalysisError {
    AnalysisError::UnsupportedOperation(format!("{operation} on {value}"))
}

/// The channel record of an operand. `None` means the operation blocks.
fn channel<'a>(operation: &str, value: &'a AbstractValue) -> Result<Option<&'a ChannelInfo>> {
    match value {
        AbstractValue::Untyped | AbstractValue::Channel(None) => Ok(None),
        AbstractValue::Channel(Some(info)) => Ok(Some(info)),
        _ => Err(unsupported(operation, value)),
    }
}

fn with_info(info: &ChannelInfo, update: impl FnOnce(&mut ChannelInfo)) -> AbstractValue {
    let mut info = info.clone();
    update(&mut info);
    AbstractValue::channel(info)
}

/// The received value, paired with the `ok` flag for `v, ok := <-ch`.
fn wrap(value: AbstractValue, ok: Flat<bool>, comma_ok: bool) -> AbstractValue {
    if !comma_ok {
        return value;
    }
    let ok = match ok {
        Flat::Element(b) => AbstractValue::bool(b),
        Flat::Top => AbstractValue::top_basic(),
        Flat::Bottom => AbstractValue::Untyped,
    };
    AbstractValue::struct_of([(FieldKey::Index(0), value), (FieldKey::Index(1), ok)])
}

//////////////
// Channels //
//////////////

pub fn close(value: &AbstractValue) -> Result<OpOutcomes> {
    let Some(ch) = channel("close", value)? else {
        return Ok(OpOutcomes::block());
    };
    let mut result = OpOutcomes::block();
    if ch.status != OPEN {
        let status = ch.status.meet(&CLOSED, &());
        result = result.join(&OpOutcomes::panic(with_info(ch, |ch| ch.status = status)));
    }
    if ch.status >= OPEN {
        result = result.join(&OpOutcomes::succeed(with_info(ch, |ch| ch.status = CLOSED)));
    }
    Ok(result)
}

/// The panic when sending to a closed channel, and whether the send can
/// succeed at all.
fn send_status(ch: &ChannelInfo) -> (OpOutcomes, bool) {
    match ch.status {
        Flat::Bottom => (OpOutcomes::block(), false),
        CLOSED => (OpOutcomes::panic(AbstractValue::channel(ch.clone())), false),
        Flat::Top => (
            OpOutcomes::panic(with_info(ch, |ch| ch.status = CLOSED)),
            true,
        ),
        _ => (OpOutcomes::block(), true),
    }
}

/// Sending `payload` with the flat buffer abstraction.
pub fn send_flat(payload: &AbstractValue, value: &AbstractValue) -> Result<OpOutcomes> {
    let Some(ch) = channel("send", value)? else {
        return Ok(OpOutcomes::block());
    };
    let (result, may_succeed) = send_status(ch);
    if !may_succeed {
        return Ok(result);
    }
    let success = match (ch.capacity, ch.buffer_flat) {
        (Flat::Bottom, _) | (_, Flat::Bottom) => None,
        (Flat::Top, _) | (_, Flat::Top) => Some(with_info(ch, |ch| {
            ch.status = OPEN;
            ch.buffer_flat = Flat::Top;
            ch.payload = payload.join(&ch.payload, &());
        })),
        (Flat::Element(cap), Flat::Element(buf)) if buf < cap => Some(with_info(ch, |ch| {
            ch.status = OPEN;
            ch.buffer_flat = Flat::Element(buf + 1);
            ch.payload = if buf == 0 {
                payload.clone()
            } else {
                payload.join(&ch.payload, &())
            };
        })),
        _ => None,
    };
    Ok(match success {
        Some(v) => result.join(&OpOutcomes::succeed(v)),
        None => result,
    })
}

/// Sending `payload` with the interval buffer abstraction.
pub fn send_interval(payload: &AbstractValue, value: &AbstractValue) -> Result<OpOutcomes> {
    let Some(ch) = channel("send", value)? else {
        return Ok(OpOutcomes::block());
    };
    let (result, may_succeed) = send_status(ch);
    if !may_succeed || ch.buffer_interval.is_bottom() {
        return Ok(result);
    }
    let Interval { min: low, max: high } = ch.buffer_interval;
    let success = match ch.capacity {
        Flat::Bottom => None,
        Flat::Top => Some(with_info(ch, |ch| {
            ch.status = OPEN;
            ch.buffer_interval = ch.buffer_interval.shift(1);
            ch.payload = payload.join(&ch.payload, &());
        })),
        Flat::Element(cap) if high < cap => Some(with_info(ch, |ch| {
            ch.status = OPEN;
            ch.buffer_interval = ch.buffer_interval.shift(1);
            ch.payload = if high == 0 {
                payload.clone()
            } else {
                payload.join(&ch.payload, &())
            };
        })),
        Flat::Element(cap) if low < cap => Some(with_info(ch, |ch| {
            ch.status = OPEN;
            ch.buffer_interval = Interval::new(saturating_shift(low, 1), high);
            ch.payload = payload.join(&ch.payload, &());
        })),
        Flat::Element(_) => None,
    };
    Ok(match success {
        Some(v) => result.join(&OpOutcomes::succeed(v)),
        None => result,
    })
}

/// Receiving with the flat buffer abstraction. The received value, or the
/// zero value of the element type when the channel is closed and drained,
/// ends up in the payload of the successful outcome (see [split_received]).
pub fn receive_flat(zero: &AbstractValue, comma_ok: bool, value: &AbstractValue) -> Result<OpOutcomes> {
    let Some(ch) = channel("receive", value)? else {
        return Ok(OpOutcomes::block());
    };
    let may_be_closed = ch.status >= CLOSED;
    Ok(match ch.buffer_flat {
        Flat::Bottom => OpOutcomes::block(),
        Flat::Top => {
            let (received, ok) = if may_be_closed {
                (ch.payload.join(zero, &()), Flat::Top)
            } else {
                (ch.payload.clone(), Flat::Element(true))
            };
            OpOutcomes::succeed(with_info(ch, |ch| ch.payload = wrap(received, ok, comma_ok)))
        }
        Flat::Element(buf) if buf > 0 => OpOutcomes::succeed(with_info(ch, |ch| {
            ch.buffer_flat = Flat::Element(buf - 1);
            ch.payload = wrap(ch.payload.clone(), Flat::Element(true), comma_ok);
        })),
        Flat::Element(_) if may_be_closed => OpOutcomes::succeed(with_info(ch, |ch| {
            ch.status = CLOSED;
            ch.payload = wrap(zero.clone(), Flat::Element(false), comma_ok);
        })),
        Flat::Element(_) => OpOutcomes::block(),
    })
}

/// Receiving with the interval buffer abstraction. A receive may both take
/// an element from a possibly empty buffer and observe the channel closed.
pub fn receive_interval(
    zero: &AbstractValue,
    comma_ok: bool,
    value: &AbstractValue,
) -> Result<OpOutcomes> {
    let Some(ch) = channel("receive", value)? else {
        return Ok(OpOutcomes::block());
    };
    let mut result = OpOutcomes::block();
    let non_empty = ch.buffer_interval.meet(&Interval::new(1, INF), &());
    if !non_empty.is_bottom() {
        result = result.join(&OpOutcomes::succeed(with_info(ch, |ch| {
            ch.buffer_interval = non_empty.shift(-1);
            ch.payload = wrap(ch.payload.clone(), Flat::Element(true), comma_ok);
        })));
    }
    let empty = ch.buffer_interval.meet(&Interval::new(NEG_INF, 0), &());
    if !empty.is_bottom() && ch.status >= CLOSED {
        result = result.join(&OpOutcomes::succeed(with_info(ch, |ch| {
            ch.status = CLOSED;
            ch.buffer_interval = empty;
            ch.payload = wrap(zero.clone(), Flat::Element(false), comma_ok);
        })));
    }
    Ok(result)
}

pub fn send(payload: &AbstractValue, value: &AbstractValue, options: &Options) -> Result<OpOutcomes> {
    match options.buffer_abstraction {
        BufferAbstraction::Flat => send_flat(payload, value),
        BufferAbstraction::Interval => send_interval(payload, value),
    }
}

pub fn receive(
    zero: &AbstractValue,
    comma_ok: bool,
    value: &AbstractValue,
    options: &Options,
) -> Result<OpOutcomes> {
    match options.buffer_abstraction {
        BufferAbstraction::Flat => receive_flat(zero, comma_ok, value),
        BufferAbstraction::Interval => receive_interval(zero, comma_ok, value),
    }
}

/// A rendezvous on an unbuffered channel. The payload is the value handed
/// over by the sender.
pub fn sync(comma_ok: bool, value: &AbstractValue) -> Result<OpOutcomes> {
    let Some(ch) = channel("sync", value)? else {
        return Ok(OpOutcomes::block());
    };
    if ch.status >= OPEN {
        return Ok(OpOutcomes::succeed(with_info(ch, |ch| {
            ch.capacity = Flat::Element(0);
            ch.status = OPEN;
            ch.buffer_flat = Flat::Element(0);
            ch.buffer_interval = Interval::from(0);
            ch.payload = wrap(ch.payload.clone(), Flat::Element(true), comma_ok);
        })));
    }
    Ok(OpOutcomes::block())
}

/// Splits the result of a successful receive into the channel after the
/// operation and the received value. `before` is the channel the
/// operation was applied to.
pub fn split_received(before: &AbstractValue, after: &AbstractValue) -> (AbstractValue, AbstractValue) {
    let (Some(old), Some(new)) = (before.channel_info(), after.channel_info()) else {
        return (after.clone(), AbstractValue::Untyped);
    };
    let received = new.payload.clone();
    (with_info(new, |ch| ch.payload = old.payload.clone()), received)
}

///////////
// Locks //
///////////

pub fn lock(value: &AbstractValue) -> Result<OpOutcomes> {
    match value {
        AbstractValue::Untyped => Ok(OpOutcomes::block()),
        AbstractValue::Mutex(m) if *m >= UNLOCKED => Ok(OpOutcomes::succeed(AbstractValue::Mutex(LOCKED))),
        AbstractValue::Mutex(_) => Ok(OpOutcomes::block()),
        AbstractValue::RwMutex(Prod2(m, readers)) if *m >= UNLOCKED && *readers >= Flat::Element(0) => Ok(
            OpOutcomes::succeed(AbstractValue::RwMutex(Prod2(LOCKED, Flat::Element(0)))),
        ),
        AbstractValue::RwMutex(_) => Ok(OpOutcomes::block()),
        _ => Err(unsupported("lock", value)),
    }
}

pub fn unlock(value: &AbstractValue) -> Result<OpOutcomes> {
    let (status, unlocked) = match value {
        AbstractValue::Untyped => return Ok(OpOutcomes::block()),
        AbstractValue::Mutex(m) => (*m, AbstractValue::Mutex(UNLOCKED)),
        AbstractValue::RwMutex(Prod2(m, readers)) => {
            (*m, AbstractValue::RwMutex(Prod2(UNLOCKED, *readers)))
        }
        _ => return Err(unsupported("unlock", value)),
    };
    let mut result = OpOutcomes::block();
    if status >= UNLOCKED {
        result = result.join(&OpOutcomes::panic(value.clone()));
    }
    if status >= LOCKED {
        result = result.join(&OpOutcomes::succeed(unlocked));
    }
    Ok(result)
}

pub fn rlock(value: &AbstractValue) -> Result<OpOutcomes> {
    let AbstractValue::RwMutex(Prod2(m, readers)) = value else {
        return match value {
            AbstractValue::Untyped => Ok(OpOutcomes::block()),
            _ => Err(unsupported("rlock", value)),
        };
    };
    let readers = match readers {
        _ if m.is_bottom() || *m == LOCKED => return Ok(OpOutcomes::block()),
        Flat::Bottom => return Ok(OpOutcomes::block()),
        Flat::Top => Flat::Top,
        Flat::Element(n) => Flat::Element(n + 1),
    };
    Ok(OpOutcomes::succeed(AbstractValue::RwMutex(Prod2(UNLOCKED, readers))))
}

pub fn runlock(value: &AbstractValue) -> Result<OpOutcomes> {
    let AbstractValue::RwMutex(Prod2(m, readers)) = value else {
        return match value {
            AbstractValue::Untyped => Ok(OpOutcomes::block()),
            _ => Err(unsupported("runlock", value)),
        };
    };
    let mut result = OpOutcomes::block();
    if *m >= UNLOCKED {
        result = match readers {
            Flat::Bottom => result,
            Flat::Top => result
                .join(&OpOutcomes::succeed(AbstractValue::RwMutex(Prod2(UNLOCKED, Flat::Top))))
                .join(&OpOutcomes::panic(value.clone())),
            Flat::Element(n) if *n > 0 => result.join(&OpOutcomes::succeed(AbstractValue::RwMutex(
                Prod2(UNLOCKED, Flat::Element(n - 1)),
            ))),
            Flat::Element(_) => result.join(&OpOutcomes::panic(value.clone())),
        };
    }
    // The holder of the write lock cannot release a read lock.
    if *m >= LOCKED {
        result = result.join(&OpOutcomes::panic(value.clone()));
    }
    Ok(result)
}

/// Waiting on a condition variable releases the locker. Waiting without
/// holding the lock panics.
pub fn cond_wait(locker: &AbstractValue) -> Result<OpOutcomes> {
    let (status, released) = match locker {
        AbstractValue::Untyped => return Ok(OpOutcomes::block()),
        AbstractValue::Mutex(m) => (*m, AbstractValue::Mutex(UNLOCKED)),
        AbstractValue::RwMutex(Prod2(m, _)) => {
            (*m, AbstractValue::RwMutex(Prod2(UNLOCKED, Flat::Element(0))))
        }
        _ => return Err(unsupported("wait", locker)),
    };
    let mut result = OpOutcomes::block();
    if status >= LOCKED {
        result = result.join(&OpOutcomes::succeed(released));
    }
    if status >= UNLOCKED {
        result = result.join(&OpOutcomes::panic(locker.clone()));
    }
    Ok(result)
}

/// Waking up from a wait reacquires the locker.
pub fn cond_wake(locker: &AbstractValue) -> Result<OpOutcomes> {
    lock(locker)
}

pub fn cond_signal(cond: &AbstractValue) -> Result<OpOutcomes> {
    match cond {
        AbstractValue::Untyped => Ok(OpOutcomes::block()),
        AbstractValue::Cond(_) => Ok(OpOutcomes::succeed(cond.clone())),
        _ => Err(unsupported("signal", cond)),
    }
}

pub fn cond_broadcast(cond: &AbstractValue) -> Result<OpOutcomes> {
    match cond {
        AbstractValue::Untyped => Ok(OpOutcomes::block()),
        AbstractValue::Cond(_) => Ok(OpOutcomes::succeed(cond.clone())),
        _ => Err(unsupported("broadcast", cond)),
    }
}

/////////////////
// Wait-groups //
/////////////////

/// Adds `delta` to the counter. A negative counter panics.
pub fn wg_add(delta: FlatInt, value: &AbstractValue) -> Result<OpOutcomes> {
    let counter = match value {
        AbstractValue::Untyped => return Ok(OpOutcomes::block()),
        AbstractValue::WaitGroup(n) => *n,
        _ => return Err(unsupported("add", value)),
    };
    Ok(match (counter, delta) {
        (Flat::Bottom, _) | (_, Flat::Bottom) => OpOutcomes::block(),
        (Flat::Top, _) | (_, Flat::Top) => OpOutcomes::succeed(AbstractValue::WaitGroup(Flat::Top)),
        (Flat::Element(n), Flat::Element(d)) => match n.checked_add(d) {
            Some(sum) if sum >= 0 => OpOutcomes::succeed(AbstractValue::wait_group(sum)),
            Some(_) => OpOutcomes::panic(value.clone()),
            None => OpOutcomes::succeed(AbstractValue::WaitGroup(Flat::Top)),
        },
    })
}

pub fn wg_done(value: &AbstractValue) -> Result<OpOutcomes> {
    wg_add(Flat::Element(-1), value)
}

/// Waiting succeeds when the counter may be zero.
pub fn wg_wait(value: &AbstractValue) -> Result<OpOutcomes> {
    match value {
        AbstractValue::Untyped => Ok(OpOutcomes::block()),
        AbstractValue::WaitGroup(n) if *n >= Flat::Element(0) => Ok(OpOutcomes::succeed(value.clone())),
        AbstractValue::WaitGroup(_) => Ok(OpOutcomes::block()),
        _ => Err(unsupported("wait", value)),
    }
}

//////////////
// Pointers //
//////////////

/// Dereferencing panics on nil and succeeds with the other targets.
pub fn dereference(value: &AbstractValue) -> Result<OpOutcomes> {
    match value {
        AbstractValue::Untyped => Ok(OpOutcomes::block()),
        AbstractValue::Wildcard => {
            Ok(OpOutcomes::panic(AbstractValue::nil()).join(&OpOutcomes::succeed(AbstractValue::Wildcard)))
        }
        AbstractValue::Pointer(set) => {
            let mut result = OpOutcomes::block();
            if set.has_nil() {
                result = result.join(&OpOutcomes::panic(AbstractValue::nil()));
            }
            let targets = set.filter_nil();
            if !targets.is_empty() {
                result = result.join(&OpOutcomes::succeed(AbstractValue::Pointer(targets)));
            }
            Ok(result)
        }
        _ => Err(unsupported("dereference", value)),
    }
}

/// The join of the values the pointer may point to. Unknown pointers have
/// to be materialized first.
pub fn load(value: &AbstractValue, memory: &Memory) -> Result<AbstractValue> {
    match value {
        AbstractValue::Untyped => Ok(AbstractValue::Untyped),
        AbstractValue::Pointer(set) => memops::get_all(memory, set),
        _ => Err(unsupported("load", value)),
    }
}

////////////////
// Arithmetic //
////////////////

/// What the arithmetic needs to know about the program and the state.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub program: &'a Program,
    pub memory: &'a Memory,
}

/// Truncates an integer to the width of its type.
fn normalize(kind: BasicKind, val: i64) -> i64 {
    match kind {
        BasicKind::Int8 => val as i8 as i64,
        BasicKind::Int16 => val as i16 as i64,
        BasicKind::Int32 => val as i32 as i64,
        BasicKind::Uint8 => val as u8 as i64,
        BasicKind::Uint16 => val as u16 as i64,
        BasicKind::Uint32 => val as u32 as i64,
        _ => val,
    }
}

fn is_unsigned(kind: BasicKind) -> bool {
    matches!(
        kind,
        BasicKind::Uint | BasicKind::Uint8 | BasicKind::Uint16 | BasicKind::Uint32 | BasicKind::Uint64 | BasicKind::Uintptr
    )
}

fn int_binop(op: BinOpKind, kind: BasicKind, x: i64, y: i64) -> Option<Constant> {
    use BinOpKind::*;
    let unsigned = is_unsigned(kind);
    let compare = |ord: core::cmp::Ordering| {
        let ord = if unsigned { (x as u64).cmp(&(y as u64)) } else { ord };
        Some(Constant::Bool(match op {
            Eql => ord.is_eq(),
            Neq => ord.is_ne(),
            Lss => ord.is_lt(),
            Leq => ord.is_le(),
            Gtr => ord.is_gt(),
            _ => ord.is_ge(),
        }))
    };
    let val = match op {
        Add => x.wrapping_add(y),
        Sub => x.wrapping_sub(y),
        Mul => x.wrapping_mul(y),
        Quo | Rem if y == 0 => return None,
        Quo if unsigned => ((x as u64) / (y as u64)) as i64,
        Rem if unsigned => ((x as u64) % (y as u64)) as i64,
        Quo => x.wrapping_div(y),
        Rem => x.wrapping_rem(y),
        And => x & y,
        Or => x | y,
        Xor => x ^ y,
        AndNot => x & !y,
        Shl | Shr if y < 0 => return None,
        Shl if y >= 64 => 0,
        Shl => x.wrapping_shl(y as u32),
        Shr if unsigned && y >= 64 => 0,
        Shr if unsigned => ((x as u64) >> y) as i64,
        Shr if y >= 64 => x >> 63,
        Shr => x >> y,
        Eql | Neq | Lss | Leq | Gtr | Geq => return compare(x.cmp(&y)),
    };
    Some(Constant::Int(normalize(kind, val)))
}

fn float_binop(op: BinOpKind, x: f64, y: f64) -> Option<Constant> {
    use BinOpKind::*;
    Some(match op {
        Add => Constant::float(x + y),
        Sub => Constant::float(x - y),
        Mul => Constant::float(x * y),
        Quo => Constant::float(x / y),
        Eql => Constant::Bool(x == y),
        Neq => Constant::Bool(x != y),
        Lss => Constant::Bool(x < y),
        Leq => Constant::Bool(x <= y),
        Gtr => Constant::Bool(x > y),
        Geq => Constant::Bool(x >= y),
        _ => return None,
    })
}

fn constant_binop(op: BinOpKind, kind: Option<BasicKind>, x: &Constant, y: &Constant) -> Option<Constant> {
    use BinOpKind::*;
    match (x, y) {
        (Constant::Int(a), Constant::Int(b)) => int_binop(op, kind.unwrap_or(BasicKind::Int64), *a, *b),
        (Constant::Float(a), Constant::Float(b)) => {
            float_binop(op, f64::from_bits(*a), f64::from_bits(*b))
        }
        (Constant::String(a), Constant::String(b)) => Some(match op {
            Add => Constant::String(format!("{a}{b}").into()),
            Eql => Constant::Bool(a == b),
            Neq => Constant::Bool(a != b),
            Lss => Constant::Bool(a < b),
            Leq => Constant::Bool(a <= b),
            Gtr => Constant::Bool(a > b),
            Geq => Constant::Bool(a >= b),
            _ => return None,
        }),
        (Constant::Bool(a), Constant::Bool(b)) => Some(match op {
            Eql => Constant::Bool(a == b),
            Neq => Constant::Bool(a != b),
            _ => return None,
        }),
        _ => None,
    }
}

/// The boolean abstracting whether two values may be equal or different.
fn equality(op: BinOpKind, may_equal: bool, may_differ: bool) -> AbstractValue {
    let (if_equal, if_differ) = match op {
        BinOpKind::Neq => (false, true),
        _ => (true, false),
    };
    match (may_equal, may_differ) {
        (true, true) => AbstractValue::top_basic(),
        (true, false) => AbstractValue::bool(if_equal),
        (false, true) => AbstractValue::bool(if_differ),
        (false, false) => AbstractValue::Untyped,
    }
}

/// Whether the two values may be equal and whether they may differ.
fn compare(ctx: EvalContext, x: &AbstractValue, y: &AbstractValue, ty: &Type) -> (bool, bool) {
    let program = ctx.program;
    match (x, y) {
        (AbstractValue::Pointer(a), AbstractValue::Pointer(b))
            if matches!(program.underlying(ty), Type::Interface(_)) =>
        {
            compare_interfaces(ctx, a, b)
        }
        (AbstractValue::Pointer(a), AbstractValue::Pointer(b)) => {
            let may_equal = !a.mono_meet(b).is_empty();
            let unique = a == b && ctx.memory.can_strong_update(a);
            (may_equal, !unique)
        }
        (AbstractValue::Basic(Flat::Element(a)), AbstractValue::Basic(Flat::Element(b))) => {
            match constant_binop(BinOpKind::Eql, basic_kind(program, ty), a, b) {
                Some(Constant::Bool(eq)) => (eq, !eq),
                _ => (true, true),
            }
        }
        _ => (true, true),
    }
}

/// Interfaces are pointers to the boxes made by `MakeInterface`. Boxes of
/// distinct dynamic types are different, the contents of boxes of the same
/// type are compared with the dynamic type.
fn compare_interfaces(ctx: EvalContext, a: &PointsToSet, b: &PointsToSet) -> (bool, bool) {
    let (boxes_a, boxes_b) = (a.filter_nil(), b.filter_nil());
    let mut may_equal = a.has_nil() && b.has_nil();
    let mut may_differ =
        (a.has_nil() && !boxes_b.is_empty()) || (b.has_nil() && !boxes_a.is_empty());
    let dynamic_type = |location: &Location| {
        let site = location.site()?;
        match ctx.program.defining_instr(site)?.1.kind {
            InstrKind::MakeInterface { x } => Some(ctx.program.type_of(x).clone()),
            _ => None,
        }
    };
    for la in boxes_a.iter() {
        for lb in boxes_b.iter() {
            match (dynamic_type(la), dynamic_type(lb)) {
                (Some(ta), Some(tb)) if ta != tb => may_differ = true,
                (Some(ty), Some(_)) => {
                    let contents_a = memops::get(ctx.memory, la);
                    let contents_b = memops::get(ctx.memory, lb);
                    let (eq, ne) = compare(ctx, &contents_a, &contents_b, &ty);
                    may_equal |= eq;
                    may_differ |= ne;
                }
                _ => {
                    may_equal = true;
                    may_differ = true;
                }
            }
        }
    }
    (may_equal, may_differ)
}

fn basic_kind(program: &Program, ty: &Type) -> Option<BasicKind> {
    match program.underlying(ty) {
        Type::Basic(kind) => Some(*kind),
        _ => None,
    }
}

/// Evaluates `x op y` where the operands have type `operand_ty`. Unknown
/// operands, and operands of distinct tags, give the top of `result_ty`.
pub fn binop(
    ctx: EvalContext,
    op: BinOpKind,
    x: &AbstractValue,
    y: &AbstractValue,
    operand_ty: &Type,
    result_ty: &Type,
) -> Result<AbstractValue> {
    let program = ctx.program;
    if x.is_bot() || y.is_bot() {
        return Ok(AbstractValue::Untyped);
    }
    let constants = matches!(
        (x, y),
        (AbstractValue::Basic(Flat::Element(_)), AbstractValue::Basic(Flat::Element(_)))
    );
    let comparable = x.tag() == y.tag() || x.is_wildcard() || y.is_wildcard();
    if matches!(op, BinOpKind::Eql | BinOpKind::Neq) && !constants && comparable {
        let (may_equal, may_differ) = compare(ctx, x, y, operand_ty);
        return Ok(equality(op, may_equal, may_differ));
    }
    let (AbstractValue::Basic(Flat::Element(a)), AbstractValue::Basic(Flat::Element(b))) = (x, y) else {
        return Ok(AbstractValue::top_of_type(result_ty, program));
    };
    Ok(match constant_binop(op, basic_kind(program, operand_ty), a, b) {
        Some(c) => AbstractValue::Basic(Flat::Element(c)),
        None => AbstractValue::top_of_type(result_ty, program),
    })
}

/// Evaluates the arithmetic unary operators. Loads and receives go through
/// memory and the channel operations instead.
pub fn unop(program: &Program, op: UnOpKind, x: &AbstractValue, ty: &Type) -> Result<AbstractValue> {
    if matches!(op, UnOpKind::Deref | UnOpKind::Arrow) {
        return Err(AnalysisError::UnsupportedOperation(format!(
            "{op:?} is not an arithmetic operator"
        )));
    }
    if x.is_bot() {
        return Ok(AbstractValue::Untyped);
    }
    let AbstractValue::Basic(Flat::Element(c)) = x else {
        return Ok(AbstractValue::top_of_type(ty, program));
    };
    let kind = basic_kind(program, ty).unwrap_or(BasicKind::Int64);
    let result = match (op, c) {
        (UnOpKind::Not, Constant::Bool(b)) => Constant::Bool(!b),
        (UnOpKind::Neg, Constant::Int(i)) => Constant::Int(normalize(kind, i.wrapping_neg())),
        (UnOpKind::Neg, Constant::Float(bits)) => Constant::float(-f64::from_bits(*bits)),
        (UnOpKind::Xor, Constant::Int(i)) => Constant::Int(normalize(kind, !i)),
        _ => return Ok(AbstractValue::top_of_type(ty, program)),
    };
    Ok(AbstractValue::Basic(Flat::Element(result)))
}
