use core::cmp::Ordering;
use core::fmt::Display;
use std::rc::Rc;

use analysis::domains::{
    Dropped, Flat, FlatInt, Height, Interval, JoinSemiLattice, Lattice, Lift, Map, Prod2,
};

use crate::domains::PointsToSet;
use crate::error::{AnalysisError, Result};
use crate::location::{AINDEX, CLOSURE_FUN, Location};
use crate::ssa::{BasicKind, FunctionId, Literal, Program, SyncKind, Type};

/// The kind of an [AbstractValue]. Values of distinct kinds can only be
/// combined when one of them is [Tag::Untyped], or when they are a pointer
/// and a wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Untyped,
    Pointer,
    Channel,
    Struct,
    Basic,
    Mutex,
    RwMutex,
    Cond,
    WaitGroup,
    Wildcard,
}

impl Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Tag::Untyped => "untyped",
            Tag::Pointer => "pointer",
            Tag::Channel => "channel",
            Tag::Struct => "struct",
            Tag::Basic => "basic",
            Tag::Mutex => "mutex",
            Tag::RwMutex => "rwmutex",
            Tag::Cond => "cond",
            Tag::WaitGroup => "waitgroup",
            Tag::Wildcard => "wildcard",
        };
        write!(f, "{name}")
    }
}

/// Constants of the basic types. Floats are stored as their bit pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Float(u64),
    Bool(bool),
    String(Rc<str>),
    Function(FunctionId),
    /// Constants the analysis does not interpret, e.g., complex numbers.
    Opaque(Rc<str>),
}

impl Constant {
    pub fn float(val: f64) -> Self {
        Constant::Float(val.to_bits())
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::String(s) => write!(f, "{s:?}"),
            Constant::Function(fun) => write!(f, "{fun}"),
            Constant::Opaque(s) => write!(f, "{s}"),
        }
    }
}

/// Keys of the struct payload. Struct fields, tuple components and closure
/// slots are numbered, maps use named keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKey {
    Index(i32),
    Name(Rc<str>),
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FieldKey::Index(AINDEX) => write!(f, "*"),
            FieldKey::Index(i) => write!(f, "{i}"),
            FieldKey::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChanStatus {
    Open,
    Closed,
}

pub const OPEN: Flat<ChanStatus> = Flat::Element(ChanStatus::Open);
pub const CLOSED: Flat<ChanStatus> = Flat::Element(ChanStatus::Closed);
pub const UNLOCKED: Flat<bool> = Flat::Element(false);
pub const LOCKED: Flat<bool> = Flat::Element(true);

/// The abstract state of a channel. Both buffer abstractions are tracked,
/// the operations decide which one they use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub capacity: FlatInt,
    pub status: Flat<ChanStatus>,
    /// The number of buffered elements.
    pub buffer_flat: FlatInt,
    pub buffer_interval: Interval,
    pub payload: AbstractValue,
}

impl ChannelInfo {
    /// A freshly made, empty and open channel.
    pub fn new(capacity: FlatInt) -> Self {
        Self {
            capacity,
            status: OPEN,
            buffer_flat: Flat::Element(0),
            buffer_interval: Interval::from(0),
            payload: AbstractValue::Untyped,
        }
    }

    pub fn to_top(&self) -> Self {
        Self {
            capacity: Flat::Top,
            status: Flat::Top,
            buffer_flat: Flat::Top,
            buffer_interval: Interval::top(&()),
            payload: self.payload.to_top(),
        }
    }

    /// Greatest lower bound, componentwise.
    pub fn meet(&self, other: &Self) -> Self {
        Self {
            capacity: self.capacity.meet(&other.capacity, &()),
            status: self.status.meet(&other.status, &()),
            buffer_flat: self.buffer_flat.meet(&other.buffer_flat, &()),
            buffer_interval: self.buffer_interval.meet(&other.buffer_interval, &()),
            payload: self.payload.meet(&other.payload),
        }
    }

    fn orderings(&self, other: &Self) -> [Option<Ordering>; 5] {
        [
            self.capacity.partial_cmp(&other.capacity),
            self.status.partial_cmp(&other.status),
            self.buffer_flat.partial_cmp(&other.buffer_flat),
            self.buffer_interval.partial_cmp(&other.buffer_interval),
            self.payload.partial_cmp(&other.payload),
        ]
    }
}

fn combine_orderings(orderings: &[Option<Ordering>]) -> Option<Ordering> {
    let mut result = Ordering::Equal;
    for ordering in orderings {
        match (result, (*ordering)?) {
            (_, Ordering::Equal) => {}
            (Ordering::Equal, ord) => result = ord,
            (prev, ord) if prev != ord => return None,
            _ => {}
        }
    }
    Some(result)
}

impl PartialOrd for ChannelInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        combine_orderings(&self.orderings(other))
    }
}

impl JoinSemiLattice for ChannelInfo {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        Self {
            capacity: Flat::Bottom,
            status: Flat::Bottom,
            buffer_flat: Flat::Bottom,
            buffer_interval: Interval::bottom(&()),
            payload: AbstractValue::Untyped,
        }
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        Self {
            capacity: self.capacity.join(&other.capacity, ctx),
            status: self.status.join(&other.status, ctx),
            buffer_flat: self.buffer_flat.join(&other.buffer_flat, ctx),
            buffer_interval: self.buffer_interval.join(&other.buffer_interval, ctx),
            payload: self.payload.join(&other.payload, ctx),
        }
    }

    fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
        Self {
            buffer_interval: self
                .buffer_interval
                .widen(&previous.buffer_interval, ctx, iteration),
            payload: self.payload.widen(&previous.payload, ctx, iteration),
            ..self.clone()
        }
    }
}

impl Height for ChannelInfo {
    fn height(&self) -> i64 {
        let heights = [
            self.capacity.height(),
            self.status.height(),
            self.buffer_flat.height(),
            self.buffer_interval.height(),
            self.payload.height(),
        ];
        if heights.iter().any(|h| *h < 0) {
            return -1;
        }
        heights.iter().fold(0_i64, |acc, h| acc.saturating_add(*h))
    }
}

pub type Fields = Map<FieldKey, AbstractValue>;

/// The abstract value of a memory cell or a virtual register.
///
/// Structs are lifted and dropped, so the bottom struct (`None`) and the top
/// struct (`Some(Dropped::Top)`) differ from every partially known struct.
/// Arrays, maps and closures are structs with a special shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbstractValue {
    /// The universal bottom, the only value without a tag.
    Untyped,
    Pointer(PointsToSet),
    Channel(Option<Rc<ChannelInfo>>),
    Struct(Lift<Dropped<Fields>>),
    Basic(Flat<Constant>),
    /// Locked is true.
    Mutex(Flat<bool>),
    /// The write lock and the number of readers.
    RwMutex(Prod2<Flat<bool>, FlatInt>),
    /// The possible lockers of the condition variable.
    Cond(Dropped<PointsToSet>),
    /// The counter.
    WaitGroup(FlatInt),
    /// An unknown pointer.
    Wildcard,
}

fn tag_mismatch(left: &AbstractValue, right: &AbstractValue) -> ! {
    panic!(
        "{}",
        AnalysisError::TagMismatch {
            left: left.tag(),
            right: right.tag()
        }
    )
}

impl AbstractValue {
    pub fn tag(&self) -> Tag {
        match self {
            AbstractValue::Untyped => Tag::Untyped,
            AbstractValue::Pointer(_) => Tag::Pointer,
            AbstractValue::Channel(_) => Tag::Channel,
            AbstractValue::Struct(_) => Tag::Struct,
            AbstractValue::Basic(_) => Tag::Basic,
            AbstractValue::Mutex(_) => Tag::Mutex,
            AbstractValue::RwMutex(_) => Tag::RwMutex,
            AbstractValue::Cond(_) => Tag::Cond,
            AbstractValue::WaitGroup(_) => Tag::WaitGroup,
            AbstractValue::Wildcard => Tag::Wildcard,
        }
    }

    /// Whether the two values can be combined by the lattice operations.
    pub fn is_compatible(&self, other: &Self) -> bool {
        let (left, right) = (self.tag(), other.tag());
        left == right
            || left == Tag::Untyped
            || right == Tag::Untyped
            || matches!(
                (left, right),
                (Tag::Pointer, Tag::Wildcard) | (Tag::Wildcard, Tag::Pointer)
            )
    }

    pub fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.is_compatible(other) {
            return Ok(());
        }
        Err(AnalysisError::TagMismatch {
            left: self.tag(),
            right: other.tag(),
        })
    }

    /// Replaces the payload. The tag is fixed by the first non-bottom write.
    pub fn update(&self, new: Self) -> Result<Self> {
        self.check_compatible(&new)?;
        Ok(new)
    }

    //////////////////
    // Constructors //
    //////////////////

    pub fn nil() -> Self {
        AbstractValue::Pointer(PointsToSet::nil())
    }

    pub fn pointer_to<I: IntoIterator<Item = Location>>(locations: I) -> Self {
        AbstractValue::Pointer(locations.into_iter().collect())
    }

    pub fn int(val: i64) -> Self {
        AbstractValue::Basic(Flat::Element(Constant::Int(val)))
    }

    pub fn bool(val: bool) -> Self {
        AbstractValue::Basic(Flat::Element(Constant::Bool(val)))
    }

    pub fn string(val: &str) -> Self {
        AbstractValue::Basic(Flat::Element(Constant::String(val.into())))
    }

    pub fn top_basic() -> Self {
        AbstractValue::Basic(Flat::Top)
    }

    pub fn channel(info: ChannelInfo) -> Self {
        AbstractValue::Channel(Some(Rc::new(info)))
    }

    /// A new open and empty channel.
    pub fn new_channel(capacity: FlatInt) -> Self {
        Self::channel(ChannelInfo::new(capacity))
    }

    /// The channel with nil status: every operation on it blocks.
    pub fn nil_channel() -> Self {
        Self::channel(ChannelInfo::bottom(&()))
    }

    pub fn unlocked_mutex() -> Self {
        AbstractValue::Mutex(UNLOCKED)
    }

    pub fn unlocked_rw_mutex() -> Self {
        AbstractValue::RwMutex(Prod2(UNLOCKED, Flat::Element(0)))
    }

    pub fn cond(lockers: PointsToSet) -> Self {
        AbstractValue::Cond(Dropped::Elem(lockers))
    }

    pub fn wait_group(counter: i64) -> Self {
        AbstractValue::WaitGroup(Flat::Element(counter))
    }

    pub fn struct_of<I: IntoIterator<Item = (FieldKey, AbstractValue)>>(fields: I) -> Self {
        let fields = fields
            .into_iter()
            .fold(Fields::new(), |map, (k, v)| map.insert(k, v, &()));
        AbstractValue::Struct(Some(Dropped::Elem(fields)))
    }

    pub fn top_struct() -> Self {
        AbstractValue::Struct(Some(Dropped::Top))
    }

    /// Arrays and slices lump their elements into a single field.
    pub fn array(elem: AbstractValue) -> Self {
        Self::struct_of([(FieldKey::Index(AINDEX), elem)])
    }

    pub fn map(keys: AbstractValue, values: AbstractValue) -> Self {
        Self::struct_of([
            (FieldKey::Name("keys".into()), keys),
            (FieldKey::Name("values".into()), values),
        ])
    }

    pub fn closure(function: FunctionId, free_vars: Vec<AbstractValue>) -> Self {
        let fun = (
            FieldKey::Index(CLOSURE_FUN),
            AbstractValue::Basic(Flat::Element(Constant::Function(function))),
        );
        let vars = free_vars
            .into_iter()
            .enumerate()
            .map(|(i, v)| (FieldKey::Index(i as i32), v));
        Self::struct_of(core::iter::once(fun).chain(vars))
    }

    ////////////////
    // Predicates //
    ////////////////

    /// The value is the bottom of its tag.
    pub fn is_bot(&self) -> bool {
        match self {
            AbstractValue::Untyped => true,
            AbstractValue::Pointer(set) => set.is_empty(),
            AbstractValue::Channel(info) => info.is_none(),
            AbstractValue::Struct(s) => s.is_none(),
            AbstractValue::Basic(b) => b.is_bottom(),
            AbstractValue::Mutex(m) => m.is_bottom(),
            AbstractValue::RwMutex(Prod2(m, n)) => m.is_bottom() && n.is_bottom(),
            AbstractValue::Cond(c) => c.elem().is_some_and(PointsToSet::is_empty),
            AbstractValue::WaitGroup(n) => n.is_bottom(),
            AbstractValue::Wildcard => false,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, AbstractValue::Wildcard)
    }

    pub fn is_chan(&self) -> bool {
        matches!(self, AbstractValue::Channel(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, AbstractValue::Struct(_))
    }

    pub fn is_known_struct(&self) -> bool {
        self.fields().is_some()
    }

    pub fn is_top_struct(&self) -> bool {
        matches!(self, AbstractValue::Struct(Some(Dropped::Top)))
    }

    pub fn is_bot_struct(&self) -> bool {
        matches!(self, AbstractValue::Struct(None))
    }

    pub fn is_closure(&self) -> bool {
        self.fields()
            .and_then(|fields| fields.get(&FieldKey::Index(CLOSURE_FUN)))
            .is_some_and(|f| matches!(f, AbstractValue::Basic(Flat::Element(Constant::Function(_)))))
    }

    pub fn is_array(&self) -> bool {
        self.fields()
            .is_some_and(|fields| fields.contains_key(&FieldKey::Index(AINDEX)))
    }

    pub fn is_map(&self) -> bool {
        self.fields().is_some_and(|fields| {
            fields.contains_key(&FieldKey::Name("keys".into()))
                || fields.contains_key(&FieldKey::Name("values".into()))
        })
    }

    ///////////////
    // Accessors //
    ///////////////

    pub fn points_to(&self) -> Option<&PointsToSet> {
        match self {
            AbstractValue::Pointer(set) => Some(set),
            _ => None,
        }
    }

    pub fn channel_info(&self) -> Option<&ChannelInfo> {
        match self {
            AbstractValue::Channel(Some(info)) => Some(info),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&Fields> {
        match self {
            AbstractValue::Struct(Some(Dropped::Elem(fields))) => Some(fields),
            _ => None,
        }
    }

    pub fn basic(&self) -> Option<&Flat<Constant>> {
        match self {
            AbstractValue::Basic(b) => Some(b),
            _ => None,
        }
    }

    pub fn mutex(&self) -> Option<Flat<bool>> {
        match self {
            AbstractValue::Mutex(m) => Some(*m),
            _ => None,
        }
    }

    pub fn rw_mutex(&self) -> Option<&Prod2<Flat<bool>, FlatInt>> {
        match self {
            AbstractValue::RwMutex(rw) => Some(rw),
            _ => None,
        }
    }

    pub fn lockers(&self) -> Option<&Dropped<PointsToSet>> {
        match self {
            AbstractValue::Cond(lockers) => Some(lockers),
            _ => None,
        }
    }

    pub fn wait_group_counter(&self) -> Option<FlatInt> {
        match self {
            AbstractValue::WaitGroup(n) => Some(*n),
            _ => None,
        }
    }

    /// The function of a closure.
    pub fn closure_function(&self) -> Option<FunctionId> {
        match self.field(&FieldKey::Index(CLOSURE_FUN)) {
            AbstractValue::Basic(Flat::Element(Constant::Function(f))) => Some(f),
            _ => None,
        }
    }

    /// A field of a struct. Missing fields are bottom, every field of the top
    /// struct is unknown.
    pub fn field(&self, key: &FieldKey) -> AbstractValue {
        match self {
            AbstractValue::Struct(Some(Dropped::Top)) => AbstractValue::Wildcard,
            AbstractValue::Struct(Some(Dropped::Elem(fields))) => {
                fields.get(key).cloned().unwrap_or(AbstractValue::Untyped)
            }
            _ => AbstractValue::Untyped,
        }
    }

    /// Strong update of a struct field. Bottom values become structs, the top
    /// struct is unchanged.
    pub fn with_field(&self, key: FieldKey, value: AbstractValue) -> AbstractValue {
        match self {
            AbstractValue::Struct(Some(Dropped::Top)) => self.clone(),
            AbstractValue::Struct(Some(Dropped::Elem(fields))) => {
                AbstractValue::Struct(Some(Dropped::Elem(fields.insert(key, value, &()))))
            }
            _ => Self::struct_of([(key, value)]),
        }
    }

    pub fn with_channel<F: FnOnce(&mut ChannelInfo)>(&self, update: F) -> AbstractValue {
        let mut info = self
            .channel_info()
            .cloned()
            .unwrap_or_else(|| ChannelInfo::bottom(&()));
        update(&mut info);
        Self::channel(info)
    }

    ////////////////////////
    // Lattice operations //
    ////////////////////////

    /// The greatest lower bound. The value lattice has no universal top, so
    /// this is not part of a [Lattice] implementation.
    pub fn meet(&self, other: &Self) -> Self {
        use AbstractValue::*;
        match (self, other) {
            (Untyped, _) | (_, Untyped) => Untyped,
            (Wildcard, x) | (x, Wildcard) if matches!(x, Pointer(_) | Wildcard) => x.clone(),
            (Pointer(a), Pointer(b)) => Pointer(a.mono_meet(b)),
            (Channel(a), Channel(b)) => match (a, b) {
                (Some(a), Some(b)) if Rc::ptr_eq(a, b) => Channel(Some(a.clone())),
                (Some(a), Some(b)) => Channel(Some(Rc::new(a.meet(b)))),
                _ => Channel(None),
            },
            (Struct(a), Struct(b)) => Struct(match (a, b) {
                (Some(a), Some(b)) => Some(a.meet_by(b, |x, y| x.meet_by(y, &(), |v, w| v.meet(w)))),
                _ => None,
            }),
            (Basic(a), Basic(b)) => Basic(a.meet(b, &())),
            (Mutex(a), Mutex(b)) => Mutex(a.meet(b, &())),
            (RwMutex(a), RwMutex(b)) => RwMutex(a.meet(b, &((), ()))),
            (Cond(a), Cond(b)) => Cond(a.meet_by(b, |x, y| x.mono_meet(y))),
            (WaitGroup(a), WaitGroup(b)) => WaitGroup(a.meet(b, &())),
            (a, b) => tag_mismatch(a, b),
        }
    }

    /// The top element of the tag of the value. Closures have no top.
    pub fn to_top(&self) -> Self {
        use AbstractValue::*;
        match self {
            Untyped => Untyped,
            Pointer(_) | Wildcard => Wildcard,
            Channel(info) => Self::channel(
                info.as_deref()
                    .map(ChannelInfo::to_top)
                    .unwrap_or_else(|| ChannelInfo::bottom(&()).to_top()),
            ),
            Struct(Some(Dropped::Elem(fields))) => {
                if self.is_closure() {
                    panic!(
                        "{}",
                        AnalysisError::UnsupportedOperation("top of a closure".to_owned())
                    );
                }
                Struct(Some(Dropped::Elem(fields.map_values(|_, v| v.to_top(), &()))))
            }
            Struct(_) => Self::top_struct(),
            Basic(_) => Basic(Flat::Top),
            Mutex(_) => Mutex(Flat::Top),
            RwMutex(_) => RwMutex(Prod2(Flat::Top, Flat::Top)),
            Cond(_) => Cond(Dropped::Top),
            WaitGroup(_) => WaitGroup(Flat::Top),
        }
    }

    /// Splits `new` against `self` (the old value): the delta contains the
    /// parts of `new` that are not below `self`. The flag tells whether the
    /// delta is not bottom.
    pub fn difference(&self, new: &Self) -> (Self, bool) {
        if let (Some(old_fields), Some(new_fields)) = (self.fields(), new.fields()) {
            let mut relevant = false;
            let mut delta = Fields::new();
            for (key, value) in new_fields.iter() {
                let old = old_fields.get(key).cloned().unwrap_or(AbstractValue::Untyped);
                let (field_delta, field_relevant) = old.difference(value);
                if field_relevant {
                    relevant = true;
                    delta = delta.insert(key.clone(), field_delta, &());
                }
            }
            if !relevant {
                return (AbstractValue::Untyped, false);
            }
            return (AbstractValue::Struct(Some(Dropped::Elem(delta))), true);
        }
        if new <= self {
            return (AbstractValue::Untyped, false);
        }
        (new.clone(), true)
    }

    /// Replaces every location represented by the top location `top` with
    /// `top`.
    pub fn inject_top_location(&self, top: &Location) -> Self {
        use AbstractValue::*;
        match self {
            Pointer(set) => Pointer(set.inject_top_location(top)),
            Cond(Dropped::Elem(set)) => Cond(Dropped::Elem(set.inject_top_location(top))),
            Struct(Some(Dropped::Elem(fields))) => Struct(Some(Dropped::Elem(
                fields.map_values(|_, v| v.inject_top_location(top), &()),
            ))),
            Channel(Some(info)) => {
                let payload = info.payload.inject_top_location(top);
                if payload == info.payload {
                    return self.clone();
                }
                Self::channel(ChannelInfo {
                    payload,
                    ..(**info).clone()
                })
            }
            _ => self.clone(),
        }
    }

    ///////////////////
    // Typed values. //
    ///////////////////

    /// The value after converting from `from` to `to`. Conversions between
    /// strings and byte or rune sequences lose the contents.
    pub fn coerce(&self, from: &Type, to: &Type, program: &Program) -> Self {
        let is_string = |ty: &Type| matches!(program.underlying(ty), Type::Basic(BasicKind::String));
        let is_text = |ty: &Type| match program.underlying(ty) {
            Type::Slice(elem) | Type::Array(elem, _) => matches!(
                program.underlying(elem),
                Type::Basic(BasicKind::Uint8 | BasicKind::Int32)
            ),
            _ => false,
        };
        if (is_string(from) && is_text(to)) || (is_text(from) && is_string(to)) {
            return Self::top_of_type(to, program);
        }
        self.clone()
    }

    /// The top value of a type. Values of pointer-like types are unknown
    /// pointers.
    pub fn top_of_type(ty: &Type, program: &Program) -> Self {
        if let Some(kind) = program.sync_kind(ty) {
            return match kind {
                SyncKind::Mutex => AbstractValue::Mutex(Flat::Top),
                SyncKind::RwMutex => AbstractValue::RwMutex(Prod2(Flat::Top, Flat::Top)),
                SyncKind::Cond => AbstractValue::Cond(Dropped::Top),
                SyncKind::WaitGroup => AbstractValue::WaitGroup(Flat::Top),
                SyncKind::Locker => AbstractValue::Wildcard,
            };
        }
        if program.is_pointer_like(ty) {
            return AbstractValue::Wildcard;
        }
        match program.underlying(ty) {
            Type::Struct(fields) => Self::struct_of(
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (FieldKey::Index(i as i32), Self::top_of_type(&f.ty, program))),
            ),
            Type::Tuple(elems) => Self::struct_of(
                elems
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (FieldKey::Index(i as i32), Self::top_of_type(t, program))),
            ),
            Type::Array(elem, _) => Self::array(Self::top_of_type(elem, program)),
            _ => AbstractValue::Basic(Flat::Top),
        }
    }

    /// The zero value of a type.
    pub fn zero_of_type(ty: &Type, program: &Program) -> Self {
        if let Some(kind) = program.sync_kind(ty) {
            return match kind {
                SyncKind::Mutex => Self::unlocked_mutex(),
                SyncKind::RwMutex => Self::unlocked_rw_mutex(),
                SyncKind::Cond => Self::cond(PointsToSet::nil()),
                SyncKind::WaitGroup => Self::wait_group(0),
                SyncKind::Locker => Self::nil(),
            };
        }
        if program.is_pointer_like(ty) {
            return Self::nil();
        }
        match program.underlying(ty) {
            Type::Basic(BasicKind::Bool) => Self::bool(false),
            Type::Basic(BasicKind::String) => Self::string(""),
            Type::Basic(kind) if kind.is_integer() => Self::int(0),
            Type::Basic(kind) if kind.is_float() => {
                AbstractValue::Basic(Flat::Element(Constant::float(0.0)))
            }
            Type::Basic(_) => AbstractValue::Basic(Flat::Element(Constant::Opaque("(0+0i)".into()))),
            Type::Struct(fields) => Self::struct_of(
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (FieldKey::Index(i as i32), Self::zero_of_type(&f.ty, program))),
            ),
            Type::Tuple(elems) => Self::struct_of(
                elems
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (FieldKey::Index(i as i32), Self::zero_of_type(t, program))),
            ),
            Type::Array(elem, _) => Self::array(Self::zero_of_type(elem, program)),
            _ => AbstractValue::Untyped,
        }
    }

    /// The value of a constant of type `ty`. Integers must fit in 64 bits.
    pub fn from_literal(literal: &Literal, ty: &Type, program: &Program) -> Result<Self> {
        Ok(match literal {
            Literal::Nil => Self::zero_of_type(ty, program),
            Literal::Bool(b) => Self::bool(*b),
            Literal::Int(i) => {
                let val = i64::try_from(*i)
                    .map_err(|_| AnalysisError::UnrepresentableConstant(i.to_string()))?;
                match program.underlying(ty) {
                    Type::Basic(kind) if kind.is_float() => {
                        AbstractValue::Basic(Flat::Element(Constant::float(val as f64)))
                    }
                    _ => Self::int(val),
                }
            }
            Literal::Float(f) => AbstractValue::Basic(Flat::Element(Constant::float(*f))),
            Literal::String(s) => AbstractValue::Basic(Flat::Element(Constant::String(s.clone()))),
        })
    }
}

impl PartialOrd for AbstractValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use AbstractValue::*;
        match (self, other) {
            (Untyped, Untyped) | (Wildcard, Wildcard) => Some(Ordering::Equal),
            (Untyped, _) | (Pointer(_), Wildcard) => Some(Ordering::Less),
            (_, Untyped) | (Wildcard, Pointer(_)) => Some(Ordering::Greater),
            (Pointer(a), Pointer(b)) => a.partial_cmp(b),
            (Channel(a), Channel(b)) => match (a, b) {
                (Some(a), Some(b)) if Rc::ptr_eq(a, b) => Some(Ordering::Equal),
                (Some(a), Some(b)) => a.partial_cmp(b),
                (None, None) => Some(Ordering::Equal),
                (None, Some(_)) => Some(Ordering::Less),
                (Some(_), None) => Some(Ordering::Greater),
            },
            (Struct(a), Struct(b)) => a.partial_cmp(b),
            (Basic(a), Basic(b)) => a.partial_cmp(b),
            (Mutex(a), Mutex(b)) => a.partial_cmp(b),
            (RwMutex(a), RwMutex(b)) => a.partial_cmp(b),
            (Cond(a), Cond(b)) => a.partial_cmp(b),
            (WaitGroup(a), WaitGroup(b)) => a.partial_cmp(b),
            (a, b) => tag_mismatch(a, b),
        }
    }
}

impl JoinSemiLattice for AbstractValue {
    type LatticeContext = ();

    fn bottom(_: &Self::LatticeContext) -> Self {
        AbstractValue::Untyped
    }

    fn join(&self, other: &Self, ctx: &Self::LatticeContext) -> Self {
        use AbstractValue::*;
        match (self, other) {
            (Untyped, x) | (x, Untyped) => x.clone(),
            (Wildcard, Pointer(_) | Wildcard) | (Pointer(_), Wildcard) => Wildcard,
            (Pointer(a), Pointer(b)) => Pointer(a.join(b, ctx)),
            (Channel(a), Channel(b)) => match (a, b) {
                (None, _) => other.clone(),
                (_, None) => self.clone(),
                (Some(x), Some(y)) if Rc::ptr_eq(x, y) => self.clone(),
                (Some(x), Some(y)) => {
                    let joined = x.join(y, ctx);
                    if joined == **x {
                        self.clone()
                    } else {
                        Self::channel(joined)
                    }
                }
            },
            (Struct(a), Struct(b)) => Struct(a.join(b, ctx)),
            (Basic(a), Basic(b)) => Basic(a.join(b, ctx)),
            (Mutex(a), Mutex(b)) => Mutex(a.join(b, ctx)),
            (RwMutex(a), RwMutex(b)) => RwMutex(a.join(b, &((), ()))),
            (Cond(a), Cond(b)) => Cond(a.join(b, ctx)),
            (WaitGroup(a), WaitGroup(b)) => WaitGroup(a.join(b, ctx)),
            (a, b) => tag_mismatch(a, b),
        }
    }

    fn widen(&self, previous: &Self, ctx: &Self::LatticeContext, iteration: usize) -> Self {
        use AbstractValue::*;
        match (self, previous) {
            (Channel(Some(a)), Channel(Some(b))) => {
                Self::channel(a.widen(b, ctx, iteration))
            }
            (Struct(a), Struct(b)) => Struct(a.widen(b, ctx, iteration)),
            _ => self.clone(),
        }
    }
}

impl Height for AbstractValue {
    fn height(&self) -> i64 {
        use AbstractValue::*;
        match self {
            Untyped => 0,
            Pointer(set) => set.height(),
            Channel(None) => 0,
            Channel(Some(info)) => {
                let h = info.height();
                if h < 0 { -1 } else { h.saturating_add(1) }
            }
            Struct(s) => s.height(),
            Basic(b) => b.height(),
            Mutex(m) => m.height(),
            RwMutex(rw) => rw.height(),
            Cond(c) => c.height(),
            WaitGroup(n) => n.height(),
            Wildcard => i64::MAX,
        }
    }
}

impl Display for AbstractValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use AbstractValue::*;
        match self {
            Untyped => write!(f, "⊥"),
            Wildcard => write!(f, "*"),
            Pointer(set) => write!(f, "{set}"),
            Channel(None) => write!(f, "chan ⊥"),
            Channel(Some(info)) => write!(
                f,
                "chan[cap: {}, status: {}, buf: {}, buf∈{}, payload: {}]",
                info.capacity,
                info.status.map(|s| format!("{s:?}")),
                info.buffer_flat,
                info.buffer_interval,
                info.payload
            ),
            Struct(None) => write!(f, "struct ⊥"),
            Struct(Some(Dropped::Top)) => write!(f, "struct ⊤"),
            Struct(Some(Dropped::Elem(fields))) => {
                let mut entries: Vec<_> = fields.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let entries: Vec<String> = entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Basic(b) => write!(f, "{b}"),
            Mutex(m) => write!(f, "mutex {}", m.map(|l| if *l { "locked" } else { "unlocked" })),
            RwMutex(Prod2(m, n)) => write!(
                f,
                "rwmutex {} readers {n}",
                m.map(|l| if *l { "locked" } else { "unlocked" })
            ),
            Cond(Dropped::Top) => write!(f, "cond ⊤"),
            Cond(Dropped::Elem(lockers)) => write!(f, "cond {lockers}"),
            WaitGroup(n) => write!(f, "waitgroup {n}"),
        }
    }
}
