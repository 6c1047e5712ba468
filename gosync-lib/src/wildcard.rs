//! The abstract interpretation meets unknown pointers (see
//! [AbstractValue::Wildcard]) when values flow in from code it did not
//! analyze. The [Materializer] replaces them with what the upfront
//! points-to analysis found, and binds the top locations of the pointed
//! objects to the top value of their type.

use std::collections::HashMap;
use std::rc::Rc;

use analysis::domains::Flat;
use tracing::{trace, warn};

use crate::config::Options;
use crate::domains::{AbstractValue, ChannelInfo, PointsToSet};
use crate::error::{AnalysisError, Result};
use crate::location::Location;
use crate::memops;
use crate::memory::Memory;
use crate::pointer::{Label, PathStep, PointerAnalysis};
use crate::ssa::{Builtin, Callee, InstrKind, Program, SyncKind, Type, ValueId, ValueKind};

pub struct Materializer<'a, P: PointerAnalysis> {
    program: &'a Program,
    pointer: Rc<P>,
    options: &'a Options,
    /// Points-to sets by value, the flag marks the indirect ones.
    cache: HashMap<(ValueId, bool), PointsToSet>,
}

impl<'a, P: PointerAnalysis> Materializer<'a, P> {
    pub fn new(program: &'a Program, pointer: Rc<P>, options: &'a Options) -> Self {
        Self {
            program,
            pointer,
            options,
            cache: HashMap::new(),
        }
    }

    pub fn pointer(&self) -> &Rc<P> {
        &self.pointer
    }

    /// Switches to another points-to result. The cache survives only if it
    /// is the same result.
    pub fn set_pointer(&mut self, pointer: Rc<P>) {
        if !Rc::ptr_eq(&self.pointer, &pointer) {
            self.cache.clear();
            self.pointer = pointer;
        }
    }

    /// The top locations a value may point to according to the points-to
    /// analysis, always including nil.
    pub fn points_to(&mut self, value: ValueId) -> PointsToSet {
        let target = self.program.type_of(value);
        self.collect(value, target, false)
    }

    /// The top locations the objects pointed to by a pointer-to-pointer
    /// value may point to, always including nil.
    pub fn indirect_points_to(&mut self, value: ValueId) -> PointsToSet {
        let program = self.program;
        match program.pointee(program.type_of(value)) {
            Some(inner) if program.is_pointer_like(inner) => self.collect(value, inner, true),
            _ => PointsToSet::nil(),
        }
    }

    fn collect(&mut self, value: ValueId, target: &Type, indirect: bool) -> PointsToSet {
        if let Some(set) = self.cache.get(&(value, indirect)) {
            return set.clone();
        }
        let result = if indirect {
            self.pointer.indirect_queries(value)
        } else {
            self.pointer.queries(value)
        };
        let mut set = PointsToSet::nil();
        for label in result.labels() {
            let Some(location) = self.location(label) else {
                trace!(value = %value, label = ?label, "label without a location");
                continue;
            };
            if self.options.filter_append_sites && self.is_append_site(label.value) {
                trace!(value = %value, location = %location, "skipping append site");
                continue;
            }
            if let Err(err) = self.check_type(label, value, target) {
                if self.options.verbose {
                    warn!(%err, "dropping points-to label");
                } else {
                    trace!(%err, "dropping points-to label");
                }
                continue;
            }
            set = set.add(location);
        }
        self.cache.insert((value, indirect), set.clone());
        set
    }

    /// Replaces an unknown value of `value` with the pointer found by the
    /// points-to analysis. The unbound pointed objects are bound to the top
    /// value of their type. Objects holding pointers get the indirect
    /// points-to set of `value`.
    pub fn materialize(&mut self, memory: &Memory, value: ValueId) -> Result<(AbstractValue, Memory)> {
        let set = self.points_to(value);
        let ty = self.program.type_of(value);
        let memory = self.bind_targets(memory, &set, ty, Some(value))?;
        Ok((AbstractValue::Pointer(set), memory))
    }

    fn bind_targets(
        &mut self,
        memory: &Memory,
        set: &PointsToSet,
        ty: &'a Type,
        value: Option<ValueId>,
    ) -> Result<Memory> {
        let mut memory = memory.clone();
        for location in set.sorted() {
            if location.is_nil()
                || matches!(location, Location::FunctionPointer(_))
                || memory.contains(location.base())
            {
                continue;
            }
            let (object, bound) = self.top_object(&memory, location, ty, value)?;
            memory = memops::update(&bound, location, object)?;
        }
        Ok(memory)
    }

    /// The top value of the object at `location` pointed to by a value of
    /// type `ty`. Only the first level of pointers follows the indirect
    /// queries of `value`.
    fn top_object(
        &mut self,
        memory: &Memory,
        location: &Location,
        ty: &'a Type,
        value: Option<ValueId>,
    ) -> Result<(AbstractValue, Memory)> {
        let program = self.program;
        let top = |ty: &Type| AbstractValue::top_of_type(ty, program);
        let object = match program.underlying(ty) {
            Type::Pointer(elem) => match value {
                Some(value) if program.is_pointer_like(elem) => {
                    let inner = self.indirect_points_to(value);
                    if inner.filter_nil().is_empty() {
                        top(elem)
                    } else {
                        let bound = self.bind_targets(memory, &inner, elem, None)?;
                        return Ok((AbstractValue::Pointer(inner), bound));
                    }
                }
                _ => top(elem),
            },
            Type::Chan(elem, _) => {
                let mut info = ChannelInfo::new(Flat::Top).to_top();
                info.payload = top(elem);
                AbstractValue::channel(info)
            }
            Type::Map(key, elem) => AbstractValue::map(top(key), top(elem)),
            Type::Slice(elem) => AbstractValue::array(top(elem)),
            Type::Signature(_) => match self.site_instr(location) {
                Some(InstrKind::MakeClosure { func, bindings }) => match program.value(*func).kind {
                    ValueKind::Function(function) => AbstractValue::closure(
                        function,
                        bindings.iter().map(|&b| top(program.type_of(b))).collect(),
                    ),
                    _ => AbstractValue::Wildcard,
                },
                _ => AbstractValue::Wildcard,
            },
            Type::Interface(_) => match self.site_instr(location) {
                Some(&InstrKind::MakeInterface { x }) => {
                    let concrete = program.type_of(x);
                    if program.is_pointer_like(concrete) {
                        // Lockers and other pointers in interfaces point to
                        // materialized objects too.
                        return self.materialize(memory, x);
                    }
                    top(concrete)
                }
                _ => AbstractValue::Wildcard,
            },
            _ => AbstractValue::Wildcard,
        };
        Ok((object, memory.clone()))
    }

    fn site_instr(&self, location: &Location) -> Option<&'a InstrKind> {
        let program = self.program;
        let (_, instr) = program.defining_instr(location.site()?)?;
        Some(&instr.kind)
    }

    fn location(&self, label: &Label) -> Option<Location> {
        let base = match self.program.value(label.value).kind {
            ValueKind::Global => Location::Global(label.value),
            ValueKind::Function(function) => return Some(Location::FunctionPointer(function)),
            ValueKind::Instruction(_) => Location::top_alloc(label.value),
            _ => return None,
        };
        Some(label.path.iter().fold(base, |location, step| match step {
            PathStep::FieldAccess(field) => location.field(*field),
            PathStep::ArrayAccess => location.index(),
        }))
    }

    fn is_append_site(&self, site: ValueId) -> bool {
        let Some((_, instr)) = self.program.defining_instr(site) else {
            return false;
        };
        let InstrKind::Call(call) = &instr.kind else {
            return false;
        };
        match call.callee {
            Callee::Value(callee) => matches!(
                self.program.value(callee).kind,
                ValueKind::Builtin(Builtin::Append)
            ),
            Callee::Invoke { .. } => false,
        }
    }

    /// The type of the object a label stands for, if known.
    fn object_type(&self, label: &Label) -> Option<&'a Type> {
        let program = self.program;
        let site = program.value(label.value);
        let allocates = match &site.kind {
            ValueKind::Global => true,
            ValueKind::Instruction(_) => matches!(
                program.defining_instr(label.value).map(|(_, i)| &i.kind),
                Some(InstrKind::Alloc { .. })
            ),
            _ => false,
        };
        if !allocates {
            return None;
        }
        let mut ty = program.pointee(&site.ty)?;
        for step in &label.path {
            ty = match (program.underlying(ty), step) {
                (Type::Struct(fields), PathStep::FieldAccess(field)) => {
                    &fields.get(usize::try_from(*field).ok()?)?.ty
                }
                (Type::Array(elem, _) | Type::Slice(elem), PathStep::ArrayAccess) => elem,
                _ => return None,
            };
        }
        Some(ty)
    }

    /// Labels of objects whose type cannot be pointed to by the value
    /// reveal an imprecision of the points-to analysis.
    fn check_type(&self, label: &Label, value: ValueId, target: &Type) -> Result<()> {
        let program = self.program;
        let same = |a: &Type, b: &Type| a == b || program.underlying(a) == program.underlying(b);
        let label_type = program.type_of(label.value);
        let compatible = match program.underlying(target) {
            Type::Pointer(elem) => self.object_type(label).is_none_or(|object| {
                same(object, elem)
                    || matches!(program.underlying(elem), Type::Interface(_))
                    || program.sync_kind(elem) == Some(SyncKind::Locker)
            }),
            Type::Chan(..) => matches!(program.underlying(label_type), Type::Chan(..)),
            Type::Map(..) => matches!(program.underlying(label_type), Type::Map(..)),
            Type::Signature(_) => matches!(program.underlying(label_type), Type::Signature(_)),
            _ => true,
        };
        if compatible {
            return Ok(());
        }
        let label_type = self.object_type(label).unwrap_or(label_type);
        Err(AnalysisError::PointerAnalysisInconsistency {
            label: format!("{}{:?}", program.value(label.value).name, label.path),
            label_type: program.display_type(label_type),
            value: program.value(value).name.to_string(),
            value_type: program.display_type(target),
        })
    }
}
