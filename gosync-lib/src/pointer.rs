use std::collections::HashMap;
use std::rc::Rc;

use crate::ssa::{FunctionId, Type, ValueId};

/// One step in the accessor chain of a points-to label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathStep {
    FieldAccess(i32),
    ArrayAccess,
}

/// An abstract object of the upfront points-to analysis: the value
/// allocating it (or the global or function it stands for), and the path
/// to a sub-object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub value: ValueId,
    pub path: Vec<PathStep>,
}

impl Label {
    pub fn new(value: ValueId) -> Self {
        Self {
            value,
            path: Vec::new(),
        }
    }

    pub fn with_path(value: ValueId, path: Vec<PathStep>) -> Self {
        Self { value, path }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PointsToResult {
    pub labels: Vec<Label>,
}

impl PointsToResult {
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// The results of a may-point-to analysis run before the abstract
/// interpretation. The queries are pure with respect to a fixed result.
pub trait PointerAnalysis {
    /// What an SSA value may point to.
    fn queries(&self, value: ValueId) -> PointsToResult;

    /// What the objects pointed to by a pointer-to-pointer value may point
    /// to.
    fn indirect_queries(&self, value: ValueId) -> PointsToResult;

    /// Resolves a method of a concrete (dynamic) type.
    fn lookup_method(&self, ty: &Type, method: &str) -> Option<FunctionId>;

    /// The root of the call graph.
    fn root_function(&self) -> Option<FunctionId>;
}

/// A [PointerAnalysis] backed by tables, filled by the front-end that ran
/// the actual analysis.
#[derive(Clone, Debug, Default)]
pub struct PointerResult {
    direct: HashMap<ValueId, PointsToResult>,
    indirect: HashMap<ValueId, PointsToResult>,
    methods: HashMap<(Type, Rc<str>), FunctionId>,
    root: Option<FunctionId>,
}

impl PointerResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_label(&mut self, value: ValueId, label: Label) -> &mut Self {
        let labels = &mut self.direct.entry(value).or_default().labels;
        if !labels.contains(&label) {
            labels.push(label);
        }
        self
    }

    pub fn add_indirect_label(&mut self, value: ValueId, label: Label) -> &mut Self {
        let labels = &mut self.indirect.entry(value).or_default().labels;
        if !labels.contains(&label) {
            labels.push(label);
        }
        self
    }

    pub fn add_method(&mut self, ty: Type, method: &str, function: FunctionId) -> &mut Self {
        self.methods.insert((ty, method.into()), function);
        self
    }

    pub fn set_root(&mut self, root: FunctionId) -> &mut Self {
        self.root = Some(root);
        self
    }
}

impl PointerAnalysis for PointerResult {
    fn queries(&self, value: ValueId) -> PointsToResult {
        self.direct.get(&value).cloned().unwrap_or_default()
    }

    fn indirect_queries(&self, value: ValueId) -> PointsToResult {
        self.indirect.get(&value).cloned().unwrap_or_default()
    }

    fn lookup_method(&self, ty: &Type, method: &str) -> Option<FunctionId> {
        self.methods.get(&(ty.clone(), method.into())).copied()
    }

    fn root_function(&self) -> Option<FunctionId> {
        self.root
    }
}
