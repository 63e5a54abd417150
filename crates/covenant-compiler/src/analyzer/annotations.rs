//! The annotation side table.
//!
//! The tree is immutable, so analysis results attach here, keyed by
//! [`NodeId`]: the resolved definition for every expression, the folded
//! value where one is statically known, and the definitions of binding
//! statements (`let`, loop variables) that lowering needs to find again.

use covenant_core::ast::NodeId;
use covenant_core::{Definition, Value};
use rustc_hash::FxHashMap;

/// What analysis learned about one expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprInfo {
    pub def: Definition,
    /// Present when the expression folded to a constant.
    pub value: Option<Value>,
}

impl ExprInfo {
    pub fn new(def: Definition) -> Self {
        Self { def, value: None }
    }

    pub fn folded(def: Definition, value: Value) -> Self {
        Self {
            def,
            value: Some(value),
        }
    }
}

/// Node-keyed analysis results for one function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    nodes: FxHashMap<NodeId, ExprInfo>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, info: ExprInfo) {
        self.nodes.insert(id, info);
    }

    pub fn get(&self, id: NodeId) -> Option<&ExprInfo> {
        self.nodes.get(&id)
    }

    /// The definition recorded for a node. Lowering relies on analysis
    /// having visited every node it walks.
    pub fn def(&self, id: NodeId) -> Option<&Definition> {
        self.nodes.get(&id).map(|info| &info.def)
    }

    /// The folded value recorded for a node, if any.
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.nodes.get(&id).and_then(|info| info.value.as_ref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
