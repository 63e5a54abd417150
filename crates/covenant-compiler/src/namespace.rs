//! Nested name resolution with strict LIFO scoping.
//!
//! The [`Namespace`] is an ordered stack of scopes: a builtin base seeded
//! once and frozen, the module scope, then one scope per function and per
//! nested block. A name may be bound only once across the whole open
//! chain; lookup walks innermost to outermost.
//!
//! Scopes are entered through [`Namespace::scoped`], which pops on every
//! exit path, so a failing analysis walk can never leak a scope.

use covenant_core::{AnalysisError, Definition, Span};
use rustc_hash::FxHashMap;

/// What a name is bound to.
///
/// Values carry their full [`Definition`]; callables and user types are
/// bound by name here with their details in the module registry, so that
/// the collision rule covers every kind of declaration uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A constant, immutable, parameter, or local - usable as a bare name.
    Value(Definition),
    /// A storage variable. Reserved at module scope; access goes through
    /// `self.name`, never the bare name.
    Storage(String),
    /// A module function.
    Function(String),
    /// A struct, flag, or interface name.
    Type(String),
    /// An event name.
    Event(String),
    /// A built-in callable seeded into the base scope.
    Builtin(Builtin),
    /// An environment namespace (`msg`, `block`) seeded into the base scope.
    Env(EnvNs),
}

/// Built-in callables. Pre-typed by the analyzer, not declared in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    Min,
    Max,
}

/// Environment namespaces readable through attribute access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvNs {
    Msg,
    Block,
}

/// The kind of an open scope, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Builtin,
    Module,
    Function,
    Block,
}

/// One scope's bindings, with the span of each definition site.
#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    bindings: FxHashMap<String, (Binding, Span)>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            bindings: FxHashMap::default(),
        }
    }
}

/// The scope stack for one compilation unit.
#[derive(Debug)]
pub struct Namespace {
    scopes: Vec<Scope>,
}

impl Namespace {
    /// A namespace with the seeded builtin base and an empty module scope.
    pub fn new() -> Self {
        let mut builtin = Scope::new(ScopeKind::Builtin);
        let seed = Span::default();
        builtin
            .bindings
            .insert("len".to_string(), (Binding::Builtin(Builtin::Len), seed));
        builtin
            .bindings
            .insert("min".to_string(), (Binding::Builtin(Builtin::Min), seed));
        builtin
            .bindings
            .insert("max".to_string(), (Binding::Builtin(Builtin::Max), seed));
        builtin
            .bindings
            .insert("msg".to_string(), (Binding::Env(EnvNs::Msg), seed));
        builtin
            .bindings
            .insert("block".to_string(), (Binding::Env(EnvNs::Block), seed));
        Self {
            scopes: vec![builtin, Scope::new(ScopeKind::Module)],
        }
    }

    /// Number of currently open scopes (builtin and module included).
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Bind a name in the innermost scope.
    ///
    /// Fails with `NameCollision` if the name is already bound anywhere
    /// in the open chain, builtins included.
    pub fn define(
        &mut self,
        name: &str,
        binding: Binding,
        span: Span,
    ) -> Result<(), AnalysisError> {
        if let Some((_, previous)) = self.find(name) {
            return Err(AnalysisError::NameCollision {
                name: name.to_string(),
                span,
                previous,
            });
        }
        let innermost = self
            .scopes
            .last_mut()
            .expect("namespace always has a base scope");
        debug_assert!(
            innermost.kind != ScopeKind::Builtin,
            "builtin scope is frozen after seeding"
        );
        innermost
            .bindings
            .insert(name.to_string(), (binding, span));
        Ok(())
    }

    /// Bind a value definition in the innermost scope.
    pub fn define_value(
        &mut self,
        name: &str,
        def: Definition,
        span: Span,
    ) -> Result<(), AnalysisError> {
        self.define(name, Binding::Value(def), span)
    }

    /// Resolve a name anywhere in the open chain, innermost first.
    pub fn lookup(&self, name: &str, span: Span) -> Result<&Binding, AnalysisError> {
        for scope in self.scopes.iter().rev() {
            if let Some((binding, _)) = scope.bindings.get(name) {
                return Ok(binding);
            }
        }
        Err(AnalysisError::UndeclaredName {
            name: name.to_string(),
            span,
        })
    }

    /// Resolve a name to a value definition.
    pub fn lookup_value(&self, name: &str, span: Span) -> Result<&Definition, AnalysisError> {
        match self.lookup(name, span)? {
            Binding::Value(def) => Ok(def),
            _ => Err(AnalysisError::UndeclaredName {
                name: name.to_string(),
                span,
            }),
        }
    }

    /// Run `body` inside a fresh scope of the given kind.
    ///
    /// The scope is popped before this returns, on success and on error
    /// alike, restoring the exact prior chain.
    pub fn scoped<T, F>(&mut self, kind: ScopeKind, body: F) -> Result<T, AnalysisError>
    where
        F: FnOnce(&mut Namespace) -> Result<T, AnalysisError>,
    {
        let token = self.open_scope(kind);
        let result = body(self);
        self.close_scope(token);
        result
    }

    /// Push a scope, returning the token [`Namespace::close_scope`] needs.
    ///
    /// Callers that cannot use [`Namespace::scoped`] (walkers that carry
    /// the namespace inside a larger context) must pair these on every
    /// exit path themselves.
    pub(crate) fn open_scope(&mut self, kind: ScopeKind) -> usize {
        debug_assert!(kind == ScopeKind::Function || kind == ScopeKind::Block);
        let token = self.scopes.len();
        self.scopes.push(Scope::new(kind));
        token
    }

    /// Pop back to a token from [`Namespace::open_scope`].
    pub(crate) fn close_scope(&mut self, token: usize) {
        debug_assert!(token >= 2, "builtin and module scopes never close");
        self.scopes.truncate(token);
    }

    fn find(&self, name: &str) -> Option<(&Binding, Span)> {
        for scope in self.scopes.iter().rev() {
            if let Some((binding, span)) = scope.bindings.get(name) {
                return Some((binding, *span));
            }
        }
        None
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}
