//! Local pass: per-function semantic analysis.
//!
//! Each function body is walked in a fresh scope chained onto the module
//! and builtin scopes. The walk decorates expression nodes with resolved
//! definitions and folded values, computes the body's observed effect
//! against the declared mutability ceiling, tracks collections under
//! iteration, and allocates the function's static memory frame. A body
//! aborts at its first error and retains no partial annotations.

mod annotations;
mod expr;
mod stmt;

pub use annotations::{Annotations, ExprInfo};

use covenant_core::ast::{Decl, Module, Stmt};
use covenant_core::{AnalysisError, Definition, FunctionSig, Mutability, Span, Visibility};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::namespace::{Namespace, ScopeKind};
use crate::passes::ModulePass;
use crate::registry::ModuleRegistry;

/// An analysis failure, tagged with the pass that produced it and the
/// developer note of the statement it occurred in (harvested from an
/// inline `# dev:` comment), if any.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisFailure {
    pub error: AnalysisError,
    pub phase: covenant_core::Phase,
    pub dev: Option<String>,
}

impl From<AnalysisError> for AnalysisFailure {
    /// Declaration-level failures: the module pass and the whole-module
    /// checks that follow the local passes.
    fn from(error: AnalysisError) -> Self {
        Self {
            error,
            phase: covenant_core::Phase::ModulePass,
            dev: None,
        }
    }
}

/// Analysis results for one function body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAnalysis {
    pub name: String,
    /// Index into `Module::decls`; `None` for synthesized getters.
    pub decl_index: Option<usize>,
    pub annotations: Annotations,
    /// Static memory frame size in words (params included).
    pub frame_words: u64,
    /// The effect the body was observed to have.
    pub observed: Mutability,
    /// Internal callees, for the recursion check and call lowering.
    pub calls: Vec<String>,
}

/// The fully-annotated module: registry plus per-function results.
#[derive(Debug)]
pub struct ModuleAnalysis {
    pub registry: ModuleRegistry,
    pub functions: Vec<FunctionAnalysis>,
}

impl ModuleAnalysis {
    pub fn function(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Run the module pass and every local pass over a module.
///
/// Failures across independent declarations and functions are batched;
/// inside one function the first error wins.
pub fn analyze_module(module: &Module) -> Result<ModuleAnalysis, Vec<AnalysisFailure>> {
    let output = ModulePass::new().run(module);
    if !output.errors.is_empty() {
        return Err(output.errors.into_iter().map(Into::into).collect());
    }
    let mut registry = output.registry;
    let mut namespace = output.namespace;
    let mut failures = Vec::new();
    let mut functions = Vec::new();

    let infos: Vec<(String, Option<usize>)> = registry
        .functions()
        .iter()
        .map(|f| (f.sig.name.clone(), f.decl_index))
        .collect();
    for (name, decl_index) in infos {
        let Some(index) = decl_index else {
            // Synthesized getters have no body; their signature is final.
            functions.push(FunctionAnalysis {
                name,
                decl_index: None,
                annotations: Annotations::new(),
                frame_words: 0,
                observed: Mutability::View,
                calls: Vec::new(),
            });
            continue;
        };
        let Decl::Function(decl) = &module.decls[index] else {
            continue;
        };
        let sig = registry
            .function(&name)
            .map(|f| f.sig.clone())
            .expect("module pass registered every function");
        let mut analyzer = FunctionAnalyzer::new(&registry, &mut namespace, &sig);
        match analyzer.analyze(&decl.body) {
            Ok(analysis) => {
                debug!(
                    function = %name,
                    observed = %analysis.observed,
                    frame_words = analysis.frame_words,
                    "local pass"
                );
                if sig.mutability.is_none() {
                    // Inference: the observed effect becomes the recorded
                    // mutability, visible to later callers.
                    registry.set_function_mutability(&name, analysis.observed);
                }
                functions.push(FunctionAnalysis {
                    name,
                    decl_index: Some(index),
                    annotations: analysis.annotations,
                    frame_words: analysis.frame_words,
                    observed: analysis.observed,
                    calls: analysis.calls,
                });
            }
            Err(error) => {
                failures.push(AnalysisFailure {
                    error,
                    phase: covenant_core::Phase::LocalPass,
                    dev: analyzer.dev.clone(),
                });
            }
        }
    }

    if failures.is_empty() {
        if let Err(error) = check_recursion(&functions) {
            failures.push(error.into());
        }
    }
    if failures.is_empty() {
        if let Err(error) = check_immutables_initialized(module, &registry, &functions) {
            failures.push(error.into());
        }
    }
    if failures.is_empty() {
        Ok(ModuleAnalysis {
            registry,
            functions,
        })
    } else {
        Err(failures)
    }
}

/// Internal call cycles are rejected: static memory frames rely on an
/// acyclic call graph.
fn check_recursion(functions: &[FunctionAnalysis]) -> Result<(), AnalysisError> {
    let index: FxHashMap<&str, &FunctionAnalysis> =
        functions.iter().map(|f| (f.name.as_str(), f)).collect();
    let mut done: FxHashSet<&str> = FxHashSet::default();
    for root in functions {
        let mut path: Vec<&str> = Vec::new();
        visit(root, &index, &mut done, &mut path)?;
    }
    return Ok(());

    fn visit<'a>(
        f: &'a FunctionAnalysis,
        index: &FxHashMap<&str, &'a FunctionAnalysis>,
        done: &mut FxHashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), AnalysisError> {
        if done.contains(f.name.as_str()) {
            return Ok(());
        }
        if path.contains(&f.name.as_str()) {
            return Err(AnalysisError::InvalidOperation {
                message: format!(
                    "recursive call cycle: {} -> {}",
                    path.join(" -> "),
                    f.name
                ),
                span: Span::default(),
            });
        }
        path.push(&f.name);
        for callee in &f.calls {
            if let Some(next) = index.get(callee.as_str()) {
                visit(next, index, done, path)?;
            }
        }
        path.pop();
        done.insert(&f.name);
        Ok(())
    }
}

/// Every declared immutable must be assigned by the deploy function.
fn check_immutables_initialized(
    module: &Module,
    registry: &ModuleRegistry,
    functions: &[FunctionAnalysis],
) -> Result<(), AnalysisError> {
    if registry.immutables().is_empty() {
        return Ok(());
    }
    let deploy = registry.deploy_function();
    let assigned: FxHashSet<&str> = match deploy {
        Some(info) => {
            let analysis = functions
                .iter()
                .find(|f| f.name == info.sig.name)
                .expect("deploy function was analyzed");
            let Some(index) = analysis.decl_index else {
                return Ok(());
            };
            let Decl::Function(decl) = &module.decls[index] else {
                return Ok(());
            };
            collect_immutable_targets(&decl.body)
        }
        None => FxHashSet::default(),
    };
    for immutable in registry.immutables() {
        if !assigned.contains(immutable.name.as_str()) {
            return Err(AnalysisError::InvalidOperation {
                message: format!(
                    "immutable '{}' is never assigned in the deploy function",
                    immutable.name
                ),
                span: immutable.span,
            });
        }
    }
    Ok(())
}

fn collect_immutable_targets(body: &[Stmt]) -> FxHashSet<&str> {
    let mut out = FxHashSet::default();
    collect(body, &mut out);
    return out;

    fn collect<'a>(body: &'a [Stmt], out: &mut FxHashSet<&'a str>) {
        for stmt in body {
            match stmt {
                Stmt::Assign { target, .. } => {
                    if let covenant_core::ast::Expr::Name { name, .. } = target {
                        out.insert(name.as_str());
                    }
                }
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    collect(then_body, out);
                    collect(else_body, out);
                }
                Stmt::For { body, .. } => collect(body, out),
                _ => {}
            }
        }
    }
}

// ============================================================================
// FunctionAnalyzer
// ============================================================================

/// Which named collection an lvalue or iterable roots in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaceRoot {
    Storage(String),
    Local(String),
    Immutable(String),
}

/// Result of a successful body walk.
pub(crate) struct BodyAnalysis {
    pub annotations: Annotations,
    pub frame_words: u64,
    pub observed: Mutability,
    pub calls: Vec<String>,
}

/// Walks one function body.
pub(crate) struct FunctionAnalyzer<'a> {
    pub(crate) registry: &'a ModuleRegistry,
    pub(crate) namespace: &'a mut Namespace,
    pub(crate) sig: &'a FunctionSig,
    pub(crate) annotations: Annotations,
    next_word: u64,
    pub(crate) observed: Mutability,
    pub(crate) calls: Vec<String>,
    pub(crate) active_iterables: Vec<PlaceRoot>,
    pub(crate) loop_depth: usize,
    /// Dev note of the statement currently being analyzed.
    pub(crate) dev: Option<String>,
    pub(crate) immutables_assigned: FxHashSet<String>,
}

impl<'a> FunctionAnalyzer<'a> {
    pub(crate) fn new(
        registry: &'a ModuleRegistry,
        namespace: &'a mut Namespace,
        sig: &'a FunctionSig,
    ) -> Self {
        Self {
            registry,
            namespace,
            sig,
            annotations: Annotations::new(),
            next_word: 0,
            observed: Mutability::Pure,
            calls: Vec::new(),
            active_iterables: Vec::new(),
            loop_depth: 0,
            dev: None,
            immutables_assigned: FxHashSet::default(),
        }
    }

    pub(crate) fn is_deploy(&self) -> bool {
        self.sig.visibility == Visibility::Deploy
    }

    /// Analyze the whole body inside a fresh function scope.
    pub(crate) fn analyze(&mut self, body: &[Stmt]) -> Result<BodyAnalysis, AnalysisError> {
        let token = self.namespace.open_scope(ScopeKind::Function);
        let result = self.analyze_inner(body);
        self.namespace.close_scope(token);
        let () = result?;
        Ok(BodyAnalysis {
            annotations: std::mem::take(&mut self.annotations),
            frame_words: self.next_word,
            observed: self.observed,
            calls: std::mem::take(&mut self.calls),
        })
    }

    fn analyze_inner(&mut self, body: &[Stmt]) -> Result<(), AnalysisError> {
        // Parameters land at the bottom of the memory frame, in order.
        let params = self.sig.params.clone();
        for (name, ty) in &params {
            let offset = self.alloc_words(ty.word_count());
            let def = Definition::memory(ty.clone(), offset, self.sig.span);
            self.namespace.define_value(name, def, self.sig.span)?;
        }
        for stmt in body {
            self.stmt(stmt)?;
        }
        if self.sig.ret.is_some() && !block_terminates(body) {
            return Err(AnalysisError::InvalidOperation {
                message: format!("function '{}' can fall off the end without returning", self.sig.name),
                span: self.sig.span,
            });
        }
        if self.sig.nonreentrant && self.observed == Mutability::Pure {
            return Err(AnalysisError::StateAccessViolation {
                message: format!("'{}' cannot be both nonreentrant and pure", self.sig.name),
                span: self.sig.span,
            });
        }
        Ok(())
    }

    /// Record that the body needs at least this much mutability.
    ///
    /// The declared mutability is a ceiling; exceeding it is a
    /// `StateAccessViolation`. Undeclared functions may rise to
    /// `nonpayable`: `payable` is never inferred.
    pub(crate) fn touch(
        &mut self,
        required: Mutability,
        span: Span,
        what: &str,
    ) -> Result<(), AnalysisError> {
        let ceiling = self.sig.mutability.unwrap_or(Mutability::Nonpayable);
        if required > ceiling {
            return Err(AnalysisError::StateAccessViolation {
                message: format!(
                    "{} function '{}' {what}",
                    ceiling.as_str(),
                    self.sig.name
                ),
                span,
            });
        }
        if required > self.observed {
            self.observed = required;
        }
        Ok(())
    }

    /// Allocate words in the static memory frame.
    pub(crate) fn alloc_words(&mut self, words: u64) -> u64 {
        let offset = self.next_word;
        self.next_word += words;
        offset
    }

    /// Run `f` inside a nested block scope, closing it on every path.
    pub(crate) fn in_block<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, AnalysisError>,
    ) -> Result<T, AnalysisError> {
        let token = self.namespace.open_scope(ScopeKind::Block);
        let result = f(self);
        self.namespace.close_scope(token);
        result
    }
}

/// Whether a statement list is guaranteed to leave the function.
pub(crate) fn block_terminates(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Return { .. } | Stmt::Raise { .. } => true,
        Stmt::If {
            then_body,
            else_body,
            ..
        } => !else_body.is_empty() && block_terminates(then_body) && block_terminates(else_body),
        _ => false,
    })
}
