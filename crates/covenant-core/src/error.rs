//! Error taxonomy for every compilation phase.
//!
//! ## Hierarchy
//!
//! ```text
//! CompileError (top-level wrapper, phase-tagged via Diagnostic)
//! ├── AnalysisError  - namespace, type, access, and control-flow errors
//! └── CodegenError   - internal invariant breaches (never the user's fault)
//! ```
//!
//! The module pass batches independent declaration errors; the local pass
//! aborts a function body on its first error; lowering and assembly abort
//! the whole module. The compiler never models the runtime failures it
//! guards against (overflow, bounds, reentrancy) as errors here - those
//! become emitted abort code, not diagnostics.

use thiserror::Error;

use crate::span::Span;

// ============================================================================
// Analysis errors
// ============================================================================

/// A user-attributable error found during analysis.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A name is already bound somewhere in the open scope chain.
    #[error("at {span}: '{name}' is already declared (first declared at {previous})")]
    NameCollision {
        name: String,
        span: Span,
        previous: Span,
    },

    /// A name is bound nowhere in the open scope chain.
    #[error("at {span}: undeclared name '{name}'")]
    UndeclaredName { name: String, span: Span },

    /// A literal has no type in its context.
    #[error("at {span}: invalid literal: {message}")]
    InvalidLiteral { message: String, span: Span },

    /// A type annotation does not denote a type.
    #[error("at {span}: invalid type: {message}")]
    InvalidType { message: String, span: Span },

    /// Two types were required to agree and do not.
    #[error("at {span}: type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    /// An operation is not defined for its operand types.
    #[error("at {span}: invalid operation: {message}")]
    InvalidOperation { message: String, span: Span },

    /// A write through a non-writable definition.
    #[error("at {span}: cannot modify: {message}")]
    ImmutableViolation { message: String, span: Span },

    /// A function touches more state than its mutability admits.
    #[error("at {span}: state access violation: {message}")]
    StateAccessViolation { message: String, span: Span },

    /// A collection was mutated while being iterated.
    #[error("at {span}: iterator violation: {message}")]
    IteratorException { message: String, span: Span },
}

impl AnalysisError {
    /// The source region this error points at.
    pub fn span(&self) -> Span {
        match self {
            AnalysisError::NameCollision { span, .. }
            | AnalysisError::UndeclaredName { span, .. }
            | AnalysisError::InvalidLiteral { span, .. }
            | AnalysisError::InvalidType { span, .. }
            | AnalysisError::TypeMismatch { span, .. }
            | AnalysisError::InvalidOperation { span, .. }
            | AnalysisError::ImmutableViolation { span, .. }
            | AnalysisError::StateAccessViolation { span, .. }
            | AnalysisError::IteratorException { span, .. } => *span,
        }
    }

    /// Position in the documented failure precedence for a single
    /// construct: lower ranks win when several checks could fire.
    pub fn rank(&self) -> u8 {
        match self {
            AnalysisError::InvalidLiteral { .. } => 0,
            AnalysisError::InvalidType { .. } => 1,
            AnalysisError::TypeMismatch { .. } => 2,
            AnalysisError::InvalidOperation { .. } => 3,
            AnalysisError::ImmutableViolation { .. } => 4,
            AnalysisError::StateAccessViolation { .. } => 5,
            AnalysisError::IteratorException { .. } => 6,
            // Namespace errors sort before everything the type checker
            // produces; they fire during resolution, not checking.
            AnalysisError::NameCollision { .. } | AnalysisError::UndeclaredName { .. } => 0,
        }
    }
}

// ============================================================================
// Codegen errors
// ============================================================================

/// An internal invariant breach in lowering or assembly. Always fatal,
/// never attributable to a fix in the source program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("internal compiler error: {message}")]
    Internal { message: String },

    /// Label layout oscillated instead of reaching a fixed point.
    #[error("internal compiler error: instruction layout did not converge after {rounds} rounds")]
    NonConvergence { rounds: u32 },
}

// ============================================================================
// Top-level wrapper & diagnostics
// ============================================================================

/// Any failure the pipeline can produce.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Analysis(e) => Some(e.span()),
            CompileError::Codegen(_) => None,
        }
    }
}

/// The pipeline phase a diagnostic originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ModulePass,
    LocalPass,
    Lowering,
    Assembly,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::ModulePass => "module pass",
            Phase::LocalPass => "local pass",
            Phase::Lowering => "lowering",
            Phase::Assembly => "assembly",
        }
    }
}

/// A reportable diagnostic: phase, position, message, and the optional
/// developer-facing note harvested from an inline `# dev:` comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub span: Option<Span>,
    pub message: String,
    pub dev: Option<String>,
}

impl Diagnostic {
    pub fn new(phase: Phase, error: &CompileError, dev: Option<String>) -> Self {
        Self {
            phase,
            span: error.span(),
            message: error.to_string(),
            dev,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase.as_str(), self.message)?;
        if let Some(dev) = &self.dev {
            write!(f, " (dev: {dev})")?;
        }
        Ok(())
    }
}
