//! Shared leaf types for the covenant compiler.
//!
//! This crate holds everything the pipeline crates agree on and nothing
//! that runs a pass: source spans, the 256-bit machine word, folded
//! values, canonical type identities and declaration-site definitions,
//! the front-end's node model, and the error taxonomy.

pub mod ast;
pub mod capability;
pub mod definition;
pub mod error;
pub mod span;
pub mod types;
pub mod value;
pub mod word;

pub use capability::Capability;
pub use definition::{
    Constancy, Definition, FunctionSig, InterfaceMethod, Location, Mutability, Visibility,
};
pub use error::{AnalysisError, CodegenError, CompileError, Diagnostic, Phase};
pub use span::Span;
pub use types::{EventField, Primitive, TypeId};
pub use value::Value;
pub use word::Word;
