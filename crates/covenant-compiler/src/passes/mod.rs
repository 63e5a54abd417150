//! Analysis passes.
//!
//! - [`module_pass`]: one left-to-right sweep over top-level declarations,
//!   batching independent errors.
//! - The local pass lives in [`crate::analyzer`] and runs per function.

pub mod module_pass;

pub use module_pass::{ModulePass, ModulePassOutput};
