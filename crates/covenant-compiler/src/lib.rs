//! Covenant Compiler
//!
//! Ahead-of-time compiler core for the covenant contract language,
//! targeting a 256-bit stack VM with persistent storage and
//! transactional abort semantics.
//!
//! ## Architecture
//!
//! - **Module pass** ([`passes`]): registers every top-level declaration
//!   (storage layout, folded constants, user types, function
//!   signatures), batching independent errors.
//! - **Local pass** ([`analyzer`]): walks each function body, decorating
//!   nodes with resolved definitions and folded values, enforcing the
//!   mutability/visibility/reentrancy/iteration rules.
//! - **Lowering** ([`ir`]): turns the annotated tree into a stack-machine
//!   IR over explicit storage/memory/data operand spaces.
//! - **Assembly** ([`asm`]): flattens the IR to labeled instructions,
//!   resolves offsets to a fixed point, and emits the deployment and
//!   runtime blobs plus the source map and signature table.
//!
//! ## Modules
//!
//! - [`namespace`]: LIFO scope stack with guaranteed-release scoping
//! - [`literal`]: literal candidate sets and context narrowing
//! - [`resolver`]: type annotation resolution
//! - [`conversion`]: unification, operator validation, `convert()` rules
//! - [`fold`]: constant evaluation
//! - [`registry`]: per-module declaration registry

pub mod analyzer;
pub mod asm;
pub mod conversion;
pub mod fold;
pub mod ir;
pub mod literal;
pub mod namespace;
pub mod passes;
pub mod registry;
pub mod resolver;
#[cfg(test)]
pub(crate) mod testutil;

pub use analyzer::{analyze_module, AnalysisFailure, Annotations, ModuleAnalysis};
pub use asm::{AbiEntry, AsmOptions, CompiledContract, OptLevel, SourceMapEntry, VmVersion};
pub use ir::{lower_module, IrModule};
pub use namespace::{Binding, Namespace, ScopeKind};
pub use registry::ModuleRegistry;

use covenant_core::ast::Module;
use covenant_core::{CompileError, Diagnostic, Phase};
use tracing::debug;

/// Compiler configuration: target VM version and optimization level.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerOptions {
    pub vm: VmVersion,
    pub opt: OptLevel,
}

/// Everything one compilation produces: the annotated analysis, the IR,
/// and the assembled artifacts.
#[derive(Debug)]
pub struct Compilation {
    pub analysis: ModuleAnalysis,
    pub ir: IrModule,
    pub contract: CompiledContract,
}

/// The compiler entry point.
pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    /// Compile a front-end module to artifacts.
    ///
    /// Analysis failures batch per the pass rules; lowering and assembly
    /// failures are single fatal internal diagnostics.
    pub fn compile(&self, module: &Module) -> Result<Compilation, Vec<Diagnostic>> {
        debug!(module = %module.name, "compile");
        let analysis = analyze_module(module).map_err(|failures| {
            failures
                .into_iter()
                .map(|f| {
                    Diagnostic::new(f.phase, &CompileError::Analysis(f.error), f.dev)
                })
                .collect::<Vec<_>>()
        })?;
        let ir = lower_module(module, &analysis).map_err(|error| {
            vec![Diagnostic::new(
                Phase::Lowering,
                &CompileError::Codegen(error),
                None,
            )]
        })?;
        let asm_options = AsmOptions {
            vm: self.options.vm,
            opt: self.options.opt,
        };
        let contract = asm::assemble(&ir, &analysis.registry, &asm_options).map_err(|error| {
            vec![Diagnostic::new(
                Phase::Assembly,
                &CompileError::Codegen(error),
                None,
            )]
        })?;
        Ok(Compilation {
            analysis,
            ir,
            contract,
        })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}
