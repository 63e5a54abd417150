//! Covenant - an ahead-of-time compiler for a contract-oriented
//! language targeting a 256-bit stack VM with persistent storage and
//! transactional semantics.
//!
//! The front-end (not part of this workspace) produces a positioned
//! [`ast::Module`]; this crate re-exports the pipeline that turns it
//! into deployment and runtime bytecode:
//!
//! ```ignore
//! use covenant::{compile, CompilerOptions};
//!
//! let compilation = compile(&module)?;
//! let deploy = &compilation.contract.deploy;
//! let runtime = &compilation.contract.runtime;
//! ```

pub use covenant_core::ast;
pub use covenant_core::{
    AnalysisError, Capability, CodegenError, CompileError, Constancy, Definition, Diagnostic,
    FunctionSig, InterfaceMethod, Location, Mutability, Phase, Primitive, Span, TypeId, Value,
    Visibility, Word,
};

pub use covenant_compiler::{
    analyze_module, asm, AbiEntry, Compilation, CompiledContract, Compiler, CompilerOptions,
    ModuleAnalysis, Namespace, OptLevel, SourceMapEntry, VmVersion,
};

/// Compile a module with default options (latest VM, peephole on).
pub fn compile(module: &ast::Module) -> Result<Compilation, Vec<Diagnostic>> {
    Compiler::default().compile(module)
}

/// Compile a module with explicit options.
pub fn compile_with(
    module: &ast::Module,
    options: CompilerOptions,
) -> Result<Compilation, Vec<Diagnostic>> {
    Compiler::new(options).compile(module)
}
