//! Module lowering: annotated tree -> IR.
//!
//! Assigns the static memory layout (hash scratch, call-return scratch,
//! per-function frames, the shared marshalling buffer, the constructor's
//! immutable staging area), then lowers every function body plus the
//! synthesized getter bodies. Anything the analyzer should have ruled
//! out surfaces here as an internal error, never a user diagnostic.

use covenant_core::ast::{Decl, Expr, Module, Stmt};
use covenant_core::{CodegenError, FunctionSig, Mutability, Primitive, Span, Visibility};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{IrNode, IrOp};
use crate::analyzer::{FunctionAnalysis, ModuleAnalysis};
use crate::registry::ModuleRegistry;

/// Start of the hashing scratch area (mapping slot derivation).
pub const HASH_SCRATCH: u64 = 0x00;
/// External-call return word.
pub const RET_SCRATCH: u64 = 0x40;
/// First byte of function frames.
pub const FRAME_BASE: u64 = 0x80;

/// The static memory layout of one module.
#[derive(Debug, Clone)]
pub struct Layout {
    frame_bases: FxHashMap<String, u64>,
    /// Marshalling buffer for external calls, event data, and external
    /// returns. Safe to share: it is filled immediately before use.
    pub aux_buffer: u64,
    /// Immutable staging area (constructor only).
    pub istage: u64,
    pub guard_slot: Option<u64>,
}

impl Layout {
    /// Byte base of a function's memory frame.
    pub fn frame_base(&self, function: &str) -> u64 {
        self.frame_bases.get(function).copied().unwrap_or(FRAME_BASE)
    }
}

/// How a function body is entered and left.
#[derive(Debug, Clone, PartialEq)]
pub enum IrFnKind {
    External {
        selector: [u8; 4],
        payable: bool,
        guard: GuardMode,
        /// Frame byte offsets the dispatcher prologue decodes into.
        param_offsets: Vec<u64>,
        ret_words: u64,
    },
    Internal {
        returns: bool,
        guard: GuardMode,
    },
    Deploy {
        param_offsets: Vec<u64>,
        payable: bool,
    },
}

/// Reentrancy bracketing for a protected function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    None,
    /// Read-only protection: abort when the guard is held.
    Check,
    /// Full bracketing: check, set, and clear on every exit.
    Full,
}

/// One lowered function.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub kind: IrFnKind,
    pub body: IrNode,
    pub span: Span,
}

/// The lowered module the assembler consumes.
#[derive(Debug)]
pub struct IrModule {
    pub name: String,
    /// Runtime functions in declaration order (dispatch order).
    pub functions: Vec<IrFunction>,
    /// The deploy function's lowered body (empty `Seq` without one).
    pub constructor: IrNode,
    /// Words in the immutable data segment.
    pub data_words: u64,
    pub layout: Layout,
}

/// Lower an analyzed module to IR.
pub fn lower_module(
    module: &Module,
    analysis: &ModuleAnalysis,
) -> Result<IrModule, CodegenError> {
    let registry = &analysis.registry;
    let layout = compute_layout(module, registry, analysis);
    debug!(
        aux_buffer = layout.aux_buffer,
        istage = layout.istage,
        "memory layout"
    );

    let mut functions = Vec::new();
    let mut constructor = IrNode::seq(Vec::new(), Span::default());

    for info in registry.functions() {
        let sig = &info.sig;
        let function_analysis = analysis
            .function(&sig.name)
            .ok_or_else(|| internal(format!("no analysis for function '{}'", sig.name)))?;

        let mut body = match info.decl_index {
            None => getter_body(registry, sig)?,
            Some(index) => {
                let Decl::Function(decl) = &module.decls[index] else {
                    return Err(internal(format!(
                        "declaration {index} is not a function"
                    )));
                };
                let lowerer = Lowerer {
                    registry,
                    analysis: function_analysis,
                    layout: &layout,
                    sig,
                    frame_base: layout.frame_base(&sig.name),
                };
                lowerer.lower_body(&decl.body)?
            }
        };

        if sig.visibility == Visibility::Deploy {
            // Constructor arguments are ABI words at the start of
            // calldata, unmarshalled into the deploy frame up front.
            let mut prologue = Vec::new();
            for (index, offset) in param_offsets(sig, &layout).into_iter().enumerate() {
                prologue.push(IrNode::new(
                    IrOp::MemStore { offset },
                    vec![IrNode::leaf(
                        IrOp::CalldataArg {
                            index: index as u64,
                            after_selector: false,
                        },
                        sig.span,
                    )],
                    sig.span,
                ));
            }
            prologue.push(body);
            constructor = IrNode::seq(prologue, sig.span);
            continue;
        }

        let guard = guard_mode(sig, &layout);
        // Protected bodies are bracketed here; the matching clear on
        // every exit path is woven into return emission.
        if guard != GuardMode::None {
            let slot = layout
                .guard_slot
                .ok_or_else(|| internal("guarded function without a guard slot".to_string()))?;
            let mut bracketed = vec![IrNode::leaf(IrOp::GuardCheck { slot }, sig.span)];
            if guard == GuardMode::Full {
                bracketed.push(IrNode::leaf(IrOp::GuardSet { slot }, sig.span));
            }
            bracketed.push(body);
            body = IrNode::seq(bracketed, sig.span);
        }
        let kind = match sig.visibility {
            Visibility::External => IrFnKind::External {
                selector: sig.selector(),
                payable: sig.mutability == Some(Mutability::Payable),
                guard,
                param_offsets: param_offsets(sig, &layout),
                ret_words: sig.ret.as_ref().map_or(0, Primitive::word_count),
            },
            Visibility::Internal => IrFnKind::Internal {
                returns: sig.ret.is_some(),
                guard,
            },
            Visibility::Deploy => unreachable!(),
        };
        functions.push(IrFunction {
            name: sig.name.clone(),
            kind,
            body,
            span: sig.span,
        });
    }

    Ok(IrModule {
        name: module.name.clone(),
        functions,
        constructor,
        data_words: registry.data_words(),
        layout,
    })
}

fn guard_mode(sig: &FunctionSig, layout: &Layout) -> GuardMode {
    if !sig.nonreentrant || layout.guard_slot.is_none() {
        return GuardMode::None;
    }
    match sig.effective_mutability() {
        Mutability::Pure | Mutability::View => GuardMode::Check,
        Mutability::Nonpayable | Mutability::Payable => GuardMode::Full,
    }
}

fn param_offsets(sig: &FunctionSig, layout: &Layout) -> Vec<u64> {
    let base = layout.frame_base(&sig.name);
    let mut offsets = Vec::with_capacity(sig.params.len());
    let mut word = 0;
    for (_, ty) in &sig.params {
        offsets.push(base + word * 32);
        word += ty.word_count();
    }
    offsets
}

/// Body of a synthesized public-variable getter.
fn getter_body(registry: &ModuleRegistry, sig: &FunctionSig) -> Result<IrNode, CodegenError> {
    let var = registry
        .storage_var(&sig.name)
        .ok_or_else(|| internal(format!("getter '{}' has no storage variable", sig.name)))?;
    let covenant_core::Location::Storage { slot } = var.def.location else {
        return Err(internal(format!("getter '{}' root is not in storage", sig.name)));
    };
    let span = sig.span;
    let load = IrNode::new(
        IrOp::StorLoad,
        vec![IrNode::leaf(
            IrOp::Const(covenant_core::Word::from_u64(slot)),
            span,
        )],
        span,
    );
    Ok(IrNode::seq(
        vec![IrNode::new(IrOp::Return, vec![load], span)],
        span,
    ))
}

fn compute_layout(
    module: &Module,
    registry: &ModuleRegistry,
    analysis: &ModuleAnalysis,
) -> Layout {
    let mut frame_bases = FxHashMap::default();
    let mut next = FRAME_BASE;
    for info in registry.functions() {
        let words = analysis
            .function(&info.sig.name)
            .map_or(0, |f| f.frame_words);
        frame_bases.insert(info.sig.name.clone(), next);
        next += words * 32;
    }
    let aux_buffer = next;
    let aux_words = aux_words_needed(module, registry);
    Layout {
        frame_bases,
        aux_buffer,
        istage: aux_buffer + aux_words * 32,
        guard_slot: registry.reentrancy_slot(),
    }
}

/// Size of the shared marshalling buffer: enough for the widest external
/// call (selector word + arguments), the widest event payload, and the
/// widest return tuple.
fn aux_words_needed(module: &Module, registry: &ModuleRegistry) -> u64 {
    let mut words: u64 = 2;
    for info in registry.functions() {
        if let Some(ret) = &info.sig.ret {
            words = words.max(ret.word_count());
        }
    }
    for decl in &module.decls {
        let Decl::Function(f) = decl else { continue };
        for stmt in &f.body {
            scan_stmt(stmt, &mut words);
        }
    }
    return words + 1;

    fn scan_stmt(stmt: &Stmt, words: &mut u64) {
        match stmt {
            Stmt::Let { value, .. } => scan_expr(value, words),
            Stmt::Assign { target, value, .. } | Stmt::AugAssign { target, value, .. } => {
                scan_expr(target, words);
                scan_expr(value, words);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                scan_expr(cond, words);
                for s in then_body.iter().chain(else_body) {
                    scan_stmt(s, words);
                }
            }
            Stmt::For { iter, body, .. } => {
                match iter {
                    covenant_core::ast::ForIter::Range { start, stop, bound } => {
                        if let Some(start) = start {
                            scan_expr(start, words);
                        }
                        scan_expr(stop, words);
                        if let Some(bound) = bound {
                            scan_expr(bound, words);
                        }
                    }
                    covenant_core::ast::ForIter::Sequence(seq) => scan_expr(seq, words),
                }
                for s in body {
                    scan_stmt(s, words);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    scan_expr(value, words);
                }
            }
            Stmt::Assert { cond, .. } => scan_expr(cond, words),
            Stmt::Log { args, .. } => {
                *words = (*words).max(args.len() as u64);
                for arg in args {
                    scan_expr(arg, words);
                }
            }
            Stmt::Expr { expr, .. } => scan_expr(expr, words),
            _ => {}
        }
    }

    fn scan_expr(expr: &Expr, words: &mut u64) {
        match expr {
            Expr::ExtCall { address, args, .. } => {
                *words = (*words).max(1 + args.len() as u64 + 1);
                scan_expr(address, words);
                for arg in args {
                    scan_expr(arg, words);
                }
            }
            Expr::Call { func, args, .. } => {
                scan_expr(func, words);
                for arg in args {
                    scan_expr(arg, words);
                }
            }
            Expr::Attribute { base, .. } => scan_expr(base, words),
            Expr::Subscript { base, index, .. } => {
                scan_expr(base, words);
                scan_expr(index, words);
            }
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::BoolOp { left, right, .. } => {
                scan_expr(left, words);
                scan_expr(right, words);
            }
            Expr::Unary { operand, .. } => scan_expr(operand, words),
            Expr::Convert { value, .. } => scan_expr(value, words),
            Expr::Tuple { items, .. } => {
                for item in items {
                    scan_expr(item, words);
                }
            }
            _ => {}
        }
    }
}

/// Per-function lowering context.
pub(super) struct Lowerer<'a> {
    pub registry: &'a ModuleRegistry,
    pub analysis: &'a FunctionAnalysis,
    pub layout: &'a Layout,
    pub sig: &'a FunctionSig,
    pub frame_base: u64,
}

impl<'a> Lowerer<'a> {
    pub(super) fn is_deploy(&self) -> bool {
        self.sig.visibility == Visibility::Deploy
    }

    /// Absolute byte offset of a frame-relative word.
    pub(super) fn frame_offset(&self, word: u64) -> u64 {
        self.frame_base + word * 32
    }

    pub(super) fn internal_error(&self, message: impl Into<String>) -> CodegenError {
        internal(format!("{}: {}", self.sig.name, message.into()))
    }
}

pub(super) fn internal(message: String) -> CodegenError {
    CodegenError::Internal { message }
}
