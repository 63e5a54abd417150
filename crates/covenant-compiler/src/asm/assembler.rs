//! IR -> labeled instructions -> bytecode.
//!
//! Emission walks each IR tree post-order into one symbolic stream:
//! constructor first, then the boundary marker, then the runtime segment
//! (dispatcher, shared revert block, function bodies). Offsets are
//! resolved afterwards by shrinking push widths to a fixed point with an
//! explicit round bound.

use covenant_core::{CodegenError, Mutability, Span, Visibility, Word};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::opcode::{Op, VmVersion};
use super::peephole;
use super::{AbiEntry, AsmInstr, CompiledContract, Imm, Instr, LabelId, SourceMapEntry};
use crate::ir::{GuardMode, IrFnKind, IrModule, IrNode, IrOp};
use crate::registry::ModuleRegistry;

/// How hard the peephole pass works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OptLevel {
    /// No rewriting.
    O0,
    /// One local rewrite pass.
    #[default]
    O1,
    /// Rewrite to a fixed point.
    O2,
}

/// Assembly configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsmOptions {
    pub vm: VmVersion,
    pub opt: OptLevel,
}

/// Maximum width-shrinking rounds before declaring non-convergence.
const MAX_LAYOUT_ROUNDS: u32 = 8;

/// Return-shape context of the function being emitted.
enum RetCtx {
    External {
        ret_words: u64,
        guard: GuardMode,
        buffer: u64,
    },
    Internal {
        guard: GuardMode,
    },
    Deploy {
        epilogue: LabelId,
    },
}

pub(super) struct Assembler<'a> {
    ir: &'a IrModule,
    out: Vec<AsmInstr>,
    next_label: u32,
    /// The current segment's shared revert block.
    pub(super) abort: LabelId,
    fn_labels: FxHashMap<String, LabelId>,
    /// (continue target, break target) per open loop.
    loop_stack: Vec<(LabelId, LabelId)>,
    ret_ctx: RetCtx,
    span: Span,
}

/// Assemble a lowered module into its two blobs plus metadata.
pub fn assemble(
    ir: &IrModule,
    registry: &ModuleRegistry,
    options: &AsmOptions,
) -> Result<CompiledContract, CodegenError> {
    let mut asm = Assembler {
        ir,
        out: Vec::new(),
        next_label: 0,
        abort: LabelId(0),
        fn_labels: FxHashMap::default(),
        loop_stack: Vec::new(),
        ret_ctx: RetCtx::Deploy {
            epilogue: LabelId(0),
        },
        span: Span::default(),
    };
    asm.emit_constructor(registry)?;
    asm.out.push(AsmInstr::new(Instr::Boundary, Span::default()));
    asm.emit_runtime()?;

    let mut stream = asm.out;
    if options.opt >= OptLevel::O1 {
        let before = stream.len();
        stream = peephole::run(stream, options.opt == OptLevel::O2);
        debug!(before, after = stream.len(), "peephole");
    }

    let layout = resolve_layout(&stream, ir.data_words, options.vm)?;
    let (deploy, runtime, source_map) = emit_bytes(&stream, &layout, ir.data_words, options.vm);
    let listing = render_listing(&stream, &layout);
    let abi = signature_table(registry);
    debug!(
        deploy_len = deploy.len(),
        runtime_len = runtime.len(),
        "assembled"
    );
    Ok(CompiledContract {
        deploy,
        runtime,
        source_map,
        abi,
        listing,
    })
}

// ============================================================================
// Emission
// ============================================================================

impl<'a> Assembler<'a> {
    pub(super) fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub(super) fn op(&mut self, op: Op) {
        self.out.push(AsmInstr::new(Instr::Op(op), self.span));
    }

    pub(super) fn push_word(&mut self, word: Word) {
        self.out
            .push(AsmInstr::new(Instr::Push(Imm::Word(word)), self.span));
    }

    pub(super) fn push_u64(&mut self, value: u64) {
        self.push_word(Word::from_u64(value));
    }

    pub(super) fn push_label(&mut self, label: LabelId) {
        self.out
            .push(AsmInstr::new(Instr::Push(Imm::Label(label)), self.span));
    }

    fn push_imm(&mut self, imm: Imm) {
        self.out.push(AsmInstr::new(Instr::Push(imm), self.span));
    }

    pub(super) fn place_label(&mut self, label: LabelId) {
        self.out.push(AsmInstr::new(Instr::Label(label), self.span));
    }

    /// `JUMPI` to the current segment's revert block.
    pub(super) fn jumpi_abort(&mut self) {
        let abort = self.abort;
        self.push_label(abort);
        self.op(Op::JumpI);
    }

    fn revert_block(&mut self, label: LabelId) {
        self.place_label(label);
        self.push_word(Word::ZERO);
        self.push_word(Word::ZERO);
        self.op(Op::Revert);
    }

    // ==========================================================================
    // Segments
    // ==========================================================================

    fn emit_constructor(&mut self, registry: &ModuleRegistry) -> Result<(), CodegenError> {
        let abort = self.new_label();
        let epilogue = self.new_label();
        self.abort = abort;
        self.ret_ctx = RetCtx::Deploy { epilogue };

        let deploy_payable = registry
            .deploy_function()
            .is_some_and(|f| f.sig.mutability == Some(Mutability::Payable));
        if !deploy_payable {
            self.op(Op::CallValue);
            self.jumpi_abort();
        }

        let constructor = self.ir.constructor.clone();
        self.emit(&constructor)?;

        // Copy out the runtime blob, patch immutables into its data
        // segment, and return it. The copy lands above the staging area
        // so the staged values survive until they are read.
        let copy_base = self.ir.layout.istage + self.ir.data_words * 32;
        self.place_label(epilogue);
        self.push_imm(Imm::RuntimeLen);
        self.push_imm(Imm::RuntimeStart);
        self.push_u64(copy_base);
        self.op(Op::CodeCopy);
        for immutable in registry.immutables() {
            let staging = self.ir.layout.istage + immutable.offset * 32;
            self.push_u64(staging);
            self.op(Op::MLoad);
            self.push_imm(Imm::DataBase);
            self.push_u64(copy_base + immutable.offset * 32);
            self.op(Op::Add);
            self.op(Op::MStore);
        }
        self.push_imm(Imm::RuntimeLen);
        self.push_u64(copy_base);
        self.op(Op::Return);
        self.revert_block(abort);
        Ok(())
    }

    fn emit_runtime(&mut self) -> Result<(), CodegenError> {
        let abort = self.new_label();
        self.abort = abort;
        for function in &self.ir.functions {
            let label = self.new_label();
            self.fn_labels.insert(function.name.clone(), label);
        }

        // Dispatcher: route by the high 4 selector bytes of calldata.
        let externals: Vec<(String, [u8; 4])> = self
            .ir
            .functions
            .iter()
            .filter_map(|f| match &f.kind {
                IrFnKind::External { selector, .. } => Some((f.name.clone(), *selector)),
                _ => None,
            })
            .collect();
        if !externals.is_empty() {
            self.push_u64(4);
            self.op(Op::CalldataSize);
            self.op(Op::Lt);
            self.jumpi_abort();
            self.push_word(Word::ZERO);
            self.op(Op::CalldataLoad);
            self.push_u64(224);
            self.op(Op::Shr);
            for (name, selector) in &externals {
                self.op(Op::Dup1);
                let mut padded = [0u8; 32];
                padded[28..].copy_from_slice(selector);
                self.push_word(Word::from_be_bytes(padded));
                self.op(Op::Eq);
                let label = self.fn_labels[name];
                self.push_label(label);
                self.op(Op::JumpI);
            }
        }
        // Fall-through (and every guard failure) reverts here.
        self.revert_block(abort);

        let functions = self.ir.functions.clone();
        for function in &functions {
            self.emit_function(function)?;
        }
        Ok(())
    }

    fn emit_function(&mut self, function: &crate::ir::IrFunction) -> Result<(), CodegenError> {
        self.span = function.span;
        let label = self.fn_labels[&function.name];
        self.place_label(label);
        match &function.kind {
            IrFnKind::External {
                payable,
                guard,
                param_offsets,
                ret_words,
                ..
            } => {
                // Drop the selector the dispatcher left behind.
                self.op(Op::Pop);
                if !*payable {
                    self.op(Op::CallValue);
                    self.jumpi_abort();
                }
                for (index, offset) in param_offsets.iter().enumerate() {
                    self.push_u64(4 + 32 * index as u64);
                    self.op(Op::CalldataLoad);
                    self.push_u64(*offset);
                    self.op(Op::MStore);
                }
                self.ret_ctx = RetCtx::External {
                    ret_words: *ret_words,
                    guard: *guard,
                    buffer: self.ir.layout.aux_buffer,
                };
                self.emit(&function.body)?;
                if *ret_words == 0 {
                    self.emit_guard_exit(*guard);
                    self.op(Op::Stop);
                }
            }
            IrFnKind::Internal { returns, guard } => {
                self.ret_ctx = RetCtx::Internal { guard: *guard };
                self.emit(&function.body)?;
                if !*returns {
                    self.emit_guard_exit(*guard);
                    self.op(Op::Jump);
                }
            }
            IrFnKind::Deploy { .. } => {
                return Err(CodegenError::Internal {
                    message: "deploy function in the runtime segment".to_string(),
                });
            }
        }
        Ok(())
    }

    fn emit_guard_exit(&mut self, guard: GuardMode) {
        let Some(slot) = self.ir.layout.guard_slot else {
            return;
        };
        if guard == GuardMode::Full {
            self.push_word(Word::ZERO);
            self.push_u64(slot);
            self.op(Op::SStore);
        }
    }

    // ==========================================================================
    // IR walk
    // ==========================================================================

    pub(super) fn emit(&mut self, node: &IrNode) -> Result<(), CodegenError> {
        if node.span != Span::default() {
            self.span = node.span;
        }
        match &node.op {
            IrOp::Const(word) => {
                self.push_word(*word);
            }
            IrOp::MemLoad { offset } => {
                self.push_u64(*offset);
                self.op(Op::MLoad);
            }
            IrOp::DataLoad { word } => {
                self.push_u64(32);
                self.push_imm(Imm::DataBase);
                self.push_u64(word * 32);
                self.op(Op::Add);
                self.push_word(Word::ZERO);
                self.op(Op::CodeCopy);
                self.push_word(Word::ZERO);
                self.op(Op::MLoad);
            }
            IrOp::CalldataArg {
                index,
                after_selector,
            } => {
                let base = if *after_selector { 4 } else { 0 };
                self.push_u64(base + 32 * index);
                self.op(Op::CalldataLoad);
            }
            IrOp::EnvCaller => self.op(Op::Caller),
            IrOp::EnvCallValue => self.op(Op::CallValue),
            IrOp::EnvTimestamp => self.op(Op::Timestamp),
            IrOp::EnvBlockNumber => self.op(Op::Number),

            IrOp::Arith { op, checked } => {
                self.emit_children(node)?;
                self.emit_arith(*op, *checked);
            }
            IrOp::Cmp { op, signed } => {
                self.emit_children(node)?;
                self.emit_cmp(*op, *signed);
            }
            IrOp::IsZero => {
                self.emit_children(node)?;
                self.op(Op::IsZero);
            }
            IrOp::Not { mask } => {
                self.emit_children(node)?;
                self.op(Op::Not);
                if *mask != Word::MAX {
                    self.push_word(*mask);
                    self.op(Op::And);
                }
            }
            IrOp::Neg { kind } => {
                self.emit_children(node)?;
                self.emit_neg(*kind);
            }
            IrOp::CastInt { from, to } => {
                self.emit_children(node)?;
                self.emit_cast(*from, *to);
            }
            IrOp::BytesToUint { len } => {
                self.emit_children(node)?;
                self.push_u64(256 - 8 * u64::from(*len));
                self.op(Op::Shr);
            }
            IrOp::UintToBytes { len } => {
                self.emit_children(node)?;
                self.push_u64(256 - 8 * u64::from(*len));
                self.op(Op::Shl);
            }
            IrOp::MinMax { is_max, signed } => {
                self.emit_children(node)?;
                self.emit_min_max(*is_max, *signed);
            }
            IrOp::StorLoad => {
                self.emit_children(node)?;
                self.op(Op::SLoad);
            }
            IrOp::MapSlot => {
                // [slot, key] -> hash of the 64-byte scratch.
                self.emit_children(node)?;
                self.push_u64(0x20);
                self.op(Op::MStore);
                self.push_word(Word::ZERO);
                self.op(Op::MStore);
                self.push_u64(0x40);
                self.push_word(Word::ZERO);
                self.op(Op::Hash);
            }
            IrOp::BoundsCheck { len } => {
                self.emit_children(node)?;
                self.op(Op::Dup1);
                self.push_u64(*len);
                self.op(Op::Gt);
                self.op(Op::IsZero);
                self.jumpi_abort();
            }
            IrOp::CallInternal {
                name,
                arg_offsets,
                returns: _,
            } => {
                self.emit_children(node)?;
                for offset in arg_offsets.iter().rev() {
                    self.push_u64(*offset);
                    self.op(Op::MStore);
                }
                let ret_label = self.new_label();
                let fn_label = *self.fn_labels.get(name).ok_or_else(|| {
                    CodegenError::Internal {
                        message: format!("no label for internal function '{name}'"),
                    }
                })?;
                self.push_label(ret_label);
                self.push_label(fn_label);
                self.op(Op::Jump);
                self.place_label(ret_label);
            }
            IrOp::CallExternal {
                selector,
                buffer,
                static_call,
                tolerant,
                returns,
            } => {
                self.emit_ext_call(node, *selector, *buffer, *static_call, *tolerant, *returns)?;
            }

            IrOp::Seq => {
                self.emit_children(node)?;
            }
            IrOp::MemStore { offset } => {
                self.emit_children(node)?;
                self.push_u64(*offset);
                self.op(Op::MStore);
            }
            IrOp::MemStoreN { offset, words } => {
                self.emit_children(node)?;
                for word in (0..*words).rev() {
                    self.push_u64(offset + word * 32);
                    self.op(Op::MStore);
                }
            }
            IrOp::StorStore => {
                self.emit_children(node)?;
                self.op(Op::Swap1);
                self.op(Op::SStore);
            }
            IrOp::If => {
                let has_else = node.children.len() == 3;
                self.emit(&node.children[0])?;
                self.op(Op::IsZero);
                let skip = self.new_label();
                self.push_label(skip);
                self.op(Op::JumpI);
                self.emit(&node.children[1])?;
                if has_else {
                    let end = self.new_label();
                    self.push_label(end);
                    self.op(Op::Jump);
                    self.place_label(skip);
                    self.emit(&node.children[2])?;
                    self.place_label(end);
                } else {
                    self.place_label(skip);
                }
            }
            IrOp::IfExpr => {
                self.emit(&node.children[0])?;
                self.op(Op::IsZero);
                let other = self.new_label();
                let end = self.new_label();
                self.push_label(other);
                self.op(Op::JumpI);
                self.emit(&node.children[1])?;
                self.push_label(end);
                self.op(Op::Jump);
                self.place_label(other);
                self.emit(&node.children[2])?;
                self.place_label(end);
            }
            IrOp::Repeat {
                counter,
                stop_slot,
                bound,
            } => {
                self.emit_repeat(node, *counter, *stop_slot, *bound)?;
            }
            IrOp::Break => {
                let Some(&(_, exit)) = self.loop_stack.last() else {
                    return Err(CodegenError::Internal {
                        message: "break outside a loop".to_string(),
                    });
                };
                self.push_label(exit);
                self.op(Op::Jump);
            }
            IrOp::Continue => {
                let Some(&(step, _)) = self.loop_stack.last() else {
                    return Err(CodegenError::Internal {
                        message: "continue outside a loop".to_string(),
                    });
                };
                self.push_label(step);
                self.op(Op::Jump);
            }
            IrOp::Return => {
                self.emit_children(node)?;
                self.emit_return(node.children.len() as u64);
            }
            IrOp::Assert => {
                self.emit_children(node)?;
                self.op(Op::IsZero);
                self.jumpi_abort();
            }
            IrOp::Abort => {
                let abort = self.abort;
                self.push_label(abort);
                self.op(Op::Jump);
            }
            IrOp::Log {
                topic,
                indexed,
                buffer,
            } => {
                self.emit_log(node, *topic, indexed, *buffer)?;
            }
            IrOp::GuardCheck { slot } => {
                self.push_u64(*slot);
                self.op(Op::SLoad);
                self.jumpi_abort();
            }
            IrOp::GuardSet { slot } => {
                self.push_word(Word::ONE);
                self.push_u64(*slot);
                self.op(Op::SStore);
            }
            IrOp::GuardClear { slot } => {
                self.push_word(Word::ZERO);
                self.push_u64(*slot);
                self.op(Op::SStore);
            }
            IrOp::Pop { words } => {
                self.emit_children(node)?;
                for _ in 0..*words {
                    self.op(Op::Pop);
                }
            }
        }
        Ok(())
    }

    fn emit_children(&mut self, node: &IrNode) -> Result<(), CodegenError> {
        for child in &node.children {
            self.emit(child)?;
        }
        Ok(())
    }

    // ==========================================================================
    // Structured constructs
    // ==========================================================================

    fn emit_repeat(
        &mut self,
        node: &IrNode,
        counter: u64,
        stop_slot: u64,
        bound: Option<u64>,
    ) -> Result<(), CodegenError> {
        // [start, stop] -> counter and stop slots.
        self.emit(&node.children[0])?;
        self.emit(&node.children[1])?;
        self.push_u64(stop_slot);
        self.op(Op::MStore);
        self.push_u64(counter);
        self.op(Op::MStore);

        if let Some(bound) = bound {
            // Runtime ranges must satisfy stop - start <= bound before
            // the first iteration; an empty range skips the check.
            let ok = self.new_label();
            self.push_u64(stop_slot);
            self.op(Op::MLoad);
            self.push_u64(counter);
            self.op(Op::MLoad);
            self.op(Op::Lt);
            self.op(Op::IsZero);
            self.push_label(ok);
            self.op(Op::JumpI);
            self.push_u64(counter);
            self.op(Op::MLoad);
            self.push_u64(stop_slot);
            self.op(Op::MLoad);
            self.op(Op::Sub);
            self.push_u64(bound);
            self.op(Op::Lt);
            self.jumpi_abort();
            self.place_label(ok);
        }

        let check = self.new_label();
        let step = self.new_label();
        let exit = self.new_label();
        self.place_label(check);
        self.push_u64(counter);
        self.op(Op::MLoad);
        self.push_u64(stop_slot);
        self.op(Op::MLoad);
        self.op(Op::Gt);
        self.op(Op::IsZero);
        self.push_label(exit);
        self.op(Op::JumpI);

        self.loop_stack.push((step, exit));
        let body = self.emit(&node.children[2]);
        self.loop_stack.pop();
        body?;

        self.place_label(step);
        self.push_u64(counter);
        self.op(Op::MLoad);
        self.push_word(Word::ONE);
        self.op(Op::Add);
        self.push_u64(counter);
        self.op(Op::MStore);
        self.push_label(check);
        self.op(Op::Jump);
        self.place_label(exit);
        Ok(())
    }

    fn emit_return(&mut self, value_words: u64) {
        match &self.ret_ctx {
            RetCtx::External {
                ret_words,
                guard,
                buffer,
            } => {
                let (ret_words, guard, buffer) = (*ret_words, *guard, *buffer);
                // The declared return width drives the store count: one
                // IR child can leave several words (tolerant calls).
                for word in (0..ret_words).rev() {
                    self.push_u64(buffer + word * 32);
                    self.op(Op::MStore);
                }
                self.emit_guard_exit(guard);
                if ret_words == 0 {
                    self.op(Op::Stop);
                } else {
                    self.push_u64(ret_words * 32);
                    self.push_u64(buffer);
                    self.op(Op::Return);
                }
            }
            RetCtx::Internal { guard } => {
                let guard = *guard;
                self.emit_guard_exit(guard);
                // The return address sits under the value words.
                if value_words > 0 {
                    self.op(Op::swap_n(value_words as usize));
                }
                self.op(Op::Jump);
            }
            RetCtx::Deploy { epilogue } => {
                let epilogue = *epilogue;
                self.push_label(epilogue);
                self.op(Op::Jump);
            }
        }
    }

    fn emit_ext_call(
        &mut self,
        node: &IrNode,
        selector: [u8; 4],
        buffer: u64,
        static_call: bool,
        tolerant: bool,
        returns: bool,
    ) -> Result<(), CodegenError> {
        let arg_count = node.children.len() - 1;
        // Address first (source order); it rides the stack under the
        // call setup so nested external calls cannot clobber it.
        self.emit(&node.children[0])?;
        for child in &node.children[1..] {
            self.emit(child)?;
        }
        for index in (0..arg_count).rev() {
            self.push_u64(buffer + 4 + 32 * index as u64);
            self.op(Op::MStore);
        }
        // Selector word, left-aligned, written before the 4-byte offset
        // arguments so only its high bytes survive.
        let mut selector_word = [0u8; 32];
        selector_word[..4].copy_from_slice(&selector);
        self.push_word(Word::from_be_bytes(selector_word));
        self.push_u64(buffer);
        self.op(Op::MStore);

        // [addr] + ret/arg windows, the stashed address duplicated up.
        self.push_u64(32);
        self.push_u64(crate::ir::RET_SCRATCH);
        self.push_u64(4 + 32 * arg_count as u64);
        self.push_u64(buffer);
        if static_call {
            self.op(Op::dup_n(5));
        } else {
            self.push_word(Word::ZERO);
            self.op(Op::dup_n(6));
        }
        self.op(Op::Gas);
        self.op(if static_call { Op::StaticCall } else { Op::Call });
        // [addr, success] -> [success].
        self.op(Op::Swap1);
        self.op(Op::Pop);

        if tolerant {
            if returns {
                self.push_u64(crate::ir::RET_SCRATCH);
                self.op(Op::MLoad);
            }
        } else {
            self.op(Op::IsZero);
            self.jumpi_abort();
            if returns {
                self.push_u64(crate::ir::RET_SCRATCH);
                self.op(Op::MLoad);
            }
        }
        Ok(())
    }

    fn emit_log(
        &mut self,
        node: &IrNode,
        topic: Word,
        indexed: &[bool],
        buffer: u64,
    ) -> Result<(), CodegenError> {
        // Evaluate fields in declaration order, each straight into its
        // buffer slot: data words first, then topic staging words.
        let data_words = indexed.iter().filter(|i| !**i).count() as u64;
        let mut data_index = 0u64;
        let mut topic_index = 0u64;
        let mut topic_slots = Vec::new();
        for (child, is_indexed) in node.children.iter().zip(indexed) {
            self.emit(child)?;
            let slot = if *is_indexed {
                let slot = buffer + (data_words + topic_index) * 32;
                topic_index += 1;
                topic_slots.push(slot);
                slot
            } else {
                let slot = buffer + data_index * 32;
                data_index += 1;
                slot
            };
            self.push_u64(slot);
            self.op(Op::MStore);
        }
        // Topics push back-to-front; the event id is the first topic.
        for slot in topic_slots.iter().rev() {
            self.push_u64(*slot);
            self.op(Op::MLoad);
        }
        self.push_word(topic);
        self.push_u64(data_words * 32);
        self.push_u64(buffer);
        self.op(Op::log_n(1 + topic_slots.len()));
        Ok(())
    }
}

// ============================================================================
// Layout resolution
// ============================================================================

struct Layout {
    /// Width in bytes of each instruction, index-aligned with the stream.
    widths: Vec<u32>,
    /// Byte offset of each instruction within its segment.
    offsets: Vec<u32>,
    labels: FxHashMap<LabelId, u32>,
    constructor_len: u32,
    runtime_code_len: u32,
}

impl Layout {
    fn imm_value(&self, imm: &Imm, data_words: u64) -> Word {
        match imm {
            Imm::Word(word) => *word,
            Imm::Label(label) => {
                Word::from_u64(u64::from(self.labels.get(label).copied().unwrap_or(0)))
            }
            Imm::RuntimeLen => {
                Word::from_u64(u64::from(self.runtime_code_len) + 32 * data_words)
            }
            Imm::RuntimeStart => Word::from_u64(u64::from(self.constructor_len)),
            Imm::DataBase => Word::from_u64(u64::from(self.runtime_code_len)),
        }
    }
}

fn push_width(value: Word, vm: VmVersion) -> u32 {
    if value.is_zero() && vm.has_push0() {
        1
    } else {
        1 + value.byte_len() as u32
    }
}

fn instr_width(instr: &Instr, resolved: Word, vm: VmVersion) -> u32 {
    match instr {
        Instr::Op(_) | Instr::Label(_) => 1,
        Instr::Push(_) => push_width(resolved, vm),
        Instr::Boundary => 0,
    }
}

/// Two-pass (iterated) offset resolution: start from worst-case widths,
/// recompute until nothing moves. The round count is hard-bounded.
fn resolve_layout(
    stream: &[AsmInstr],
    data_words: u64,
    vm: VmVersion,
) -> Result<Layout, CodegenError> {
    let mut layout = Layout {
        widths: stream
            .iter()
            .map(|i| match &i.instr {
                Instr::Push(Imm::Word(w)) => push_width(*w, vm),
                // Worst case until label offsets settle.
                Instr::Push(_) => 5,
                Instr::Op(_) | Instr::Label(_) => 1,
                Instr::Boundary => 0,
            })
            .collect(),
        offsets: vec![0; stream.len()],
        labels: FxHashMap::default(),
        constructor_len: 0,
        runtime_code_len: 0,
    };

    for round in 0..MAX_LAYOUT_ROUNDS {
        // Recompute segment-relative offsets under the current widths.
        let mut offset = 0u32;
        let mut constructor_len = 0u32;
        for (index, instr) in stream.iter().enumerate() {
            if matches!(instr.instr, Instr::Boundary) {
                constructor_len = offset;
                offset = 0;
            }
            layout.offsets[index] = offset;
            if let Instr::Label(label) = &instr.instr {
                layout.labels.insert(*label, offset);
            }
            offset += layout.widths[index];
        }
        layout.constructor_len = constructor_len;
        layout.runtime_code_len = offset;

        // Shrink widths to what the resolved values actually need.
        let mut changed = false;
        for (index, instr) in stream.iter().enumerate() {
            if let Instr::Push(imm) = &instr.instr {
                let value = layout.imm_value(imm, data_words);
                let width = push_width(value, vm);
                if width != layout.widths[index] {
                    layout.widths[index] = width;
                    changed = true;
                }
            }
        }
        if !changed {
            debug!(rounds = round + 1, "layout converged");
            return Ok(layout);
        }
    }
    Err(CodegenError::NonConvergence {
        rounds: MAX_LAYOUT_ROUNDS,
    })
}

fn emit_bytes(
    stream: &[AsmInstr],
    layout: &Layout,
    data_words: u64,
    vm: VmVersion,
) -> (Vec<u8>, Vec<u8>, Vec<SourceMapEntry>) {
    let mut deploy = Vec::new();
    let mut runtime = Vec::new();
    let mut source_map = Vec::new();
    let mut in_runtime = false;
    for (index, instr) in stream.iter().enumerate() {
        let out = if in_runtime { &mut runtime } else { &mut deploy };
        match &instr.instr {
            Instr::Boundary => {
                in_runtime = true;
                continue;
            }
            Instr::Op(op) => out.push(u8::from(*op)),
            Instr::Label(_) => out.push(u8::from(Op::JumpDest)),
            Instr::Push(imm) => {
                let value = layout.imm_value(imm, data_words);
                if value.is_zero() && vm.has_push0() {
                    out.push(u8::from(Op::Push0));
                } else {
                    let bytes = value.to_be_bytes_trimmed();
                    out.push(u8::from(Op::push_n(bytes.len())));
                    out.extend_from_slice(&bytes);
                }
            }
        }
        if in_runtime && instr.span != Span::default() {
            source_map.push(SourceMapEntry {
                offset: layout.offsets[index],
                span: instr.span,
            });
        }
    }
    // The immutable data segment ships zeroed; the constructor patches
    // the in-memory copy before returning it.
    runtime.extend(std::iter::repeat_n(0u8, (data_words * 32) as usize));
    let full_deploy: Vec<u8> = deploy.iter().chain(runtime.iter()).copied().collect();
    (full_deploy, runtime, source_map)
}

fn render_listing(stream: &[AsmInstr], layout: &Layout) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for (index, instr) in stream.iter().enumerate() {
        match &instr.instr {
            Instr::Boundary => {
                let _ = writeln!(out, "; ==== runtime segment ====");
            }
            Instr::Label(_) => {
                let _ = writeln!(out, "{:>6}  {}", layout.offsets[index], instr);
            }
            _ => {
                let _ = writeln!(out, "{:>6}    {}", layout.offsets[index], instr);
            }
        }
    }
    out
}

fn signature_table(registry: &ModuleRegistry) -> Vec<AbiEntry> {
    registry
        .functions()
        .iter()
        .filter(|f| f.sig.visibility == Visibility::External)
        .map(|f| AbiEntry {
            name: f.sig.name.clone(),
            selector: f.sig.selector(),
            mutability: f.sig.effective_mutability(),
            params: f
                .sig
                .params
                .iter()
                .map(|(_, ty)| ty.canonical_name())
                .collect(),
            returns: f.sig.ret.as_ref().map(|ty| ty.canonical_name()),
        })
        .collect()
}
