//! Assembly and bytecode emission.
//!
//! The assembler flattens the IR tree into a single labeled instruction
//! stream, resolves labels to byte offsets by iterating widths to a
//! fixed point, and splits the stream at the [`Instr::Boundary`] marker
//! into the deployment blob (constructor, which copies out and returns
//! the runtime segment) and the runtime blob (dispatcher, bodies, and
//! the immutable data segment).

mod assembler;
mod checked;
mod opcode;
mod peephole;

pub use assembler::{assemble, AsmOptions, OptLevel};
pub use opcode::{Op, VmVersion};

use std::fmt;

use covenant_core::{Mutability, Span, Word};

/// A symbolic jump target, resolved segment-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) u32);

/// A push immediate: concrete, or resolved during layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Imm {
    Word(Word),
    /// Offset of a label within its segment.
    Label(LabelId),
    /// Total length of the runtime blob (code + data segment).
    RuntimeLen,
    /// Offset of the runtime segment inside the deployment blob.
    RuntimeStart,
    /// Offset of the data segment inside the runtime blob.
    DataBase,
}

/// One instruction of the symbolic stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Op(Op),
    Push(Imm),
    /// Marks a jump target; emits `JUMPDEST`.
    Label(LabelId),
    /// Constructor/runtime split marker; emits nothing.
    Boundary,
}

/// An instruction with its source attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmInstr {
    pub instr: Instr,
    pub span: Span,
}

impl AsmInstr {
    pub fn new(instr: Instr, span: Span) -> Self {
        Self { instr, span }
    }
}

impl fmt::Display for AsmInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instr {
            Instr::Op(op) => write!(f, "{}", op.name()),
            Instr::Push(Imm::Word(w)) => write!(f, "PUSH {w:?}"),
            Instr::Push(Imm::Label(l)) => write!(f, "PUSH @L{}", l.0),
            Instr::Push(Imm::RuntimeLen) => write!(f, "PUSH @runtime.len"),
            Instr::Push(Imm::RuntimeStart) => write!(f, "PUSH @runtime.start"),
            Instr::Push(Imm::DataBase) => write!(f, "PUSH @data.base"),
            Instr::Label(l) => write!(f, "L{}:", l.0),
            Instr::Boundary => write!(f, "; ---- runtime ----"),
        }
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// One entry of the source map: instruction start offset -> source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    pub offset: u32,
    pub span: Span,
}

/// One row of the exported signature table.
#[derive(Debug, Clone, PartialEq)]
pub struct AbiEntry {
    pub name: String,
    pub selector: [u8; 4],
    pub mutability: Mutability,
    pub params: Vec<String>,
    pub returns: Option<String>,
}

/// Everything emission produces for one module.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    /// The constructor blob: executed once, returns `runtime`.
    pub deploy: Vec<u8>,
    /// The blob persisted on-chain (data segment included).
    pub runtime: Vec<u8>,
    /// Runtime-segment source map.
    pub source_map: Vec<SourceMapEntry>,
    /// External surface: dispatchable functions, dispatcher order.
    pub abi: Vec<AbiEntry>,
    /// Human-readable listing of the full stream.
    pub listing: String,
}

impl CompiledContract {
    /// The span mapped to a runtime instruction offset, if any.
    pub fn span_at(&self, offset: u32) -> Option<Span> {
        self.source_map
            .iter()
            .find(|e| e.offset == offset)
            .map(|e| e.span)
    }
}
