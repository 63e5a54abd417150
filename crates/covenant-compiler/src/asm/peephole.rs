//! Local instruction-sequence rewrites.
//!
//! Each rule replaces a short window with a cheaper equivalent whose
//! externally observable effect is identical. Labels are never removed,
//! so symbolic jump targets stay valid; the pass runs before offsets are
//! resolved.

use covenant_core::Word;

use super::opcode::Op;
use super::{AsmInstr, Imm, Instr};

/// Run the rewriter: one pass, or to a fixed point when `aggressive`.
pub(super) fn run(stream: Vec<AsmInstr>, aggressive: bool) -> Vec<AsmInstr> {
    let mut current = rewrite_once(stream);
    if aggressive {
        // Each pass strictly shrinks the stream, so this terminates.
        loop {
            let next = rewrite_once(current.clone());
            if next.len() == current.len() {
                break;
            }
            current = next;
        }
    }
    current
}

fn rewrite_once(stream: Vec<AsmInstr>) -> Vec<AsmInstr> {
    let mut out: Vec<AsmInstr> = Vec::with_capacity(stream.len());
    let mut index = 0;
    while index < stream.len() {
        if let Some(skip) = match_window(&stream[index..]) {
            index += skip;
            continue;
        }
        out.push(stream[index].clone());
        index += 1;
    }
    out
}

/// Length of a removable window starting here, if any rule applies.
fn match_window(window: &[AsmInstr]) -> Option<usize> {
    // PUSH 0; ADD/OR/XOR - additive and bitwise identities.
    if let [a, b, ..] = window {
        if is_push_value(a, Word::ZERO)
            && matches!(b.instr, Instr::Op(Op::Add | Op::Or | Op::Xor))
        {
            return Some(2);
        }
        // PUSH 1; MUL - multiplicative identity.
        if is_push_value(a, Word::ONE) && matches!(b.instr, Instr::Op(Op::Mul)) {
            return Some(2);
        }
        // PUSH x; POP and DUP1; POP - dead value.
        if matches!(a.instr, Instr::Push(Imm::Word(_)))
            && matches!(b.instr, Instr::Op(Op::Pop))
        {
            return Some(2);
        }
        if matches!(a.instr, Instr::Op(Op::Dup1)) && matches!(b.instr, Instr::Op(Op::Pop)) {
            return Some(2);
        }
        // NOT; NOT and SWAP1; SWAP1 - involutions.
        if matches!(a.instr, Instr::Op(Op::Not)) && matches!(b.instr, Instr::Op(Op::Not)) {
            return Some(2);
        }
        if matches!(a.instr, Instr::Op(Op::Swap1)) && matches!(b.instr, Instr::Op(Op::Swap1)) {
            return Some(2);
        }
    }
    // ISZERO; ISZERO feeding a conditional jump: JUMPI already treats
    // any nonzero word as true.
    if let [a, b, c, d, ..] = window {
        if matches!(a.instr, Instr::Op(Op::IsZero))
            && matches!(b.instr, Instr::Op(Op::IsZero))
            && matches!(c.instr, Instr::Push(Imm::Label(_)))
            && matches!(d.instr, Instr::Op(Op::JumpI))
        {
            return Some(2);
        }
    }
    // PUSH @L; JUMP; L: - jump to the next instruction falls through.
    if let [a, b, c, ..] = window {
        if let (Instr::Push(Imm::Label(target)), Instr::Op(Op::Jump), Instr::Label(label)) =
            (&a.instr, &b.instr, &c.instr)
        {
            if target == label {
                return Some(2);
            }
        }
    }
    None
}

fn is_push_value(instr: &AsmInstr, value: Word) -> bool {
    matches!(&instr.instr, Instr::Push(Imm::Word(w)) if *w == value)
}
