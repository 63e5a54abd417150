//! Checked-arithmetic and cast expansions.
//!
//! Integer operations on checked definitions wrap the base opcode with
//! bound assertions that jump to the segment's shared revert block. The
//! operands arrive on the stack in source order (`[a, b]`, `b` on top);
//! the machine's binary opcodes consume the top as the left operand, so
//! non-commutative ops swap first.

use covenant_core::Word;

use super::assembler::Assembler;
use super::opcode::Op;
use crate::ir::{ArithOp, CmpKind, IntKind};

impl<'a> Assembler<'a> {
    /// `[a, b] -> [a OP b]`, bound-asserted when `checked` is set.
    pub(super) fn emit_arith(&mut self, op: ArithOp, checked: Option<IntKind>) {
        let Some(kind) = checked else {
            match op {
                ArithOp::Add => self.op(Op::Add),
                ArithOp::Mul => self.op(Op::Mul),
                ArithOp::And => self.op(Op::And),
                ArithOp::Or => self.op(Op::Or),
                ArithOp::Xor => self.op(Op::Xor),
                ArithOp::Sub => {
                    self.op(Op::Swap1);
                    self.op(Op::Sub);
                }
                ArithOp::Div => {
                    self.op(Op::Swap1);
                    self.op(Op::Div);
                }
                ArithOp::Mod => {
                    self.op(Op::Swap1);
                    self.op(Op::Mod);
                }
            }
            return;
        };
        match op {
            ArithOp::Add => self.emit_checked_add(kind),
            ArithOp::Sub => self.emit_checked_sub(kind),
            ArithOp::Mul => self.emit_checked_mul(kind),
            ArithOp::Div => self.emit_checked_div(kind),
            ArithOp::Mod => self.emit_checked_mod(kind),
            ArithOp::And | ArithOp::Or | ArithOp::Xor => {
                unreachable!("bitwise operations are never checked")
            }
        }
    }

    fn emit_checked_add(&mut self, kind: IntKind) {
        match (kind.signed, kind.bits) {
            (false, 256) => {
                // r = a + b, overflow iff r < a.
                self.op(Op::Dup2);
                self.op(Op::Add);
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Lt);
                self.jumpi_abort();
                self.op(Op::Swap1);
                self.op(Op::Pop);
            }
            (false, bits) => {
                // Operands are in range, so the 256-bit sum is exact;
                // only the width bound needs asserting.
                self.op(Op::Add);
                self.assert_unsigned_max(bits);
            }
            (true, 256) => {
                // Overflow iff (r < a) differs from (b < 0).
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Add);
                self.op(Op::Dup3);
                self.op(Op::Dup2);
                self.op(Op::Slt);
                self.push_word(Word::ZERO);
                self.op(Op::Dup4);
                self.op(Op::Slt);
                self.op(Op::Xor);
                self.jumpi_abort();
                self.op(Op::Swap2);
                self.op(Op::Pop);
                self.op(Op::Pop);
            }
            (true, bits) => {
                self.op(Op::Add);
                self.assert_signed_range(bits);
            }
        }
    }

    fn emit_checked_sub(&mut self, kind: IntKind) {
        match (kind.signed, kind.bits) {
            (false, _) => {
                // Underflow iff b > a; the difference then needs no
                // further width check.
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Gt);
                self.jumpi_abort();
                self.op(Op::Swap1);
                self.op(Op::Sub);
            }
            (true, 256) => {
                // r = a - b, overflow iff (r > a) differs from (b < 0).
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Swap1);
                self.op(Op::Sub);
                self.op(Op::Dup3);
                self.op(Op::Dup2);
                self.op(Op::Sgt);
                self.push_word(Word::ZERO);
                self.op(Op::Dup4);
                self.op(Op::Slt);
                self.op(Op::Xor);
                self.jumpi_abort();
                self.op(Op::Swap2);
                self.op(Op::Pop);
                self.op(Op::Pop);
            }
            (true, bits) => {
                self.op(Op::Swap1);
                self.op(Op::Sub);
                self.assert_signed_range(bits);
            }
        }
    }

    fn emit_checked_mul(&mut self, kind: IntKind) {
        match (kind.signed, kind.bits) {
            (false, bits) if bits <= 128 => {
                // Products of half-word operands cannot wrap 256 bits.
                self.op(Op::Mul);
                if bits < 256 {
                    self.assert_unsigned_max(bits);
                }
            }
            (false, bits) => {
                // r = a * b, valid iff b == 0 or r / b == a.
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Mul);
                self.op(Op::Dup2);
                self.op(Op::IsZero);
                self.op(Op::Dup3);
                self.op(Op::Dup3);
                self.op(Op::Div);
                self.op(Op::Dup5);
                self.op(Op::Eq);
                self.op(Op::Or);
                self.op(Op::IsZero);
                self.jumpi_abort();
                self.op(Op::Swap2);
                self.op(Op::Pop);
                self.op(Op::Pop);
                if bits < 256 {
                    self.assert_unsigned_max(bits);
                }
            }
            (true, bits) if bits <= 128 => {
                // Sign-extended products stay exact below 2^255.
                self.op(Op::Mul);
                self.assert_signed_range(bits);
            }
            (true, bits) => {
                // r = a * b, valid iff b == 0 or r sdiv b == a, with the
                // min * -1 wrap excluded separately.
                self.op(Op::Dup2);
                self.op(Op::Dup2);
                self.op(Op::Mul);
                self.op(Op::Dup2);
                self.op(Op::IsZero);
                self.op(Op::Dup3);
                self.op(Op::Dup3);
                self.op(Op::Sdiv);
                self.op(Op::Dup5);
                self.op(Op::Eq);
                self.op(Op::Or);
                self.op(Op::IsZero);
                self.jumpi_abort();
                self.op(Op::Dup3);
                self.push_word(Word::signed_min());
                self.op(Op::Eq);
                self.op(Op::Dup3);
                self.push_word(Word::MAX);
                self.op(Op::Eq);
                self.op(Op::And);
                self.jumpi_abort();
                self.op(Op::Swap2);
                self.op(Op::Pop);
                self.op(Op::Pop);
                if bits < 256 {
                    self.assert_signed_range(bits);
                }
            }
        }
    }

    fn emit_checked_div(&mut self, kind: IntKind) {
        // Division by a zero divisor always aborts.
        self.op(Op::Dup1);
        self.op(Op::IsZero);
        self.jumpi_abort();
        if kind.signed {
            if kind.bits == 256 {
                // min / -1 is the one quotient out of range.
                self.op(Op::Dup2);
                self.push_word(Word::signed_min());
                self.op(Op::Eq);
                self.op(Op::Dup2);
                self.push_word(Word::MAX);
                self.op(Op::Eq);
                self.op(Op::And);
                self.jumpi_abort();
            }
            self.op(Op::Swap1);
            self.op(Op::Sdiv);
            if kind.bits < 256 {
                self.assert_signed_range(kind.bits);
            }
        } else {
            self.op(Op::Swap1);
            self.op(Op::Div);
        }
    }

    fn emit_checked_mod(&mut self, kind: IntKind) {
        self.op(Op::Dup1);
        self.op(Op::IsZero);
        self.jumpi_abort();
        self.op(Op::Swap1);
        self.op(if kind.signed { Op::Smod } else { Op::Mod });
    }

    /// `[x] -> [-x]`, aborting when the negation leaves the range.
    pub(super) fn emit_neg(&mut self, kind: IntKind) {
        self.push_word(Word::ZERO);
        self.op(Op::Sub);
        if kind.bits == 256 {
            // -min wraps back onto min; nothing else can escape.
            self.op(Op::Dup1);
            self.push_word(Word::signed_min());
            self.op(Op::Eq);
            self.jumpi_abort();
        } else {
            self.assert_signed_range(kind.bits);
        }
    }

    /// `[v] -> [v]` reinterpreted, with the runtime range assertions an
    /// explicit conversion carries.
    pub(super) fn emit_cast(&mut self, from: IntKind, to: IntKind) {
        match (from.signed, to.signed) {
            (false, false) => {
                if to.bits < from.bits {
                    self.assert_unsigned_max(to.bits);
                }
            }
            (false, true) => {
                if from.bits >= to.bits {
                    // The source is never negative; an unsigned compare
                    // against the signed maximum is exact.
                    self.assert_le(Word::signed_max_of(to.bits));
                }
            }
            (true, false) => {
                // Reject negatives, then bound the magnitude.
                self.op(Op::Dup1);
                self.push_word(Word::ZERO);
                self.op(Op::Sgt);
                self.jumpi_abort();
                if to.bits < from.bits {
                    self.assert_unsigned_max(to.bits);
                }
            }
            (true, true) => {
                if to.bits < from.bits {
                    self.assert_signed_range(to.bits);
                }
            }
        }
    }

    /// Assert the unsigned top of stack is at most the width's maximum.
    fn assert_unsigned_max(&mut self, bits: u16) {
        self.assert_le(Word::unsigned_max(bits));
    }

    /// Assert the unsigned top of stack is at most `max`.
    fn assert_le(&mut self, max: Word) {
        self.op(Op::Dup1);
        self.push_word(max);
        self.op(Op::Lt);
        self.jumpi_abort();
    }

    /// Assert the signed top of stack lies inside the width's range.
    fn assert_signed_range(&mut self, bits: u16) {
        if bits == 256 {
            return;
        }
        self.op(Op::Dup1);
        self.push_word(Word::signed_min_of(bits));
        self.op(Op::Sgt);
        self.jumpi_abort();
        self.op(Op::Dup1);
        self.push_word(Word::signed_max_of(bits));
        self.op(Op::Slt);
        self.jumpi_abort();
    }

    /// `[a, b] -> [min(a, b)]` or `[max(a, b)]`.
    pub(super) fn emit_min_max(&mut self, is_max: bool, signed: bool) {
        // Flag selects the first operand: for min, keep `a` when b > a;
        // for max, keep `a` when b < a.
        self.op(Op::Dup2);
        self.op(Op::Dup2);
        let flag_op = match (is_max, signed) {
            (false, false) => Op::Gt,
            (false, true) => Op::Sgt,
            (true, false) => Op::Lt,
            (true, true) => Op::Slt,
        };
        self.op(flag_op);
        let keep_first = self.new_label();
        let end = self.new_label();
        self.push_label(keep_first);
        self.op(Op::JumpI);
        self.op(Op::Swap1);
        self.op(Op::Pop);
        self.push_label(end);
        self.op(Op::Jump);
        self.place_label(keep_first);
        self.op(Op::Pop);
        self.place_label(end);
    }

    /// `[a, b] -> [result]` for comparisons; operand order is restored
    /// by picking the mirrored opcode instead of swapping.
    pub(super) fn emit_cmp(&mut self, op: CmpKind, signed: bool) {
        match (op, signed) {
            (CmpKind::Eq, _) => self.op(Op::Eq),
            (CmpKind::Ne, _) => {
                self.op(Op::Eq);
                self.op(Op::IsZero);
            }
            (CmpKind::Lt, false) => self.op(Op::Gt),
            (CmpKind::Lt, true) => self.op(Op::Sgt),
            (CmpKind::Gt, false) => self.op(Op::Lt),
            (CmpKind::Gt, true) => self.op(Op::Slt),
            (CmpKind::Le, false) => {
                self.op(Op::Lt);
                self.op(Op::IsZero);
            }
            (CmpKind::Le, true) => {
                self.op(Op::Slt);
                self.op(Op::IsZero);
            }
            (CmpKind::Ge, false) => {
                self.op(Op::Gt);
                self.op(Op::IsZero);
            }
            (CmpKind::Ge, true) => {
                self.op(Op::Sgt);
                self.op(Op::IsZero);
            }
        }
    }
}
