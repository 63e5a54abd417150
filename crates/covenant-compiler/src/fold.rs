//! Constant evaluation.
//!
//! Two layers: the value-level operator helpers ([`apply_binary`],
//! [`apply_unary`], [`apply_compare`]) shared with the local pass's
//! opportunistic folding, and [`ConstEval`], the strict evaluator the
//! module pass runs over `const` initializers and array bounds, where
//! everything must fold or the declaration is rejected.

use covenant_core::ast::{BinOp, BoolOpKind, CmpOp, Expr, UnaryOp};
use covenant_core::{AnalysisError, Primitive, Span, Value, Word};

use crate::literal::Candidates;
use crate::registry::ModuleRegistry;

/// Apply a binary operator to two folded values of an already-unified
/// integer type. `None` means "not foldable here" (never an error).
pub fn apply_binary(op: BinOp, ty: &Primitive, left: &Value, right: &Value) -> Option<Value> {
    let (a, b) = (left.as_int_word()?, right.as_int_word()?);
    let signed = ty.is_signed();
    let bits = ty.int_bits()?;
    let raw = match op {
        BinOp::Add => {
            if signed {
                a.checked_signed_add(b)?
            } else {
                a.checked_add(b)?
            }
        }
        BinOp::Sub => {
            if signed {
                a.checked_signed_sub(b)?
            } else {
                a.checked_sub(b)?
            }
        }
        BinOp::Mul => {
            if signed {
                a.checked_signed_mul(b)?
            } else {
                a.checked_mul(b)?
            }
        }
        BinOp::Div => {
            if signed {
                a.checked_signed_div_rem(b)?.0
            } else {
                a.checked_div_rem(b)?.0
            }
        }
        BinOp::Mod => {
            if signed {
                a.checked_signed_div_rem(b)?.1
            } else {
                a.checked_div_rem(b)?.1
            }
        }
        BinOp::BitAnd => a.bitand(b),
        BinOp::BitOr => a.bitor(b),
        BinOp::BitXor => a.bitxor(b),
    };
    let in_range = if signed {
        raw.fits_signed(bits)
    } else {
        raw.fits_unsigned(bits)
    };
    if !in_range {
        return None;
    }
    Some(if signed { Value::Int(raw) } else { Value::Uint(raw) })
}

/// Apply a unary operator to a folded value.
pub fn apply_unary(op: UnaryOp, ty: &Primitive, operand: &Value) -> Option<Value> {
    match op {
        UnaryOp::Not => Some(Value::Bool(!operand.as_bool()?)),
        UnaryOp::Neg => {
            let bits = ty.int_bits()?;
            let negated = operand.as_int_word()?.neg();
            if !negated.fits_signed(bits) {
                return None;
            }
            Some(Value::Int(negated))
        }
        UnaryOp::BitNot => {
            let bits = ty.int_bits()?;
            let masked = operand
                .as_int_word()?
                .bitnot()
                .bitand(Word::unsigned_max(bits));
            Some(Value::Uint(masked))
        }
    }
}

/// Apply a comparison to two folded values of one type.
pub fn apply_compare(op: CmpOp, ty: &Primitive, left: &Value, right: &Value) -> Option<Value> {
    use std::cmp::Ordering;
    let ordering = if ty.is_integer() || *ty == Primitive::Address {
        let (a, b) = (left.as_word(), right.as_word());
        if ty.is_signed() {
            a.signed_cmp(b)
        } else {
            a.cmp(&b)
        }
    } else if *ty == Primitive::Bool {
        let (a, b) = (left.as_bool()?, right.as_bool()?);
        a.cmp(&b)
    } else {
        // Bytes compare by their padded words.
        left.as_word().cmp(&right.as_word())
    };
    let result = match op {
        CmpOp::Eq => ordering == Ordering::Equal,
        CmpOp::Ne => ordering != Ordering::Equal,
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    };
    Some(Value::Bool(result))
}

/// Strict evaluator for constant contexts.
pub struct ConstEval<'reg> {
    registry: &'reg ModuleRegistry,
}

impl<'reg> ConstEval<'reg> {
    pub fn new(registry: &'reg ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Evaluate an expression that must be constant.
    ///
    /// `context` narrows literals the way the local pass would; without
    /// it, the default literal rule applies.
    pub fn eval(
        &self,
        expr: &Expr,
        context: Option<&Primitive>,
    ) -> Result<(Primitive, Value), AnalysisError> {
        if let Some(candidates) = Candidates::of(expr) {
            let candidates = candidates?;
            let ty = candidates.narrow(context)?;
            let value = candidates.value_as(&ty);
            return Ok((ty, value));
        }
        match expr {
            Expr::Bool { value, .. } => Ok((Primitive::Bool, Value::Bool(*value))),
            Expr::Name { name, span, .. } => match self.registry.constant(name) {
                Some((def, value)) => Ok((def.ty.clone(), value.clone())),
                None => Err(AnalysisError::InvalidOperation {
                    message: format!("'{name}' is not a constant"),
                    span: *span,
                }),
            },
            Expr::Unary {
                op, operand, span, ..
            } => {
                // A negated literal arrives pre-signed from the front-end;
                // anything else negates a folded value.
                let wanted = match op {
                    UnaryOp::Not => Some(&Primitive::Bool),
                    _ => context,
                };
                let (ty, value) = self.eval(operand, wanted)?;
                apply_unary(*op, &ty, &value)
                    .map(|v| (ty, v))
                    .ok_or_else(|| overflow(*span))
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
                ..
            } => {
                let (ty, a, b) = self.eval_unified(left, right, context, *span)?;
                if !ty.is_integer() {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("operator '{}' on {ty}", op.as_str()),
                        span: *span,
                    });
                }
                apply_binary(*op, &ty, &a, &b)
                    .map(|v| (ty, v))
                    .ok_or_else(|| overflow(*span))
            }
            Expr::Compare {
                op,
                left,
                right,
                span,
                ..
            } => {
                let (ty, a, b) = self.eval_unified(left, right, None, *span)?;
                apply_compare(*op, &ty, &a, &b)
                    .map(|v| (Primitive::Bool, v))
                    .ok_or_else(|| overflow(*span))
            }
            Expr::BoolOp {
                op, left, right, ..
            } => {
                let (_, a) = self.eval(left, Some(&Primitive::Bool))?;
                let (_, b) = self.eval(right, Some(&Primitive::Bool))?;
                let (a, b) = (a.as_bool().unwrap_or(false), b.as_bool().unwrap_or(false));
                let v = match op {
                    BoolOpKind::And => a && b,
                    BoolOpKind::Or => a || b,
                };
                Ok((Primitive::Bool, Value::Bool(v)))
            }
            _ => Err(AnalysisError::InvalidOperation {
                message: "expression is not constant".to_string(),
                span: expr.span(),
            }),
        }
    }

    /// Evaluate an expression to a positive array length.
    pub fn eval_len(&self, expr: &Expr) -> Result<u64, AnalysisError> {
        let span = expr.span();
        let (ty, value) = self.eval(expr, None).map_err(|_| AnalysisError::InvalidType {
            message: "array bound must be a constant integer".to_string(),
            span,
        })?;
        if ty.is_signed() {
            return Err(AnalysisError::InvalidType {
                message: "array bound must be unsigned".to_string(),
                span,
            });
        }
        let len = value
            .as_int_word()
            .and_then(Word::to_u64)
            .unwrap_or(0);
        if len == 0 {
            return Err(AnalysisError::InvalidType {
                message: "array bound must be positive".to_string(),
                span,
            });
        }
        Ok(len)
    }

    /// Evaluate both sides of a binary construct to one common type.
    ///
    /// A side that is a bare literal narrows against the other side's
    /// type (or the outer context) rather than defaulting early.
    fn eval_unified(
        &self,
        left: &Expr,
        right: &Expr,
        context: Option<&Primitive>,
        span: Span,
    ) -> Result<(Primitive, Value, Value), AnalysisError> {
        match (left.is_literal(), right.is_literal()) {
            (true, false) => {
                let (ty, b) = self.eval(right, context)?;
                let (_, a) = self.eval(left, Some(&ty))?;
                Ok((ty, a, b))
            }
            (false, _) => {
                let (ty, a) = self.eval(left, context)?;
                let (_, b) = self.eval(right, Some(&ty))?;
                Ok((ty, a, b))
            }
            (true, true) => {
                let (ty, a) = self.eval(left, context)?;
                let (rty, b) = self.eval(right, Some(&ty))?;
                if rty != ty {
                    return Err(AnalysisError::TypeMismatch {
                        expected: ty.canonical_name(),
                        found: rty.canonical_name(),
                        span,
                    });
                }
                Ok((ty, a, b))
            }
        }
    }
}

fn overflow(span: Span) -> AnalysisError {
    AnalysisError::InvalidOperation {
        message: "constant expression overflows its type".to_string(),
        span,
    }
}
