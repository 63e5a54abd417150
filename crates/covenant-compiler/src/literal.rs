//! Literal type candidates and context narrowing.
//!
//! A literal does not have one type at its own site: `5` could be any
//! integer width that holds it. The analyzer builds the candidate set
//! here and narrows it against the surrounding context; ambiguity that
//! survives every narrowing opportunity falls back to one documented
//! default instead of backtracking.

use covenant_core::ast::Expr;
use covenant_core::{AnalysisError, Primitive, Span, Value, Word};

/// Integer widths the language offers, ascending.
pub const INT_WIDTHS: [u16; 6] = [8, 16, 32, 64, 128, 256];

/// The set of primitives a literal could assume, with its folded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
    set: Vec<Primitive>,
    value: Value,
    span: Span,
}

impl Candidates {
    /// Build the candidate set for a literal expression, or `None` when
    /// the expression is not a literal.
    pub fn of(expr: &Expr) -> Option<Result<Candidates, AnalysisError>> {
        match expr {
            Expr::Int {
                span,
                negative,
                magnitude,
                ..
            } => Some(Self::of_int(*negative, *magnitude, *span)),
            Expr::Hex { span, bytes, .. } => Some(Self::of_hex(bytes, *span)),
            _ => None,
        }
    }

    fn of_int(negative: bool, magnitude: Word, span: Span) -> Result<Candidates, AnalysisError> {
        let mut set = Vec::new();
        if negative && magnitude.is_zero() {
            return Err(AnalysisError::InvalidLiteral {
                message: "negative zero".to_string(),
                span,
            });
        }
        let value_word = if negative { magnitude.neg() } else { magnitude };
        if negative {
            // Only signed widths can hold a negative value. The magnitude
            // 2^255 maps onto int256 min exactly.
            for bits in INT_WIDTHS {
                if value_word.fits_signed(bits) && magnitude <= Word::signed_min() {
                    set.push(Primitive::Int { bits });
                }
            }
        } else {
            for bits in INT_WIDTHS {
                if magnitude.fits_unsigned(bits) {
                    set.push(Primitive::Uint { bits });
                }
            }
            for bits in INT_WIDTHS {
                if magnitude.fits_signed(bits) {
                    set.push(Primitive::Int { bits });
                }
            }
        }
        if set.is_empty() {
            return Err(AnalysisError::InvalidLiteral {
                message: "integer literal exceeds every integer width".to_string(),
                span,
            });
        }
        let value = if negative {
            Value::Int(value_word)
        } else {
            Value::Uint(value_word)
        };
        Ok(Candidates { set, value, span })
    }

    fn of_hex(bytes: &[u8], span: Span) -> Result<Candidates, AnalysisError> {
        if bytes.is_empty() || bytes.len() > 32 {
            return Err(AnalysisError::InvalidLiteral {
                message: format!("hex literal of {} bytes (want 1..=32)", bytes.len()),
                span,
            });
        }
        let mut set = vec![Primitive::Bytes {
            len: bytes.len() as u8,
        }];
        if bytes.len() == 20 {
            set.push(Primitive::Address);
        }
        Ok(Candidates {
            set,
            value: Value::Bytes(bytes.to_vec()),
            span,
        })
    }

    /// The folded value, shaped for the narrowed type.
    pub fn value_as(&self, ty: &Primitive) -> Value {
        match (ty, &self.value) {
            (Primitive::Int { .. }, Value::Uint(w)) => Value::Int(*w),
            (Primitive::Address, Value::Bytes(bytes)) => {
                let mut padded = [0u8; 32];
                padded[12..].copy_from_slice(bytes);
                Value::Address(Word::from_be_bytes(padded))
            }
            _ => self.value.clone(),
        }
    }

    /// Intersect with a required context type.
    ///
    /// Empty intersection is `InvalidLiteral`. With no context, the
    /// documented default applies: unsigned before signed, then the
    /// widest width; an address-shaped hex literal prefers `address`.
    /// There is no backtracking - this is the single decision point.
    pub fn narrow(&self, context: Option<&Primitive>) -> Result<Primitive, AnalysisError> {
        match context {
            Some(wanted) => {
                if self.set.iter().any(|c| c == wanted) {
                    Ok(wanted.clone())
                } else {
                    Err(AnalysisError::InvalidLiteral {
                        message: format!(
                            "literal {} is not representable as {}",
                            self.value, wanted
                        ),
                        span: self.span,
                    })
                }
            }
            None => Ok(self.default_type()),
        }
    }

    fn default_type(&self) -> Primitive {
        if self.set.iter().any(|c| *c == Primitive::Address) {
            return Primitive::Address;
        }
        let widest_uint = self
            .set
            .iter()
            .filter_map(|c| match c {
                Primitive::Uint { bits } => Some(*bits),
                _ => None,
            })
            .max();
        if let Some(bits) = widest_uint {
            return Primitive::Uint { bits };
        }
        let widest_int = self
            .set
            .iter()
            .filter_map(|c| match c {
                Primitive::Int { bits } => Some(*bits),
                _ => None,
            })
            .max();
        if let Some(bits) = widest_int {
            return Primitive::Int { bits };
        }
        // Non-integer literals have a unique first candidate.
        self.set[0].clone()
    }

    #[cfg(test)]
    fn contains(&self, ty: &Primitive) -> bool {
        self.set.iter().any(|c| c == ty)
    }
}
