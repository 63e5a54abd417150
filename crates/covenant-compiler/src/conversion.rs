//! Type agreement and operator validation.
//!
//! The language performs no implicit numeric conversions: two resolved
//! definitions either denote the same primitive or they mismatch, and the
//! only way across widths is an explicit `convert()`. What remains here
//! is exact unification, capability checks for operators, and the table
//! of conversions `convert()` accepts.

use covenant_core::ast::{BinOp, CmpOp, UnaryOp};
use covenant_core::{AnalysisError, Capability, Definition, Primitive, Span};

/// Find the common type of two already-resolved primitives.
///
/// Literal narrowing happens before this; by the time two sides meet
/// here, anything but exact agreement is a `TypeMismatch`.
pub fn unify(left: &Primitive, right: &Primitive, span: Span) -> Result<Primitive, AnalysisError> {
    if left == right {
        Ok(left.clone())
    } else {
        Err(AnalysisError::TypeMismatch {
            expected: left.canonical_name(),
            found: right.canonical_name(),
            span,
        })
    }
}

/// Check a binary operator against its unified operand type.
pub fn validate_binary_op(op: BinOp, ty: &Primitive, span: Span) -> Result<(), AnalysisError> {
    let caps = ty.capabilities();
    let ok = if op.is_arithmetic() {
        caps.contains(Capability::NUMERIC)
    } else {
        // Bitwise: unsigned integers, fixed bytes, and flag sets.
        matches!(ty, Primitive::Uint { .. })
            || caps.contains(Capability::PACKED)
            || caps.contains(Capability::FLAG_SET)
    };
    if ok {
        Ok(())
    } else {
        Err(AnalysisError::InvalidOperation {
            message: format!("operator '{}' is not defined for {ty}", op.as_str()),
            span,
        })
    }
}

/// Check a unary operator against its operand type.
pub fn validate_unary_op(op: UnaryOp, ty: &Primitive, span: Span) -> Result<(), AnalysisError> {
    let ok = match op {
        UnaryOp::Not => *ty == Primitive::Bool,
        UnaryOp::Neg => ty.is_signed(),
        UnaryOp::BitNot => matches!(ty, Primitive::Uint { .. })
            || ty.capabilities().contains(Capability::PACKED)
            || ty.capabilities().contains(Capability::FLAG_SET),
    };
    if ok {
        Ok(())
    } else {
        let op_name = match op {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
        };
        Err(AnalysisError::InvalidOperation {
            message: format!("operator '{op_name}' is not defined for {ty}"),
            span,
        })
    }
}

/// Check a comparison against its unified operand type.
pub fn validate_comparison(op: CmpOp, ty: &Primitive, span: Span) -> Result<(), AnalysisError> {
    let caps = ty.capabilities();
    let ok = if op.is_ordering() {
        caps.contains(Capability::COMPARABLE)
    } else {
        // Equality works on any single-word value.
        ty.is_word_sized()
    };
    if ok {
        Ok(())
    } else {
        Err(AnalysisError::InvalidOperation {
            message: format!("cannot compare {ty} with '{}'", op.as_str()),
            span,
        })
    }
}

/// Check that a definition may be written through.
pub fn validate_modification(def: &Definition, span: Span) -> Result<(), AnalysisError> {
    if def.is_writable() {
        Ok(())
    } else {
        let what = match def.constancy {
            covenant_core::Constancy::Constant => "a constant",
            covenant_core::Constancy::Immutable => "an immutable outside the deploy function",
            covenant_core::Constancy::Mutable => "a read-only value",
        };
        Err(AnalysisError::ImmutableViolation {
            message: format!("cannot assign to {what}"),
            span,
        })
    }
}

/// Whether `convert(value, target)` accepts this pair.
///
/// Integer-to-integer of any widths/signedness (range-checked at
/// runtime), `uint256 <-> address`, `bytesN <-> uintN*8`, and
/// `bool -> integer`.
pub fn convert_allowed(from: &Primitive, to: &Primitive) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (a, b) if a.is_integer() && b.is_integer() => true,
        (Primitive::Uint { bits: 256 }, Primitive::Address)
        | (Primitive::Address, Primitive::Uint { bits: 256 }) => true,
        (Primitive::Bytes { len }, Primitive::Uint { bits }) => *bits == (*len as u16) * 8,
        (Primitive::Uint { bits }, Primitive::Bytes { len }) => *bits == (*len as u16) * 8,
        (Primitive::Bool, b) if b.is_integer() => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::{Constancy, Location};

    #[test]
    fn unify_exact_or_fail() {
        assert_eq!(
            unify(&Primitive::UINT256, &Primitive::UINT256, Span::default()).unwrap(),
            Primitive::UINT256
        );
        let err = unify(
            &Primitive::UINT256,
            &Primitive::Uint { bits: 128 },
            Span::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::TypeMismatch { .. }));
    }

    #[test]
    fn arithmetic_needs_numeric() {
        assert!(validate_binary_op(BinOp::Add, &Primitive::UINT256, Span::default()).is_ok());
        assert!(validate_binary_op(BinOp::Add, &Primitive::Address, Span::default()).is_err());
        assert!(validate_binary_op(BinOp::Add, &Primitive::Bool, Span::default()).is_err());
    }

    #[test]
    fn bitwise_accepts_bytes_and_flags() {
        let flag = Primitive::Flag {
            name: "Perms".to_string(),
            members: vec!["A".to_string(), "B".to_string()],
        };
        assert!(validate_binary_op(BinOp::BitOr, &flag, Span::default()).is_ok());
        assert!(
            validate_binary_op(BinOp::BitAnd, &Primitive::Bytes { len: 4 }, Span::default())
                .is_ok()
        );
        // Signed bitwise is not defined.
        assert!(validate_binary_op(BinOp::BitOr, &Primitive::INT256, Span::default()).is_err());
    }

    #[test]
    fn negation_is_signed_only() {
        assert!(validate_unary_op(UnaryOp::Neg, &Primitive::INT256, Span::default()).is_ok());
        assert!(validate_unary_op(UnaryOp::Neg, &Primitive::UINT256, Span::default()).is_err());
        assert!(validate_unary_op(UnaryOp::Not, &Primitive::Bool, Span::default()).is_ok());
        assert!(validate_unary_op(UnaryOp::Not, &Primitive::UINT256, Span::default()).is_err());
    }

    #[test]
    fn ordering_needs_comparable() {
        assert!(validate_comparison(CmpOp::Lt, &Primitive::UINT256, Span::default()).is_ok());
        assert!(validate_comparison(CmpOp::Lt, &Primitive::Bool, Span::default()).is_err());
        assert!(validate_comparison(CmpOp::Eq, &Primitive::Bool, Span::default()).is_ok());
        assert!(validate_comparison(CmpOp::Eq, &Primitive::Address, Span::default()).is_ok());
        let arr = Primitive::Array {
            elem: Box::new(Primitive::UINT256),
            len: 2,
        };
        assert!(validate_comparison(CmpOp::Eq, &arr, Span::default()).is_err());
    }

    #[test]
    fn modification_of_constants_fails() {
        let constant = Definition::constant(Primitive::UINT256, Span::default());
        assert!(matches!(
            validate_modification(&constant, Span::default()),
            Err(AnalysisError::ImmutableViolation { .. })
        ));

        let data = Definition {
            ty: Primitive::UINT256,
            constancy: Constancy::Mutable,
            location: Location::Data { offset: 0 },
            span: Span::default(),
        };
        assert!(validate_modification(&data, Span::default()).is_err());

        let storage = Definition::storage(Primitive::UINT256, 0, Span::default());
        assert!(validate_modification(&storage, Span::default()).is_ok());
    }

    #[test]
    fn convert_table() {
        assert!(convert_allowed(
            &Primitive::Uint { bits: 8 },
            &Primitive::UINT256
        ));
        assert!(convert_allowed(&Primitive::INT256, &Primitive::UINT256));
        assert!(convert_allowed(&Primitive::UINT256, &Primitive::Address));
        assert!(convert_allowed(
            &Primitive::Bytes { len: 4 },
            &Primitive::Uint { bits: 32 }
        ));
        assert!(!convert_allowed(
            &Primitive::Bytes { len: 4 },
            &Primitive::UINT256
        ));
        assert!(!convert_allowed(&Primitive::Address, &Primitive::Bool));
    }
}
