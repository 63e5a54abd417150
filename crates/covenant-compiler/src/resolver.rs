//! Resolution of syntactic type annotations to primitives.
//!
//! [`TypeResolver`] turns a [`TypeExpr`] into the canonical [`Primitive`]
//! it denotes: built-in scalars by name, user types through the module
//! registry, containers recursively with constant bounds. Positional
//! rules (where mappings and tuples may appear) are enforced here.

use covenant_core::ast::TypeExpr;
use covenant_core::{AnalysisError, Capability, Primitive, Span};

use crate::fold::ConstEval;
use crate::registry::ModuleRegistry;

/// Where an annotation appears, constraining which types are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypePosition {
    /// Storage declaration: mappings allowed.
    Storage,
    /// Parameter, local, return, or field: value types only.
    Value,
}

/// Resolves type annotations against one module's registry.
pub struct TypeResolver<'reg> {
    registry: &'reg ModuleRegistry,
}

impl<'reg> TypeResolver<'reg> {
    pub fn new(registry: &'reg ModuleRegistry) -> Self {
        Self { registry }
    }

    /// Resolve an annotation, enforcing positional rules.
    pub fn resolve(
        &self,
        expr: &TypeExpr,
        position: TypePosition,
    ) -> Result<Primitive, AnalysisError> {
        match expr {
            TypeExpr::Named { name, span, .. } => self.resolve_named(name, *span),
            TypeExpr::Array {
                elem, len, span, ..
            } => {
                let elem_ty = self.resolve(elem, position)?;
                if matches!(elem_ty, Primitive::Mapping { .. }) {
                    return Err(AnalysisError::InvalidType {
                        message: "mappings cannot be array elements".to_string(),
                        span: *span,
                    });
                }
                let len = ConstEval::new(self.registry).eval_len(len)?;
                Ok(Primitive::Array {
                    elem: Box::new(elem_ty),
                    len,
                })
            }
            TypeExpr::Map {
                key, value, span, ..
            } => {
                if position != TypePosition::Storage {
                    return Err(AnalysisError::InvalidType {
                        message: "mappings only exist in storage".to_string(),
                        span: *span,
                    });
                }
                let key_ty = self.resolve(key, TypePosition::Value)?;
                if !key_ty.capabilities().contains(Capability::MAPPING_KEY) {
                    return Err(AnalysisError::InvalidType {
                        message: format!("{key_ty} cannot key a mapping"),
                        span: key.span(),
                    });
                }
                let value_ty = self.resolve(value, position)?;
                Ok(Primitive::Mapping {
                    key: Box::new(key_ty),
                    value: Box::new(value_ty),
                })
            }
            TypeExpr::Tuple { items, span, .. } => {
                if items.is_empty() {
                    return Err(AnalysisError::InvalidType {
                        message: "empty tuple type".to_string(),
                        span: *span,
                    });
                }
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve(item, TypePosition::Value)?);
                }
                Ok(Primitive::Tuple { items: resolved })
            }
        }
    }

    fn resolve_named(&self, name: &str, span: Span) -> Result<Primitive, AnalysisError> {
        if let Some(ty) = builtin_scalar(name) {
            return Ok(ty);
        }
        if let Some(ty) = self.registry.user_type(name) {
            return Ok(ty.clone());
        }
        Err(AnalysisError::InvalidType {
            message: format!("unknown type '{name}'"),
            span,
        })
    }
}

/// Parse a built-in scalar type name.
fn builtin_scalar(name: &str) -> Option<Primitive> {
    match name {
        "bool" => return Some(Primitive::Bool),
        "address" => return Some(Primitive::Address),
        _ => {}
    }
    if let Some(bits) = parse_width(name, "uint") {
        return Some(Primitive::Uint { bits });
    }
    if let Some(bits) = parse_width(name, "int") {
        return Some(Primitive::Int { bits });
    }
    if let Some(rest) = name.strip_prefix("bytes") {
        if let Ok(len) = rest.parse::<u8>() {
            if (1..=32).contains(&len) && rest == len.to_string() {
                return Some(Primitive::Bytes { len });
            }
        }
    }
    None
}

fn parse_width(name: &str, prefix: &str) -> Option<u16> {
    let rest = name.strip_prefix(prefix)?;
    let bits: u16 = rest.parse().ok()?;
    // Reject non-canonical spellings like "uint08".
    if rest != bits.to_string() {
        return None;
    }
    if bits >= 8 && bits <= 256 && bits % 8 == 0 {
        Some(bits)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::ast::{Expr, NodeIds};
    use covenant_core::Word;

    fn named(ids: &mut NodeIds, name: &str) -> TypeExpr {
        TypeExpr::Named {
            id: ids.next(),
            span: Span::default(),
            name: name.to_string(),
        }
    }

    fn lit(ids: &mut NodeIds, v: u64) -> Expr {
        Expr::Int {
            id: ids.next(),
            span: Span::default(),
            negative: false,
            magnitude: Word::from_u64(v),
        }
    }

    #[test]
    fn scalar_names() {
        let reg = ModuleRegistry::new();
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        assert_eq!(
            resolver
                .resolve(&named(&mut ids, "uint256"), TypePosition::Value)
                .unwrap(),
            Primitive::UINT256
        );
        assert_eq!(
            resolver
                .resolve(&named(&mut ids, "bytes4"), TypePosition::Value)
                .unwrap(),
            Primitive::Bytes { len: 4 }
        );
        assert!(resolver
            .resolve(&named(&mut ids, "uint7"), TypePosition::Value)
            .is_err());
        assert!(resolver
            .resolve(&named(&mut ids, "uint08"), TypePosition::Value)
            .is_err());
        assert!(resolver
            .resolve(&named(&mut ids, "bytes33"), TypePosition::Value)
            .is_err());
        assert!(resolver
            .resolve(&named(&mut ids, "Widget"), TypePosition::Value)
            .is_err());
    }

    #[test]
    fn arrays_with_constant_bounds() {
        let reg = ModuleRegistry::new();
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        let arr = TypeExpr::Array {
            id: ids.next(),
            span: Span::default(),
            elem: Box::new(named(&mut ids, "uint8")),
            len: Box::new(lit(&mut ids, 4)),
        };
        let ty = resolver.resolve(&arr, TypePosition::Value).unwrap();
        assert_eq!(ty.canonical_name(), "uint8[4]");

        let bad = TypeExpr::Array {
            id: ids.next(),
            span: Span::default(),
            elem: Box::new(named(&mut ids, "uint8")),
            len: Box::new(lit(&mut ids, 0)),
        };
        assert!(matches!(
            resolver.resolve(&bad, TypePosition::Value),
            Err(AnalysisError::InvalidType { .. })
        ));
    }

    #[test]
    fn mappings_are_storage_only() {
        let reg = ModuleRegistry::new();
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        let map = TypeExpr::Map {
            id: ids.next(),
            span: Span::default(),
            key: Box::new(named(&mut ids, "address")),
            value: Box::new(named(&mut ids, "uint256")),
        };
        assert!(resolver.resolve(&map, TypePosition::Storage).is_ok());
        assert!(resolver.resolve(&map, TypePosition::Value).is_err());
    }

    #[test]
    fn mapping_keys_need_the_capability() {
        let reg = ModuleRegistry::new();
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        let arr_key = TypeExpr::Array {
            id: ids.next(),
            span: Span::default(),
            elem: Box::new(named(&mut ids, "uint8")),
            len: Box::new(lit(&mut ids, 2)),
        };
        let map = TypeExpr::Map {
            id: ids.next(),
            span: Span::default(),
            key: Box::new(arr_key),
            value: Box::new(named(&mut ids, "uint256")),
        };
        assert!(matches!(
            resolver.resolve(&map, TypePosition::Storage),
            Err(AnalysisError::InvalidType { .. })
        ));
    }

    #[test]
    fn user_types_resolve_through_registry() {
        let mut reg = ModuleRegistry::new();
        let point = Primitive::Struct {
            name: "Point".to_string(),
            fields: vec![("x".to_string(), Primitive::UINT256)],
        };
        reg.register_type("Point", point.clone());
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        assert_eq!(
            resolver
                .resolve(&named(&mut ids, "Point"), TypePosition::Value)
                .unwrap(),
            point
        );
    }

    #[test]
    fn nested_mapping_values() {
        let reg = ModuleRegistry::new();
        let resolver = TypeResolver::new(&reg);
        let mut ids = NodeIds::new();
        let inner = TypeExpr::Map {
            id: ids.next(),
            span: Span::default(),
            key: Box::new(named(&mut ids, "address")),
            value: Box::new(named(&mut ids, "uint256")),
        };
        let outer = TypeExpr::Map {
            id: ids.next(),
            span: Span::default(),
            key: Box::new(named(&mut ids, "address")),
            value: Box::new(inner),
        };
        let ty = resolver.resolve(&outer, TypePosition::Storage).unwrap();
        assert_eq!(ty.canonical_name(), "map[address]map[address]uint256");
    }
}
