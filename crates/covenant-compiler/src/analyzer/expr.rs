//! Expression analysis.
//!
//! Every visited node is annotated with its resolved definition and, when
//! statically known, its folded value. Literals are narrowed against the
//! context type flowing in from the surrounding construct; two sibling
//! subexpressions meet through exact unification afterwards.

use covenant_core::ast::{BinOp, Expr};
use covenant_core::{
    AnalysisError, Capability, Constancy, Definition, Location, Mutability, Primitive, Span,
    Value, Word,
};

use super::annotations::ExprInfo;
use super::{FunctionAnalyzer, PlaceRoot};
use crate::conversion::{
    convert_allowed, unify, validate_binary_op, validate_comparison, validate_unary_op,
};
use crate::fold;
use crate::literal::Candidates;
use crate::namespace::{Binding, Builtin, EnvNs};

/// A resolved access path: the root binding plus the type at the end of
/// the path. Lowering re-derives addresses from the same walk.
#[derive(Debug, Clone)]
pub(crate) struct Place {
    pub root: Definition,
    pub ty: Primitive,
    pub root_name: Option<PlaceRoot>,
}

impl<'a> FunctionAnalyzer<'a> {
    /// Analyze an expression against an optional context type, annotate
    /// its node, and return the resolved definition.
    pub(crate) fn expr(
        &mut self,
        expr: &Expr,
        context: Option<&Primitive>,
    ) -> Result<Definition, AnalysisError> {
        // Literals first: their type is the context's to decide.
        if let Some(candidates) = Candidates::of(expr) {
            let candidates = candidates?;
            let ty = candidates.narrow(context)?;
            let value = candidates.value_as(&ty);
            let def = Definition::stack(ty);
            self.annotations
                .insert(expr.id(), ExprInfo::folded(def.clone(), value));
            return Ok(def);
        }
        match expr {
            Expr::Bool { id, value, .. } => {
                let def = Definition::stack(Primitive::Bool);
                self.annotations
                    .insert(*id, ExprInfo::folded(def.clone(), Value::Bool(*value)));
                Ok(def)
            }
            Expr::Name { .. } | Expr::SelfField { .. } | Expr::Subscript { .. } => {
                let place = self.place(expr, false)?;
                Ok(self
                    .annotations
                    .def(expr.id())
                    .cloned()
                    .unwrap_or(Definition::stack(place.ty)))
            }
            Expr::Attribute { id, base, attr, span } => {
                if let Some(def) = self.special_attribute(*id, base, attr, *span)? {
                    return Ok(def);
                }
                let place = self.place(expr, false)?;
                Ok(self
                    .annotations
                    .def(expr.id())
                    .cloned()
                    .unwrap_or(Definition::stack(place.ty)))
            }
            Expr::Binary {
                id,
                span,
                op,
                left,
                right,
            } => self.binary(*id, *span, *op, left, right, context),
            Expr::Unary {
                id,
                span,
                op,
                operand,
            } => {
                let operand_def = self.expr(operand, context)?;
                validate_unary_op(*op, &operand_def.ty, *span)?;
                let ty = operand_def.ty;
                let mut info = ExprInfo::new(Definition::stack(ty.clone()));
                if let Some(value) = self.annotations.value(operand.id()).cloned() {
                    if let Some(folded) = fold::apply_unary(*op, &ty, &value) {
                        info.value = Some(folded);
                    }
                }
                self.annotations.insert(*id, info.clone());
                Ok(info.def)
            }
            Expr::Compare {
                id,
                span,
                op,
                left,
                right,
            } => {
                let ty = self.unified_operands(left, right, None, *span)?;
                validate_comparison(*op, &ty, *span)?;
                let mut info = ExprInfo::new(Definition::stack(Primitive::Bool));
                if let (Some(a), Some(b)) = (
                    self.annotations.value(left.id()).cloned(),
                    self.annotations.value(right.id()).cloned(),
                ) {
                    info.value = fold::apply_compare(*op, &ty, &a, &b);
                }
                self.annotations.insert(*id, info.clone());
                Ok(info.def)
            }
            Expr::BoolOp {
                id, left, right, ..
            } => {
                let left_def = self.expr(left, Some(&Primitive::Bool))?;
                unify(&Primitive::Bool, &left_def.ty, left.span())?;
                let right_def = self.expr(right, Some(&Primitive::Bool))?;
                unify(&Primitive::Bool, &right_def.ty, right.span())?;
                let mut info = ExprInfo::new(Definition::stack(Primitive::Bool));
                if let (Some(a), Some(b)) = (
                    self.annotations.value(left.id()),
                    self.annotations.value(right.id()),
                ) {
                    if let (Some(a), Some(b)) = (a.as_bool(), b.as_bool()) {
                        let v = match expr {
                            Expr::BoolOp {
                                op: covenant_core::ast::BoolOpKind::And,
                                ..
                            } => a && b,
                            _ => a || b,
                        };
                        info.value = Some(Value::Bool(v));
                    }
                }
                self.annotations.insert(*id, info.clone());
                Ok(info.def)
            }
            Expr::Call {
                id,
                span,
                func,
                args,
            } => self.call(*id, *span, func, args),
            Expr::ExtCall {
                id,
                span,
                interface,
                address,
                method,
                args,
                tolerant,
            } => self.ext_call(*id, *span, interface, address, method, args, *tolerant),
            Expr::Convert {
                id,
                span,
                target,
                value,
            } => self.convert(*id, *span, target, value),
            Expr::Tuple { id, items, .. } => {
                let mut tys = Vec::with_capacity(items.len());
                for item in items {
                    tys.push(self.expr(item, None)?.ty);
                }
                let def = Definition::stack(Primitive::Tuple { items: tys });
                self.annotations.insert(*id, ExprInfo::new(def.clone()));
                Ok(def)
            }
            Expr::Int { .. } | Expr::Hex { .. } | Expr::Bool { .. } => unreachable!(),
        }
    }

    // ==========================================================================
    // Places
    // ==========================================================================

    /// Resolve an access path (name, `self.field`, attribute, subscript).
    ///
    /// Roots are annotated with their real definitions; derived nodes get
    /// transient definitions of the type at that point. `writing` only
    /// affects which errors read-only paths produce.
    pub(crate) fn place(&mut self, expr: &Expr, writing: bool) -> Result<Place, AnalysisError> {
        match expr {
            Expr::Name { id, span, name } => {
                let binding = self.namespace.lookup(name, *span)?.clone();
                match binding {
                    Binding::Value(def) => {
                        let root_name = match def.location {
                            Location::Memory { .. } => Some(PlaceRoot::Local(name.clone())),
                            Location::Data { .. } => Some(PlaceRoot::Immutable(name.clone())),
                            _ => None,
                        };
                        // Reading an immutable touches instance state.
                        if !writing && matches!(def.location, Location::Data { .. }) {
                            self.touch(Mutability::View, *span, "reads an immutable")?;
                        }
                        let mut info = ExprInfo::new(def.clone());
                        if def.constancy == Constancy::Constant {
                            info.value = self
                                .registry
                                .constant(name)
                                .map(|(_, value)| value.clone());
                        }
                        self.annotations.insert(*id, info);
                        Ok(Place {
                            ty: def.ty.clone(),
                            root: def,
                            root_name,
                        })
                    }
                    Binding::Storage(_) => Err(AnalysisError::InvalidOperation {
                        message: format!("storage variable '{name}' is accessed as 'self.{name}'"),
                        span: *span,
                    }),
                    Binding::Function(_) | Binding::Builtin(_) => {
                        Err(AnalysisError::InvalidOperation {
                            message: format!("'{name}' is a function, not a value"),
                            span: *span,
                        })
                    }
                    Binding::Type(_) | Binding::Event(_) | Binding::Env(_) => {
                        Err(AnalysisError::InvalidOperation {
                            message: format!("'{name}' is not a value"),
                            span: *span,
                        })
                    }
                }
            }
            Expr::SelfField { id, span, name } => {
                if let Some(var) = self.registry.storage_var(name) {
                    let def = var.def.clone();
                    if !writing {
                        self.touch(Mutability::View, *span, "reads storage")?;
                    }
                    self.annotations.insert(*id, ExprInfo::new(def.clone()));
                    return Ok(Place {
                        ty: def.ty.clone(),
                        root: def,
                        root_name: Some(PlaceRoot::Storage(name.clone())),
                    });
                }
                if self.registry.function(name).is_some() {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("'self.{name}' is a function and must be called"),
                        span: *span,
                    });
                }
                Err(AnalysisError::UndeclaredName {
                    name: format!("self.{name}"),
                    span: *span,
                })
            }
            Expr::Attribute {
                id,
                span,
                base,
                attr,
            } => {
                let base_place = self.place(base, writing)?;
                let Some((_, field_ty)) = base_place.ty.field(attr) else {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("{} has no field '{attr}'", base_place.ty),
                        span: *span,
                    });
                };
                let ty = field_ty.clone();
                self.annotations
                    .insert(*id, ExprInfo::new(Definition::stack(ty.clone())));
                Ok(Place {
                    root: base_place.root,
                    ty,
                    root_name: base_place.root_name,
                })
            }
            Expr::Subscript {
                id,
                span,
                base,
                index,
            } => {
                let base_place = self.place(base, writing)?;
                let ty = match &base_place.ty {
                    Primitive::Array { elem, .. } => {
                        let index_def = self.expr(index, Some(&Primitive::UINT256))?;
                        if !matches!(index_def.ty, Primitive::Uint { .. }) {
                            return Err(AnalysisError::TypeMismatch {
                                expected: "an unsigned integer index".to_string(),
                                found: index_def.ty.canonical_name(),
                                span: index.span(),
                            });
                        }
                        elem.as_ref().clone()
                    }
                    Primitive::Mapping { key, value } => {
                        if !matches!(base_place.root.location, Location::Storage { .. }) {
                            return Err(AnalysisError::InvalidOperation {
                                message: "mappings live in storage".to_string(),
                                span: *span,
                            });
                        }
                        let key_def = self.expr(index, Some(key))?;
                        unify(key, &key_def.ty, index.span())?;
                        value.as_ref().clone()
                    }
                    Primitive::Tuple { items } => {
                        // Tuple elements are addressed by constant index.
                        let items = items.clone();
                        self.expr(index, Some(&Primitive::UINT256))?;
                        let Some(index_value) = self.annotations.value(index.id()) else {
                            return Err(AnalysisError::InvalidOperation {
                                message: "tuple index must be a constant".to_string(),
                                span: index.span(),
                            });
                        };
                        let i = index_value.as_word().to_u64().unwrap_or(u64::MAX) as usize;
                        let Some(item) = items.get(i) else {
                            return Err(AnalysisError::InvalidOperation {
                                message: format!("tuple index {i} out of range"),
                                span: index.span(),
                            });
                        };
                        item.clone()
                    }
                    other => {
                        return Err(AnalysisError::InvalidOperation {
                            message: format!("{other} is not subscriptable"),
                            span: *span,
                        });
                    }
                };
                self.annotations
                    .insert(*id, ExprInfo::new(Definition::stack(ty.clone())));
                Ok(Place {
                    root: base_place.root,
                    ty,
                    root_name: base_place.root_name,
                })
            }
            _ => Err(AnalysisError::InvalidOperation {
                message: if writing {
                    "expression is not assignable".to_string()
                } else {
                    "expression is not a place".to_string()
                },
                span: expr.span(),
            }),
        }
    }

    // ==========================================================================
    // Attribute specials: environment reads and flag members
    // ==========================================================================

    fn special_attribute(
        &mut self,
        id: covenant_core::ast::NodeId,
        base: &Expr,
        attr: &str,
        span: Span,
    ) -> Result<Option<Definition>, AnalysisError> {
        let Expr::Name {
            name: base_name,
            span: base_span,
            ..
        } = base
        else {
            return Ok(None);
        };
        let Ok(binding) = self.namespace.lookup(base_name, *base_span) else {
            return Ok(None);
        };
        match binding.clone() {
            Binding::Env(EnvNs::Msg) => {
                let def = match attr {
                    "sender" => {
                        self.touch(Mutability::View, span, "reads the environment")?;
                        Definition::stack(Primitive::Address)
                    }
                    "value" => {
                        // Attached value only exists for payable functions.
                        if self.sig.mutability != Some(Mutability::Payable) {
                            return Err(AnalysisError::StateAccessViolation {
                                message: format!(
                                    "'msg.value' requires '{}' to be payable",
                                    self.sig.name
                                ),
                                span,
                            });
                        }
                        Definition::stack(Primitive::UINT256)
                    }
                    _ => {
                        return Err(AnalysisError::UndeclaredName {
                            name: format!("msg.{attr}"),
                            span,
                        });
                    }
                };
                self.annotations.insert(id, ExprInfo::new(def.clone()));
                Ok(Some(def))
            }
            Binding::Env(EnvNs::Block) => {
                let def = match attr {
                    "timestamp" | "number" => {
                        self.touch(Mutability::View, span, "reads the environment")?;
                        Definition::stack(Primitive::UINT256)
                    }
                    _ => {
                        return Err(AnalysisError::UndeclaredName {
                            name: format!("block.{attr}"),
                            span,
                        });
                    }
                };
                self.annotations.insert(id, ExprInfo::new(def.clone()));
                Ok(Some(def))
            }
            Binding::Type(type_name) => {
                let Some(Primitive::Flag { members, .. }) = self.registry.user_type(&type_name)
                else {
                    return Ok(None);
                };
                let Some(index) = members.iter().position(|m| m == attr) else {
                    return Err(AnalysisError::UndeclaredName {
                        name: format!("{type_name}.{attr}"),
                        span,
                    });
                };
                let ty = self
                    .registry
                    .user_type(&type_name)
                    .cloned()
                    .expect("flag type is registered");
                let mut bytes = [0u8; 32];
                bytes[31 - index / 8] = 1 << (index % 8);
                let def = Definition::stack(ty);
                self.annotations.insert(
                    id,
                    ExprInfo::folded(def.clone(), Value::Uint(Word::from_be_bytes(bytes))),
                );
                Ok(Some(def))
            }
            _ => Ok(None),
        }
    }

    // ==========================================================================
    // Operators
    // ==========================================================================

    fn binary(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        context: Option<&Primitive>,
    ) -> Result<Definition, AnalysisError> {
        let ty = self.unified_operands(left, right, context, span)?;
        validate_binary_op(op, &ty, span)?;
        // A statically-zero divisor can never succeed.
        if matches!(op, BinOp::Div | BinOp::Mod) {
            if let Some(value) = self.annotations.value(right.id()) {
                if value.as_int_word().is_some_and(Word::is_zero) {
                    return Err(AnalysisError::InvalidOperation {
                        message: "division by zero".to_string(),
                        span,
                    });
                }
            }
        }
        let mut info = ExprInfo::new(Definition::stack(ty.clone()));
        if ty.is_integer() {
            if let (Some(a), Some(b)) = (
                self.annotations.value(left.id()).cloned(),
                self.annotations.value(right.id()).cloned(),
            ) {
                match fold::apply_binary(op, &ty, &a, &b) {
                    Some(folded) => info.value = Some(folded),
                    // Folding failed on constants: the operation is
                    // guaranteed to abort at runtime.
                    None => {
                        return Err(AnalysisError::InvalidOperation {
                            message: format!(
                                "'{} {} {}' overflows {}",
                                a,
                                op.as_str(),
                                b,
                                ty
                            ),
                            span,
                        });
                    }
                }
            }
        }
        self.annotations.insert(id, info.clone());
        Ok(info.def)
    }

    /// Analyze two operand expressions to one unified type, letting a
    /// bare literal side narrow against its sibling.
    pub(crate) fn unified_operands(
        &mut self,
        left: &Expr,
        right: &Expr,
        context: Option<&Primitive>,
        span: Span,
    ) -> Result<Primitive, AnalysisError> {
        if left.is_literal() && !right.is_literal() {
            let right_def = self.expr(right, context)?;
            let left_def = self.expr(left, Some(&right_def.ty))?;
            unify(&left_def.ty, &right_def.ty, span)
        } else {
            let left_def = self.expr(left, context)?;
            let right_def = self.expr(right, Some(&left_def.ty))?;
            unify(&left_def.ty, &right_def.ty, span)
        }
    }

    // ==========================================================================
    // Calls
    // ==========================================================================

    fn call(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        func: &Expr,
        args: &[Expr],
    ) -> Result<Definition, AnalysisError> {
        match func {
            Expr::Name {
                name,
                span: func_span,
                ..
            } => {
                let binding = self.namespace.lookup(name, *func_span)?.clone();
                match binding {
                    Binding::Builtin(builtin) => self.builtin_call(id, span, builtin, args),
                    Binding::Function(_) => Err(AnalysisError::InvalidOperation {
                        message: format!("call module functions through 'self.{name}'"),
                        span: *func_span,
                    }),
                    _ => Err(AnalysisError::InvalidOperation {
                        message: format!("'{name}' is not callable"),
                        span: *func_span,
                    }),
                }
            }
            Expr::SelfField {
                name,
                span: func_span,
                ..
            } => self.internal_call(id, span, name, *func_span, args),
            _ => Err(AnalysisError::InvalidOperation {
                message: "expression is not callable".to_string(),
                span,
            }),
        }
    }

    fn builtin_call(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        builtin: Builtin,
        args: &[Expr],
    ) -> Result<Definition, AnalysisError> {
        match builtin {
            Builtin::Len => {
                self.expect_arg_count("len", 1, args.len(), span)?;
                let arg_def = self.expr(&args[0], None)?;
                if !arg_def.ty.capabilities().contains(Capability::SEQUENCE) {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("len() wants a sequence, got {}", arg_def.ty),
                        span,
                    });
                }
                let len = arg_def.ty.sequence_len().unwrap_or(0);
                let def = Definition::stack(Primitive::UINT256);
                self.annotations.insert(
                    id,
                    ExprInfo::folded(def.clone(), Value::Uint(Word::from_u64(len))),
                );
                Ok(def)
            }
            Builtin::Min | Builtin::Max => {
                let name = if builtin == Builtin::Min { "min" } else { "max" };
                self.expect_arg_count(name, 2, args.len(), span)?;
                let ty = self.unified_operands(&args[0], &args[1], None, span)?;
                if !ty.capabilities().contains(Capability::NUMERIC) {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("{name}() wants numbers, got {ty}"),
                        span,
                    });
                }
                let mut info = ExprInfo::new(Definition::stack(ty.clone()));
                if let (Some(a), Some(b)) = (
                    self.annotations.value(args[0].id()).cloned(),
                    self.annotations.value(args[1].id()).cloned(),
                ) {
                    let op = if builtin == Builtin::Min {
                        covenant_core::ast::CmpOp::Lt
                    } else {
                        covenant_core::ast::CmpOp::Gt
                    };
                    if let Some(Value::Bool(first)) = fold::apply_compare(op, &ty, &a, &b) {
                        info.value = Some(if first { a } else { b });
                    }
                }
                self.annotations.insert(id, info.clone());
                Ok(info.def)
            }
        }
    }

    fn internal_call(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        name: &str,
        func_span: Span,
        args: &[Expr],
    ) -> Result<Definition, AnalysisError> {
        let Some(info) = self.registry.function(name) else {
            return Err(AnalysisError::UndeclaredName {
                name: format!("self.{name}"),
                span: func_span,
            });
        };
        let callee = info.sig.clone();
        if callee.visibility != covenant_core::Visibility::Internal {
            return Err(AnalysisError::InvalidOperation {
                message: format!(
                    "{} function '{}' cannot be called internally",
                    callee.visibility.as_str(),
                    name
                ),
                span: func_span,
            });
        }
        self.expect_arg_count(name, callee.params.len(), args.len(), span)?;
        // Calls into undeclared, not-yet-analyzed functions assume the
        // nonpayable worst case.
        let callee_effect = callee.mutability.unwrap_or(Mutability::Nonpayable);
        for (arg, (_, param_ty)) in args.iter().zip(&callee.params) {
            let arg_def = self.expr(arg, Some(param_ty))?;
            unify(param_ty, &arg_def.ty, arg.span())?;
        }
        self.touch(
            callee_effect,
            span,
            &format!("calls {} function 'self.{name}'", callee_effect.as_str()),
        )?;
        if callee_effect >= Mutability::Nonpayable {
            for arg in args {
                self.check_iterable_escape(arg)?;
            }
        }
        if !self.calls.iter().any(|c| c == name) {
            self.calls.push(name.to_string());
        }
        let ret_ty = callee
            .ret
            .clone()
            .unwrap_or(Primitive::Tuple { items: vec![] });
        let def = Definition::stack(ret_ty);
        self.annotations.insert(id, ExprInfo::new(def.clone()));
        Ok(def)
    }

    #[allow(clippy::too_many_arguments)]
    fn ext_call(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        interface: &str,
        address: &Expr,
        method: &str,
        args: &[Expr],
        tolerant: bool,
    ) -> Result<Definition, AnalysisError> {
        let Some(found) = self.registry.interface_method(interface, method) else {
            return Err(AnalysisError::UndeclaredName {
                name: format!("{interface}.{method}"),
                span,
            });
        };
        let sig = found.clone();
        let address_def = self.expr(address, Some(&Primitive::Address))?;
        unify(&Primitive::Address, &address_def.ty, address.span())?;
        self.expect_arg_count(method, sig.params.len(), args.len(), span)?;
        for (arg, param_ty) in args.iter().zip(&sig.params) {
            let arg_def = self.expr(arg, Some(param_ty))?;
            unify(param_ty, &arg_def.ty, arg.span())?;
        }
        let required = if sig.is_state_changing() {
            Mutability::Nonpayable
        } else {
            Mutability::View
        };
        self.touch(
            required,
            span,
            &format!("makes a {} external call", sig.mutability.as_str()),
        )?;
        let ret = sig.ret.clone();
        let ty = if tolerant {
            // Failure-tolerant calls produce a success flag next to the
            // unmarshalled return value.
            match ret {
                Some(ret) => Primitive::Tuple {
                    items: vec![Primitive::Bool, ret],
                },
                None => Primitive::Bool,
            }
        } else {
            ret.unwrap_or(Primitive::Tuple { items: vec![] })
        };
        let def = Definition::stack(ty);
        self.annotations.insert(id, ExprInfo::new(def.clone()));
        Ok(def)
    }

    /// Reject passing a collection under iteration into a mutating call.
    fn check_iterable_escape(&mut self, arg: &Expr) -> Result<(), AnalysisError> {
        if self.active_iterables.is_empty() {
            return Ok(());
        }
        let root = match arg {
            Expr::SelfField { name, .. } => Some(PlaceRoot::Storage(name.clone())),
            Expr::Name { name, .. } => Some(PlaceRoot::Local(name.clone())),
            _ => None,
        };
        if let Some(root) = root {
            if self.active_iterables.contains(&root) {
                return Err(AnalysisError::IteratorException {
                    message: "collection under iteration passed to a state-changing call"
                        .to_string(),
                    span: arg.span(),
                });
            }
        }
        Ok(())
    }

    fn expect_arg_count(
        &self,
        name: &str,
        expected: usize,
        got: usize,
        span: Span,
    ) -> Result<(), AnalysisError> {
        if expected == got {
            Ok(())
        } else {
            Err(AnalysisError::InvalidOperation {
                message: format!("{name}() expects {expected} argument(s), got {got}"),
                span,
            })
        }
    }

    // ==========================================================================
    // Conversions
    // ==========================================================================

    fn convert(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        target: &covenant_core::ast::TypeExpr,
        value: &Expr,
    ) -> Result<Definition, AnalysisError> {
        let target_ty = crate::resolver::TypeResolver::new(self.registry)
            .resolve(target, crate::resolver::TypePosition::Value)?;
        if value.is_literal() {
            // A literal converts by narrowing straight to the target.
            let def = self.expr(value, Some(&target_ty))?;
            self.annotations
                .insert(id, self.annotations.get(value.id()).cloned().unwrap_or(ExprInfo::new(def)));
            return Ok(Definition::stack(target_ty));
        }
        let from = self.expr(value, None)?;
        if !convert_allowed(&from.ty, &target_ty) {
            return Err(AnalysisError::InvalidOperation {
                message: format!("cannot convert {} to {}", from.ty, target_ty),
                span,
            });
        }
        let mut info = ExprInfo::new(Definition::stack(target_ty.clone()));
        if let Some(value) = self.annotations.value(value.id()).cloned() {
            match fold_conversion(&value, &from.ty, &target_ty) {
                Ok(folded) => info.value = folded,
                Err(message) => {
                    return Err(AnalysisError::InvalidOperation { message, span });
                }
            }
        }
        self.annotations.insert(id, info.clone());
        Ok(info.def)
    }
}

/// Fold a conversion of a known value; `Ok(None)` means "leave for
/// runtime", `Err` means the conversion can never succeed.
fn fold_conversion(
    value: &Value,
    from: &Primitive,
    to: &Primitive,
) -> Result<Option<Value>, String> {
    match (from, to) {
        (a, b) if a.is_integer() && b.is_integer() => {
            let word = value.as_int_word().unwrap_or(Word::ZERO);
            let fits = if b.is_signed() {
                word.fits_signed(b.int_bits().unwrap_or(256))
            } else {
                !word.is_negative() && word.fits_unsigned(b.int_bits().unwrap_or(256))
            };
            if !fits {
                return Err(format!("{value} is out of range for {to}"));
            }
            Ok(Some(if b.is_signed() {
                Value::Int(word)
            } else {
                Value::Uint(word)
            }))
        }
        (Primitive::Address, Primitive::Uint { bits: 256 }) => {
            Ok(Some(Value::Uint(value.as_word())))
        }
        (Primitive::Uint { bits: 256 }, Primitive::Address) => {
            let word = value.as_word();
            if !word.fits_unsigned(160) {
                return Err(format!("{value} does not fit an address"));
            }
            Ok(Some(Value::Address(word)))
        }
        (Primitive::Bool, b) if b.is_integer() => Ok(Some(if b.is_signed() {
            Value::Int(value.as_word())
        } else {
            Value::Uint(value.as_word())
        })),
        // bytesN <-> uintN*8 realignment stays a runtime shift.
        _ => Ok(None),
    }
}
