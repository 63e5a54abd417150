//! Statement analysis.
//!
//! Dispatches per statement kind, threading the failure precedence of a
//! single construct through check order: literal and type resolution
//! first, then agreement, then operation validity, then writability,
//! then state-access and iteration rules.

use covenant_core::ast::{Expr, ForIter, Stmt};
use covenant_core::{
    AnalysisError, Constancy, Definition, Location, Mutability, Primitive, Span,
};

use super::annotations::ExprInfo;
use super::{FunctionAnalyzer, PlaceRoot};
use crate::conversion::{unify, validate_binary_op, validate_modification};
use crate::resolver::{TypePosition, TypeResolver};

impl<'a> FunctionAnalyzer<'a> {
    /// Analyze one statement.
    pub(crate) fn stmt(&mut self, stmt: &Stmt) -> Result<(), AnalysisError> {
        match stmt {
            Stmt::Let {
                id,
                span,
                name,
                ty,
                value,
            } => self.let_stmt(*id, *span, name, ty.as_ref(), value),
            Stmt::Assign {
                span, target, value, ..
            } => self.assign(*span, target, value, None),
            Stmt::AugAssign {
                span,
                op,
                target,
                value,
                ..
            } => self.assign(*span, target, value, Some(*op)),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let cond_def = self.expr(cond, Some(&Primitive::Bool))?;
                unify(&Primitive::Bool, &cond_def.ty, cond.span())?;
                self.in_block(|a| a.body(then_body))?;
                if !else_body.is_empty() {
                    self.in_block(|a| a.body(else_body))?;
                }
                Ok(())
            }
            Stmt::For {
                id,
                span,
                var,
                var_span,
                iter,
                body,
            } => self.for_stmt(*id, *span, var, *var_span, iter, body),
            Stmt::Return { span, value, .. } => self.return_stmt(*span, value.as_ref()),
            Stmt::Assert {
                cond, dev, ..
            } => {
                self.dev = dev.clone();
                let cond_def = self.expr(cond, Some(&Primitive::Bool))?;
                unify(&Primitive::Bool, &cond_def.ty, cond.span())?;
                self.dev = None;
                Ok(())
            }
            Stmt::Raise { .. } => Ok(()),
            Stmt::Log {
                span, event, args, ..
            } => self.log_stmt(*span, event, args),
            Stmt::Break { span, .. } | Stmt::Continue { span, .. } => {
                if self.loop_depth == 0 {
                    return Err(AnalysisError::InvalidOperation {
                        message: "break/continue outside of a loop".to_string(),
                        span: *span,
                    });
                }
                Ok(())
            }
            Stmt::Pass { .. } => Ok(()),
            Stmt::Expr { expr, .. } => {
                self.expr(expr, None)?;
                Ok(())
            }
        }
    }

    pub(crate) fn body(&mut self, stmts: &[Stmt]) -> Result<(), AnalysisError> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    // ==========================================================================
    // Bindings & assignment
    // ==========================================================================

    fn let_stmt(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        name: &str,
        ty: Option<&covenant_core::ast::TypeExpr>,
        value: &Expr,
    ) -> Result<(), AnalysisError> {
        let declared = match ty {
            Some(annotation) => {
                Some(TypeResolver::new(self.registry).resolve(annotation, TypePosition::Value)?)
            }
            None => None,
        };
        let value_def = self.expr(value, declared.as_ref())?;
        let ty = match declared {
            Some(declared) => unify(&declared, &value_def.ty, value.span())?,
            None => value_def.ty,
        };
        // Locals are single words, or the flattened words of a non-empty
        // tuple produced by a call (there are no aggregate literals).
        let legal = match &ty {
            Primitive::Tuple { items } => {
                !items.is_empty() && items.iter().all(Primitive::is_word_sized)
            }
            other => other.is_word_sized(),
        };
        if !legal {
            return Err(AnalysisError::InvalidType {
                message: format!("{ty} cannot be a local variable"),
                span,
            });
        }
        let offset = self.alloc_words(ty.word_count());
        let def = Definition::memory(ty, offset, span);
        self.namespace.define_value(name, def.clone(), span)?;
        // Lowering finds the local's slot through the statement node.
        self.annotations.insert(id, ExprInfo::new(def));
        Ok(())
    }

    fn assign(
        &mut self,
        span: Span,
        target: &Expr,
        value: &Expr,
        aug_op: Option<covenant_core::ast::BinOp>,
    ) -> Result<(), AnalysisError> {
        let place = self.place(target, true)?;

        // Immutables may be written, once, by the deploy function only.
        if place.root.constancy == Constancy::Immutable {
            let name = match &place.root_name {
                Some(PlaceRoot::Immutable(name)) => name.clone(),
                _ => String::new(),
            };
            if !self.is_deploy() {
                return Err(AnalysisError::ImmutableViolation {
                    message: format!("immutable '{name}' is only writable during deployment"),
                    span,
                });
            }
            if aug_op.is_some() || !self.immutables_assigned.insert(name.clone()) {
                return Err(AnalysisError::ImmutableViolation {
                    message: format!("immutable '{name}' is assigned more than once"),
                    span,
                });
            }
        } else {
            validate_modification(&place.root, span)?;
        }

        if let Some(op) = aug_op {
            validate_binary_op(op, &place.ty, span)?;
            // The target address is computed twice when read-modify-write
            // is lowered, so calls may not appear inside it.
            if contains_call(target) {
                return Err(AnalysisError::InvalidOperation {
                    message: "augmented assignment target cannot contain calls".to_string(),
                    span,
                });
            }
        }
        if !place.ty.is_word_sized() {
            return Err(AnalysisError::InvalidOperation {
                message: format!("cannot assign a whole {}", place.ty),
                span,
            });
        }

        let value_def = self.expr(value, Some(&place.ty))?;
        unify(&place.ty, &value_def.ty, value.span())?;

        match place.root.location {
            Location::Storage { .. } => {
                self.touch(Mutability::Nonpayable, span, "writes storage")?
            }
            // Immutable writes happen inside the deployment transaction.
            Location::Data { .. } | Location::Memory { .. } => {}
            _ => {}
        }

        // Mutating a collection that is currently being iterated; the
        // state-access ceiling fires first when both are violated.
        if let Some(root) = &place.root_name {
            if self.active_iterables.contains(root) {
                return Err(AnalysisError::IteratorException {
                    message: "assignment to a collection under iteration".to_string(),
                    span,
                });
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Loops
    // ==========================================================================

    fn for_stmt(
        &mut self,
        id: covenant_core::ast::NodeId,
        span: Span,
        var: &str,
        var_span: Span,
        iter: &ForIter,
        body: &[Stmt],
    ) -> Result<(), AnalysisError> {
        let (var_ty, iterable_root) = match iter {
            ForIter::Range { start, stop, bound } => {
                let var_ty = self.range_bounds(start.as_ref(), stop, bound.as_ref(), span)?;
                (var_ty, None)
            }
            ForIter::Sequence(seq) => {
                let place = self.place(seq, false)?;
                let Some(elem) = place.ty.sequence_elem() else {
                    return Err(AnalysisError::InvalidOperation {
                        message: format!("cannot iterate {}", place.ty),
                        span: seq.span(),
                    });
                };
                if !elem.is_word_sized() {
                    return Err(AnalysisError::InvalidType {
                        message: "iteration needs word-sized elements".to_string(),
                        span: seq.span(),
                    });
                }
                (elem.clone(), place.root_name)
            }
        };

        // The loop variable heads a small scratch group: range loops keep
        // their stop bound next to the counter, sequence loops also track
        // the running index.
        let scratch = match iter {
            ForIter::Range { .. } => 2,
            ForIter::Sequence(_) => 3,
        };
        let offset = self.alloc_words(scratch);
        let var_def = Definition {
            ty: var_ty,
            constancy: Constancy::Constant,
            location: Location::Memory { offset },
            span: var_span,
        };
        self.annotations.insert(id, ExprInfo::new(var_def.clone()));

        if let Some(root) = &iterable_root {
            self.active_iterables.push(root.clone());
        }
        self.loop_depth += 1;
        let result = self.in_block(|a| {
            a.namespace.define_value(var, var_def, var_span)?;
            a.body(body)
        });
        self.loop_depth -= 1;
        if iterable_root.is_some() {
            self.active_iterables.pop();
        }
        result
    }

    /// Type-check range bounds; returns the loop variable's type.
    fn range_bounds(
        &mut self,
        start: Option<&Expr>,
        stop: &Expr,
        bound: Option<&Expr>,
        span: Span,
    ) -> Result<Primitive, AnalysisError> {
        let var_ty = match start {
            Some(start) => self.unified_operands(start, stop, None, span)?,
            None => self.expr(stop, None)?.ty,
        };
        if !var_ty.is_integer() {
            return Err(AnalysisError::TypeMismatch {
                expected: "an integer range".to_string(),
                found: var_ty.canonical_name(),
                span,
            });
        }
        let stop_is_static = self.annotations.value(stop.id()).is_some()
            && start.is_none_or(|s| self.annotations.value(s.id()).is_some());
        match bound {
            Some(bound_expr) => {
                // The bound caps a runtime range; it must itself be a
                // constant of the loop variable's type.
                let bound_def = self.expr(bound_expr, Some(&var_ty))?;
                unify(&var_ty, &bound_def.ty, bound_expr.span())?;
                let Some(bound_value) = self.annotations.value(bound_expr.id()) else {
                    return Err(AnalysisError::InvalidOperation {
                        message: "range bound must be a compile-time constant".to_string(),
                        span: bound_expr.span(),
                    });
                };
                if bound_value.as_word().is_zero() {
                    return Err(AnalysisError::InvalidOperation {
                        message: "range bound must be positive".to_string(),
                        span: bound_expr.span(),
                    });
                }
            }
            None => {
                if !stop_is_static {
                    return Err(AnalysisError::InvalidOperation {
                        message: "a runtime range needs an explicit bound".to_string(),
                        span,
                    });
                }
                // A fully static range must be non-empty in the right
                // direction at compile time.
                if let (Some(start_expr), Some(stop_value)) =
                    (start, self.annotations.value(stop.id()))
                {
                    if let Some(start_value) = self.annotations.value(start_expr.id()) {
                        let descending = if var_ty.is_signed() {
                            start_value.as_word().signed_cmp(stop_value.as_word())
                                == std::cmp::Ordering::Greater
                        } else {
                            start_value.as_word() > stop_value.as_word()
                        };
                        if descending {
                            return Err(AnalysisError::InvalidOperation {
                                message: "range start exceeds its stop".to_string(),
                                span,
                            });
                        }
                    }
                }
            }
        }
        Ok(var_ty)
    }

    // ==========================================================================
    // Returns & logs
    // ==========================================================================

    fn return_stmt(&mut self, span: Span, value: Option<&Expr>) -> Result<(), AnalysisError> {
        match (&self.sig.ret, value) {
            (None, None) => Ok(()),
            (Some(expected), Some(value)) => {
                let expected = expected.clone();
                let value_def = self.expr(value, Some(&expected))?;
                unify(&expected, &value_def.ty, value.span())?;
                Ok(())
            }
            (Some(expected), None) => Err(AnalysisError::TypeMismatch {
                expected: expected.canonical_name(),
                found: "no value".to_string(),
                span,
            }),
            (None, Some(value)) => Err(AnalysisError::TypeMismatch {
                expected: "no value".to_string(),
                found: self.expr(value, None)?.ty.canonical_name(),
                span,
            }),
        }
    }

    fn log_stmt(&mut self, span: Span, event: &str, args: &[Expr]) -> Result<(), AnalysisError> {
        let Some(event_ty) = self.registry.event(event).cloned() else {
            return Err(AnalysisError::UndeclaredName {
                name: event.to_string(),
                span,
            });
        };
        let Primitive::Event { fields, .. } = &event_ty else {
            return Err(AnalysisError::InvalidOperation {
                message: format!("'{event}' is not an event"),
                span,
            });
        };
        if fields.len() != args.len() {
            return Err(AnalysisError::InvalidOperation {
                message: format!(
                    "event '{event}' has {} field(s), got {} argument(s)",
                    fields.len(),
                    args.len()
                ),
                span,
            });
        }
        let field_tys: Vec<Primitive> = fields.iter().map(|f| f.ty.clone()).collect();
        for (arg, field_ty) in args.iter().zip(&field_tys) {
            let arg_def = self.expr(arg, Some(field_ty))?;
            unify(field_ty, &arg_def.ty, arg.span())?;
        }
        // Emitting a log is an effect on the transaction.
        self.touch(Mutability::Nonpayable, span, "emits an event")?;
        Ok(())
    }
}

/// Whether any call appears inside an expression tree.
fn contains_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call { .. } | Expr::ExtCall { .. } => true,
        Expr::Attribute { base, .. } => contains_call(base),
        Expr::Subscript { base, index, .. } => contains_call(base) || contains_call(index),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::BoolOp { left, right, .. } => contains_call(left) || contains_call(right),
        Expr::Unary { operand, .. } => contains_call(operand),
        Expr::Convert { value, .. } => contains_call(value),
        _ => false,
    }
}
