//! Statement lowering.

use covenant_core::ast::{Expr, ForIter, Stmt};
use covenant_core::{CodegenError, Location, Primitive, Span, Word};

use super::builder::Lowerer;
use super::expr::PlaceAddr;
use super::{IrNode, IrOp};

impl<'a> Lowerer<'a> {
    /// Lower a function body to a `Seq`.
    pub(super) fn lower_body(&self, body: &[Stmt]) -> Result<IrNode, CodegenError> {
        let mut nodes = Vec::with_capacity(body.len());
        for stmt in body {
            nodes.push(self.lower_stmt(stmt)?);
        }
        Ok(IrNode::seq(nodes, Span::default()))
    }

    fn lower_stmts(&self, body: &[Stmt], span: Span) -> Result<IrNode, CodegenError> {
        let mut nodes = Vec::with_capacity(body.len());
        for stmt in body {
            nodes.push(self.lower_stmt(stmt)?);
        }
        Ok(IrNode::seq(nodes, span))
    }

    fn lower_stmt(&self, stmt: &Stmt) -> Result<IrNode, CodegenError> {
        let span = stmt.span();
        match stmt {
            Stmt::Let { id, value, .. } => {
                let def = self
                    .analysis
                    .annotations
                    .def(*id)
                    .ok_or_else(|| self.internal_error("let statement missing its binding"))?;
                let Location::Memory { offset } = def.location else {
                    return Err(self.internal_error("local is not in the memory frame"));
                };
                let offset = self.frame_offset(offset);
                let words = def.ty.word_count();
                if words == 1 {
                    Ok(IrNode::new(
                        IrOp::MemStore { offset },
                        vec![self.lower_expr(value)?],
                        span,
                    ))
                } else {
                    Ok(IrNode::new(
                        IrOp::MemStoreN { offset, words },
                        self.lower_tuple_items(value)?,
                        span,
                    ))
                }
            }
            Stmt::Assign { target, value, .. } => {
                let value = self.lower_expr(value)?;
                self.lower_store(target, value, span)
            }
            Stmt::AugAssign {
                op, target, value, ..
            } => {
                let ty = self
                    .analysis
                    .annotations
                    .def(target.id())
                    .map(|d| d.ty.clone())
                    .ok_or_else(|| self.internal_error("augmented target unannotated"))?;
                let loaded = self.lower_expr(target)?;
                let rhs = self.lower_expr(value)?;
                let combined = IrNode::new(
                    self.arith_op(*op, &ty)?,
                    vec![loaded, rhs],
                    span,
                );
                self.lower_store(target, combined, span)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let mut children = vec![
                    self.lower_expr(cond)?,
                    self.lower_stmts(then_body, span)?,
                ];
                if !else_body.is_empty() {
                    children.push(self.lower_stmts(else_body, span)?);
                }
                Ok(IrNode::new(IrOp::If, children, span))
            }
            Stmt::For { id, iter, body, .. } => self.lower_for(*id, iter, body, span),
            Stmt::Return { value, .. } => {
                let children = match value {
                    Some(value) => self.lower_tuple_items(value)?,
                    None => Vec::new(),
                };
                Ok(IrNode::new(IrOp::Return, children, span))
            }
            Stmt::Assert { cond, .. } => Ok(IrNode::new(
                IrOp::Assert,
                vec![self.lower_expr(cond)?],
                span,
            )),
            Stmt::Raise { .. } => Ok(IrNode::leaf(IrOp::Abort, span)),
            Stmt::Log { event, args, .. } => self.lower_log(event, args, span),
            Stmt::Break { .. } => Ok(IrNode::leaf(IrOp::Break, span)),
            Stmt::Continue { .. } => Ok(IrNode::leaf(IrOp::Continue, span)),
            Stmt::Pass { .. } => Ok(IrNode::seq(Vec::new(), span)),
            Stmt::Expr { expr, .. } => {
                let words = self
                    .analysis
                    .annotations
                    .def(expr.id())
                    .map_or(0, |d| d.ty.word_count());
                let is_void = matches!(
                    self.analysis.annotations.def(expr.id()).map(|d| &d.ty),
                    Some(Primitive::Tuple { items }) if items.is_empty()
                );
                let lowered = self.lower_expr(expr)?;
                if is_void || words == 0 {
                    Ok(lowered)
                } else {
                    Ok(IrNode::new(IrOp::Pop { words }, vec![lowered], span))
                }
            }
        }
    }

    /// Store an already-lowered value into the target place.
    fn lower_store(
        &self,
        target: &Expr,
        value: IrNode,
        span: Span,
    ) -> Result<IrNode, CodegenError> {
        match self.lower_place(target)? {
            PlaceAddr::Storage(slot) => {
                Ok(IrNode::new(IrOp::StorStore, vec![slot, value], span))
            }
            PlaceAddr::Memory(offset) | PlaceAddr::Staging(offset) => Ok(IrNode::new(
                IrOp::MemStore { offset },
                vec![value],
                span,
            )),
            PlaceAddr::Data(_) => {
                Err(self.internal_error("data segment write outside deployment"))
            }
        }
    }

    fn lower_for(
        &self,
        id: covenant_core::ast::NodeId,
        iter: &ForIter,
        body: &[Stmt],
        span: Span,
    ) -> Result<IrNode, CodegenError> {
        let var_def = self
            .analysis
            .annotations
            .def(id)
            .ok_or_else(|| self.internal_error("loop missing its variable binding"))?;
        let Location::Memory { offset: var_word } = var_def.location else {
            return Err(self.internal_error("loop variable is not in the frame"));
        };
        let var_offset = self.frame_offset(var_word);

        match iter {
            ForIter::Range { start, stop, bound } => {
                let start_node = match start {
                    Some(start) => self.lower_expr(start)?,
                    None => IrNode::leaf(IrOp::Const(Word::ZERO), span),
                };
                let stop_node = self.lower_expr(stop)?;
                let bound_value = match bound {
                    Some(bound_expr) => {
                        let value = self
                            .analysis
                            .annotations
                            .value(bound_expr.id())
                            .ok_or_else(|| self.internal_error("range bound not folded"))?;
                        Some(value.as_word().to_u64().ok_or_else(|| {
                            self.internal_error("range bound exceeds the loop counter")
                        })?)
                    }
                    None => None,
                };
                Ok(IrNode::new(
                    IrOp::Repeat {
                        counter: var_offset,
                        stop_slot: var_offset + 32,
                        bound: bound_value,
                    },
                    vec![start_node, stop_node, self.lower_stmts(body, span)?],
                    span,
                ))
            }
            ForIter::Sequence(seq) => {
                let seq_ty = self
                    .analysis
                    .annotations
                    .def(seq.id())
                    .map(|d| d.ty.clone())
                    .ok_or_else(|| self.internal_error("iterated sequence unannotated"))?;
                let len = seq_ty
                    .sequence_len()
                    .ok_or_else(|| self.internal_error("iterated type has no length"))?;
                let index_offset = var_offset + 32;
                let element = match self.lower_place(seq)? {
                    PlaceAddr::Storage(slot) => {
                        let indexed_slot = IrNode::new(
                            IrOp::Arith {
                                op: super::ArithOp::Add,
                                checked: None,
                            },
                            vec![
                                slot,
                                IrNode::leaf(IrOp::MemLoad { offset: index_offset }, span),
                            ],
                            span,
                        );
                        IrNode::new(IrOp::StorLoad, vec![indexed_slot], span)
                    }
                    _ => return Err(self.internal_error("iterated sequence is not in storage")),
                };
                // Each iteration copies the current element into the loop
                // variable before the body runs.
                let mut body_nodes = vec![IrNode::new(
                    IrOp::MemStore { offset: var_offset },
                    vec![element],
                    span,
                )];
                body_nodes.push(self.lower_stmts(body, span)?);
                Ok(IrNode::new(
                    IrOp::Repeat {
                        counter: index_offset,
                        stop_slot: var_offset + 64,
                        bound: None,
                    },
                    vec![
                        IrNode::leaf(IrOp::Const(Word::ZERO), span),
                        IrNode::leaf(IrOp::Const(Word::from_u64(len)), span),
                        IrNode::seq(body_nodes, span),
                    ],
                    span,
                ))
            }
        }
    }

    fn lower_log(&self, event: &str, args: &[Expr], span: Span) -> Result<IrNode, CodegenError> {
        let event_ty = self
            .registry
            .event(event)
            .cloned()
            .ok_or_else(|| self.internal_error(format!("unknown event '{event}'")))?;
        let Primitive::Event { fields, .. } = &event_ty else {
            return Err(self.internal_error(format!("'{event}' is not an event type")));
        };
        let topic = crate::registry::ModuleRegistry::event_topic(&event_ty);
        let mut children = Vec::with_capacity(args.len());
        let mut indexed = Vec::with_capacity(args.len());
        for (arg, field) in args.iter().zip(fields) {
            children.push(self.lower_expr(arg)?);
            indexed.push(field.indexed);
        }
        Ok(IrNode::new(
            IrOp::Log {
                topic,
                indexed,
                buffer: self.layout.aux_buffer,
            },
            children,
            span,
        ))
    }
}
