//! Expression lowering.
//!
//! Folded expressions become constant pushes; everything else lowers to
//! the operation tree that reproduces its value on the evaluation stack,
//! sub-expressions strictly in source order.

use covenant_core::ast::{BinOp, BoolOpKind, CmpOp, Expr, UnaryOp};
use covenant_core::{CodegenError, Definition, Location, Primitive, Span, Word};

use super::builder::Lowerer;
use super::{ArithOp, CmpKind, IntKind, IrNode, IrOp};

/// A resolved place address.
pub(super) enum PlaceAddr {
    /// Storage slot, possibly computed at runtime.
    Storage(IrNode),
    /// Static memory byte offset.
    Memory(u64),
    /// Immutable staging word (constructor context).
    Staging(u64),
    /// Immutable data-segment word (runtime context).
    Data(u64),
}

impl<'a> Lowerer<'a> {
    pub(super) fn lower_expr(&self, expr: &Expr) -> Result<IrNode, CodegenError> {
        let span = expr.span();
        // Anything the analyzer folded is a constant push.
        if let Some(value) = self.analysis.annotations.value(expr.id()) {
            return Ok(IrNode::leaf(IrOp::Const(value.as_word()), span));
        }
        match expr {
            Expr::Name { .. }
            | Expr::SelfField { .. }
            | Expr::Subscript { .. } => self.lower_place_read(expr, span),
            Expr::Attribute { base, attr, .. } => {
                if let Some(node) = self.lower_env_read(base, attr, span)? {
                    return Ok(node);
                }
                self.lower_place_read(expr, span)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let ty = self.ty_of(expr)?;
                Ok(IrNode::new(
                    self.arith_op(*op, &ty)?,
                    vec![self.lower_expr(left)?, self.lower_expr(right)?],
                    span,
                ))
            }
            Expr::Unary { op, operand, .. } => {
                let ty = self.ty_of(expr)?;
                let child = self.lower_expr(operand)?;
                let op = match op {
                    UnaryOp::Not => IrOp::IsZero,
                    UnaryOp::BitNot => IrOp::Not {
                        mask: bitwise_mask(&ty),
                    },
                    UnaryOp::Neg => IrOp::Neg {
                        kind: int_kind(&ty)
                            .ok_or_else(|| self.internal_error("negating a non-integer"))?,
                    },
                };
                Ok(IrNode::new(op, vec![child], span))
            }
            Expr::Compare {
                op, left, right, ..
            } => {
                let operand_ty = self.ty_of(left)?;
                let signed = operand_ty.is_signed();
                let op = match op {
                    CmpOp::Eq => CmpKind::Eq,
                    CmpOp::Ne => CmpKind::Ne,
                    CmpOp::Lt => CmpKind::Lt,
                    CmpOp::Le => CmpKind::Le,
                    CmpOp::Gt => CmpKind::Gt,
                    CmpOp::Ge => CmpKind::Ge,
                };
                Ok(IrNode::new(
                    IrOp::Cmp { op, signed },
                    vec![self.lower_expr(left)?, self.lower_expr(right)?],
                    span,
                ))
            }
            Expr::BoolOp {
                op, left, right, ..
            } => {
                // Short-circuit through a value-producing branch.
                let (then_node, else_node) = match op {
                    BoolOpKind::And => (
                        self.lower_expr(right)?,
                        IrNode::leaf(IrOp::Const(Word::ZERO), span),
                    ),
                    BoolOpKind::Or => (
                        IrNode::leaf(IrOp::Const(Word::ONE), span),
                        self.lower_expr(right)?,
                    ),
                };
                Ok(IrNode::new(
                    IrOp::IfExpr,
                    vec![self.lower_expr(left)?, then_node, else_node],
                    span,
                ))
            }
            Expr::Call { func, args, .. } => self.lower_call(func, args, span),
            Expr::ExtCall {
                interface,
                address,
                method,
                args,
                tolerant,
                ..
            } => self.lower_ext_call(interface, address, method, args, *tolerant, span),
            Expr::Convert { target: _, value, .. } => {
                let from = self.ty_of(value)?;
                let to = self.ty_of(expr)?;
                let child = self.lower_expr(value)?;
                Ok(self.lower_conversion(child, &from, &to, span))
            }
            Expr::Tuple { items, .. } => {
                // A bare tuple only reaches lowering as a value list; its
                // words are pushed in order.
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    nodes.push(self.lower_expr(item)?);
                }
                Ok(IrNode::new(IrOp::Seq, nodes, span))
            }
            Expr::Int { .. } | Expr::Hex { .. } | Expr::Bool { .. } => {
                Err(self.internal_error("literal escaped folding"))
            }
        }
    }

    /// Lower the value list of a return or tuple-typed binding.
    pub(super) fn lower_tuple_items(&self, expr: &Expr) -> Result<Vec<IrNode>, CodegenError> {
        match expr {
            Expr::Tuple { items, .. } => {
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    nodes.push(self.lower_expr(item)?);
                }
                Ok(nodes)
            }
            _ => Ok(vec![self.lower_expr(expr)?]),
        }
    }

    // ==========================================================================
    // Places
    // ==========================================================================

    fn lower_place_read(&self, expr: &Expr, span: Span) -> Result<IrNode, CodegenError> {
        let words = self.ty_of(expr)?.word_count();
        let node = match self.lower_place(expr)? {
            PlaceAddr::Storage(slot) => IrNode::new(IrOp::StorLoad, vec![slot], span),
            PlaceAddr::Memory(offset) | PlaceAddr::Staging(offset) => {
                if words > 1 {
                    // A whole tuple local: push its words in order.
                    let loads = (0..words)
                        .map(|word| {
                            IrNode::leaf(
                                IrOp::MemLoad {
                                    offset: offset + word * 32,
                                },
                                span,
                            )
                        })
                        .collect();
                    IrNode::new(IrOp::Seq, loads, span)
                } else {
                    IrNode::leaf(IrOp::MemLoad { offset }, span)
                }
            }
            PlaceAddr::Data(word) => IrNode::leaf(IrOp::DataLoad { word }, span),
        };
        Ok(node)
    }

    /// Resolve an access path to an address, mirroring the analyzer's
    /// place walk over the same annotations.
    pub(super) fn lower_place(&self, expr: &Expr) -> Result<PlaceAddr, CodegenError> {
        let span = expr.span();
        match expr {
            Expr::Name { .. } => {
                let def = self.def_of(expr)?;
                match def.location {
                    Location::Memory { offset } => {
                        Ok(PlaceAddr::Memory(self.frame_offset(offset)))
                    }
                    Location::Data { offset } => {
                        if self.is_deploy() {
                            Ok(PlaceAddr::Staging(self.layout.istage + offset * 32))
                        } else {
                            Ok(PlaceAddr::Data(offset))
                        }
                    }
                    _ => Err(self.internal_error("name bound to no runtime location")),
                }
            }
            Expr::SelfField { .. } => {
                let def = self.def_of(expr)?;
                let Location::Storage { slot } = def.location else {
                    return Err(self.internal_error("self field outside storage"));
                };
                Ok(PlaceAddr::Storage(IrNode::leaf(
                    IrOp::Const(Word::from_u64(slot)),
                    span,
                )))
            }
            Expr::Attribute { base, attr, .. } => {
                let base_ty = self.ty_of(base)?;
                let (field_word, _) = base_ty
                    .field(attr)
                    .ok_or_else(|| self.internal_error(format!("no field '{attr}'")))?;
                match self.lower_place(base)? {
                    PlaceAddr::Storage(slot) => {
                        Ok(PlaceAddr::Storage(offset_slot(slot, field_word, span)))
                    }
                    PlaceAddr::Memory(offset) => Ok(PlaceAddr::Memory(offset + field_word * 32)),
                    _ => Err(self.internal_error("field access on a scalar location")),
                }
            }
            Expr::Subscript { base, index, .. } => {
                let base_ty = self.ty_of(base)?;
                match &base_ty {
                    Primitive::Array { elem, len } => {
                        let checked_index = IrNode::new(
                            IrOp::BoundsCheck { len: *len },
                            vec![self.lower_expr(index)?],
                            span,
                        );
                        let elem_words = elem.word_count();
                        let scaled = if elem_words == 1 {
                            checked_index
                        } else {
                            IrNode::new(
                                IrOp::Arith {
                                    op: ArithOp::Mul,
                                    checked: None,
                                },
                                vec![
                                    checked_index,
                                    IrNode::leaf(IrOp::Const(Word::from_u64(elem_words)), span),
                                ],
                                span,
                            )
                        };
                        match self.lower_place(base)? {
                            PlaceAddr::Storage(slot) => Ok(PlaceAddr::Storage(IrNode::new(
                                IrOp::Arith {
                                    op: ArithOp::Add,
                                    checked: None,
                                },
                                vec![slot, scaled],
                                span,
                            ))),
                            _ => Err(self.internal_error("indexed sequence is not in storage")),
                        }
                    }
                    Primitive::Mapping { .. } => {
                        let key = self.lower_expr(index)?;
                        match self.lower_place(base)? {
                            PlaceAddr::Storage(slot) => Ok(PlaceAddr::Storage(IrNode::new(
                                IrOp::MapSlot,
                                vec![slot, key],
                                span,
                            ))),
                            _ => Err(self.internal_error("mapping outside storage")),
                        }
                    }
                    Primitive::Tuple { .. } => {
                        let index_value = self
                            .analysis
                            .annotations
                            .value(index.id())
                            .and_then(|v| v.as_word().to_u64())
                            .ok_or_else(|| self.internal_error("tuple index not folded"))?;
                        match self.lower_place(base)? {
                            PlaceAddr::Memory(offset) => {
                                Ok(PlaceAddr::Memory(offset + index_value * 32))
                            }
                            _ => Err(self.internal_error("tuple outside the memory frame")),
                        }
                    }
                    other => Err(self.internal_error(format!("{other} is not subscriptable"))),
                }
            }
            _ => Err(self.internal_error("expression is not a place")),
        }
    }

    // ==========================================================================
    // Environment, calls, conversions
    // ==========================================================================

    fn lower_env_read(
        &self,
        base: &Expr,
        attr: &str,
        span: Span,
    ) -> Result<Option<IrNode>, CodegenError> {
        let Expr::Name { name, .. } = base else {
            return Ok(None);
        };
        let op = match (name.as_str(), attr) {
            ("msg", "sender") => Some(IrOp::EnvCaller),
            ("msg", "value") => Some(IrOp::EnvCallValue),
            ("block", "timestamp") => Some(IrOp::EnvTimestamp),
            ("block", "number") => Some(IrOp::EnvBlockNumber),
            _ => None,
        };
        Ok(op.map(|op| IrNode::leaf(op, span)))
    }

    fn lower_call(
        &self,
        func: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<IrNode, CodegenError> {
        match func {
            Expr::Name { name, .. } => match name.as_str() {
                // `len` always folds; `min`/`max` keep both operands once.
                "min" | "max" => {
                    let ty = self.ty_of(&args[0])?;
                    Ok(IrNode::new(
                        IrOp::MinMax {
                            is_max: name == "max",
                            signed: ty.is_signed(),
                        },
                        vec![self.lower_expr(&args[0])?, self.lower_expr(&args[1])?],
                        span,
                    ))
                }
                _ => Err(self.internal_error(format!("builtin '{name}' escaped folding"))),
            },
            Expr::SelfField { name, .. } => {
                let info = self
                    .registry
                    .function(name)
                    .ok_or_else(|| self.internal_error(format!("unknown callee '{name}'")))?;
                let callee_base = self.layout.frame_base(name);
                let mut arg_offsets = Vec::with_capacity(info.sig.params.len());
                let mut word = 0;
                for (_, ty) in &info.sig.params {
                    arg_offsets.push(callee_base + word * 32);
                    word += ty.word_count();
                }
                let mut children = Vec::with_capacity(args.len());
                for arg in args {
                    children.push(self.lower_expr(arg)?);
                }
                Ok(IrNode::new(
                    IrOp::CallInternal {
                        name: name.clone(),
                        arg_offsets,
                        returns: info.sig.ret.is_some(),
                    },
                    children,
                    span,
                ))
            }
            _ => Err(self.internal_error("unlowerable call target")),
        }
    }

    fn lower_ext_call(
        &self,
        interface: &str,
        address: &Expr,
        method: &str,
        args: &[Expr],
        tolerant: bool,
        span: Span,
    ) -> Result<IrNode, CodegenError> {
        let sig = self
            .registry
            .interface_method(interface, method)
            .ok_or_else(|| {
                self.internal_error(format!("unknown interface method {interface}.{method}"))
            })?;
        let selector = sig.selector();
        let static_call = !sig.is_state_changing();
        let returns = sig.ret.is_some();
        let mut children = vec![self.lower_expr(address)?];
        for arg in args {
            children.push(self.lower_expr(arg)?);
        }
        Ok(IrNode::new(
            IrOp::CallExternal {
                selector,
                buffer: self.layout.aux_buffer,
                static_call,
                tolerant,
                returns,
            },
            children,
            span,
        ))
    }

    fn lower_conversion(
        &self,
        child: IrNode,
        from: &Primitive,
        to: &Primitive,
        span: Span,
    ) -> IrNode {
        match (from, to) {
            (a, b) if a.is_integer() && b.is_integer() => {
                let from_kind = int_kind(a).unwrap_or(IntKind {
                    bits: 256,
                    signed: false,
                });
                let to_kind = int_kind(b).unwrap_or(IntKind {
                    bits: 256,
                    signed: false,
                });
                IrNode::new(
                    IrOp::CastInt {
                        from: from_kind,
                        to: to_kind,
                    },
                    vec![child],
                    span,
                )
            }
            (Primitive::Uint { bits: 256 }, Primitive::Address) => IrNode::new(
                IrOp::CastInt {
                    from: IntKind {
                        bits: 256,
                        signed: false,
                    },
                    to: IntKind {
                        bits: 160,
                        signed: false,
                    },
                },
                vec![child],
                span,
            ),
            (Primitive::Bytes { len }, Primitive::Uint { .. }) => {
                IrNode::new(IrOp::BytesToUint { len: *len }, vec![child], span)
            }
            (Primitive::Uint { .. }, Primitive::Bytes { len }) => {
                IrNode::new(IrOp::UintToBytes { len: *len }, vec![child], span)
            }
            // address -> uint256 and bool -> integer are already in
            // canonical word form.
            _ => child,
        }
    }

    // ==========================================================================
    // Shared helpers
    // ==========================================================================

    pub(super) fn arith_op(
        &self,
        op: BinOp,
        ty: &Primitive,
    ) -> Result<IrOp, CodegenError> {
        let base = match op {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            BinOp::Div => ArithOp::Div,
            BinOp::Mod => ArithOp::Mod,
            BinOp::BitAnd => ArithOp::And,
            BinOp::BitOr => ArithOp::Or,
            BinOp::BitXor => ArithOp::Xor,
        };
        let checked = if op.is_arithmetic() {
            Some(
                int_kind(ty)
                    .ok_or_else(|| self.internal_error("arithmetic on a non-integer"))?,
            )
        } else {
            None
        };
        Ok(IrOp::Arith { op: base, checked })
    }

    pub(super) fn ty_of(&self, expr: &Expr) -> Result<Primitive, CodegenError> {
        self.analysis
            .annotations
            .def(expr.id())
            .map(|d| d.ty.clone())
            .ok_or_else(|| self.internal_error("expression was never annotated"))
    }

    fn def_of(&self, expr: &Expr) -> Result<&Definition, CodegenError> {
        self.analysis
            .annotations
            .def(expr.id())
            .ok_or_else(|| self.internal_error("expression was never annotated"))
    }
}

/// Slot arithmetic for struct fields: fold when the base is constant.
fn offset_slot(slot: IrNode, words: u64, span: Span) -> IrNode {
    if words == 0 {
        return slot;
    }
    if let IrOp::Const(base) = slot.op {
        if let Some(sum) = base.checked_add(Word::from_u64(words)) {
            return IrNode::leaf(IrOp::Const(sum), span);
        }
    }
    IrNode::new(
        IrOp::Arith {
            op: ArithOp::Add,
            checked: None,
        },
        vec![slot, IrNode::leaf(IrOp::Const(Word::from_u64(words)), span)],
        span,
    )
}

fn int_kind(ty: &Primitive) -> Option<IntKind> {
    ty.int_bits().map(|bits| IntKind {
        bits,
        signed: ty.is_signed(),
    })
}

/// The AND mask a bitwise complement needs to stay in its width.
fn bitwise_mask(ty: &Primitive) -> Word {
    match ty {
        Primitive::Uint { bits } => Word::unsigned_max(*bits),
        Primitive::Bytes { len } => {
            // bytesN values are left-aligned: mask the high N bytes.
            let mut bytes = [0u8; 32];
            for b in bytes.iter_mut().take(*len as usize) {
                *b = 0xff;
            }
            Word::from_be_bytes(bytes)
        }
        Primitive::Flag { members, .. } => {
            let mut bytes = [0u8; 32];
            for i in 0..members.len() {
                bytes[31 - i / 8] |= 1 << (i % 8);
            }
            Word::from_be_bytes(bytes)
        }
        _ => Word::MAX,
    }
}
