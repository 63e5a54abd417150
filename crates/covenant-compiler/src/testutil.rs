//! AST construction helpers for tests.
//!
//! The front-end is not part of this workspace, so tests assemble trees
//! directly. The builder hands out dense node ids the way the front-end
//! would; methods take `&self` so construction nests naturally.

use std::cell::Cell;

use covenant_core::ast::{
    BinOp, Decl, EventDecl, EventFieldDecl, Expr, FieldDecl, FlagDecl, ForIter, FunctionDecl,
    ImmutableDecl, InterfaceDecl, InterfaceMethodDecl, Module, NodeId, Param, Stmt, StorageDecl,
    StructDecl, TypeExpr,
};
use covenant_core::{Mutability, Span, Visibility, Word};

/// Test-only tree builder with its own id allocator.
pub(crate) struct Builder {
    next_id: Cell<u32>,
}

impl Builder {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(0),
        }
    }

    fn next(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        NodeId(id)
    }

    pub(crate) fn module(&self, decls: Vec<Decl>) -> Module {
        Module {
            name: "test".to_string(),
            decls,
        }
    }

    // ==========================================================================
    // Declarations
    // ==========================================================================

    pub(crate) fn named_ty(&self, name: &str) -> TypeExpr {
        TypeExpr::Named {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
        }
    }

    pub(crate) fn array_ty(&self, elem: &str, len: u64) -> TypeExpr {
        TypeExpr::Array {
            id: self.next(),
            span: Span::default(),
            elem: Box::new(self.named_ty(elem)),
            len: Box::new(self.int(len)),
        }
    }

    pub(crate) fn map_ty(&self, key: &str, value: &str) -> TypeExpr {
        TypeExpr::Map {
            id: self.next(),
            span: Span::default(),
            key: Box::new(self.named_ty(key)),
            value: Box::new(self.named_ty(value)),
        }
    }

    pub(crate) fn storage(&self, name: &str, ty: &str) -> Decl {
        self.storage_typed(name, self.named_ty(ty), false)
    }

    pub(crate) fn storage_array(&self, name: &str, elem: &str, len: u64) -> Decl {
        self.storage_typed(name, self.array_ty(elem, len), false)
    }

    pub(crate) fn storage_map(&self, name: &str, key: &str, value: &str) -> Decl {
        self.storage_typed(name, self.map_ty(key, value), false)
    }

    pub(crate) fn storage_typed(&self, name: &str, ty: TypeExpr, public: bool) -> Decl {
        Decl::Storage(StorageDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            ty,
            public,
        })
    }

    pub(crate) fn immutable(&self, name: &str, ty: &str) -> Decl {
        Decl::Immutable(ImmutableDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            ty: self.named_ty(ty),
        })
    }

    pub(crate) fn struct_decl(&self, name: &str, fields: &[(&str, &str)]) -> Decl {
        Decl::Struct(StructDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(fname, fty)| FieldDecl {
                    span: Span::default(),
                    name: fname.to_string(),
                    ty: self.named_ty(fty),
                })
                .collect(),
        })
    }

    pub(crate) fn event_decl(&self, name: &str, fields: &[(&str, &str, bool)]) -> Decl {
        Decl::Event(EventDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(fname, fty, indexed)| EventFieldDecl {
                    span: Span::default(),
                    name: fname.to_string(),
                    ty: self.named_ty(fty),
                    indexed: *indexed,
                })
                .collect(),
        })
    }

    /// A one-method interface declaration.
    pub(crate) fn interface_decl(
        &self,
        name: &str,
        method: &str,
        params: &[&str],
        ret: Option<&str>,
        mutability: Mutability,
    ) -> Decl {
        Decl::Interface(InterfaceDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            methods: vec![InterfaceMethodDecl {
                span: Span::default(),
                name: method.to_string(),
                params: params.iter().map(|p| self.named_ty(p)).collect(),
                ret: ret.map(|r| self.named_ty(r)),
                mutability,
            }],
        })
    }

    pub(crate) fn flag(&self, name: &str, members: &[&str]) -> Decl {
        Decl::Flag(FlagDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            members: members
                .iter()
                .map(|m| (m.to_string(), Span::default()))
                .collect(),
        })
    }

    pub(crate) fn function(
        &self,
        name: &str,
        visibility: Visibility,
        mutability: Option<Mutability>,
        params: Vec<(&str, &str)>,
        ret: Option<&str>,
        body: Vec<Stmt>,
    ) -> Decl {
        self.function_full(name, visibility, mutability, false, params, ret, body)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn function_full(
        &self,
        name: &str,
        visibility: Visibility,
        mutability: Option<Mutability>,
        nonreentrant: bool,
        params: Vec<(&str, &str)>,
        ret: Option<&str>,
        body: Vec<Stmt>,
    ) -> Decl {
        Decl::Function(FunctionDecl {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            visibility,
            mutability,
            nonreentrant,
            params: params
                .into_iter()
                .map(|(pname, pty)| Param {
                    id: self.next(),
                    span: Span::default(),
                    name: pname.to_string(),
                    ty: self.named_ty(pty),
                })
                .collect(),
            ret: ret.map(|r| self.named_ty(r)),
            body,
        })
    }

    // ==========================================================================
    // Statements
    // ==========================================================================

    pub(crate) fn let_stmt(&self, name: &str, ty: Option<&str>, value: Expr) -> Stmt {
        Stmt::Let {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
            ty: ty.map(|t| self.named_ty(t)),
            value,
        }
    }

    pub(crate) fn assign(&self, target: Expr, value: Expr) -> Stmt {
        Stmt::Assign {
            id: self.next(),
            span: Span::default(),
            target,
            value,
        }
    }

    pub(crate) fn aug_assign(&self, op: BinOp, target: Expr, value: Expr) -> Stmt {
        Stmt::AugAssign {
            id: self.next(),
            span: Span::default(),
            op,
            target,
            value,
        }
    }

    pub(crate) fn if_stmt(&self, cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
        Stmt::If {
            id: self.next(),
            span: Span::default(),
            cond,
            then_body,
            else_body,
        }
    }

    pub(crate) fn for_range(&self, var: &str, stop: u64, body: Vec<Stmt>) -> Stmt {
        self.for_range_expr(var, self.int(stop), None, body)
    }

    pub(crate) fn for_range_expr(
        &self,
        var: &str,
        stop: Expr,
        bound: Option<Expr>,
        body: Vec<Stmt>,
    ) -> Stmt {
        Stmt::For {
            id: self.next(),
            span: Span::default(),
            var: var.to_string(),
            var_span: Span::default(),
            iter: ForIter::Range {
                start: None,
                stop,
                bound,
            },
            body,
        }
    }

    pub(crate) fn for_seq(&self, var: &str, seq: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::For {
            id: self.next(),
            span: Span::default(),
            var: var.to_string(),
            var_span: Span::default(),
            iter: ForIter::Sequence(seq),
            body,
        }
    }

    pub(crate) fn ret(&self, value: Option<Expr>) -> Stmt {
        Stmt::Return {
            id: self.next(),
            span: Span::default(),
            value,
        }
    }

    pub(crate) fn assert_stmt(&self, cond: Expr, dev: Option<&str>) -> Stmt {
        Stmt::Assert {
            id: self.next(),
            span: Span::default(),
            cond,
            msg: None,
            dev: dev.map(str::to_string),
        }
    }

    pub(crate) fn log_stmt(&self, event: &str, args: Vec<Expr>) -> Stmt {
        Stmt::Log {
            id: self.next(),
            span: Span::default(),
            event: event.to_string(),
            args,
        }
    }

    pub(crate) fn pass(&self) -> Stmt {
        Stmt::Pass {
            id: self.next(),
            span: Span::default(),
        }
    }

    pub(crate) fn expr_stmt(&self, expr: Expr) -> Stmt {
        Stmt::Expr {
            id: self.next(),
            span: Span::default(),
            expr,
        }
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    pub(crate) fn int(&self, value: u64) -> Expr {
        Expr::Int {
            id: self.next(),
            span: Span::default(),
            negative: false,
            magnitude: Word::from_u64(value),
        }
    }

    pub(crate) fn neg_int(&self, magnitude: u64) -> Expr {
        Expr::Int {
            id: self.next(),
            span: Span::default(),
            negative: true,
            magnitude: Word::from_u64(magnitude),
        }
    }

    pub(crate) fn boolean(&self, value: bool) -> Expr {
        Expr::Bool {
            id: self.next(),
            span: Span::default(),
            value,
        }
    }

    pub(crate) fn hex(&self, bytes: Vec<u8>) -> Expr {
        Expr::Hex {
            id: self.next(),
            span: Span::default(),
            bytes,
        }
    }

    pub(crate) fn name(&self, name: &str) -> Expr {
        Expr::Name {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
        }
    }

    pub(crate) fn self_field(&self, name: &str) -> Expr {
        Expr::SelfField {
            id: self.next(),
            span: Span::default(),
            name: name.to_string(),
        }
    }

    pub(crate) fn attribute(&self, base: Expr, attr: &str) -> Expr {
        Expr::Attribute {
            id: self.next(),
            span: Span::default(),
            base: Box::new(base),
            attr: attr.to_string(),
        }
    }

    pub(crate) fn subscript(&self, base: Expr, index: Expr) -> Expr {
        Expr::Subscript {
            id: self.next(),
            span: Span::default(),
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    pub(crate) fn binary(&self, op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            id: self.next(),
            span: Span::default(),
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub(crate) fn compare(&self, op: covenant_core::ast::CmpOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            id: self.next(),
            span: Span::default(),
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub(crate) fn internal_call(&self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            id: self.next(),
            span: Span::default(),
            func: Box::new(self.self_field(name)),
            args,
        }
    }

    pub(crate) fn builtin_call(&self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            id: self.next(),
            span: Span::default(),
            func: Box::new(self.name(name)),
            args,
        }
    }

    pub(crate) fn ext_call(
        &self,
        interface: &str,
        address: Expr,
        method: &str,
        args: Vec<Expr>,
        tolerant: bool,
    ) -> Expr {
        Expr::ExtCall {
            id: self.next(),
            span: Span::default(),
            interface: interface.to_string(),
            address: Box::new(address),
            method: method.to_string(),
            args,
            tolerant,
        }
    }

    pub(crate) fn convert(&self, value: Expr, target: &str) -> Expr {
        Expr::Convert {
            id: self.next(),
            span: Span::default(),
            target: self.named_ty(target),
            value: Box::new(value),
        }
    }
}
