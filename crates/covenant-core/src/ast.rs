//! The syntax tree handed over by the front-end.
//!
//! A closed set of node kinds over declarations, statements, expressions,
//! and type annotations. Every node carries a [`NodeId`] assigned by the
//! front-end and a [`Span`]; children are owned. The tree is immutable
//! once built; analysis results live in side tables keyed by `NodeId`,
//! never in the nodes themselves.

use crate::definition::{Mutability, Visibility};
use crate::span::Span;
use crate::word::Word;

/// Identity of one tree node, unique within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Allocator the front-end (and tests) use to hand out dense node ids.
#[derive(Debug, Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

// ============================================================================
// Module & declarations
// ============================================================================

/// One compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub decls: Vec<Decl>,
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Storage(StorageDecl),
    Constant(ConstantDecl),
    Immutable(ImmutableDecl),
    Struct(StructDecl),
    Flag(FlagDecl),
    Event(EventDecl),
    Interface(InterfaceDecl),
    Function(FunctionDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Storage(d) => &d.name,
            Decl::Constant(d) => &d.name,
            Decl::Immutable(d) => &d.name,
            Decl::Struct(d) => &d.name,
            Decl::Flag(d) => &d.name,
            Decl::Event(d) => &d.name,
            Decl::Interface(d) => &d.name,
            Decl::Function(d) => &d.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Storage(d) => d.span,
            Decl::Constant(d) => d.span,
            Decl::Immutable(d) => d.span,
            Decl::Struct(d) => d.span,
            Decl::Flag(d) => d.span,
            Decl::Event(d) => d.span,
            Decl::Interface(d) => d.span,
            Decl::Function(d) => d.span,
        }
    }
}

/// `var name: T`: a persistent storage variable.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
    /// `pub` storage variables get a synthesized external getter.
    pub public: bool,
}

/// `const NAME: T = expr`: folded at analysis time.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
    pub value: Expr,
}

/// `immutable NAME: T`: written once during deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
}

/// `flag Name { A, B, C }`: members get power-of-two values.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub members: Vec<(String, Span)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub fields: Vec<EventFieldDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldDecl {
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub methods: Vec<InterfaceMethodDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceMethodDecl {
    pub span: Span,
    pub name: String,
    pub params: Vec<TypeExpr>,
    pub ret: Option<TypeExpr>,
    pub mutability: Mutability,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub visibility: Visibility,
    /// Declared mutability; absent means "infer from the body".
    pub mutability: Option<Mutability>,
    pub nonreentrant: bool,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `let name[: T] = value`
    Let {
        id: NodeId,
        span: Span,
        name: String,
        ty: Option<TypeExpr>,
        value: Expr,
    },
    /// `target = value`
    Assign {
        id: NodeId,
        span: Span,
        target: Expr,
        value: Expr,
    },
    /// `target op= value`
    AugAssign {
        id: NodeId,
        span: Span,
        op: BinOp,
        target: Expr,
        value: Expr,
    },
    If {
        id: NodeId,
        span: Span,
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    For {
        id: NodeId,
        span: Span,
        var: String,
        var_span: Span,
        iter: ForIter,
        body: Vec<Stmt>,
    },
    Return {
        id: NodeId,
        span: Span,
        value: Option<Expr>,
    },
    /// `assert cond[, "reason"]`; `dev` carries an inline `# dev:` note.
    Assert {
        id: NodeId,
        span: Span,
        cond: Expr,
        msg: Option<String>,
        dev: Option<String>,
    },
    /// Unconditional abort.
    Raise {
        id: NodeId,
        span: Span,
        msg: Option<String>,
        dev: Option<String>,
    },
    /// `log Event(args...)`
    Log {
        id: NodeId,
        span: Span,
        event: String,
        args: Vec<Expr>,
    },
    Break {
        id: NodeId,
        span: Span,
    },
    Continue {
        id: NodeId,
        span: Span,
    },
    Pass {
        id: NodeId,
        span: Span,
    },
    Expr {
        id: NodeId,
        span: Span,
        expr: Expr,
    },
}

impl Stmt {
    pub fn id(&self) -> NodeId {
        match self {
            Stmt::Let { id, .. }
            | Stmt::Assign { id, .. }
            | Stmt::AugAssign { id, .. }
            | Stmt::If { id, .. }
            | Stmt::For { id, .. }
            | Stmt::Return { id, .. }
            | Stmt::Assert { id, .. }
            | Stmt::Raise { id, .. }
            | Stmt::Log { id, .. }
            | Stmt::Break { id, .. }
            | Stmt::Continue { id, .. }
            | Stmt::Pass { id, .. }
            | Stmt::Expr { id, .. } => *id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Assert { span, .. }
            | Stmt::Raise { span, .. }
            | Stmt::Log { span, .. }
            | Stmt::Break { span, .. }
            | Stmt::Continue { span, .. }
            | Stmt::Pass { span, .. }
            | Stmt::Expr { span, .. } => *span,
        }
    }
}

/// What a `for` loop iterates.
#[derive(Debug, Clone, PartialEq)]
pub enum ForIter {
    /// `range(stop)`, `range(start, stop)`, or
    /// `range(start, stop, bound=N)` when `stop` is a runtime value.
    Range {
        start: Option<Expr>,
        stop: Expr,
        bound: Option<Expr>,
    },
    /// A fixed-length sequence expression.
    Sequence(Expr),
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal. The front-end parses the digits into a word and
    /// keeps the sign separate; candidate types are decided by analysis.
    Int {
        id: NodeId,
        span: Span,
        negative: bool,
        magnitude: Word,
    },
    Bool {
        id: NodeId,
        span: Span,
        value: bool,
    },
    /// `0x...` byte string literal.
    Hex {
        id: NodeId,
        span: Span,
        bytes: Vec<u8>,
    },
    Name {
        id: NodeId,
        span: Span,
        name: String,
    },
    /// `self.name`: storage variable, immutable, or internal function.
    SelfField {
        id: NodeId,
        span: Span,
        name: String,
    },
    /// `base.attr`: struct field, flag member, or environment read.
    Attribute {
        id: NodeId,
        span: Span,
        base: Box<Expr>,
        attr: String,
    },
    Subscript {
        id: NodeId,
        span: Span,
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        id: NodeId,
        span: Span,
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        id: NodeId,
        span: Span,
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Compare {
        id: NodeId,
        span: Span,
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        id: NodeId,
        span: Span,
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `f(args...)`: builtin call, or internal call when `func` is a
    /// `SelfField`.
    Call {
        id: NodeId,
        span: Span,
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `Iface(addr).method(args...)`; `tolerant` captures success instead
    /// of aborting on callee failure.
    ExtCall {
        id: NodeId,
        span: Span,
        interface: String,
        address: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        tolerant: bool,
    },
    /// `convert(value, T)`: the only numeric conversion in the language.
    Convert {
        id: NodeId,
        span: Span,
        target: TypeExpr,
        value: Box<Expr>,
    },
    Tuple {
        id: NodeId,
        span: Span,
        items: Vec<Expr>,
    },
}

impl Expr {
    pub fn id(&self) -> NodeId {
        match self {
            Expr::Int { id, .. }
            | Expr::Bool { id, .. }
            | Expr::Hex { id, .. }
            | Expr::Name { id, .. }
            | Expr::SelfField { id, .. }
            | Expr::Attribute { id, .. }
            | Expr::Subscript { id, .. }
            | Expr::Binary { id, .. }
            | Expr::Unary { id, .. }
            | Expr::Compare { id, .. }
            | Expr::BoolOp { id, .. }
            | Expr::Call { id, .. }
            | Expr::ExtCall { id, .. }
            | Expr::Convert { id, .. }
            | Expr::Tuple { id, .. } => *id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Hex { span, .. }
            | Expr::Name { span, .. }
            | Expr::SelfField { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Compare { span, .. }
            | Expr::BoolOp { span, .. }
            | Expr::Call { span, .. }
            | Expr::ExtCall { span, .. }
            | Expr::Convert { span, .. }
            | Expr::Tuple { span, .. } => *span,
        }
    }

    /// Whether this expression is a literal with open candidate types.
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Int { .. } | Expr::Hex { .. })
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    /// Whether this operator needs the `NUMERIC` capability (as opposed
    /// to the bitwise group).
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation (signed integers only).
    Neg,
    /// Boolean negation.
    Not,
    /// Bitwise complement.
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    /// Whether the operands need ordering, not just equality.
    pub fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOpKind {
    And,
    Or,
}

// ============================================================================
// Type annotations
// ============================================================================

/// A syntactic type expression, resolved to a `Primitive` by the type
/// system.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `uint256`, `bool`, `MyStruct`, ...
    Named { id: NodeId, span: Span, name: String },
    /// `T[N]`: `len` must fold to a positive constant.
    Array {
        id: NodeId,
        span: Span,
        elem: Box<TypeExpr>,
        len: Box<Expr>,
    },
    /// `map[K]V`
    Map {
        id: NodeId,
        span: Span,
        key: Box<TypeExpr>,
        value: Box<TypeExpr>,
    },
    Tuple {
        id: NodeId,
        span: Span,
        items: Vec<TypeExpr>,
    },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Named { span, .. }
            | TypeExpr::Array { span, .. }
            | TypeExpr::Map { span, .. }
            | TypeExpr::Tuple { span, .. } => *span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_dense() {
        let mut ids = NodeIds::new();
        assert_eq!(ids.next(), NodeId(0));
        assert_eq!(ids.next(), NodeId(1));
        assert_eq!(ids.next(), NodeId(2));
    }

    #[test]
    fn expr_accessors() {
        let mut ids = NodeIds::new();
        let span = Span::new(4, 2, 1, 5);
        let e = Expr::Int {
            id: ids.next(),
            span,
            negative: false,
            magnitude: Word::from_u64(5),
        };
        assert_eq!(e.id(), NodeId(0));
        assert_eq!(e.span(), span);
        assert!(e.is_literal());

        let n = Expr::Name {
            id: ids.next(),
            span,
            name: "x".to_string(),
        };
        assert!(!n.is_literal());
    }

    #[test]
    fn operator_spellings() {
        assert_eq!(BinOp::Add.as_str(), "+");
        assert!(BinOp::Add.is_arithmetic());
        assert!(!BinOp::BitAnd.is_arithmetic());
        assert!(CmpOp::Lt.is_ordering());
        assert!(!CmpOp::Eq.is_ordering());
    }
}
