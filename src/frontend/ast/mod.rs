use std::fmt;

use super::SourceFile;
use crate::{frontend::lexer::Span, index::simple_index};

simple_index! {
    /// Unique id of a statement within one compilation
    pub struct StmtId;
}

simple_index! {
    pub struct ExprId;
}

simple_index! {
    pub struct TyId;
}

simple_index! {
    pub struct BlockId;
}

#[derive(Debug)]
pub struct Module<'source> {
    pub source_file: &'source SourceFile,
    /// Top level statements in the module (nested statements are in the tree
    /// and not in this list)
    pub items: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub span: Span,
    pub name: String,
}

#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub line: usize,
    pub statements: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Stmt {
    pub id: StmtId,
    pub line: usize,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn as_fn(&self) -> Option<&FnDecl> {
        match &self.kind {
            StmtKind::Fn(decl) => Some(decl),
            _ => None,
        }
    }

    pub fn as_let(&self) -> Option<&LetStmt> {
        match &self.kind {
            StmtKind::Let(local) => Some(local),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum StmtKind {
    /// Placeholder left behind by parser error recovery
    Error,
    Fn(Box<FnDecl>),
    Let(Box<LetStmt>),
    Loop(Block),
    While {
        condition: Expr,
        body: Block,
    },
    If(Box<IfStmt>),
    Return(Option<Expr>),
    Break,
    Assign {
        subject: Expr,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Debug)]
pub struct FnDecl {
    pub ident: Identifier,
    pub attrs: Vec<Attr>,
    pub params: Vec<Param>,
    pub return_ty: Ty,
    /// `None` for declarations of externally defined functions
    pub body: Option<Block>,
}

#[derive(Debug)]
pub struct Param {
    pub ident: Identifier,
    pub line: usize,
    pub ty: Ty,
}

#[derive(Debug)]
pub struct Attr {
    pub ident: Identifier,
    pub line: usize,
    pub args: Vec<Expr>,
}

#[derive(Debug)]
pub struct LetStmt {
    pub ident: Identifier,
    pub ty: Option<Ty>,
    pub value: Option<Expr>,
}

#[derive(Debug)]
pub struct IfStmt {
    pub condition: Expr,
    pub truthy: Block,
    /// `else if` chains are stored as a block holding a single `if`
    pub falsy: Option<Block>,
}

#[derive(Debug)]
pub struct Ty {
    pub id: TyId,
    pub line: usize,
    pub kind: TyKind,
}

#[derive(Debug)]
pub enum TyKind {
    Error,
    /// Implicit return type of functions without `-> type`
    Void,
    Identifier(Identifier),
    Pointer(Box<Ty>),
}

#[derive(Debug)]
pub struct Expr {
    pub id: ExprId,
    pub line: usize,
    pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    Error,
    Identifier(Identifier),
    Int(i64),
    Str(String),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        operator: BinaryOperator,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Lt | Self::Gt | Self::Le | Self::Ge | Self::Eq | Self::Ne
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Ge => "ge",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
        })
    }
}
