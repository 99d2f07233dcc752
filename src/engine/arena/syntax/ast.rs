// AST definitions for the arena engine's script dialect

use std::sync::Arc;

/// Source location information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    /// Character offset from the start of the source
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

/// Short-circuiting operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    Typeof,
}

/// Binding declaration keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

/// A function literal, declaration or arrow function.
///
/// `source` is the exact text the function was parsed from. Closures store it
/// in engine memory and re-parse it on demand, so a function value survives a
/// memory snapshot without any host-side state.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body
    Expr(Box<Expr>),
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident {
        name: String,
        location: SourceLocation,
    },
    This,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Arc<FunctionDef>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        location: SourceLocation,
    },
    CompoundAssign {
        op: BinOp,
        target: Box<Expr>,
        value: Box<Expr>,
        location: SourceLocation,
    },
    Update {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
        location: SourceLocation,
    },
    Member {
        object: Box<Expr>,
        property: String,
        location: SourceLocation,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        location: SourceLocation,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        location: SourceLocation,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
        location: SourceLocation,
    },
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Decl {
        kind: DeclKind,
        declarations: Vec<(String, Option<Expr>)>,
        location: SourceLocation,
    },
    Function(Arc<FunctionDef>),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

impl Stmt {
    /// Whether executing this statement directly creates a lexical binding.
    pub fn declares_lexical(&self) -> bool {
        matches!(
            self,
            Stmt::Decl {
                kind: DeclKind::Let | DeclKind::Const,
                ..
            } | Stmt::Function(_)
        )
    }
}

/// Root of a parsed script
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}
