#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    /// `var`/`let`/`const`; `hoisted` is true for `var`.
    Decl {
        hoisted: bool,
        decls: Vec<(String, Option<Expr>)>,
    },
    Block(Vec<Stmt>),
    If {
        test: Expr,
        cons: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `for (x in obj)` (keys) or `for (x of obj)` (values). `declared`
    /// when the binding is introduced by `var`/`let`/`const`.
    ForEach {
        binding: String,
        declared: bool,
        values: bool,
        object: Expr,
        body: Box<Stmt>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<Case>,
    },
    Try {
        body: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Throw(Expr),
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Array(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// `++x`, `x--`, ...; `delta` is +1 or -1.
    Update {
        target: String,
        delta: f64,
        prefix: bool,
    },
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    /// `x = v` (`op: None`) or a compound assignment such as `x += v`.
    Assign {
        target: String,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    Cond {
        test: Box<Expr>,
        cons: Box<Expr>,
        alt: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `obj.name`; the property name is not a variable reference.
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Seq(Vec<Expr>),
}

impl Expr {
    /// Levels in the tallest path from this node to a leaf.
    pub fn height(&self) -> usize {
        fn tallest<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> usize {
            exprs.into_iter().map(Expr::height).max().unwrap_or(0)
        }
        1 + match self {
            Self::Num(_)
            | Self::Str(_)
            | Self::Bool(_)
            | Self::Null
            | Self::Ident(_)
            | Self::Update { .. } => 0,
            Self::Array(items) | Self::Seq(items) => tallest(items),
            Self::Unary(_, e) | Self::Assign { value: e, .. } | Self::Member { object: e, .. } => {
                e.height()
            }
            Self::Binary(_, l, r)
            | Self::Logical(_, l, r)
            | Self::Index {
                object: l,
                index: r,
            } => l.height().max(r.height()),
            Self::Cond { test, cons, alt } => tallest([&**test, &**cons, &**alt]),
            Self::Call { callee, args } => callee.height().max(tallest(args)),
        }
    }
}
