use crate::value::Value;

/// Expression tree. Evaluation lives in the evaluator crate; this is only the shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Template(Vec<TemplatePart>),
    Variable(String),
    Traversal {
        base: Box<Expr>,
        ops: Vec<TraversalOp>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        expand_final: bool,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    For(Box<ForExpr>),
    Array(Vec<Expr>),
    Object(Vec<(ObjectKey, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Expr),
    /// `%{ if }` / `%{ for }` directives; evaluated as unknown.
    Directive,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TraversalOp {
    GetAttr(String),
    Index(Expr),
    /// `.*`
    AttrSplat,
    /// `[*]`
    FullSplat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectKey {
    Ident(String),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForExpr {
    pub key_var: Option<String>,
    pub value_var: String,
    pub collection: Expr,
    pub key: Option<Expr>,
    pub value: Expr,
    pub cond: Option<Expr>,
    pub grouping: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
}

impl Expr {
    /// Statically known string, when the expression is a plain literal or a literal-only template.
    pub fn as_static_str(&self) -> Option<String> {
        match self {
            Expr::Literal(Value::String(s)) => Some(s.clone()),
            Expr::Template(parts) => parts.iter().try_fold(String::new(), |mut acc, part| {
                match part {
                    TemplatePart::Literal(s) => acc.push_str(s),
                    _ => return None,
                }
                Some(acc)
            }),
            _ => None,
        }
    }

    /// Bare identifier, e.g. the `iterator = item` argument of a dynamic block.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expr::Variable(name) => Some(name),
            _ => None,
        }
    }
}
