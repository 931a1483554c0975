//! Abstract syntax tree for formula expressions.

use std::collections::BTreeSet;
use std::fmt;

/// Words the parser treats as operators or literals.
pub const KEYWORDS: &[&str] = &["and", "or", "not", "true", "false"];

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    And,
    Or,
}

impl BinaryOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Neq => 3,
            BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div => 6,
            BinaryOp::Pow => 8,
        }
    }

    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOp::Pow)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Gte => ">=",
            BinaryOp::Lte => "<=",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not ",
        }
    }
}

/// Expression nodes in the AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// Boolean literal
    Boolean(bool),
    /// Parameter or calculation reference (e.g., `it_load_kw`, `[IT Load]`)
    Variable(String),
    /// Binary operation (e.g., `a + b`)
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `-x`, `not x`)
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Function call (e.g., `min(a, b)`)
    FunctionCall { name: String, args: Vec<Expr> },
    /// Ternary conditional (e.g., `cond ? a : b`)
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

const UNARY_PRECEDENCE: u8 = 7;
const ATOM_PRECEDENCE: u8 = 9;

impl Expr {
    pub fn number(n: f64) -> Self {
        Expr::Number(n)
    }

    pub fn boolean(b: bool) -> Self {
        Expr::Boolean(b)
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn function_call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn ternary(condition: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Expr::Ternary {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Ternary { .. } => 0,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => UNARY_PRECEDENCE,
            _ => ATOM_PRECEDENCE,
        }
    }

    /// Names of every parameter or calculation this expression reads.
    ///
    /// Function names are not references.
    pub fn references(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) | Expr::Boolean(_) => {}
            Expr::Variable(name) => {
                names.insert(name.clone());
            }
            Expr::Binary { left, right, .. } => {
                left.collect_references(names);
                right.collect_references(names);
            }
            Expr::Unary { expr, .. } => expr.collect_references(names),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_references(names);
                }
            }
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                condition.collect_references(names);
                then_expr.collect_references(names);
                else_expr.collect_references(names);
            }
        }
    }

    /// Rewrites every reference to `from` so it reads `to`.
    ///
    /// Returns the number of references replaced.
    pub fn rename_variable(&mut self, from: &str, to: &str) -> usize {
        match self {
            Expr::Number(_) | Expr::Boolean(_) => 0,
            Expr::Variable(name) => {
                if name == from {
                    *name = to.to_string();
                    1
                } else {
                    0
                }
            }
            Expr::Binary { left, right, .. } => {
                left.rename_variable(from, to) + right.rename_variable(from, to)
            }
            Expr::Unary { expr, .. } => expr.rename_variable(from, to),
            Expr::FunctionCall { args, .. } => args
                .iter_mut()
                .map(|arg| arg.rename_variable(from, to))
                .sum(),
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                condition.rename_variable(from, to)
                    + then_expr.rename_variable(from, to)
                    + else_expr.rename_variable(from, to)
            }
        }
    }
}

/// Returns true when `name` can be written in a formula without brackets.
pub fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false);
    starts_ok
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(name))
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_bare_identifier(name) {
        write!(f, "{name}")
    } else {
        write!(f, "[{name}]")
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parenthesize: bool) -> fmt::Result {
    if parenthesize {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}

/// Prints the expression back as formula text that parses to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Boolean(b) => write!(f, "{b}"),
            Expr::Variable(name) => write_name(f, name),
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                let left_parens = left.precedence() < p
                    || (left.precedence() == p && op.is_right_associative());
                let right_parens = right.precedence() < p
                    || (right.precedence() == p && !op.is_right_associative());
                write_operand(f, left, left_parens)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, right_parens)
            }
            Expr::Unary { op, expr } => {
                write!(f, "{}", op.symbol())?;
                write_operand(f, expr, expr.precedence() < UNARY_PRECEDENCE)
            }
            Expr::FunctionCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                write_operand(f, condition, condition.precedence() == 0)?;
                write!(f, " ? {then_expr} : {else_expr}")
            }
        }
    }
}
