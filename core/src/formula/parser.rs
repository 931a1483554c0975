use std::cell::Cell;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{map, map_res, not, recognize, value, verify},
    error::{Error, ErrorKind},
    multi::separated_list0,
    number::complete::recognize_float,
    sequence::{delimited, pair, terminated},
    IResult, Parser,
};

use crate::error::FormulaError;
use crate::formula::ast::{BinaryOp, Expr, UnaryOp, KEYWORDS};

type Res<'a, O> = IResult<&'a str, O>;

/// Deepest nesting a formula may use. Each parenthesis, function call,
/// ternary branch, unary operator and `^` exponent is one level.
pub const MAX_DEPTH: usize = 64;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// One nesting level, released on drop.
struct DepthGuard;

impl DepthGuard {
    fn enter(input: &str) -> Result<Self, nom::Err<Error<&str>>> {
        let depth = DEPTH.with(|d| {
            d.set(d.get() + 1);
            d.get()
        });
        let guard = DepthGuard;
        if depth > MAX_DEPTH {
            return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
        }
        Ok(guard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Parse a formula expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, FormulaError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FormulaError::EmptyExpression);
    }
    DEPTH.with(|d| d.set(0));

    match parse_expr(input) {
        Ok((remaining, expr)) => {
            let remaining = remaining.trim();
            if remaining.is_empty() {
                Ok(expr)
            } else {
                Err(FormulaError::ParseError {
                    position: input.len() - remaining.len(),
                    message: format!("unexpected characters: '{}'", remaining),
                })
            }
        }
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => {
            Err(FormulaError::TooDeep { max: MAX_DEPTH })
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let rest = e.input.trim_start();
            let message = match rest.chars().next() {
                Some(c) => format!("unexpected '{}'", c),
                None => "unexpected end of formula".to_string(),
            };
            Err(FormulaError::ParseError {
                position: input.len() - rest.len(),
                message,
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(FormulaError::ParseError {
            position: input.len(),
            message: "unexpected end of formula".to_string(),
        }),
    }
}

fn sp(input: &str) -> Res<'_, &str> {
    multispace0(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn ws<'a, O, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(sp, inner, sp)
}

/// A keyword only matches when it is not the prefix of a longer identifier.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag_no_case(word), not(satisfy(is_ident_char)))
}

fn parse_expr(input: &str) -> Res<'_, Expr> {
    let _level = DepthGuard::enter(input)?;
    parse_ternary(input)
}

fn parse_ternary(input: &str) -> Res<'_, Expr> {
    let (input, condition) = parse_or(input)?;
    let (input, _) = sp(input)?;

    let question: Res<'_, char> = char('?').parse(input);
    if let Ok((input, _)) = question {
        let (input, _) = sp(input)?;
        let (input, then_expr) = parse_expr(input)?;
        let (input, _) = sp(input)?;
        let (input, _) = char(':').parse(input)?;
        let (input, _) = sp(input)?;
        let (input, else_expr) = parse_expr(input)?;
        Ok((input, Expr::ternary(condition, then_expr, else_expr)))
    } else {
        Ok((input, condition))
    }
}

fn parse_or(input: &str) -> Res<'_, Expr> {
    let (input, left) = parse_and(input)?;
    parse_binary_chain(input, left, parse_or_op, parse_and)
}

fn parse_or_op(input: &str) -> Res<'_, BinaryOp> {
    ws(value(BinaryOp::Or, keyword("or"))).parse(input)
}

fn parse_and(input: &str) -> Res<'_, Expr> {
    let (input, left) = parse_comparison(input)?;
    parse_binary_chain(input, left, parse_and_op, parse_comparison)
}

fn parse_and_op(input: &str) -> Res<'_, BinaryOp> {
    ws(value(BinaryOp::And, keyword("and"))).parse(input)
}

fn parse_comparison(input: &str) -> Res<'_, Expr> {
    let (input, left) = parse_additive(input)?;
    parse_binary_chain(input, left, parse_comparison_op, parse_additive)
}

fn parse_comparison_op(input: &str) -> Res<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Neq, tag("!=")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::Lt, tag("<")),
    )))
    .parse(input)
}

fn parse_additive(input: &str) -> Res<'_, Expr> {
    let (input, left) = parse_multiplicative(input)?;
    parse_binary_chain(input, left, parse_additive_op, parse_multiplicative)
}

fn parse_additive_op(input: &str) -> Res<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    )))
    .parse(input)
}

fn parse_multiplicative(input: &str) -> Res<'_, Expr> {
    let (input, left) = parse_unary(input)?;
    parse_binary_chain(input, left, parse_multiplicative_op, parse_unary)
}

fn parse_multiplicative_op(input: &str) -> Res<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
    )))
    .parse(input)
}

fn parse_binary_chain<'a, F, G>(
    mut input: &'a str,
    mut left: Expr,
    mut op_parser: F,
    mut expr_parser: G,
) -> Res<'a, Expr>
where
    F: FnMut(&'a str) -> Res<'a, BinaryOp>,
    G: FnMut(&'a str) -> Res<'a, Expr>,
{
    loop {
        match op_parser(input) {
            Ok((remaining, op)) => {
                let (remaining, right) = expr_parser(remaining)?;
                left = Expr::binary(op, left, right);
                input = remaining;
            }
            Err(_) => return Ok((input, left)),
        }
    }
}

fn parse_unary(input: &str) -> Res<'_, Expr> {
    let (input, _) = sp(input)?;

    let minus: Res<'_, char> = char('-').parse(input);
    if let Ok((input, _)) = minus {
        let _level = DepthGuard::enter(input)?;
        let (input, _) = sp(input)?;
        let (input, expr) = parse_unary(input)?;
        return Ok((input, Expr::unary(UnaryOp::Neg, expr)));
    }

    let negation: Res<'_, &str> = keyword("not").parse(input);
    if let Ok((input, _)) = negation {
        let _level = DepthGuard::enter(input)?;
        let (input, _) = sp(input)?;
        let (input, expr) = parse_unary(input)?;
        return Ok((input, Expr::unary(UnaryOp::Not, expr)));
    }

    parse_power(input)
}

/// `^` is right-associative and binds tighter than unary minus: `-2 ^ 2 == -4`.
fn parse_power(input: &str) -> Res<'_, Expr> {
    let (input, base) = parse_primary(input)?;

    let caret: Res<'_, char> = ws(char('^')).parse(input);
    match caret {
        Ok((rest, _)) => {
            let _level = DepthGuard::enter(rest)?;
            let (rest, exponent) = parse_unary(rest)?;
            Ok((rest, Expr::binary(BinaryOp::Pow, base, exponent)))
        }
        Err(_) => Ok((input, base)),
    }
}

fn parse_primary(input: &str) -> Res<'_, Expr> {
    let (input, _) = sp(input)?;

    alt((
        parse_parenthesized,
        parse_boolean,
        parse_function_call,
        parse_number,
        parse_bracketed_name,
        parse_variable,
    ))
    .parse(input)
}

fn parse_parenthesized(input: &str) -> Res<'_, Expr> {
    delimited(pair(char('('), sp), parse_expr, pair(sp, char(')'))).parse(input)
}

fn parse_boolean(input: &str) -> Res<'_, Expr> {
    alt((
        value(Expr::Boolean(true), keyword("true")),
        value(Expr::Boolean(false), keyword("false")),
    ))
    .parse(input)
}

fn float_literal(input: &str) -> Res<'_, &str> {
    recognize_float(input)
}

fn parse_number(input: &str) -> Res<'_, Expr> {
    map_res(float_literal, |s: &str| s.parse::<f64>().map(Expr::Number)).parse(input)
}

fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))
    .parse(input)
}

fn parse_variable(input: &str) -> Res<'_, Expr> {
    map(verify(identifier, |s: &str| !is_keyword(s)), |s: &str| {
        Expr::Variable(s.to_string())
    })
    .parse(input)
}

/// `[IT Load]` refers to a name that is not a bare identifier.
fn parse_bracketed_name(input: &str) -> Res<'_, Expr> {
    map(
        verify(
            delimited(
                char('['),
                take_while1(|c: char| c != ']' && c != '['),
                char(']'),
            ),
            |s: &str| !s.trim().is_empty(),
        ),
        |s: &str| Expr::Variable(s.trim().to_string()),
    )
    .parse(input)
}

fn parse_function_call(input: &str) -> Res<'_, Expr> {
    let (input, name) = identifier(input)?;

    // Must have opening parenthesis immediately after name (with optional whitespace)
    let (input, _) = sp(input)?;
    let (input, _) = char('(').parse(input)?;
    let (input, _) = sp(input)?;

    let (input, args) = separated_list0((sp, char(','), sp), parse_expr).parse(input)?;

    let (input, _) = sp(input)?;
    let (input, _) = char(')').parse(input)?;

    Ok((input, Expr::function_call(name, args)))
}
