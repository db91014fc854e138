//! Shell arithmetic for `$((...))`, `((...))`, `let` and array subscripts
//!
//! Expressions are parsed with nom into an [`Expr`] tree and then evaluated
//! against an [`ArithContext`], which gives access to shell variables.
//! Integers are 64-bit and wrap on overflow.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use thiserror::Error;

use crate::lexer::{is_name_char, is_name_start};

/// Nesting limit for variables whose values are themselves expressions
const MAX_DEPTH: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArithError {
    #[error("{expr}: syntax error in expression (error token is \"{token}\")")]
    Syntax { expr: String, token: String },
    #[error("division by 0")]
    DivideByZero,
    #[error("exponent less than 0")]
    NegativeExponent,
    #[error("{0}: value too great for base")]
    BadNumber(String),
    #[error("{0}: invalid arithmetic base")]
    InvalidBase(String),
    #[error("{0}: expression recursion level exceeded")]
    TooDeep(String),
    #[error("{name}: {message}")]
    Assign { name: String, message: String },
}

/// Variable access for the evaluator
pub trait ArithContext {
    /// Current value of `name` (or of element `index` of array `name`)
    fn lookup(&mut self, name: &str, index: Option<i64>) -> Option<String>;
    fn assign(&mut self, name: &str, index: Option<i64>, value: i64) -> Result<(), ArithError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(i64),
    Var {
        name: String,
        index: Option<Box<Expr>>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign {
        name: String,
        index: Option<Box<Expr>>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    /// `++x`, `x--` and friends
    Step {
        name: String,
        index: Option<Box<Expr>>,
        delta: i64,
        prefix: bool,
    },
    Call(Func, Vec<Expr>),
}

type PResult<'a> = IResult<&'a str, Expr>;

fn symbol<'a>(sym: &'static str, input: &'a str) -> IResult<&'a str, &'a str> {
    preceded(multispace0, tag(sym))(input)
}

/// `++` or `--`
fn step_op(input: &str) -> IResult<&str, &str> {
    preceded(multispace0, alt((tag("++"), tag("--"))))(input)
}

/// Match an operator symbol, refusing it when it is really the start of a
/// longer operator (`<` in `<<`, `+` in `+=`).
fn op(sym: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let (rest, matched) = symbol(sym, input)?;
        let longer = (!sym.ends_with('=') && rest.starts_with('='))
            || (sym.len() == 1 && rest.starts_with(sym));
        if longer {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
        Ok((rest, matched))
    }
}

/// Left-associative chain of one precedence level
fn binary<'a>(
    input: &'a str,
    operand: fn(&'a str) -> PResult<'a>,
    ops: &[(&'static str, BinOp)],
) -> PResult<'a> {
    let (mut input, mut lhs) = operand(input)?;
    'outer: loop {
        for &(sym, bin) in ops {
            if let Ok((rest, _)) = op(sym)(input) {
                let (rest, rhs) = operand(rest)?;
                lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
                input = rest;
                continue 'outer;
            }
        }
        return Ok((input, lhs));
    }
}

fn comma(input: &str) -> PResult<'_> {
    binary(input, assignment, &[(",", BinOp::Comma)])
}

fn assignment(input: &str) -> PResult<'_> {
    const ASSIGN_OPS: &[(&str, Option<BinOp>)] = &[
        ("<<=", Some(BinOp::Shl)),
        (">>=", Some(BinOp::Shr)),
        ("+=", Some(BinOp::Add)),
        ("-=", Some(BinOp::Sub)),
        ("*=", Some(BinOp::Mul)),
        ("/=", Some(BinOp::Div)),
        ("%=", Some(BinOp::Rem)),
        ("&=", Some(BinOp::BitAnd)),
        ("^=", Some(BinOp::BitXor)),
        ("|=", Some(BinOp::BitOr)),
        ("=", None),
    ];
    if let Ok((rest, (name, index))) = lvalue(input) {
        for &(sym, bin) in ASSIGN_OPS {
            if let Ok((rest, _)) = op(sym)(rest) {
                let (rest, value) = assignment(rest)?;
                return Ok((
                    rest,
                    Expr::Assign {
                        name,
                        index,
                        op: bin,
                        value: Box::new(value),
                    },
                ));
            }
        }
    }
    ternary(input)
}

fn ternary(input: &str) -> PResult<'_> {
    let (input, cond) = logical_or(input)?;
    match op("?")(input) {
        Ok((rest, _)) => {
            let (rest, then) = assignment(rest)?;
            let (rest, _) = op(":")(rest)?;
            let (rest, otherwise) = assignment(rest)?;
            Ok((
                rest,
                Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
            ))
        }
        Err(_) => Ok((input, cond)),
    }
}

fn logical_or(input: &str) -> PResult<'_> {
    binary(input, logical_and, &[("||", BinOp::Or)])
}

fn logical_and(input: &str) -> PResult<'_> {
    binary(input, bit_or, &[("&&", BinOp::And)])
}

fn bit_or(input: &str) -> PResult<'_> {
    binary(input, bit_xor, &[("|", BinOp::BitOr)])
}

fn bit_xor(input: &str) -> PResult<'_> {
    binary(input, bit_and, &[("^", BinOp::BitXor)])
}

fn bit_and(input: &str) -> PResult<'_> {
    binary(input, equality, &[("&", BinOp::BitAnd)])
}

fn equality(input: &str) -> PResult<'_> {
    binary(input, relational, &[("==", BinOp::Eq), ("!=", BinOp::Ne)])
}

fn relational(input: &str) -> PResult<'_> {
    binary(
        input,
        shift,
        &[
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ],
    )
}

fn shift(input: &str) -> PResult<'_> {
    binary(input, additive, &[("<<", BinOp::Shl), (">>", BinOp::Shr)])
}

fn additive(input: &str) -> PResult<'_> {
    binary(input, multiplicative, &[("+", BinOp::Add), ("-", BinOp::Sub)])
}

fn multiplicative(input: &str) -> PResult<'_> {
    binary(
        input,
        power,
        &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
    )
}

/// `**` is right-associative
fn power(input: &str) -> PResult<'_> {
    let (input, base) = unary(input)?;
    match op("**")(input) {
        Ok((rest, _)) => {
            let (rest, exp) = power(rest)?;
            Ok((rest, Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp))))
        }
        Err(_) => Ok((input, base)),
    }
}

fn unary(input: &str) -> PResult<'_> {
    let (input, _) = multispace0(input)?;
    if let Ok((rest, sym)) = step_op(input) {
        let (rest, (name, index)) = lvalue(rest)?;
        let delta = if sym == "++" { 1 } else { -1 };
        return Ok((
            rest,
            Expr::Step {
                name,
                index,
                delta,
                prefix: true,
            },
        ));
    }
    let unary_ops: [(&'static str, UnaryOp); 4] = [
        ("+", UnaryOp::Plus),
        ("-", UnaryOp::Neg),
        ("!", UnaryOp::Not),
        ("~", UnaryOp::BitNot),
    ];
    for (sym, uop) in unary_ops {
        if let Ok((rest, _)) = op(sym)(input) {
            let (rest, operand) = unary(rest)?;
            return Ok((rest, Expr::Unary(uop, Box::new(operand))));
        }
    }
    postfix(input)
}

fn postfix(input: &str) -> PResult<'_> {
    let (input, expr) = primary(input)?;
    if let Expr::Var { name, index } = &expr {
        if let Ok((rest, sym)) = step_op(input) {
            return Ok((
                rest,
                Expr::Step {
                    name: name.clone(),
                    index: index.clone(),
                    delta: if sym == "++" { 1 } else { -1 },
                    prefix: false,
                },
            ));
        }
    }
    Ok((input, expr))
}

fn primary(input: &str) -> PResult<'_> {
    delimited(
        multispace0,
        alt((
            number,
            delimited(char('('), comma, preceded(multispace0, char(')'))),
            call,
            map(lvalue, |(name, index)| Expr::Var { name, index }),
        )),
        multispace0,
    )(input)
}

fn number_text(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        digit1,
        take_while(|c: char| c.is_ascii_alphanumeric() || matches!(c, '#' | '@' | '_')),
    ))(input)
}

fn number(input: &str) -> PResult<'_> {
    let (rest, text) = number_text(input)?;
    match parse_number(text) {
        Ok(n) => Ok((rest, Expr::Num(n))),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_name_start), take_while(is_name_char)))(input)
}

fn lvalue(input: &str) -> IResult<&str, (String, Option<Box<Expr>>)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = identifier(input)?;
    let (input, index) = opt(delimited(
        char('['),
        comma,
        preceded(multispace0, char(']')),
    ))(input)?;
    Ok((input, (name.to_string(), index.map(Box::new))))
}

fn call(input: &str) -> PResult<'_> {
    let (rest, name) = identifier(input)?;
    let func = match name {
        "abs" => Func::Abs,
        "min" => Func::Min,
        "max" => Func::Max,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    let (rest, args) = delimited(
        preceded(multispace0, char('(')),
        separated_list0(op(","), assignment),
        preceded(multispace0, char(')')),
    )(rest)?;
    Ok((rest, Expr::Call(func, args)))
}

/// Decimal, octal (`017`), hex (`0x1f`) or `base#digits`
pub fn parse_number(text: &str) -> Result<i64, ArithError> {
    let bad = || ArithError::BadNumber(text.to_string());
    if let Some((base, digits)) = text.split_once('#') {
        let base: u32 = base.parse().map_err(|_| ArithError::InvalidBase(text.into()))?;
        if !(2..=64).contains(&base) || digits.is_empty() {
            return Err(ArithError::InvalidBase(text.to_string()));
        }
        let mut value: i64 = 0;
        for c in digits.chars() {
            let digit = match c {
                '0'..='9' => c as u32 - '0' as u32,
                'a'..='z' => c as u32 - 'a' as u32 + 10,
                'A'..='Z' if base <= 36 => c as u32 - 'A' as u32 + 10,
                'A'..='Z' => c as u32 - 'A' as u32 + 36,
                '@' => 62,
                '_' => 63,
                _ => return Err(bad()),
            };
            if digit >= base {
                return Err(bad());
            }
            value = value.wrapping_mul(base as i64).wrapping_add(digit as i64);
        }
        return Ok(value);
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map(|v| v as i64).map_err(|_| bad());
    }
    if text.len() > 1 && text.starts_with('0') {
        return u64::from_str_radix(&text[1..], 8).map(|v| v as i64).map_err(|_| bad());
    }
    text.parse::<u64>().map(|v| v as i64).map_err(|_| bad())
}

/// Parse an expression. Blank input is the expression `0`.
pub fn parse(src: &str) -> Result<Expr, ArithError> {
    if src.trim().is_empty() {
        return Ok(Expr::Num(0));
    }
    let syntax = |rest: &str| {
        let token = rest.trim();
        // a malformed literal gets its own message
        if let Ok((_, text)) = number_text(token) {
            if let Err(e) = parse_number(text) {
                return e;
            }
        }
        ArithError::Syntax {
            expr: src.trim().to_string(),
            token: token.to_string(),
        }
    };
    match comma(src) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(syntax(rest)),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax(e.input)),
        Err(nom::Err::Incomplete(_)) => Err(syntax("")),
    }
}

/// Parse and evaluate in one step
pub fn evaluate(src: &str, ctx: &mut dyn ArithContext) -> Result<i64, ArithError> {
    let expr = parse(src)?;
    Evaluator { ctx, depth: 0 }.eval(&expr)
}

struct Evaluator<'c> {
    ctx: &'c mut dyn ArithContext,
    depth: usize,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<i64, ArithError> {
        match expr {
            Expr::Num(n) => Ok(*n),
            Expr::Var { name, index } => {
                let index = self.eval_index(index)?;
                self.variable(name, index)
            }
            Expr::Unary(uop, operand) => {
                let v = self.eval(operand)?;
                Ok(match uop {
                    UnaryOp::Plus => v,
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Not => (v == 0) as i64,
                    UnaryOp::BitNot => !v,
                })
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                Ok((self.eval(lhs)? != 0 && self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                Ok((self.eval(lhs)? != 0 || self.eval(rhs)? != 0) as i64)
            }
            Expr::Binary(bin, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                apply(*bin, l, r)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval(cond)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Assign {
                name,
                index,
                op,
                value,
            } => {
                let index = self.eval_index(index)?;
                let rhs = self.eval(value)?;
                let result = match op {
                    Some(bin) => apply(*bin, self.variable(name, index)?, rhs)?,
                    None => rhs,
                };
                self.ctx.assign(name, index, result)?;
                Ok(result)
            }
            Expr::Step {
                name,
                index,
                delta,
                prefix,
            } => {
                let index = self.eval_index(index)?;
                let old = self.variable(name, index)?;
                let new = old.wrapping_add(*delta);
                self.ctx.assign(name, index, new)?;
                Ok(if *prefix { new } else { old })
            }
            Expr::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                match (func, values.as_slice()) {
                    (Func::Abs, [v]) => Ok(v.wrapping_abs()),
                    (Func::Min, [first, rest @ ..]) => {
                        Ok(rest.iter().copied().fold(*first, i64::min))
                    }
                    (Func::Max, [first, rest @ ..]) => {
                        Ok(rest.iter().copied().fold(*first, i64::max))
                    }
                    _ => Err(ArithError::Syntax {
                        expr: format!("{:?}", func).to_lowercase(),
                        token: format!("{} arguments", values.len()),
                    }),
                }
            }
        }
    }

    fn eval_index(&mut self, index: &Option<Box<Expr>>) -> Result<Option<i64>, ArithError> {
        index.as_ref().map(|e| self.eval(e)).transpose()
    }

    /// A variable's numeric value. Values that are not plain numbers are
    /// evaluated as expressions in turn.
    fn variable(&mut self, name: &str, index: Option<i64>) -> Result<i64, ArithError> {
        let value = match self.ctx.lookup(name, index) {
            Some(v) => v,
            None => return Ok(0),
        };
        let value = value.trim();
        if value.is_empty() {
            return Ok(0);
        }
        if let Ok(n) = parse_number(value) {
            return Ok(n);
        }
        if self.depth >= MAX_DEPTH {
            return Err(ArithError::TooDeep(name.to_string()));
        }
        let expr = parse(value)?;
        self.depth += 1;
        let result = self.eval(&expr);
        self.depth -= 1;
        result
    }
}

fn apply(bin: BinOp, l: i64, r: i64) -> Result<i64, ArithError> {
    Ok(match bin {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                return Err(ArithError::DivideByZero);
            }
            l.wrapping_div(r)
        }
        BinOp::Rem => {
            if r == 0 {
                return Err(ArithError::DivideByZero);
            }
            l.wrapping_rem(r)
        }
        BinOp::Pow => {
            if r < 0 {
                return Err(ArithError::NegativeExponent);
            }
            l.wrapping_pow(r.min(u32::MAX as i64) as u32)
        }
        BinOp::Shl => l.wrapping_shl(r as u32),
        BinOp::Shr => l.wrapping_shr(r as u32),
        BinOp::Lt => (l < r) as i64,
        BinOp::Le => (l <= r) as i64,
        BinOp::Gt => (l > r) as i64,
        BinOp::Ge => (l >= r) as i64,
        BinOp::Eq => (l == r) as i64,
        BinOp::Ne => (l != r) as i64,
        BinOp::BitAnd => l & r,
        BinOp::BitOr => l | r,
        BinOp::BitXor => l ^ r,
        BinOp::And => (l != 0 && r != 0) as i64,
        BinOp::Or => (l != 0 || r != 0) as i64,
        BinOp::Comma => r,
    })
}
