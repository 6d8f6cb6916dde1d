//! condition / validity_expression 用の安全な式言語
//!
//! スキーマデータから任意コードを実行しないよう、汎用インタプリタではなく
//! 比較・論理演算・四則演算と少数の組み込み関数のみを持つ小さな言語を提供する。
//!
//! ```text
//! expr     := or
//! or       := and (("or" | "||") and)*
//! and      := not (("and" | "&&") not)*
//! not      := ("not" | "!") not | compare
//! compare  := sum (("==" | "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" | "in" | "not in") sum)?
//! sum      := product (("+" | "-") product)*
//! product  := unary (("*" | "/" | "%") unary)*
//! unary    := "-" unary | primary
//! primary  := number | string | "true" | "false" | "null" | ident | ident "(" args ")"
//!           | "(" expr ")" | "[" args "]"
//! ```
//!
//! 評価は決定的で副作用を持たない。実行時の型不一致は `null`（偽）になる。

use super::temporal::{parse_date, parse_datetime, parse_time};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// 括弧・関数呼び出し・単項演算子の入れ子の上限
pub const MAX_NESTING: usize = 64;

/// 1つの式に含められるトークン数の上限
pub const MAX_TOKENS: usize = 1024;

/// 式の構文エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// 空の式
    #[error("expression is empty")]
    Empty,

    /// 字句解析できない文字
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar {
        /// 文字
        ch: char,
        /// バイトオフセット
        pos: usize,
    },

    /// 閉じられていない文字列リテラル
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    /// 数値として解釈できないリテラル
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    /// 予期しないトークン
    #[error("unexpected {found} at offset {pos}")]
    UnexpectedToken {
        /// 見つかったトークン
        found: String,
        /// バイトオフセット
        pos: usize,
    },

    /// 式が途中で終わった
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// 未知の関数
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// 引数の数が合わない
    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        /// 関数名
        name: &'static str,
        /// 期待値
        expected: usize,
        /// 実際の数
        got: usize,
    },

    /// 入れ子が深すぎる
    #[error("expression nests deeper than {limit} levels at offset {pos}")]
    TooDeep {
        /// 上限
        limit: usize,
        /// バイトオフセット
        pos: usize,
    },

    /// トークン数が多すぎる
    #[error("expression has {tokens} tokens, limit is {limit}")]
    TooLong {
        /// 実際のトークン数
        tokens: usize,
        /// 上限
        limit: usize,
    },
}

/// 式の評価値
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// 値なし（未入力・スキップ・評価エラー）
    Null,
    /// 真偽値
    Bool(bool),
    /// 数値
    Number(f64),
    /// 文字列（未変換の入力値を含む）
    Text(String),
    /// 日付
    Date(NaiveDate),
    /// 時刻
    Time(NaiveTime),
    /// 日時
    DateTime(NaiveDateTime),
    /// 複数値
    List(Vec<Value>),
}

impl Value {
    /// 真偽値として評価する
    ///
    /// 文字列は `yes/no` 等の真偽表現を解釈し、それ以外は空でなければ真。
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => parse_bool_text(s).unwrap_or_else(|| !s.trim().is_empty()),
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => true,
            Value::List(items) => !items.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::Text(s) => parse_datetime(s).or_else(|| parse_date(s)?.and_hms_opt(0, 0, 0)),
            _ => None,
        }
    }

    fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            Value::Text(s) => parse_time(s),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    fn display_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Date(d) => Some(d.to_string()),
            Value::Time(t) => Some(t.to_string()),
            Value::DateTime(dt) => Some(dt.to_string()),
            Value::Null | Value::List(_) => None,
        }
    }
}

fn parse_bool_text(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "no" | "n" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

/// フィールド名から値を解決する評価環境
pub trait Environment {
    /// フィールド値を返す。存在しない場合は [`Value::Null`]。
    fn lookup(&self, name: &str) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Len,
    Empty,
    Contains,
    Abs,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "len" => Some(Self::Len),
            "empty" => Some(Self::Empty),
            "contains" => Some(Self::Contains),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Empty => "empty",
            Self::Contains => "contains",
            Self::Abs => "abs",
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::Contains => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Field(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
}

/// 構文解析済みの式
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// 式文字列を解析する
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::TooLong {
                tokens: tokens.len(),
                limit: MAX_TOKENS,
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let ast = parser.parse_or()?;
        if let Some((tok, pos)) = parser.tokens.get(parser.pos) {
            return Err(ExprError::UnexpectedToken {
                found: tok.to_string(),
                pos: *pos,
            });
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// 元の式文字列
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 式が参照するフィールド名の一覧
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        collect_refs(&self.ast, &mut out);
        out
    }

    /// 式を評価する
    pub fn eval(&self, env: &dyn Environment) -> Value {
        eval(&self.ast, env)
    }

    /// 式を評価し真偽値として返す
    pub fn eval_bool(&self, env: &dyn Environment) -> bool {
        self.eval(env).truthy()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_refs<'a>(expr: &'a Expr, out: &mut BTreeSet<&'a str>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Field(name) => {
            out.insert(name.as_str());
        }
        Expr::List(items) | Expr::Call(_, items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Expr::Unary(_, inner) => collect_refs(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_refs(lhs, out);
            collect_refs(rhs, out);
        }
    }
}

// ---------------------------------------------------------------------------
// 字句解析
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::True => f.write_str("'true'"),
            Token::False => f.write_str("'false'"),
            Token::Null => f.write_str("'null'"),
            Token::And => f.write_str("'and'"),
            Token::Or => f.write_str("'or'"),
            Token::Not => f.write_str("'not'"),
            Token::In => f.write_str("'in'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Comma => f.write_str("','"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |tok: Token| (tok, pos, 2usize);
        let one = |tok: Token| (tok, pos, 1usize);
        let simple = match (ch, next) {
            ('=', Some('=')) => Some(two(Token::Eq)),
            ('!', Some('=')) => Some(two(Token::Ne)),
            ('<', Some('>')) => Some(two(Token::Ne)),
            ('<', Some('=')) => Some(two(Token::Le)),
            ('>', Some('=')) => Some(two(Token::Ge)),
            ('&', Some('&')) => Some(two(Token::And)),
            ('|', Some('|')) => Some(two(Token::Or)),
            ('=', _) => Some(one(Token::Eq)),
            ('!', _) => Some(one(Token::Not)),
            ('<', _) => Some(one(Token::Lt)),
            ('>', _) => Some(one(Token::Gt)),
            ('(', _) => Some(one(Token::LParen)),
            (')', _) => Some(one(Token::RParen)),
            ('[', _) => Some(one(Token::LBracket)),
            (']', _) => Some(one(Token::RBracket)),
            (',', _) => Some(one(Token::Comma)),
            ('+', _) => Some(one(Token::Plus)),
            ('-', _) => Some(one(Token::Minus)),
            ('*', _) => Some(one(Token::Star)),
            ('/', _) => Some(one(Token::Slash)),
            ('%', _) => Some(one(Token::Percent)),
            _ => None,
        };
        if let Some((tok, pos, width)) = simple {
            tokens.push((tok, pos));
            i += width;
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            let mut text = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let c = chars[j].1;
                if c == '\\' {
                    if let Some((_, escaped)) = chars.get(j + 1) {
                        text.push(*escaped);
                        j += 2;
                        continue;
                    }
                }
                if c == quote {
                    closed = true;
                    break;
                }
                text.push(c);
                j += 1;
            }
            if !closed {
                return Err(ExprError::UnterminatedString(pos));
            }
            tokens.push((Token::Str(text), pos));
            i = j + 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next.is_some_and(|c| c.is_ascii_digit())) {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                j += 1;
            }
            let literal: String = chars[i..j].iter().map(|(_, c)| *c).collect();
            let number = literal
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(literal.clone()))?;
            tokens.push((Token::Number(number), pos));
            i = j;
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                j += 1;
            }
            let word: String = chars[i..j].iter().map(|(_, c)| *c).collect();
            let tok = match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                _ => Token::Ident(word),
            };
            tokens.push((tok, pos));
            i = j;
            continue;
        }

        return Err(ExprError::UnexpectedChar { ch, pos });
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// 構文解析
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// 入れ子を1段深くして `parse` を実行する
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        if self.depth >= MAX_NESTING {
            let pos = self
                .tokens
                .get(self.pos.saturating_sub(1))
                .map(|(_, pos)| *pos)
                .unwrap_or(0);
            return Err(ExprError::TooDeep {
                limit: MAX_NESTING,
                pos,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.advance() {
            Some((ref tok, _)) if tok == expected => Ok(()),
            Some((tok, pos)) => Err(ExprError::UnexpectedToken {
                found: tok.to_string(),
                pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_sum()?;
        let op = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Eq), _) => BinaryOp::Eq,
            (Some(Token::Ne), _) => BinaryOp::Ne,
            (Some(Token::Lt), _) => BinaryOp::Lt,
            (Some(Token::Le), _) => BinaryOp::Le,
            (Some(Token::Gt), _) => BinaryOp::Gt,
            (Some(Token::Ge), _) => BinaryOp::Ge,
            (Some(Token::In), _) => BinaryOp::In,
            (Some(Token::Not), Some(Token::In)) => {
                self.pos += 1;
                BinaryOp::NotIn
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_product()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let inner = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_args(&mut self, close: &Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.advance() {
                Some((Token::Comma, _)) => continue,
                Some((ref tok, _)) if tok == close => return Ok(args),
                Some((tok, pos)) => {
                    return Err(ExprError::UnexpectedToken {
                        found: tok.to_string(),
                        pos,
                    })
                }
                None => return Err(ExprError::UnexpectedEnd),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let (tok, pos) = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match tok {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.nested(Self::parse_or)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(
                self.nested(|p| p.parse_args(&Token::RBracket))?,
            )),
            Token::Ident(name) => {
                if self.peek() != Some(&Token::LParen) {
                    return Ok(Expr::Field(name));
                }
                self.pos += 1;
                let builtin = Builtin::lookup(&name.to_ascii_lowercase())
                    .ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
                let args = self.nested(|p| p.parse_args(&Token::RParen))?;
                if args.len() != builtin.arity() {
                    return Err(ExprError::Arity {
                        name: builtin.name(),
                        expected: builtin.arity(),
                        got: args.len(),
                    });
                }
                Ok(Expr::Call(builtin, args))
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.to_string(),
                pos,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// 評価
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, env: &dyn Environment) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Field(name) => env.lookup(name),
        Expr::List(items) => Value::List(items.iter().map(|e| eval(e, env)).collect()),
        Expr::Unary(UnaryOp::Not, inner) => Value::Bool(!eval(inner, env).truthy()),
        Expr::Unary(UnaryOp::Neg, inner) => match eval(inner, env).as_number() {
            Some(n) => Value::Number(-n),
            None => Value::Null,
        },
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            Value::Bool(eval(lhs, env).truthy() && eval(rhs, env).truthy())
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            Value::Bool(eval(lhs, env).truthy() || eval(rhs, env).truthy())
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, env), eval(rhs, env)),
        Expr::Call(builtin, args) => {
            let args: Vec<Value> = args.iter().map(|e| eval(e, env)).collect();
            call(*builtin, &args)
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinaryOp::Eq => Value::Bool(values_equal(&lhs, &rhs)),
        BinaryOp::Ne => Value::Bool(!values_equal(&lhs, &rhs)),
        BinaryOp::Lt => Value::Bool(compare(&lhs, &rhs) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(&lhs, &rhs),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(&lhs, &rhs) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(&lhs, &rhs),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => Value::Bool(contains(&rhs, &lhs)),
        BinaryOp::NotIn => Value::Bool(!contains(&rhs, &lhs)),
        BinaryOp::Add => arithmetic(op, &lhs, &rhs).unwrap_or_else(|| {
            let has_text = matches!(lhs, Value::Text(_)) || matches!(rhs, Value::Text(_));
            match (lhs.display_text(), rhs.display_text()) {
                (Some(a), Some(b)) if has_text => Value::Text(a + &b),
                _ => Value::Null,
            }
        }),
        BinaryOp::Sub => arithmetic(op, &lhs, &rhs).unwrap_or_else(|| {
            match (lhs.as_datetime(), rhs.as_datetime()) {
                (Some(a), Some(b)) => {
                    Value::Number((a - b).num_seconds() as f64 / 86_400.0)
                }
                _ => Value::Null,
            }
        }),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, &lhs, &rhs).unwrap_or(Value::Null)
        }
        // 短絡評価は eval 側で処理済み
        BinaryOp::And => Value::Bool(lhs.truthy() && rhs.truthy()),
        BinaryOp::Or => Value::Bool(lhs.truthy() || rhs.truthy()),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Value> {
    let (a, b) = (lhs.as_number()?, rhs.as_number()?);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Some(Value::Null),
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b == 0.0 => return Some(Value::Null),
        BinaryOp::Rem => a % b,
        _ => return None,
    };
    Some(Value::Number(result))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Bool(a), other) | (other, Value::Bool(a)) => match other {
            Value::Bool(b) => a == b,
            Value::Text(s) => parse_bool_text(s) == Some(*a),
            Value::Number(n) => (*n != 0.0) == *a,
            _ => false,
        },
        (Value::Text(a), Value::Text(b)) if a == b => true,
        _ => compare(lhs, rhs) == Some(Ordering::Equal),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::List(_), _) | (_, Value::List(_)) => None,
        (Value::Time(_), _) | (_, Value::Time(_)) => lhs.as_time()?.partial_cmp(&rhs.as_time()?),
        (Value::Date(_) | Value::DateTime(_), _) | (_, Value::Date(_) | Value::DateTime(_)) => {
            lhs.as_datetime()?.partial_cmp(&rhs.as_datetime()?)
        }
        (Value::Text(a), Value::Text(b)) => {
            if let (Some(x), Some(y)) = (lhs.as_number(), rhs.as_number()) {
                return x.partial_cmp(&y);
            }
            if let (Some(x), Some(y)) = (lhs.as_datetime(), rhs.as_datetime()) {
                return x.partial_cmp(&y);
            }
            Some(a.cmp(b))
        }
        _ => lhs.as_number()?.partial_cmp(&rhs.as_number()?),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Text(text) => needle
            .display_text()
            .is_some_and(|n| text.contains(n.as_str())),
        _ => false,
    }
}

fn call(builtin: Builtin, args: &[Value]) -> Value {
    match (builtin, args) {
        (Builtin::Len, [Value::Null]) => Value::Number(0.0),
        (Builtin::Len, [Value::Text(s)]) => Value::Number(s.chars().count() as f64),
        (Builtin::Len, [Value::List(items)]) => Value::Number(items.len() as f64),
        (Builtin::Empty, [v]) => Value::Bool(v.is_empty()),
        (Builtin::Contains, [haystack, needle]) => Value::Bool(contains(haystack, needle)),
        (Builtin::Abs, [v]) => v.as_number().map(|n| Value::Number(n.abs())).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, Value>);

    impl Environment for MapEnv {
        fn lookup(&self, name: &str) -> Value {
            self.0.get(name).cloned().unwrap_or(Value::Null)
        }
    }

    fn env(pairs: &[(&'static str, Value)]) -> MapEnv {
        MapEnv(pairs.iter().cloned().collect())
    }

    fn eval_str(src: &str, env: &MapEnv) -> Value {
        Expression::parse(src).expect("valid expression").eval(env)
    }

    #[test]
    fn test_arithmetic_precedence() {
        let e = env(&[]);
        assert_eq!(eval_str("1 + 2 * 3", &e), Value::Number(7.0));
        assert_eq!(eval_str("(1 + 2) * 3", &e), Value::Number(9.0));
        assert_eq!(eval_str("-2 * 3 + 10 % 4", &e), Value::Number(-4.0));
        assert_eq!(eval_str("1 / 0", &e), Value::Null);
    }

    #[test]
    fn test_raw_text_compares_numerically() {
        let e = env(&[("dose", Value::Text("100".into())), ("max", Value::Text("25".into()))]);
        assert!(Expression::parse("dose > max").unwrap().eval_bool(&e));
        assert!(Expression::parse("dose == 100").unwrap().eval_bool(&e));
    }

    #[test]
    fn test_boolean_connectives_and_aliases() {
        let e = env(&[("smoker", Value::Text("yes".into())), ("packs", Value::Number(2.0))]);
        assert!(Expression::parse("smoker == true and packs >= 1").unwrap().eval_bool(&e));
        assert!(Expression::parse("smoker && !(packs < 1)").unwrap().eval_bool(&e));
        assert!(!Expression::parse("not smoker || packs = 0").unwrap().eval_bool(&e));
    }

    #[test]
    fn test_null_semantics() {
        let e = env(&[]);
        assert!(Expression::parse("missing == null").unwrap().eval_bool(&e));
        assert!(!Expression::parse("missing > 3").unwrap().eval_bool(&e));
        assert!(!Expression::parse("missing <= 3").unwrap().eval_bool(&e));
        assert!(Expression::parse("empty(missing)").unwrap().eval_bool(&e));
    }

    #[test]
    fn test_in_operator_and_lists() {
        let e = env(&[
            ("arm", Value::Text("B".into())),
            (
                "symptoms",
                Value::List(vec![Value::Text("fever".into()), Value::Text("cough".into())]),
            ),
        ]);
        assert!(Expression::parse("arm in ['A', 'B']").unwrap().eval_bool(&e));
        assert!(Expression::parse("'cough' in symptoms").unwrap().eval_bool(&e));
        assert!(Expression::parse("'rash' not in symptoms").unwrap().eval_bool(&e));
        assert_eq!(eval_str("len(symptoms)", &e), Value::Number(2.0));
        assert!(Expression::parse("contains(symptoms, 'fever')").unwrap().eval_bool(&e));
    }

    #[test]
    fn test_date_comparison_and_difference() {
        let consent = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let e = env(&[
            ("consent_date", Value::Date(consent)),
            ("visit_date", Value::Text("2024-01-25".into())),
        ]);
        assert!(Expression::parse("visit_date >= consent_date").unwrap().eval_bool(&e));
        assert_eq!(eval_str("visit_date - consent_date", &e), Value::Number(15.0));
        assert!(Expression::parse("consent_date > '2023-12-31'").unwrap().eval_bool(&e));
    }

    #[test]
    fn test_string_concatenation() {
        let e = env(&[("first", Value::Text("Ada".into()))]);
        assert_eq!(eval_str("first + '-01'", &e), Value::Text("Ada-01".into()));
    }

    #[test]
    fn test_references() {
        let expr = Expression::parse("a > 1 and (b in [c, 2] or len(d) == 0)").unwrap();
        let refs: Vec<&str> = expr.references().into_iter().collect();
        assert_eq!(refs, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Expression::parse("   "), Err(ExprError::Empty));
        assert_eq!(Expression::parse("a >"), Err(ExprError::UnexpectedEnd));
        assert_eq!(
            Expression::parse("'abc"),
            Err(ExprError::UnterminatedString(0))
        );
        assert!(matches!(
            Expression::parse("a $ b"),
            Err(ExprError::UnexpectedChar { ch: '$', .. })
        ));
        assert!(matches!(
            Expression::parse("system('rm')"),
            Err(ExprError::UnknownFunction(_))
        ));
        assert!(matches!(
            Expression::parse("len(a, b)"),
            Err(ExprError::Arity { name: "len", .. })
        ));
        assert!(matches!(
            Expression::parse("a b"),
            Err(ExprError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(Expression::parse(&ok).is_ok());

        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(matches!(
            Expression::parse(&deep),
            Err(ExprError::TooLong { .. })
        ));

        let parens = format!(
            "{}1{}",
            "(".repeat(MAX_NESTING + 1),
            ")".repeat(MAX_NESTING + 1)
        );
        assert_eq!(
            Expression::parse(&parens),
            Err(ExprError::TooDeep {
                limit: MAX_NESTING,
                pos: MAX_NESTING,
            })
        );

        let negations = format!("{}a", "not ".repeat(MAX_NESTING + 1));
        assert!(matches!(
            Expression::parse(&negations),
            Err(ExprError::TooDeep { .. })
        ));
        let minus = format!("{}1", "-".repeat(MAX_NESTING + 1));
        assert!(matches!(
            Expression::parse(&minus),
            Err(ExprError::TooDeep { .. })
        ));
        let calls = format!(
            "{}a{}",
            "len(".repeat(MAX_NESTING + 1),
            ")".repeat(MAX_NESTING + 1)
        );
        assert!(matches!(
            Expression::parse(&calls),
            Err(ExprError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_token_limit() {
        // "a" と "+ a" の繰り返しで左に深い木になる
        let at_limit = format!("a{}", " + a".repeat((MAX_TOKENS - 1) / 2));
        let expr = Expression::parse(&at_limit).unwrap();
        assert_eq!(
            expr.eval(&env(&[("a", Value::Number(1.0))])),
            Value::Number(((MAX_TOKENS - 1) / 2 + 1) as f64)
        );

        let too_long = format!("a{}", " + a".repeat(MAX_TOKENS));
        assert_eq!(
            Expression::parse(&too_long),
            Err(ExprError::TooLong {
                tokens: 2 * MAX_TOKENS + 1,
                limit: MAX_TOKENS,
            })
        );
    }
}
