//! Expression parser, spec §4.F.
//!
//! A small hand-written Pratt parser over a restricted scalar expression
//! grammar: literals, `self.X`/`self[i]` references, field/index access,
//! arithmetic/comparison/logical/concat operators, and function calls.
//! Deliberately not a general-purpose language (spec §1 Non-goals).

use thiserror::Error;

use super::ast::{BinOp, Expr, UnOp};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprParseError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("expected `{0}`")]
    Expected(&'static str),
    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Str(String),
    Ident(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DotDot,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprParseError::UnexpectedToken("=".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&other) => s.push(other),
                                None => return Err(ExprParseError::UnexpectedEof),
                            }
                            i += 1;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(ExprParseError::UnexpectedEof),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(ExprParseError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, token: &Token, label: &'static str) -> Result<(), ExprParseError> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprParseError::Expected(label))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinaryOp { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::BinaryOp { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprParseError> {
        let lhs = self.parse_concat()?;
        let op = match self.peek() {
            Some(Token::EqEq) => Some(BinOp::Eq),
            Some(Token::Ne) => Some(BinOp::Ne),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Ge) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_concat()?;
            return Ok(Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_additive()?;
        while self.peek() == Some(&Token::DotDot) {
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::BinaryOp { op: BinOp::Concat, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnOp::Neg, expr: Box::new(expr) })
            }
            Some(Token::Bang) => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnOp::Not, expr: Box::new(expr) })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let field = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        _ => return Err(ExprParseError::Expected("field name")),
                    };
                    expr = Expr::FieldAccess { base: Box::new(expr), field };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "]")?;
                    expr = Expr::Index { base: Box::new(expr), index: Box::new(index) };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprParseError> {
        match self.advance() {
            Some(Token::Number(text)) => {
                if let Ok(i) = text.parse::<i64>() {
                    Ok(Expr::Int(i))
                } else {
                    text.parse::<f64>().map(Expr::Float).map_err(|_| ExprParseError::InvalidNumber(text))
                }
            }
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "self" => self.parse_self_ref(),
                "nil" => Ok(Expr::Nil),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        self.advance();
                        let args = self.parse_args()?;
                        Ok(Expr::Call { name, args })
                    } else {
                        Ok(Expr::Ident(name))
                    }
                }
            },
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, ")")?;
                Ok(expr)
            }
            Some(other) => Err(ExprParseError::UnexpectedToken(format!("{other:?}"))),
            None => Err(ExprParseError::UnexpectedEof),
        }
    }

    fn parse_self_ref(&mut self) -> Result<Expr, ExprParseError> {
        match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                match self.advance() {
                    Some(Token::Ident(name)) => Ok(Expr::SelfField(name)),
                    _ => Err(ExprParseError::Expected("field name after `self.`")),
                }
            }
            Some(Token::LBracket) => {
                self.advance();
                let idx = match self.advance() {
                    Some(Token::Number(text)) => text.parse::<i64>().map_err(|_| ExprParseError::InvalidNumber(text))?,
                    _ => return Err(ExprParseError::Expected("integer index after `self[`")),
                };
                self.expect(&Token::RBracket, "]")?;
                Ok(Expr::SelfIndex(idx))
            }
            _ => Err(ExprParseError::Expected("`.` or `[` after `self`")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(ExprParseError::Expected(", or )")),
            }
        }
        Ok(args)
    }
}

/// Parse an expression body (without the leading `=`).
pub fn parse(input: &str) -> Result<Expr, ExprParseError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprParseError::UnexpectedToken(format!("{:?}", parser.tokens[parser.pos])));
    }
    Ok(expr)
}

/// Extract the set of sibling-column references (`self.X` field names and
/// `self[i]` 1-based indices) an expression depends on, for the cell
/// scheduler (spec §4.G, §9: "prefer real parsing to regex sniffing").
pub fn referenced_columns(expr: &Expr, names: &mut Vec<String>, indices: &mut Vec<i64>) {
    match expr {
        Expr::SelfField(name) => names.push(name.clone()),
        Expr::SelfIndex(idx) => indices.push(*idx),
        Expr::FieldAccess { base, .. } => referenced_columns(base, names, indices),
        Expr::Index { base, index } => {
            referenced_columns(base, names, indices);
            referenced_columns(index, names, indices);
        }
        Expr::UnaryOp { expr, .. } => referenced_columns(expr, names, indices),
        Expr::BinaryOp { lhs, rhs, .. } => {
            referenced_columns(lhs, names, indices);
            referenced_columns(rhs, names, indices);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                referenced_columns(arg, names, indices);
            }
        }
        Expr::Nil | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Ident(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic() {
        let expr = parse("self.price*2").unwrap();
        assert_eq!(
            expr,
            Expr::BinaryOp {
                op: BinOp::Mul,
                lhs: Box::new(Expr::SelfField("price".to_string())),
                rhs: Box::new(Expr::Int(2)),
            }
        );
    }

    #[test]
    fn parses_self_index() {
        let expr = parse("self[1]").unwrap();
        assert_eq!(expr, Expr::SelfIndex(1));
    }

    #[test]
    fn extracts_referenced_columns() {
        let expr = parse("self.price*2 + self.tax").unwrap();
        let mut names = Vec::new();
        let mut indices = Vec::new();
        referenced_columns(&expr, &mut names, &mut indices);
        assert_eq!(names, vec!["price".to_string(), "tax".to_string()]);
    }

    #[test]
    fn parses_function_call() {
        let expr = parse("sum(rows.price)").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "sum");
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected call"),
        }
    }
}
