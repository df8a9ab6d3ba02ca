//! Formula parsing.
//!
//! Turns formula text (`=SUM(A1:A3)*2`) into an [`Expr`] tree with a
//! small recursive-descent parser. Precedence, loosest first:
//! comparison, `&`, `+ -`, `* /`, `^`, unary sign, postfix `%`.

use thiserror::Error;

use crate::cell_ref::CellRef;

/// Upper bound on cells a single range may expand to as precedents.
pub const MAX_RANGE_CELLS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("syntax error at {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Percent,
}

/// Parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Ref(CellRef),
    /// Inclusive rectangle; corners normalised so `start <= end`.
    Range(CellRef, CellRef),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    /// An identifier that is neither a reference nor a function call.
    Name(String),
}

impl Expr {
    /// Collect every cell this expression reads, ranges expanded.
    ///
    /// Ranges larger than [`MAX_RANGE_CELLS`] are skipped.
    pub fn references(&self, out: &mut Vec<CellRef>) {
        match self {
            Expr::Ref(cell) => out.push(*cell),
            Expr::Range(start, end) => {
                let rows = u64::from(end.row - start.row) + 1;
                let cols = u64::from(end.col - start.col) + 1;
                if rows * cols > MAX_RANGE_CELLS {
                    return;
                }
                for row in start.row..=end.row {
                    for col in start.col..=end.col {
                        out.push(CellRef::new(row, col));
                    }
                }
            }
            Expr::Unary(_, inner) => inner.references(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.references(out);
                rhs.references(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.references(out)),
            Expr::Number(_) | Expr::Text(_) | Expr::Bool(_) | Expr::Name(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Colon,
    Op(&'static str),
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |position: usize, message: String| ParseError { position, message };

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &src[start..i];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| err(start, format!("invalid number '{}'", text)))?;
                tokens.push((start, Token::Number(n)));
            }
            b'"' => {
                i += 1;
                let mut text = String::new();
                loop {
                    let rest = &src[i..];
                    let Some(quote) = rest.find('"') else {
                        return Err(err(start, "unterminated string".to_string()));
                    };
                    text.push_str(&rest[..quote]);
                    i += quote + 1;
                    if i < bytes.len() && bytes[i] == b'"' {
                        text.push('"');
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((start, Token::Text(text)));
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'$' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'$' | b'.'))
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
            }
            b'(' => {
                i += 1;
                tokens.push((start, Token::LParen));
            }
            b')' => {
                i += 1;
                tokens.push((start, Token::RParen));
            }
            b',' => {
                i += 1;
                tokens.push((start, Token::Comma));
            }
            b':' => {
                i += 1;
                tokens.push((start, Token::Colon));
            }
            b'<' | b'>' => {
                let two = src.get(i..i + 2);
                let op = match two {
                    Some("<=") => "<=",
                    Some(">=") => ">=",
                    Some("<>") => "<>",
                    _ if c == b'<' => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push((start, Token::Op(op)));
            }
            b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'%' => {
                let op = match c {
                    b'+' => "+",
                    b'-' => "-",
                    b'*' => "*",
                    b'/' => "/",
                    b'^' => "^",
                    b'&' => "&",
                    b'=' => "=",
                    _ => "%",
                };
                i += 1;
                tokens.push((start, Token::Op(op)));
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(err(start, format!("unexpected character '{}'", ch)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            position: self.position(),
            message: message.into(),
        })
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.concat()?;
        while let Some(op) = self.eat_op(&["=", "<>", "<", "<=", ">", ">="]) {
            let rhs = self.concat()?;
            let op = match op {
                "=" => BinaryOp::Eq,
                "<>" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                _ => BinaryOp::Ge,
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn concat(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive()?;
        while self.eat_op(&["&"]).is_some() {
            let rhs = self.additive()?;
            lhs = Expr::Binary(BinaryOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.multiplicative()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.power()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.power()?;
            let op = if op == "*" { BinaryOp::Mul } else { BinaryOp::Div };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while self.eat_op(&["^"]).is_some() {
            let rhs = self.unary()?;
            lhs = Expr::Binary(BinaryOp::Pow, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op) = self.eat_op(&["-", "+"]) {
            let inner = self.unary()?;
            let op = if op == "-" { UnaryOp::Neg } else { UnaryOp::Plus };
            return Ok(Expr::Unary(op, Box::new(inner)));
        }
        let mut expr = self.primary()?;
        while self.eat_op(&["%"]).is_some() {
            expr = Expr::Unary(UnaryOp::Percent, Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::LParen) => {
                let inner = self.comparison()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => self.error("expected ')'"),
                }
            }
            Some(Token::Ident(name)) => self.identifier(name),
            Some(_) => {
                self.pos -= 1;
                self.error("unexpected token")
            }
            None => self.error("unexpected end of formula"),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, ParseError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            return self.call(name.to_ascii_uppercase());
        }
        if name.eq_ignore_ascii_case("TRUE") {
            return Ok(Expr::Bool(true));
        }
        if name.eq_ignore_ascii_case("FALSE") {
            return Ok(Expr::Bool(false));
        }
        let Some(start) = CellRef::parse(&name) else {
            return Ok(Expr::Name(name));
        };
        if self.peek() != Some(&Token::Colon) {
            return Ok(Expr::Ref(start));
        }
        self.pos += 1;
        let end = match self.next() {
            Some(Token::Ident(text)) => CellRef::parse(&text),
            _ => None,
        };
        let Some(end) = end else {
            return self.error("expected cell reference after ':'");
        };
        Ok(Expr::Range(
            CellRef::new(start.row.min(end.row), start.col.min(end.col)),
            CellRef::new(start.row.max(end.row), start.col.max(end.col)),
        ))
    }

    fn call(&mut self, name: String) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(Expr::Call(name, args));
        }
        loop {
            args.push(self.comparison()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return self.error(format!("expected ',' or ')' in call to {}", name)),
            }
        }
        Ok(Expr::Call(name, args))
    }
}

/// Parse formula source. A single leading `=` is optional.
pub fn parse_formula(src: &str) -> Result<Expr, ParseError> {
    let body = src.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: body.len(),
    };
    let expr = parser.comparison()?;
    if parser.pos != parser.tokens.len() {
        return parser.error("unexpected trailing input");
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(src: &str) -> Vec<String> {
        let mut out = Vec::new();
        parse_formula(src).unwrap().references(&mut out);
        out.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_precedence() {
        let expr = parse_formula("=1+2*3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Number(1.0)),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Number(2.0)),
                    Box::new(Expr::Number(3.0)),
                )),
            )
        );
    }

    #[test]
    fn test_range_and_call() {
        let expr = parse_formula("=sum(A3:A1)").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "SUM".to_string(),
                vec![Expr::Range(CellRef::new(0, 0), CellRef::new(2, 0))]
            )
        );
        assert_eq!(refs("=SUM(A1:A3)"), vec!["A1", "A2", "A3"]);
        assert_eq!(refs("=B1+$C$2*B1"), vec!["B1", "C2", "B1"]);
        assert_eq!(refs("=\"A1\"&1"), Vec::<String>::new());
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_formula("=TRUE").unwrap(), Expr::Bool(true));
        assert_eq!(
            parse_formula("=\"say \"\"hi\"\"\"").unwrap(),
            Expr::Text("say \"hi\"".to_string())
        );
        assert_eq!(parse_formula("=1.5e2").unwrap(), Expr::Number(150.0));
        assert_eq!(parse_formula("=foo").unwrap(), Expr::Name("foo".to_string()));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(matches!(
            parse_formula("=A1<>2").unwrap(),
            Expr::Binary(BinaryOp::Ne, _, _)
        ));
        assert!(matches!(
            parse_formula("=A1>=2").unwrap(),
            Expr::Binary(BinaryOp::Ge, _, _)
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_formula("=1+").is_err());
        assert!(parse_formula("=(1+2").is_err());
        assert!(parse_formula("=SUM(1,").is_err());
        assert!(parse_formula("=1 2").is_err());
        assert!(parse_formula("=\"open").is_err());
        assert!(parse_formula("=A1:").is_err());
        assert!(parse_formula("=#").is_err());
    }
}
