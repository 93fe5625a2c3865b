use crate::core::error::{Error, Result};
use crate::core::types::{Value, parse_number};
use crate::expr::{BinaryOp, Expr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Property(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::syntax("unterminated string in expression")),
                        Some('\\') => {
                            if let Some(&next) = chars.get(i + 1) {
                                s.push(next);
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '@' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.' || chars[i] == '$') {
                    i += 1;
                }
                if i == start {
                    return Err(Error::syntax("empty property name after '@'"));
                }
                tokens.push(Token::Property(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = parse_number(&text).ok_or_else(|| Error::syntax(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = match two.as_str() {
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "&&" => Some("&&"),
                    "||" => Some("||"),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Token::Op(op));
                    i += 2;
                    continue;
                }
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '^' => "^",
                    '<' => "<",
                    '>' => ">",
                    '!' => "!",
                    '=' => "==",
                    _ => return Err(Error::syntax(format!("unexpected character '{}' in expression", c))),
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Binding power of infix operators: (left, right, op).
fn infix(op: &str) -> Option<(u8, u8, BinaryOp)> {
    let entry = match op {
        "||" => (1, 2, BinaryOp::Or),
        "&&" => (3, 4, BinaryOp::And),
        "==" => (5, 6, BinaryOp::Eq),
        "!=" => (5, 6, BinaryOp::Ne),
        "<" => (7, 8, BinaryOp::Lt),
        "<=" => (7, 8, BinaryOp::Le),
        ">" => (7, 8, BinaryOp::Gt),
        ">=" => (7, 8, BinaryOp::Ge),
        "+" => (9, 10, BinaryOp::Add),
        "-" => (9, 10, BinaryOp::Sub),
        "*" => (11, 12, BinaryOp::Mul),
        "/" => (11, 12, BinaryOp::Div),
        "%" => (11, 12, BinaryOp::Mod),
        // right associative
        "^" => (16, 15, BinaryOp::Pow),
        _ => return None,
    };
    Some(entry)
}

const PREFIX_POWER: u8 = 13;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expression(&mut self, min_power: u8) -> Result<Expr> {
        let mut lhs = self.primary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                _ => break,
            };
            let Some((left, right, bin)) = infix(op) else {
                return Err(Error::syntax(format!("unexpected operator '{}'", op)));
            };
            if left < min_power {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(right)?;
            lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Property(p)) => Ok(Expr::Property(p)),
            Some(Token::Op("-")) => Ok(Expr::Neg(Box::new(self.expression(PREFIX_POWER)?))),
            Some(Token::Op("+")) => self.expression(PREFIX_POWER),
            Some(Token::Op("!")) => Ok(Expr::Not(Box::new(self.expression(PREFIX_POWER)?))),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::syntax("missing ')' in expression")),
                }
            }
            Some(Token::Ident(name)) => {
                let lower = name.to_ascii_lowercase();
                match lower.as_str() {
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    "inf" => return Ok(Expr::Literal(Value::Number(f64::INFINITY))),
                    _ => {}
                }
                if self.peek() != Some(&Token::LParen) {
                    return Err(Error::syntax(format!("unknown identifier '{}'", name)));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                } else {
                    loop {
                        args.push(self.expression(0)?);
                        match self.bump() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(Error::syntax(format!("missing ')' after arguments of {}", name))),
                        }
                    }
                }
                super::functions::check_arity(&lower, args.len())?;
                Ok(Expr::Call(lower, args))
            }
            Some(other) => Err(Error::syntax(format!("unexpected token {:?} in expression", other))),
            None => Err(Error::syntax("unexpected end of expression")),
        }
    }
}

/// Parses an expression. Trailing tokens are a syntax error.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(Error::syntax("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(Error::syntax(format!("unexpected trailing input in expression '{}'", input)));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_parse_call_and_property() {
        let e = parse("startswith(@name, \"ab\")").unwrap();
        assert_eq!(
            e,
            Expr::Call(
                "startswith".into(),
                vec![Expr::Property("name".into()), Expr::Literal(Value::Str("ab".into()))]
            )
        );
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "1 +", "(1", "@", "foo", "1 2", "lower(1, 2, 3)", "'abc"] {
            let err = parse(bad).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::BadQuerySyntax | ErrorKind::BadParameter),
                "{} -> {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_unary_binds_tighter_than_binary() {
        let e = parse("-2 ^ 2").unwrap();
        assert_eq!(e.eval(&|_: &str| -> Option<Value> { None }).unwrap(), Value::Number(-4.0));
    }
}
