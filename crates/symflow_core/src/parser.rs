use crate::expr::{BinaryOp, Expr, UnaryOp};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected character `{character}` at offset {offset}")]
    UnexpectedCharacter { character: char, offset: usize },
    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),
    #[error("unexpected token {found} at token {position}")]
    UnexpectedToken { found: String, position: usize },
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("expected `)`")]
    MissingParen,
}

/// Parses an infix expression such as `1.4*x3 - 0.9*x1` into a tree.
///
/// Precedence, loosest first: `+ -`, `* /`, unary `-`, `^`/`**` (right
/// associative). Calls to unknown functions become uninterpreted functions.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ParseError::UnexpectedToken {
            found: format!("{token:?}"),
            position: parser.pos,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&(_, d)) = chars.peek() {
                let exponent_sign = (d == '+' || d == '-') && literal.ends_with(['e', 'E']);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| ParseError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => {
                    if matches!(chars.peek(), Some(&(_, '*'))) {
                        chars.next();
                        Token::Caret
                    } else {
                        Token::Star
                    }
                }
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => {
                    return Err(ParseError::UnexpectedCharacter {
                        character: other,
                        offset,
                    })
                }
            };
            tokens.push(token);
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

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(Expr::unary(UnaryOp::Neg, self.parse_unary()?))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // right associative; exponent may carry its own sign
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.pos;
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Constant(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::unary(UnaryOp::from_name(&name), arg))
                } else {
                    Ok(Expr::symbol(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ParseError::UnexpectedToken {
                found: format!("{token:?}"),
                position,
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ParseError::MissingParen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Symbol;

    fn eval_at(input: &str, x: f64) -> f64 {
        parse(input)
            .expect("parse")
            .eval(&|_: &Symbol| x)
            .expect("finite")
    }

    #[test]
    fn parses_laub_loomis_style_equations() {
        let e = parse("2 - 1.3*x3*x4").expect("parse");
        assert_eq!(e.to_string(), "2 - 1.3*x3*x4");
        let e = parse("0.6 * x7 - 0.8 * x2 * x3").expect("parse");
        assert_eq!(e.to_string(), "0.6*x7 - 0.8*x2*x3");
    }

    #[test]
    fn respects_precedence_and_associativity() {
        assert_eq!(eval_at("1 - 2 - 3", 0.0), -4.0);
        assert_eq!(eval_at("2^3^2", 0.0), 512.0);
        assert_eq!(eval_at("2**3", 0.0), 8.0);
        assert_eq!(eval_at("-x^2", 3.0), -9.0);
        assert_eq!(eval_at("2^-1", 0.0), 0.5);
        assert_eq!(eval_at("12/3/2", 0.0), 2.0);
        assert_eq!(eval_at("(1 + x) * 2", 1.0), 4.0);
    }

    #[test]
    fn parses_scientific_notation_and_functions() {
        assert!((eval_at("1.5e-3 * 2E2", 0.0) - 0.3).abs() < 1e-15);
        assert!((eval_at("sin(x) + cos(x)^2 + exp(0) + ln(1)", 0.5)
            - (0.5_f64.sin() + 0.5_f64.cos().powi(2) + 1.0))
            .abs()
            < 1e-12);
    }

    #[test]
    fn unknown_functions_are_uninterpreted() {
        let e = parse("g(x) + 1").expect("parse");
        assert!(matches!(e.first_uninterpreted(), Some(UnaryOp::Function(name)) if &**name == "g"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse("1 +"), Err(ParseError::UnexpectedEnd));
        assert_eq!(parse("(x + 1"), Err(ParseError::MissingParen));
        assert!(matches!(
            parse("x $ y"),
            Err(ParseError::UnexpectedCharacter { character: '$', .. })
        ));
        assert!(matches!(parse("x y"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(parse("1.2.3"), Err(ParseError::InvalidNumber(_))));
    }
}
