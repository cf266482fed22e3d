//! Parser for decision conditions.
//!
//! The accepted language is deliberately small: comparisons between a field
//! path and a literal (or two field paths), combined with `&&` / `||` / `!`
//! and parentheses. There is no arithmetic and no function call syntax, so a
//! condition can never do more than read the context.
//!
//! ```text
//! expr       := or
//! or         := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := ("!" | "not") unary | primary
//! primary    := "(" expr ")" | operand (compare_op operand)?
//! operand    := field_path | string | number | true | false | null | "[" literals "]"
//! compare_op := == | === | != | !== | > | >= | < | <= | contains | in
//! ```

use serde_json::{Number, Value};
use thiserror::Error;

use super::condition::{CompareOp, Operand, Predicate};
use super::operators::is_truthy;

/// A condition string that could not be compiled.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid condition at {position}: {message}")]
pub struct ExpressionError {
    pub position: usize,
    pub message: String,
}

impl ExpressionError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    And,
    Or,
    Not,
    Compare(CompareOp),
    Literal(Value),
    Ident(String),
}

/// Prefixes stripped from field paths; stored conditions often address the
/// context object explicitly.
const CONTEXT_PREFIXES: &[&str] = &["context.", "ctx."];

/// Compile a condition string into a predicate tree.
pub fn parse_condition(source: &str) -> Result<Predicate, ExpressionError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExpressionError::new(0, "empty condition"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.chars().count(),
    };
    let predicate = parser.parse_or()?;
    if let Some((position, token)) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::new(
            *position,
            format!("unexpected token {:?}", token),
        ));
    }
    Ok(predicate)
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '&' if next == Some('&') => {
                i += 2;
                Token::And
            }
            '|' if next == Some('|') => {
                i += 2;
                Token::Or
            }
            '!' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                Token::Compare(CompareOp::Ne)
            }
            '!' => {
                i += 1;
                Token::Not
            }
            '=' if next == Some('=') => {
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
                Token::Compare(CompareOp::Eq)
            }
            '=' => {
                return Err(ExpressionError::new(i, "assignment is not allowed, use =="));
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Compare(CompareOp::Ge)
            }
            '>' => {
                i += 1;
                Token::Compare(CompareOp::Gt)
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Compare(CompareOp::Le)
            }
            '<' => {
                i += 1;
                Token::Compare(CompareOp::Lt)
            }
            '\'' | '"' => {
                let (text, consumed) = read_string(&chars, i)?;
                i += consumed;
                Token::Literal(Value::String(text))
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let (value, consumed) = read_number(&chars, i)?;
                i += consumed;
                Token::Literal(value)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_alphanumeric() || matches!(chars[end], '_' | '$' | '.'))
                {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                i = end;
                keyword_or_ident(word)
            }
            other => {
                return Err(ExpressionError::new(
                    i,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}

fn keyword_or_ident(word: String) -> Token {
    match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" | "undefined" => Token::Literal(Value::Null),
        "contains" | "includes" => Token::Compare(CompareOp::Contains),
        "in" => Token::Compare(CompareOp::In),
        _ => {
            let path = CONTEXT_PREFIXES
                .iter()
                .find_map(|prefix| word.strip_prefix(prefix))
                .map(str::to_string)
                .unwrap_or(word);
            Token::Ident(path)
        }
    }
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ExpressionError::new(i, "dangling escape"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1 - start)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExpressionError::new(start, "unterminated string literal"))
}

fn read_number(chars: &[char], start: usize) -> Result<(Value, usize), ExpressionError> {
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    let value = if let Ok(i) = text.parse::<i64>() {
        Value::Number(i.into())
    } else {
        let f = text
            .parse::<f64>()
            .map_err(|_| ExpressionError::new(start, format!("invalid number '{}'", text)))?;
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| ExpressionError::new(start, "non-finite number"))?
    };
    Ok((value, end - start))
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
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Predicate, ExpressionError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate, ExpressionError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::And(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Predicate::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, ExpressionError> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            return match self.advance() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(ExpressionError::new(self.position(), "expected ')'")),
            };
        }

        let left = self.parse_operand()?;
        if let Some(Token::Compare(op)) = self.peek().cloned() {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Predicate::Compare { left, op, right });
        }

        Ok(match left {
            Operand::Field(path) => Predicate::Truthy(Operand::Field(path)),
            Operand::Literal(value) => Predicate::Const(is_truthy(&value)),
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Ident(path)) => Ok(Operand::Field(path)),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    match self.advance() {
                        Some(Token::RBracket) => break,
                        Some(Token::Literal(value)) => items.push(value),
                        _ => {
                            return Err(ExpressionError::new(
                                self.position(),
                                "list items must be literals",
                            ))
                        }
                    }
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(ExpressionError::new(self.position(), "expected ',' or ']'")),
                    }
                }
                Ok(Operand::Literal(Value::Array(items)))
            }
            Some(other) => Err(ExpressionError::new(
                position,
                format!("expected a field or literal, found {:?}", other),
            )),
            None => Err(ExpressionError::new(position, "unexpected end of condition")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_comparison() {
        let p = parse_condition("intent == '投诉'").unwrap();
        assert_eq!(
            p,
            Predicate::Compare {
                left: Operand::Field("intent".into()),
                op: CompareOp::Eq,
                right: Operand::Literal(json!("投诉")),
            }
        );
    }

    #[test]
    fn test_parse_js_style_operators_and_prefix() {
        let p = parse_condition("context.needHuman === true && !(context.qaMatched)").unwrap();
        match p {
            Predicate::And(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], Predicate::Compare { left: Operand::Field(f), .. } if f == "needHuman"));
                assert!(matches!(&items[1], Predicate::Not(_)));
            }
            other => panic!("unexpected predicate: {:?}", other),
        }
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let p = parse_condition("a == 1 || b == 2 && c == 3").unwrap();
        match p {
            Predicate::Or(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(items[1], Predicate::And(_)));
            }
            other => panic!("unexpected predicate: {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_literal() {
        let p = parse_condition("intent in ['投诉', '退款', 3]").unwrap();
        assert!(matches!(
            p,
            Predicate::Compare { op: CompareOp::In, right: Operand::Literal(Value::Array(ref items)), .. } if items.len() == 3
        ));
    }

    #[test]
    fn test_parse_numbers() {
        let p = parse_condition("confidence >= 0.75 and score > -2").unwrap();
        assert!(matches!(p, Predicate::And(_)));
    }

    #[test]
    fn test_rejects_assignment_and_garbage() {
        assert!(parse_condition("intent = 'x'").is_err());
        assert!(parse_condition("").is_err());
        assert!(parse_condition("a == ").is_err());
        assert!(parse_condition("(a == 1").is_err());
        assert!(parse_condition("a == 1 b").is_err());
        assert!(parse_condition("a + 1 > 2").is_err());
        assert!(parse_condition("'open").is_err());
    }

    #[test]
    fn test_error_position() {
        let err = parse_condition("a == 1 # 2").unwrap_err();
        assert_eq!(err.position, 7);
    }
}
