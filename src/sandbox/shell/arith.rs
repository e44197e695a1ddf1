//! `$(( ))` arithmetic.
//!
//! Precedence-climbing evaluator over i64. Variables resolve through the
//! caller's lookup; unset or non-numeric values evaluate to 0, matching
//! POSIX arithmetic expansion.

use crate::error::{Error, Result};

pub fn evaluate<F>(expr: &str, lookup: F) -> Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let tokens = scan(expr)?;
    let mut parser = ArithParser {
        tokens,
        pos: 0,
        lookup: &lookup,
    };
    let value = parser.expression(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::InvalidParameter(format!(
            "sh: arithmetic syntax error: {expr}"
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum ArithToken {
    Number(i64),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
}

fn scan(expr: &str) -> Result<Vec<ArithToken>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse().map_err(|_| {
                    Error::InvalidParameter(format!("sh: arithmetic overflow: {text}"))
                })?;
                tokens.push(ArithToken::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(ArithToken::Ident(chars[start..i].iter().collect()));
            }
            '$' => i += 1, // $NAME and NAME are equivalent here
            '(' => {
                tokens.push(ArithToken::Open);
                i += 1;
            }
            ')' => {
                tokens.push(ArithToken::Close);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(ArithToken::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => "%",
                }));
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let two = chars.get(i + 1) == Some(&'=');
                let op = match (c, two) {
                    ('<', true) => "<=",
                    ('<', false) => "<",
                    ('>', true) => ">=",
                    ('>', false) => ">",
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    _ => {
                        return Err(Error::InvalidParameter(format!(
                            "sh: arithmetic syntax error near '{c}'"
                        )))
                    }
                };
                tokens.push(ArithToken::Op(op));
                i += if two { 2 } else { 1 };
            }
            other => {
                return Err(Error::InvalidParameter(format!(
                    "sh: arithmetic syntax error near '{other}'"
                )))
            }
        }
    }
    Ok(tokens)
}

fn binding_power(op: &str) -> Option<u8> {
    match op {
        "==" | "!=" | "<" | "<=" | ">" | ">=" => Some(1),
        "+" | "-" => Some(2),
        "*" | "/" | "%" => Some(3),
        _ => None,
    }
}

struct ArithParser<'a> {
    tokens: Vec<ArithToken>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl ArithParser<'_> {
    fn peek(&self) -> Option<&ArithToken> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<ArithToken> {
        let tok = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(tok)
    }

    fn expression(&mut self, min_bp: u8) -> Result<i64> {
        let mut lhs = self.primary()?;
        while let Some(ArithToken::Op(op)) = self.peek() {
            let op = *op;
            let Some(bp) = binding_power(op) else { break };
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.expression(bp + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<i64> {
        match self.bump() {
            Some(ArithToken::Number(n)) => Ok(n),
            Some(ArithToken::Ident(name)) => Ok((self.lookup)(&name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0)),
            Some(ArithToken::Op("-")) => Ok(-self.primary()?),
            Some(ArithToken::Op("+")) => self.primary(),
            Some(ArithToken::Open) => {
                let value = self.expression(0)?;
                match self.bump() {
                    Some(ArithToken::Close) => Ok(value),
                    _ => Err(Error::InvalidParameter(
                        "sh: arithmetic syntax error: expected ')'".into(),
                    )),
                }
            }
            _ => Err(Error::InvalidParameter(
                "sh: arithmetic syntax error: expected operand".into(),
            )),
        }
    }
}

fn apply(op: &str, lhs: i64, rhs: i64) -> Result<i64> {
    Ok(match op {
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" => {
            if rhs == 0 {
                return Err(Error::InvalidParameter("sh: division by zero".into()));
            }
            lhs.wrapping_div(rhs)
        }
        "%" => {
            if rhs == 0 {
                return Err(Error::InvalidParameter("sh: division by zero".into()));
            }
            lhs.wrapping_rem(rhs)
        }
        "==" => i64::from(lhs == rhs),
        "!=" => i64::from(lhs != rhs),
        "<" => i64::from(lhs < rhs),
        "<=" => i64::from(lhs <= rhs),
        ">" => i64::from(lhs > rhs),
        ">=" => i64::from(lhs >= rhs),
        _ => return Err(Error::InvalidParameter(format!("sh: unknown operator {op}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str) -> i64 {
        evaluate(expr, |_| None).unwrap()
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("3+4*2"), 11);
        assert_eq!(eval("(3+4)*2"), 14);
        assert_eq!(eval("10-2-3"), 5, "left associative");
        assert_eq!(eval("7/2"), 3);
        assert_eq!(eval("7%3"), 1);
    }

    #[test]
    fn unary_and_comparisons() {
        assert_eq!(eval("-5+2"), -3);
        assert_eq!(eval("3 < 5"), 1);
        assert_eq!(eval("3 >= 5"), 0);
        assert_eq!(eval("2==2"), 1);
        assert_eq!(eval("2!=2"), 0);
    }

    #[test]
    fn variables_resolve_through_lookup() {
        let result = evaluate("N * 2 + $M", |name| match name {
            "N" => Some("21".to_string()),
            "M" => Some("5".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(result, 47);
        assert_eq!(eval("UNSET + 1"), 1, "unset variables are 0");
    }

    #[test]
    fn errors() {
        assert!(evaluate("1/0", |_| None).is_err());
        assert!(evaluate("1 +", |_| None).is_err());
        assert!(evaluate("(1", |_| None).is_err());
        assert!(evaluate("1 ^ 2", |_| None).is_err());
    }
}
