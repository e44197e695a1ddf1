//! Shell tokenizer.
//!
//! Splits source into operator tokens and words. Words keep their quote
//! structure as parts so the expansion pass can decide what splits and
//! what stays verbatim.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Pipe,
    And,
    Or,
    Semi,
    /// `>` or `>>` on the given fd (1 or 2).
    RedirOut { fd: u8, append: bool },
    RedirIn,
    /// `2>&1`
    ErrToOut,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted or quoted literal text; quoted text never field-splits.
    Literal { text: String, quoted: bool },
    /// `$NAME` or `${NAME}` with an optional `:-` default.
    Var {
        name: String,
        default: Option<String>,
        quoted: bool,
    },
    /// `$?`
    Status { quoted: bool },
    /// `$(body)` or backticks.
    CmdSub { body: String, quoted: bool },
    /// `$((body))`
    Arith { body: String, quoted: bool },
}

impl Word {
    pub fn literal(text: &str) -> Word {
        Word {
            parts: vec![WordPart::Literal {
                text: text.to_string(),
                quoted: false,
            }],
        }
    }

    /// The word's text when it contains only literal parts.
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal { text, .. } => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }

    /// True when every part is unquoted literal text.
    pub fn is_bare(&self) -> bool {
        self.parts
            .iter()
            .all(|p| matches!(p, WordPart::Literal { quoted: false, .. }))
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut word = Word::default();
        let mut pending_literal = String::new();

        macro_rules! flush_literal {
            () => {
                if !pending_literal.is_empty() {
                    word.parts.push(WordPart::Literal {
                        text: std::mem::take(&mut pending_literal),
                        quoted: false,
                    });
                }
            };
        }
        macro_rules! flush_word {
            () => {
                flush_literal!();
                if !word.parts.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
            };
        }

        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' => {
                    self.bump();
                    flush_word!();
                }
                '\n' | ';' => {
                    self.bump();
                    flush_word!();
                    tokens.push(Token::Semi);
                }
                '#' if word.parts.is_empty() && pending_literal.is_empty() => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '|' => {
                    self.bump();
                    flush_word!();
                    if self.peek() == Some('|') {
                        self.bump();
                        tokens.push(Token::Or);
                    } else {
                        tokens.push(Token::Pipe);
                    }
                }
                '&' => {
                    self.bump();
                    if self.peek() == Some('&') {
                        self.bump();
                        flush_word!();
                        tokens.push(Token::And);
                    } else {
                        return Err(Error::InvalidParameter(
                            "sh: background jobs are not supported".into(),
                        ));
                    }
                }
                '<' => {
                    self.bump();
                    flush_word!();
                    tokens.push(Token::RedirIn);
                }
                '>' => {
                    self.bump();
                    // A bare `1` or `2` directly before `>` names the fd.
                    let fd = match pending_literal.as_str() {
                        "2" if word.parts.is_empty() => {
                            pending_literal.clear();
                            2
                        }
                        "1" if word.parts.is_empty() => {
                            pending_literal.clear();
                            1
                        }
                        _ => 1,
                    };
                    flush_word!();
                    if self.peek() == Some('>') {
                        self.bump();
                        tokens.push(Token::RedirOut { fd, append: true });
                    } else if fd == 2 && self.peek() == Some('&') && self.peek_at(1) == Some('1') {
                        self.bump();
                        self.bump();
                        tokens.push(Token::ErrToOut);
                    } else {
                        tokens.push(Token::RedirOut { fd, append: false });
                    }
                }
                '\'' => {
                    self.bump();
                    flush_literal!();
                    let mut text = String::new();
                    loop {
                        match self.bump() {
                            Some('\'') => break,
                            Some(c) => text.push(c),
                            None => {
                                return Err(Error::InvalidParameter(
                                    "sh: unterminated single quote".into(),
                                ))
                            }
                        }
                    }
                    word.parts.push(WordPart::Literal { text, quoted: true });
                }
                '"' => {
                    self.bump();
                    flush_literal!();
                    self.double_quoted(&mut word)?;
                }
                '\\' => {
                    self.bump();
                    if let Some(c) = self.bump() {
                        if c != '\n' {
                            pending_literal.push(c);
                        }
                    }
                }
                '$' => {
                    flush_literal!();
                    let part = self.dollar(false)?;
                    word.parts.push(part);
                }
                '`' => {
                    self.bump();
                    flush_literal!();
                    let mut body = String::new();
                    loop {
                        match self.bump() {
                            Some('`') => break,
                            Some(c) => body.push(c),
                            None => {
                                return Err(Error::InvalidParameter(
                                    "sh: unterminated backquote".into(),
                                ))
                            }
                        }
                    }
                    word.parts.push(WordPart::CmdSub {
                        body,
                        quoted: false,
                    });
                }
                _ => {
                    pending_literal.push(c);
                    self.bump();
                }
            }
        }
        flush_word!();
        Ok(tokens)
    }

    fn double_quoted(&mut self, word: &mut Word) -> Result<()> {
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some(c @ ('$' | '`' | '"' | '\\')) => text.push(c),
                        Some(c) => {
                            text.push('\\');
                            text.push(c);
                        }
                        None => {
                            return Err(Error::InvalidParameter(
                                "sh: unterminated double quote".into(),
                            ))
                        }
                    }
                }
                Some('$') => {
                    if !text.is_empty() {
                        word.parts.push(WordPart::Literal {
                            text: std::mem::take(&mut text),
                            quoted: true,
                        });
                    }
                    let part = self.dollar(true)?;
                    word.parts.push(part);
                }
                Some('`') => {
                    self.bump();
                    if !text.is_empty() {
                        word.parts.push(WordPart::Literal {
                            text: std::mem::take(&mut text),
                            quoted: true,
                        });
                    }
                    let mut body = String::new();
                    loop {
                        match self.bump() {
                            Some('`') => break,
                            Some(c) => body.push(c),
                            None => {
                                return Err(Error::InvalidParameter(
                                    "sh: unterminated backquote".into(),
                                ))
                            }
                        }
                    }
                    word.parts.push(WordPart::CmdSub { body, quoted: true });
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
                None => {
                    return Err(Error::InvalidParameter(
                        "sh: unterminated double quote".into(),
                    ))
                }
            }
        }
        // An empty "" still produces a field.
        if !text.is_empty() || word.parts.is_empty() {
            word.parts.push(WordPart::Literal { text, quoted: true });
        }
        Ok(())
    }

    /// Parses the construct after `$` (the `$` itself not yet consumed).
    fn dollar(&mut self, quoted: bool) -> Result<WordPart> {
        self.bump(); // `$`
        match self.peek() {
            Some('?') => {
                self.bump();
                Ok(WordPart::Status { quoted })
            }
            Some('(') if self.peek_at(1) == Some('(') => {
                self.bump();
                self.bump();
                let body = self.until_double_close()?;
                Ok(WordPart::Arith { body, quoted })
            }
            Some('(') => {
                self.bump();
                let body = self.until_balanced_close()?;
                Ok(WordPart::CmdSub { body, quoted })
            }
            Some('{') => {
                self.bump();
                let mut inner = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) => inner.push(c),
                        None => {
                            return Err(Error::InvalidParameter("sh: unterminated ${".into()))
                        }
                    }
                }
                let (name, default) = match inner.split_once(":-") {
                    Some((name, default)) => (name.to_string(), Some(default.to_string())),
                    None => (inner, None),
                };
                Ok(WordPart::Var {
                    name,
                    default,
                    quoted,
                })
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Ok(WordPart::Var {
                    name,
                    default: None,
                    quoted,
                })
            }
            Some(c) if c.is_ascii_digit() => {
                let mut name = String::new();
                name.push(c);
                self.bump();
                Ok(WordPart::Var {
                    name,
                    default: None,
                    quoted,
                })
            }
            Some('#') | Some('@') | Some('*') => {
                let name = self.bump().unwrap().to_string();
                Ok(WordPart::Var {
                    name,
                    default: None,
                    quoted,
                })
            }
            _ => Ok(WordPart::Literal {
                text: "$".to_string(),
                quoted,
            }),
        }
    }

    /// Consumes up to the matching `))` of an arithmetic expansion.
    fn until_double_close(&mut self) -> Result<String> {
        let mut body = String::new();
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some('(') => {
                    depth += 1;
                    body.push('(');
                }
                Some(')') => {
                    if depth == 0 {
                        if self.peek() == Some(')') {
                            self.bump();
                            return Ok(body);
                        }
                        return Err(Error::InvalidParameter("sh: malformed $((".into()));
                    }
                    depth -= 1;
                    body.push(')');
                }
                Some(c) => body.push(c),
                None => return Err(Error::InvalidParameter("sh: unterminated $((".into())),
            }
        }
    }

    /// Consumes up to the `)` closing a command substitution.
    fn until_balanced_close(&mut self) -> Result<String> {
        let mut body = String::new();
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some('(') => {
                    depth += 1;
                    body.push('(');
                }
                Some(')') => {
                    if depth == 0 {
                        return Ok(body);
                    }
                    depth -= 1;
                    body.push(')');
                }
                Some(c) => body.push(c),
                None => return Err(Error::InvalidParameter("sh: unterminated $(".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Word(w) => w.as_literal(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_words_split_on_whitespace() {
        let tokens = tokenize("echo hello  world").unwrap();
        assert_eq!(words(&tokens), ["echo", "hello", "world"]);
    }

    #[test]
    fn operators_recognized() {
        let tokens = tokenize("a | b && c || d ; e").unwrap();
        let ops: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Word(_)))
            .collect();
        assert_eq!(ops, [&Token::Pipe, &Token::And, &Token::Or, &Token::Semi]);
    }

    #[test]
    fn fd_redirects() {
        let tokens = tokenize("cmd > out 2> err >> app 2>&1").unwrap();
        assert!(tokens.contains(&Token::RedirOut { fd: 1, append: false }));
        assert!(tokens.contains(&Token::RedirOut { fd: 2, append: false }));
        assert!(tokens.contains(&Token::RedirOut { fd: 1, append: true }));
        assert!(tokens.contains(&Token::ErrToOut));
    }

    #[test]
    fn quoting_preserves_spaces() {
        let tokens = tokenize("echo 'a b' \"c d\"").unwrap();
        assert_eq!(words(&tokens), ["echo", "a b", "c d"]);
    }

    #[test]
    fn dollar_forms() {
        let tokens = tokenize("echo $HOME ${X:-fallback} $? $((1+2)) $(date)").unwrap();
        let Token::Word(w) = &tokens[1] else { panic!() };
        assert!(matches!(&w.parts[0], WordPart::Var { name, .. } if name == "HOME"));
        let Token::Word(w) = &tokens[2] else { panic!() };
        assert!(matches!(
            &w.parts[0],
            WordPart::Var { name, default: Some(d), .. } if name == "X" && d == "fallback"
        ));
        let Token::Word(w) = &tokens[3] else { panic!() };
        assert!(matches!(&w.parts[0], WordPart::Status { .. }));
        let Token::Word(w) = &tokens[4] else { panic!() };
        assert!(matches!(&w.parts[0], WordPart::Arith { body, .. } if body == "1+2"));
        let Token::Word(w) = &tokens[5] else { panic!() };
        assert!(matches!(&w.parts[0], WordPart::CmdSub { body, .. } if body == "date"));
    }

    #[test]
    fn single_quotes_suppress_expansion() {
        let tokens = tokenize("echo '$HOME'").unwrap();
        let Token::Word(w) = &tokens[1] else { panic!() };
        assert_eq!(
            w.parts[0],
            WordPart::Literal {
                text: "$HOME".into(),
                quoted: true
            }
        );
    }

    #[test]
    fn comments_and_unterminated_quotes() {
        let tokens = tokenize("# whole line\necho hi").unwrap();
        assert_eq!(words(&tokens), ["echo", "hi"]);
        assert!(tokenize("echo 'open").is_err());
        assert!(tokenize("echo \"open").is_err());
        assert!(tokenize("sleep 5 &").is_err(), "background not supported");
    }

    #[test]
    fn adjacent_parts_form_one_word() {
        let tokens = tokenize("echo pre$X'post'").unwrap();
        let Token::Word(w) = &tokens[1] else { panic!() };
        assert_eq!(w.parts.len(), 3);
    }
}
