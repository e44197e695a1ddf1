//! Shell grammar.
//!
//! program  := list (';' list)*
//! list     := pipeline (('&&' | '||') pipeline)*
//! pipeline := simple ('|' simple)*
//! simple   := assignment* (word | redirect)*

use crate::error::{Error, Result};

use super::lexer::{tokenize, Token, Word};

#[derive(Debug, Clone)]
pub struct Program {
    pub lists: Vec<AndOrList>,
}

#[derive(Debug, Clone)]
pub struct AndOrList {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<SimpleCommand>,
}

#[derive(Debug, Clone)]
pub struct SimpleCommand {
    /// `NAME=word` prefixes, applied before (or instead of) the command.
    pub assignments: Vec<(String, Word)>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone)]
pub enum Redirect {
    Out { fd: u8, target: Word, append: bool },
    In { target: Word },
    ErrToOut,
}

pub fn parse(source: &str) -> Result<Program> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(tok)
    }

    fn program(mut self) -> Result<Program> {
        let mut lists = Vec::new();
        while self.peek().is_some() {
            // Empty statements between separators are fine.
            if matches!(self.peek(), Some(Token::Semi)) {
                self.bump();
                continue;
            }
            lists.push(self.and_or_list()?);
        }
        Ok(Program { lists })
    }

    fn and_or_list(&mut self) -> Result<AndOrList> {
        let first = self.pipeline()?;
        let mut rest = Vec::new();
        loop {
            let connector = match self.peek() {
                Some(Token::And) => Connector::And,
                Some(Token::Or) => Connector::Or,
                _ => break,
            };
            self.bump();
            rest.push((connector, self.pipeline()?));
        }
        Ok(AndOrList { first, rest })
    }

    fn pipeline(&mut self) -> Result<Pipeline> {
        let mut stages = vec![self.simple()?];
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.bump();
            stages.push(self.simple()?);
        }
        Ok(Pipeline { stages })
    }

    fn simple(&mut self) -> Result<SimpleCommand> {
        let mut cmd = SimpleCommand {
            assignments: Vec::new(),
            words: Vec::new(),
            redirects: Vec::new(),
        };
        loop {
            match self.peek() {
                Some(Token::Word(_)) => {
                    let Some(Token::Word(word)) = self.bump() else {
                        unreachable!()
                    };
                    // Assignments only count before the first command word.
                    if cmd.words.is_empty() {
                        if let Some((name, value)) = split_assignment(&word) {
                            cmd.assignments.push((name, value));
                            continue;
                        }
                    }
                    cmd.words.push(word);
                }
                Some(Token::RedirOut { fd, append }) => {
                    let (fd, append) = (*fd, *append);
                    self.bump();
                    let target = self.redirect_target()?;
                    cmd.redirects.push(Redirect::Out { fd, target, append });
                }
                Some(Token::RedirIn) => {
                    self.bump();
                    let target = self.redirect_target()?;
                    cmd.redirects.push(Redirect::In { target });
                }
                Some(Token::ErrToOut) => {
                    self.bump();
                    cmd.redirects.push(Redirect::ErrToOut);
                }
                _ => break,
            }
        }
        if cmd.words.is_empty() && cmd.assignments.is_empty() && cmd.redirects.is_empty() {
            return Err(Error::InvalidParameter(
                "sh: syntax error: unexpected token".into(),
            ));
        }
        Ok(cmd)
    }

    fn redirect_target(&mut self) -> Result<Word> {
        match self.bump() {
            Some(Token::Word(word)) => Ok(word),
            _ => Err(Error::InvalidParameter(
                "sh: syntax error: redirect needs a target".into(),
            )),
        }
    }
}

/// Splits `NAME=value` when NAME is a valid identifier and the `=` sits in
/// an unquoted literal prefix.
fn split_assignment(word: &Word) -> Option<(String, Word)> {
    use super::lexer::WordPart;

    let WordPart::Literal {
        text,
        quoted: false,
    } = word.parts.first()?
    else {
        return None;
    };
    let eq = text.find('=')?;
    let name = &text[..eq];
    if name.is_empty()
        || !name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
    {
        return None;
    }

    let mut value = Word::default();
    let rest = &text[eq + 1..];
    if !rest.is_empty() {
        value.parts.push(WordPart::Literal {
            text: rest.to_string(),
            quoted: false,
        });
    }
    value.parts.extend(word.parts[1..].iter().cloned());
    Some((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_stages() {
        let prog = parse("cat f | grep x | wc -l").unwrap();
        assert_eq!(prog.lists.len(), 1);
        assert_eq!(prog.lists[0].first.stages.len(), 3);
        assert_eq!(
            prog.lists[0].first.stages[2].words[0].as_literal().unwrap(),
            "wc"
        );
    }

    #[test]
    fn and_or_chain() {
        let prog = parse("a && b || c").unwrap();
        let list = &prog.lists[0];
        assert_eq!(list.rest.len(), 2);
        assert_eq!(list.rest[0].0, Connector::And);
        assert_eq!(list.rest[1].0, Connector::Or);
    }

    #[test]
    fn sequences_split_on_semicolons_and_newlines() {
        let prog = parse("a; b\nc").unwrap();
        assert_eq!(prog.lists.len(), 3);
        assert!(parse(";;\n\n").unwrap().lists.is_empty());
    }

    #[test]
    fn assignments_before_command() {
        let prog = parse("FOO=bar BAZ=1 env").unwrap();
        let cmd = &prog.lists[0].first.stages[0];
        assert_eq!(cmd.assignments.len(), 2);
        assert_eq!(cmd.assignments[0].0, "FOO");
        assert_eq!(cmd.words.len(), 1);

        let prog = parse("FOO=bar").unwrap();
        let cmd = &prog.lists[0].first.stages[0];
        assert!(cmd.words.is_empty(), "bare assignment has no command");
    }

    #[test]
    fn assignment_after_command_is_an_argument() {
        let prog = parse("env FOO=bar").unwrap();
        let cmd = &prog.lists[0].first.stages[0];
        assert!(cmd.assignments.is_empty());
        assert_eq!(cmd.words.len(), 2);
    }

    #[test]
    fn redirects_collected() {
        let prog = parse("cmd < in > out 2>&1").unwrap();
        let cmd = &prog.lists[0].first.stages[0];
        assert_eq!(cmd.redirects.len(), 3);
        assert!(matches!(cmd.redirects[0], Redirect::In { .. }));
        assert!(matches!(
            cmd.redirects[1],
            Redirect::Out { fd: 1, append: false, .. }
        ));
        assert!(matches!(cmd.redirects[2], Redirect::ErrToOut));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse("a | | b").is_err());
        assert!(parse("a >").is_err());
        assert!(parse("&& b").is_err());
    }
}
