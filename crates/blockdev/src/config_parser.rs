//! Hand-written recursive-descent parser for the brace-delimited
//! configuration dump `drbdsetup <minor> show` prints for a single minor.
//!
//! A real dump for an attached, connected minor looks like:
//!
//! ```text
//! resource r0 {
//!     _this_host {
//!         disk "/dev/vg0/lv1";
//!         meta-disk "/dev/vg0/lv1meta" [0];
//!         address 10.0.0.1:11000;
//!     }
//!     _remote_host {
//!         address 10.0.0.2:11000;
//!     }
//! }
//! ```
//!
//! Only `_this_host`/`_remote_host` sections and their `disk`/`meta-disk`/
//! `address` statements are meaningful here; everything else parses (so an
//! unrecognised keyword never aborts the whole dump) but is discarded.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for raw_line in input.lines() {
        let line = match raw_line.find('#') {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        };
        let mut chars = line.char_indices().peekable();
        while let Some(&(idx, ch)) = chars.peek() {
            if ch.is_whitespace() {
                chars.next();
                continue;
            }
            match ch {
                '{' => {
                    tokens.push(Token::LBrace);
                    chars.next();
                }
                '}' => {
                    tokens.push(Token::RBrace);
                    chars.next();
                }
                '[' => {
                    tokens.push(Token::LBracket);
                    chars.next();
                }
                ']' => {
                    tokens.push(Token::RBracket);
                    chars.next();
                }
                ';' => {
                    tokens.push(Token::Semicolon);
                    chars.next();
                }
                ':' => {
                    tokens.push(Token::Colon);
                    chars.next();
                }
                '"' => {
                    chars.next();
                    let mut s = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '"' {
                            closed = true;
                            break;
                        }
                        s.push(c);
                    }
                    if !closed {
                        return Err(Error::block_device(format!(
                            "unterminated quoted string at byte {idx} in drbdsetup show output"
                        )));
                    }
                    tokens.push(Token::Quoted(s));
                }
                _ => {
                    let mut s = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if c.is_whitespace() || "{}[];:#\"".contains(c) {
                            break;
                        }
                        s.push(c);
                        chars.next();
                    }
                    tokens.push(Token::Word(s));
                }
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
pub enum Value {
    Word(String),
    Addr(String, u16),
    Meta(String, u32),
}

#[derive(Debug, Clone)]
struct Statement {
    keyword: String,
    value: Option<Value>,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    statements: Vec<Statement>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_word(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(Error::block_device(format!(
                "expected a keyword in drbdsetup show output, found {other:?}"
            ))),
        }
    }

    /// Parse everything at the top level: a sequence of sections and bare
    /// statements. Bare statements (anything outside `_this_host`/
    /// `_remote_host`) are parsed for grammar validity and discarded.
    fn parse_top(&mut self) -> Result<Vec<Section>> {
        let mut sections = Vec::new();
        while self.peek().is_some() {
            let name = self.expect_word()?;
            match self.peek() {
                Some(Token::LBrace) => {
                    self.next();
                    let mut statements = Vec::new();
                    while !matches!(self.peek(), Some(Token::RBrace) | None) {
                        statements.push(self.parse_statement()?);
                    }
                    match self.next() {
                        Some(Token::RBrace) => {}
                        other => {
                            return Err(Error::block_device(format!(
                                "unterminated section '{name}' in drbdsetup show output, found {other:?}"
                            )))
                        }
                    }
                    sections.push(Section { name, statements });
                }
                _ => {
                    // A bare top-level statement, e.g. `version "8.3.11";`.
                    let _ = self.parse_statement_tail()?;
                }
            }
        }
        Ok(sections)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let keyword = self.expect_word()?;
        let value = self.parse_statement_tail()?;
        Ok(Statement { keyword, value })
    }

    /// Parse the optional value and trailing `_is_default`/`;` of a
    /// statement whose keyword has already been consumed.
    fn parse_statement_tail(&mut self) -> Result<Option<Value>> {
        let value = match self.peek() {
            Some(Token::Semicolon) => None,
            Some(Token::Word(w)) if w == "_is_default" => None,
            Some(Token::Word(w)) => {
                let word = w.clone();
                self.next();
                if matches!(self.peek(), Some(Token::Colon)) {
                    self.next();
                    let port = self.expect_word()?;
                    let port: u16 = port.parse().map_err(|_| {
                        Error::block_device(format!("invalid port in address '{word}:{port}'"))
                    })?;
                    Some(Value::Addr(word, port))
                } else if matches!(self.peek(), Some(Token::LBracket)) {
                    self.next();
                    let idx = self.expect_word()?;
                    let idx: u32 = idx.parse().map_err(|_| {
                        Error::block_device(format!("invalid meta index '{idx}'"))
                    })?;
                    match self.next() {
                        Some(Token::RBracket) => {}
                        other => {
                            return Err(Error::block_device(format!(
                                "expected ']' after meta-disk index, found {other:?}"
                            )))
                        }
                    }
                    Some(Value::Meta(word, idx))
                } else {
                    Some(Value::Word(word))
                }
            }
            Some(Token::Quoted(q)) => {
                let path = q.clone();
                self.next();
                if matches!(self.peek(), Some(Token::LBracket)) {
                    self.next();
                    let idx = self.expect_word()?;
                    let idx: u32 = idx.parse().map_err(|_| {
                        Error::block_device(format!("invalid meta index '{idx}'"))
                    })?;
                    match self.next() {
                        Some(Token::RBracket) => {}
                        other => {
                            return Err(Error::block_device(format!(
                                "expected ']' after meta-disk index, found {other:?}"
                            )))
                        }
                    }
                    Some(Value::Meta(path, idx))
                } else {
                    Some(Value::Word(path))
                }
            }
            other => {
                return Err(Error::block_device(format!(
                    "unexpected token in drbdsetup show output: {other:?}"
                )))
            }
        };
        // Optional trailing `_is_default` marker.
        if matches!(self.peek(), Some(Token::Word(w)) if w == "_is_default") {
            self.next();
        }
        match self.next() {
            Some(Token::Semicolon) => {}
            other => {
                return Err(Error::block_device(format!(
                    "expected ';' terminating statement, found {other:?}"
                )))
            }
        }
        Ok(value)
    }
}

/// The fields this crate's reconciliation algorithm cares about, extracted
/// from a `drbdsetup show` dump. A field is `None` when the corresponding
/// statement is absent from the dump, which is exactly the "not configured"
/// state the caller needs to distinguish from "configured but mismatched".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShowInfo {
    pub local_dev: Option<String>,
    pub meta_dev: Option<String>,
    pub meta_index: Option<u32>,
    pub local_addr: Option<(String, u16)>,
    pub remote_addr: Option<(String, u16)>,
}

pub fn parse_show(input: &str) -> Result<ShowInfo> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let sections = parser.parse_top()?;

    let mut info = ShowInfo::default();
    for section in sections {
        let target_local = section.name == "_this_host";
        let target_remote = section.name == "_remote_host";
        if !target_local && !target_remote {
            continue;
        }
        for stmt in section.statements {
            match (stmt.keyword.as_str(), stmt.value) {
                ("disk", Some(Value::Word(w))) if target_local => info.local_dev = Some(w),
                ("meta-disk", Some(Value::Meta(path, idx))) if target_local => {
                    info.meta_dev = Some(path);
                    info.meta_index = Some(idx);
                }
                ("meta-disk", Some(Value::Word(w))) if target_local => info.meta_dev = Some(w),
                ("address", Some(Value::Addr(host, port))) if target_local => {
                    info.local_addr = Some((host, port))
                }
                ("address", Some(Value::Addr(host, port))) if target_remote => {
                    info.remote_addr = Some((host, port))
                }
                _ => {}
            }
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_connected_config() {
        let input = indoc! {r#"
            _this_host {
                disk "/dev/vg0/lv1";
                meta-disk "/dev/vg0/lv1meta" [0];
                address 10.0.0.1:11000;
            }
            _remote_host {
                address 10.0.0.2:11000;
            }
        "#};
        let info = parse_show(input).unwrap();
        assert_eq!(info.local_dev.as_deref(), Some("/dev/vg0/lv1"));
        assert_eq!(info.meta_dev.as_deref(), Some("/dev/vg0/lv1meta"));
        assert_eq!(info.meta_index, Some(0));
        assert_eq!(info.local_addr, Some(("10.0.0.1".to_string(), 11000)));
        assert_eq!(info.remote_addr, Some(("10.0.0.2".to_string(), 11000)));
    }

    #[test]
    fn parses_disconnected_diskless_config() {
        let input = "_this_host {\n}\n";
        let info = parse_show(input).unwrap();
        assert_eq!(info, ShowInfo::default());
    }

    #[test]
    fn tolerates_unknown_top_level_statement() {
        let input = r#"version "8.3.11"; _this_host { }"#;
        let info = parse_show(input).unwrap();
        assert_eq!(info, ShowInfo::default());
    }

    #[test]
    fn parses_unquoted_meta_disk_with_index() {
        let input = indoc! {r#"
            _this_host {
                disk /dev/vg0/lv1;
                meta-disk /dev/vg0/lv1meta [0];
            }
        "#};
        let info = parse_show(input).unwrap();
        assert_eq!(info.meta_dev.as_deref(), Some("/dev/vg0/lv1meta"));
        assert_eq!(info.meta_index, Some(0));
    }

    #[test]
    fn rejects_unterminated_section() {
        let input = "_this_host { disk \"/dev/x\";";
        assert!(parse_show(input).is_err());
    }

    #[test]
    fn is_default_marker_does_not_confuse_value_parsing() {
        let input = indoc! {r#"
            _this_host {
                disk "/dev/vg0/lv1" _is_default;
                address 10.0.0.1:11000;
            }
        "#};
        let info = parse_show(input).unwrap();
        assert_eq!(info.local_dev.as_deref(), Some("/dev/vg0/lv1"));
    }
}
