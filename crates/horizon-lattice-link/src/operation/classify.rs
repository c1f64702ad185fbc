//! Operation classification.
//!
//! Routing never inspects the payload shape: an [`Operation`] carries its
//! kind as an explicit variant, and the classifier only maps that variant to
//! a transport. The document scanner in this module exists for operations
//! built from raw text, where the kind is read from the main definition once
//! at construction time.

use super::{Operation, OperationKind};
use crate::error::{LinkError, Result};

/// The transport an operation must travel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// One-shot request/response (queries and mutations).
    Request,
    /// Persistent streaming connection (subscriptions).
    Stream,
}

impl From<OperationKind> for Route {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Query | OperationKind::Mutation => Self::Request,
            OperationKind::Subscription => Self::Stream,
        }
    }
}

/// Decide which transport carries `operation`.
///
/// Fails only when the operation has no kind, which is a programming error
/// on the caller's side and is never retried.
pub fn classify(operation: &Operation) -> Result<Route> {
    operation.kind().map(Route::from).ok_or_else(|| {
        LinkError::Classification(match operation.operation_name.as_deref() {
            Some(name) => format!("operation '{name}' has no query, mutation or subscription definition"),
            None => "document has no query, mutation or subscription definition".into(),
        })
    })
}

/// The first executable definition of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MainDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
}

/// Find the main operation definition of a GraphQL document.
///
/// Fragment definitions are skipped. A leading selection set (`{ ... }`) is
/// the query shorthand. Returns `None` for documents without an operation
/// definition or with anything other than executable definitions before it.
pub(crate) fn main_definition(document: &str) -> Option<MainDefinition> {
    let mut scanner = Scanner::new(document);
    loop {
        match scanner.next_token()? {
            Token::Punct(b'{') => {
                return Some(MainDefinition {
                    kind: OperationKind::Query,
                    name: None,
                });
            }
            Token::Name("fragment") => scanner.skip_fragment()?,
            Token::Name(keyword) => {
                let kind = match keyword {
                    "query" => OperationKind::Query,
                    "mutation" => OperationKind::Mutation,
                    "subscription" => OperationKind::Subscription,
                    _ => return None,
                };
                let name = match scanner.peek_token() {
                    Some(Token::Name(name)) => Some(name.to_string()),
                    _ => None,
                };
                return Some(MainDefinition { kind, name });
            }
            Token::Punct(_) => return None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Name(&'a str),
    Punct(u8),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    /// Skip whitespace, commas, the BOM and `#` comments.
    fn skip_ignored(&mut self) {
        let bytes = self.bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' | b',' => self.pos += 1,
                b'#' => {
                    while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                0xEF if bytes[self.pos..].starts_with(&[0xEF, 0xBB, 0xBF]) => self.pos += 3,
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_ignored();
        let bytes = self.bytes();
        let start = self.pos;
        let first = *bytes.get(start)?;
        if first == b'_' || first.is_ascii_alphabetic() {
            self.pos += 1;
            while self.pos < bytes.len()
                && (bytes[self.pos] == b'_' || bytes[self.pos].is_ascii_alphanumeric())
            {
                self.pos += 1;
            }
            Some(Token::Name(&self.src[start..self.pos]))
        } else {
            self.pos += 1;
            Some(Token::Punct(first))
        }
    }

    fn peek_token(&mut self) -> Option<Token<'a>> {
        let saved = self.pos;
        let token = self.next_token();
        self.pos = saved;
        token
    }

    /// Skip a fragment definition: everything up to and including its
    /// balanced selection set.
    fn skip_fragment(&mut self) -> Option<()> {
        loop {
            match self.next_token()? {
                Token::Punct(b'{') => return self.skip_block(),
                Token::Punct(b'"') => self.skip_string()?,
                _ => {}
            }
        }
    }

    /// Skip to the brace closing an already opened block.
    fn skip_block(&mut self) -> Option<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_token()? {
                Token::Punct(b'{') => depth += 1,
                Token::Punct(b'}') => depth -= 1,
                Token::Punct(b'"') => self.skip_string()?,
                _ => {}
            }
        }
        Some(())
    }

    /// Skip a string whose opening quote was just consumed.
    fn skip_string(&mut self) -> Option<()> {
        let bytes = self.bytes();
        if bytes[self.pos..].starts_with(b"\"\"") {
            // Block string.
            self.pos += 2;
            loop {
                if self.pos >= bytes.len() {
                    return None;
                }
                if bytes[self.pos..].starts_with(b"\\\"\"\"") {
                    self.pos += 4;
                } else if bytes[self.pos..].starts_with(b"\"\"\"") {
                    self.pos += 3;
                    return Some(());
                } else {
                    self.pos += 1;
                }
            }
        }
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Some(());
                }
                b'\n' => return None,
                _ => self.pos += 1,
            }
        }
        None
    }
}
