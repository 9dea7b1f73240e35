//! LookML Block Parser
//!
//! Recursive-descent parser over the token stream. Produces a tree of
//! `key: value` items where a value is a scalar, a list, a raw expression,
//! or a (possibly named) block. Block boundaries come from brace depth,
//! never from searching for the next sibling keyword.

use super::lexer::{tokenize, Token, TokenKind};

/// A `key: value` item
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: String,
    pub value: Value,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
    Expr(String),
    Block(Block),
}

/// `key: name { ... }` or `key: { ... }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub name: Option<String>,
    pub items: Vec<Item>,
}

impl Block {
    /// First scalar, string or expression value for `key`
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.items.iter().find_map(|item| {
            if !item.key.eq_ignore_ascii_case(key) {
                return None;
            }
            match &item.value {
                Value::Scalar(s) | Value::Expr(s) => Some(s.as_str()),
                _ => None,
            }
        })
    }

    /// All child blocks under `key`, in source order
    pub fn blocks<'a>(&'a self, key: &'a str) -> impl Iterator<Item = (&'a Block, usize)> + 'a {
        self.items.iter().filter_map(move |item| match &item.value {
            Value::Block(block) if item.key.eq_ignore_ascii_case(key) => Some((block, item.line)),
            _ => None,
        })
    }

    /// Every expression body in this block and its descendants
    pub fn expressions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_expressions(self, &mut out);
        out
    }
}

fn collect_expressions<'a>(block: &'a Block, out: &mut Vec<&'a str>) {
    for item in &block.items {
        match &item.value {
            Value::Expr(e) => out.push(e),
            Value::Block(b) => collect_expressions(b, out),
            _ => {}
        }
    }
}

/// A parsed file: its top-level items plus the number of tokens that had
/// to be skipped to keep going
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub root: Block,
    pub diagnostics: usize,
}

/// Parse LookML source. Never fails; malformed input shows up as a
/// non-zero `diagnostics` count and missing items.
pub fn parse(source: &str) -> Document {
    let tokens = tokenize(source);
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        diagnostics: 0,
    };
    let items = parser.items(false);
    Document {
        root: Block { name: None, items },
        diagnostics: parser.diagnostics,
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    diagnostics: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.line).unwrap_or(0)
    }

    fn advance(&mut self) -> Option<&'t TokenKind> {
        let tok = self.tokens.get(self.pos).map(|t| &t.kind);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn skip(&mut self) {
        self.diagnostics += 1;
        self.pos += 1;
    }

    /// Parse items until `}` (when nested) or end of input
    fn items(&mut self, nested: bool) -> Vec<Item> {
        let mut items = Vec::new();
        while let Some(tok) = self.peek() {
            match tok {
                TokenKind::RBrace if nested => {
                    self.pos += 1;
                    return items;
                }
                TokenKind::Word(key) if self.peek_at(1) == Some(&TokenKind::Colon) => {
                    let line = self.line();
                    let key = key.clone();
                    self.pos += 2;
                    if let Some(value) = self.value() {
                        items.push(Item { key, value, line });
                    }
                }
                _ => self.skip(),
            }
        }
        if nested {
            // Unterminated block: close it at end of input.
            self.diagnostics += 1;
        }
        items
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            TokenKind::Expr(e) => {
                let e = e.clone();
                self.pos += 1;
                Some(Value::Expr(e))
            }
            TokenKind::LBrace => {
                self.pos += 1;
                let items = self.items(true);
                Some(Value::Block(Block { name: None, items }))
            }
            TokenKind::LBracket => {
                self.pos += 1;
                Some(Value::List(self.list()))
            }
            TokenKind::Word(w) | TokenKind::Str(w) => {
                let w = w.clone();
                self.pos += 1;
                if self.peek() == Some(&TokenKind::LBrace) {
                    self.pos += 1;
                    let items = self.items(true);
                    Some(Value::Block(Block { name: Some(w), items }))
                } else {
                    Some(Value::Scalar(w))
                }
            }
            _ => {
                self.skip();
                None
            }
        }
    }

    fn list(&mut self) -> Vec<String> {
        let mut values = Vec::new();
        while let Some(tok) = self.advance() {
            match tok {
                TokenKind::RBracket => return values,
                TokenKind::Word(w) | TokenKind::Str(w) => values.push(w.clone()),
                TokenKind::Comma => {}
                _ => self.diagnostics += 1,
            }
        }
        self.diagnostics += 1;
        values
    }
}
