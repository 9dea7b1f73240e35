//! LookML Tokenizer
//!
//! Splits LookML source into a flat token stream. The only context the
//! lexer keeps is whether the last two tokens were `<expression key> :`,
//! in which case the value is read raw up to the `;;` terminator. SQL and
//! HTML bodies therefore never leak braces into the block structure.

use std::fmt;

/// A token with the 1-based line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: keys, names, unquoted values (`analytics.orders`, `many_to_one`)
    Word(String),
    /// Double-quoted string, unescaped
    Str(String),
    /// Raw `;;`-terminated expression body, trimmed
    Expr(String),
    Colon,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => write!(f, "{}", w),
            Self::Str(s) => write!(f, "\"{}\"", s),
            Self::Expr(_) => write!(f, "<expression>"),
            Self::Colon => write!(f, ":"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::LBracket => write!(f, "["),
            Self::RBracket => write!(f, "]"),
            Self::Comma => write!(f, ","),
        }
    }
}

/// Keys whose value is a `;;`-terminated expression
pub fn is_expression_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("sql")
        || matches!(
            key.as_str(),
            "html" | "expression" | "filter_expression" | "link_html"
        )
}

/// Tokenize LookML source.
///
/// Never fails: an unterminated string runs to the end of its line, and an
/// expression missing its `;;` runs to the end of its line as well.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.line += 1;
                    self.bump();
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                ':' => {
                    self.bump();
                    self.push(TokenKind::Colon, self.line);
                    if let Some(key) = self.expression_key() {
                        self.read_expression(&key);
                    }
                }
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ',' => self.single(TokenKind::Comma),
                '"' => self.read_string(),
                _ => self.read_word(),
            }
        }
        self.tokens
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn single(&mut self, kind: TokenKind) {
        self.bump();
        self.push(kind, self.line);
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// The key when the tokens so far end in `<expression key> :`
    fn expression_key(&self) -> Option<String> {
        let n = self.tokens.len();
        if n < 2 {
            return None;
        }
        match &self.tokens[n - 2].kind {
            TokenKind::Word(key) if is_expression_key(key) => Some(key.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn read_expression(&mut self, key: &str) {
        let start_line = self.line;
        let rest = &self.src[self.pos..];
        let line_end = rest.find('\n').unwrap_or(rest.len());

        // A table name never spans lines, so a missing `;;` must not swallow the next key.
        let terminator = match rest.find(";;") {
            Some(end) if key == "sql_table_name" && end > line_end => None,
            found => found,
        };

        let (body, consumed) = match terminator {
            Some(end) => (&rest[..end], end + 2),
            None => (&rest[..line_end], line_end),
        };

        self.line += body.matches('\n').count();
        self.pos += consumed;
        self.push(TokenKind::Expr(body.trim().to_string()), start_line);
    }

    fn read_string(&mut self) {
        let line = self.line;
        self.bump();
        let mut value = String::new();
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    self.bump();
                    break;
                }
                '\\' => {
                    self.bump();
                    if let Some(escaped) = self.bump() {
                        value.push(escaped);
                    }
                }
                '\n' => break,
                _ => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        self.push(TokenKind::Str(value), line);
    }

    fn read_word(&mut self) {
        let line = self.line;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, ':' | '{' | '}' | '[' | ']' | ',' | '"' | '#') {
                break;
            }
            self.bump();
        }
        // A stray ';' or other punctuation still forms a word so the parser can skip it.
        if self.pos == start {
            self.bump();
        }
        let word = self.src[start..self.pos].to_string();
        self.push(TokenKind::Word(word), line);
    }
}
