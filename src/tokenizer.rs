use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"^\s+").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^-?[0-9]+").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref QUALIFIED_IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?").unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r"^'[^']*'").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    StringLiteral,
    Symbol,
    Eof,
}

/// One lexical token. `value` is the source text of the token, so string literals keep
/// their quote markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: usize,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Identifier && self.value.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, symbol: char) -> bool {
        self.kind == TokenKind::Symbol && self.value.len() == 1 && self.value.starts_with(symbol)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("end of input"),
            _ => f.write_str(&self.value),
        }
    }
}

/// A character sequence the scanner could not turn into a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub text: String,
    pub position: usize,
    pub message: &'static str,
}

/// Scanner with one token of lookahead.
///
/// In qualified mode identifiers may carry one `table.` prefix; otherwise `.` is a
/// symbol of its own.
pub struct Tokenizer<'a> {
    input: &'a str,
    offset: usize,
    qualified: bool,
    lookahead: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            qualified: false,
            lookahead: None,
        }
    }

    pub fn qualified(input: &'a str) -> Self {
        Self {
            qualified: true,
            ..Self::new(input)
        }
    }

    /// The text being scanned.
    pub fn source(&self) -> &'a str {
        self.input
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        match self.lookahead.take() {
            Some(token) => Ok(token),
            None => self.scan(),
        }
    }

    pub fn peek(&mut self) -> Result<&Token, LexError> {
        let token = match self.lookahead.take() {
            Some(token) => token,
            None => self.scan()?,
        };
        Ok(self.lookahead.insert(token))
    }

    pub fn is_eof(&mut self) -> Result<bool, LexError> {
        Ok(self.peek()?.is_eof())
    }

    fn scan(&mut self) -> Result<Token, LexError> {
        if let Some(m) = WHITESPACE.find(&self.input[self.offset..]) {
            self.offset += m.end();
        }

        let position = self.offset;
        let rest = &self.input[position..];

        let Some(first) = rest.chars().next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                value: String::new(),
                position,
            });
        };

        let identifier = if self.qualified {
            &*QUALIFIED_IDENTIFIER
        } else {
            &*IDENTIFIER
        };

        let (kind, len) = if let Some(m) = identifier.find(rest) {
            (TokenKind::Identifier, m.end())
        } else if let Some(m) = NUMBER.find(rest) {
            (TokenKind::Number, m.end())
        } else if first == '\'' {
            match STRING_LITERAL.find(rest) {
                Some(m) => (TokenKind::StringLiteral, m.end()),
                None => {
                    return Err(LexError {
                        text: rest.to_string(),
                        position,
                        message: "unterminated string literal",
                    })
                }
            }
        } else if is_symbol(first, self.qualified) {
            (TokenKind::Symbol, first.len_utf8())
        } else {
            return Err(LexError {
                text: first.to_string(),
                position,
                message: "unrecognized character",
            });
        };

        self.offset += len;
        Ok(Token {
            kind,
            value: rest[..len].to_string(),
            position,
        })
    }
}

fn is_symbol(c: char, qualified: bool) -> bool {
    matches!(c, '(' | ')' | ',' | '=' | '<' | '>' | '!' | ';' | '*') || (c == '.' && !qualified)
}

/// Scans the whole input, ending with an `Eof` token.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokenizer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.next_token()?;
        let done = token.is_eof();
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
