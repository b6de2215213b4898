use logos::Logos;

use crate::{Span, Token, TokenKind};

/// The Coral lexer.
///
/// Converts source code into a stream of tokens, ending with an
/// explicit Eof token.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, TokenKind>,
    source: &'src str,
    peeked: Option<Token>,
    at_eof: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code.
    pub fn new(source: &'src str) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            source,
            peeked: None,
            at_eof: false,
        }
    }

    /// Get the source code being lexed.
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Get the next token from the source.
    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.peeked.take() {
            return token;
        }

        if self.at_eof {
            return Token::new(TokenKind::Eof, Span::new(self.source.len(), self.source.len()));
        }

        match self.inner.next() {
            Some(Ok(kind)) => {
                let span = self.inner.span();
                Token::new(kind, Span::new(span.start, span.end))
            }
            Some(Err(())) => {
                let span = self.inner.span();
                Token::new(TokenKind::Error, Span::new(span.start, span.end))
            }
            None => {
                self.at_eof = true;
                Token::new(TokenKind::Eof, Span::new(self.source.len(), self.source.len()))
            }
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> &Token {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_token());
        }
        self.peeked.as_ref().unwrap()
    }

    /// Get the slice of source code for a span.
    pub fn slice(&self, span: Span) -> &'src str {
        &self.source[span.range()]
    }

    /// Collect all tokens into a vector, including the trailing Eof.
    pub fn collect_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }
}

/// Parse an integer literal.
pub fn parse_int(s: &str) -> Result<i64, std::num::ParseIntError> {
    s.parse()
}

/// Parse a string literal, handling escape sequences.
pub fn parse_string(s: &str) -> Result<String, StringParseError> {
    // Remove surrounding quotes
    let s = &s[1..s.len() - 1];
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some(c) => return Err(StringParseError::InvalidEscape(c)),
                None => return Err(StringParseError::UnterminatedEscape),
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Errors that can occur when decoding string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringParseError {
    InvalidEscape(char),
    UnterminatedEscape,
}

impl std::fmt::Display for StringParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StringParseError::InvalidEscape(c) => write!(f, "invalid escape sequence: \\{}", c),
            StringParseError::UnterminatedEscape => write!(f, "unterminated escape sequence"),
        }
    }
}

impl std::error::Error for StringParseError {}
