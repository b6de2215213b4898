use logos::Logos;

use crate::Span;

/// All token types in Coral.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    // LITERALS
    /// Integer literal: 123
    #[regex(r"[0-9]+")]
    IntLiteral,

    /// String literal: "hello", "with \"escapes\""
    #[regex(r#""([^"\\]|\\.)*""#)]
    StringLiteral,

    /// Boolean true
    #[token("true")]
    True,

    /// Boolean false
    #[token("false")]
    False,

    // KEYWORDS
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,

    // IDENTIFIER
    /// Identifier: foo, _bar, FooBar123
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,

    // OPERATORS
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("!")]
    Bang,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // PUNCTUATION
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,

    /// Line comment: // ...
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    /// End of file
    Eof,

    /// Lexer error
    Error,
}

impl TokenKind {
    /// Get a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::IntLiteral => "integer",
            TokenKind::StringLiteral => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Let => "let",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::Identifier => "identifier",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Bang => "!",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::LineComment => "line comment",
            TokenKind::Eof => "end of file",
            TokenKind::Error => "error",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A token with its source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
