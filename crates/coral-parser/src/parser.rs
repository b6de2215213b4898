use crate::ast::*;
use crate::precedence::{token_to_infix_op, Precedence};
use coral_lexer::{parse_int, parse_string, Lexer, Span, Token, TokenKind};

/// Parse errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("integer literal out of range: {literal}")]
    IntegerOutOfRange { literal: String, span: Span },
    #[error("invalid string literal: {message}")]
    InvalidString { message: String, span: Span },
    #[error("unrecognized character")]
    UnrecognizedCharacter { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. } => *span,
            ParseError::IntegerOutOfRange { span, .. } => *span,
            ParseError::InvalidString { span, .. } => *span,
            ParseError::UnrecognizedCharacter { span } => *span,
        }
    }
}

/// The Coral parser.
///
/// A Pratt parser over the token stream. Errors are accumulated; the
/// parser resynchronizes at the next semicolon and keeps going.
pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    errors: Vec<ParseError>,
}

impl<'src> Parser<'src> {
    /// Create a new parser for the given source code.
    pub fn new(source: &'src str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            errors: Vec::new(),
        }
    }

    /// Get the accumulated parse errors.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Take the accumulated parse errors.
    pub fn take_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    /// Check if parsing had errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // ---
    // Token manipulation
    // ---

    /// Advance to the next token, returning the current one.
    fn advance(&mut self) -> Token {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    /// Check if the current token is of the given kind.
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Consume the current token if it is of the given kind.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a token of the given kind or record an error.
    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.name()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current.kind.name().to_string(),
            span: self.current.span,
        }
    }

    /// The source text of a token.
    fn text(&self, token: Token) -> &'src str {
        self.lexer.slice(token.span)
    }

    /// Skip tokens until just past the next semicolon (or Eof).
    fn synchronize(&mut self) {
        while !self.check(TokenKind::Eof) {
            if self.advance().kind == TokenKind::Semicolon {
                return;
            }
        }
    }

    // ---
    // Statements
    // ---

    /// Parse a whole program, accumulating errors.
    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();

        while !self.check(TokenKind::Eof) {
            match self.parse_statement() {
                Ok(statement) => program.statements.push(statement),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        program
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.current.kind {
            TokenKind::Let => self.parse_let_statement(),
            _ => {
                let expr = self.parse_expr(Precedence::Lowest)?;
                self.eat(TokenKind::Semicolon);
                Ok(Statement::Expression(expr))
            }
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // let
        let name_token = self.expect(TokenKind::Identifier)?;
        let name = self.text(name_token).to_string();
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr(Precedence::Lowest)?;
        self.eat(TokenKind::Semicolon);
        Ok(Statement::Let { name, value })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Block { statements })
    }

    // ---
    // Expressions
    // ---

    fn parse_expr(&mut self, precedence: Precedence) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix()?;

        while let Some(next) = Precedence::of_infix_token(self.current.kind) {
            if precedence >= next {
                break;
            }
            left = if self.check(TokenKind::LBracket) {
                self.parse_index_expr(left)?
            } else {
                self.parse_infix_expr(left)?
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        match self.current.kind {
            TokenKind::IntLiteral => {
                let token = self.advance();
                let literal = self.text(token);
                parse_int(literal).map(Expr::Integer).map_err(|_| {
                    ParseError::IntegerOutOfRange {
                        literal: literal.to_string(),
                        span: token.span,
                    }
                })
            }
            TokenKind::StringLiteral => {
                let token = self.advance();
                parse_string(self.text(token)).map(Expr::Str).map_err(|e| {
                    ParseError::InvalidString {
                        message: e.to_string(),
                        span: token.span,
                    }
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Boolean(false))
            }
            TokenKind::Identifier => {
                let token = self.advance();
                Ok(Expr::Identifier(self.text(token).to_string()))
            }
            TokenKind::Minus => {
                self.advance();
                let right = self.parse_expr(Precedence::Prefix)?;
                Ok(Expr::Prefix {
                    op: PrefixOp::Neg,
                    right: Box::new(right),
                })
            }
            TokenKind::Bang => {
                self.advance();
                let right = self.parse_expr(Precedence::Prefix)?;
                Ok(Expr::Prefix {
                    op: PrefixOp::Not,
                    right: Box::new(right),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr(Precedence::Lowest)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::If => self.parse_if_expr(),
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_hash_literal(),
            TokenKind::Error => Err(ParseError::UnrecognizedCharacter {
                span: self.current.span,
            }),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_if_expr(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // if
        let condition = self.parse_expr(Precedence::Lowest)?;
        let consequence = self.parse_block()?;
        let alternative = if self.eat(TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // [
        let mut elements = Vec::new();
        while !self.check(TokenKind::RBracket) {
            elements.push(self.parse_expr(Precedence::Lowest)?);
            if !self.check(TokenKind::RBracket) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Array(elements))
    }

    fn parse_hash_literal(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // {
        let mut pairs = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.parse_expr(Precedence::Lowest)?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.check(TokenKind::RBrace) {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Hash(pairs))
    }

    fn parse_infix_expr(&mut self, left: Expr) -> Result<Expr, ParseError> {
        let token = self.advance();
        // of_infix_token accepted the token, so the conversion succeeds
        let op = token_to_infix_op(token.kind).ok_or_else(|| ParseError::UnexpectedToken {
            expected: "an infix operator".to_string(),
            found: token.kind.name().to_string(),
            span: token.span,
        })?;
        let precedence = Precedence::of_infix_token(token.kind).unwrap_or(Precedence::Lowest);
        let right = self.parse_expr(precedence)?;
        Ok(Expr::Infix {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_index_expr(&mut self, left: Expr) -> Result<Expr, ParseError> {
        self.advance(); // [
        let index = self.parse_expr(Precedence::Lowest)?;
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }
}
