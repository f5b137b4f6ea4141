//! Recursive-descent parser for matcher expressions and block matchers
//!
//! Precedence, loosest first: `||`, `&&`, comparisons (`== != < <= > >= =~ in`),
//! `+ -`, `* / %`, unary `! -`, member access and calls.

use super::lexer::{make_error, tokenize, Token, TokenKind};
use super::value::Value;
use crate::core::error::{RampartError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexEq,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Call(String, Vec<Expr>),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Return(Expr),
}

/// A compiled matcher: a single expression or a `{ ... }` block
#[derive(Debug, Clone, PartialEq)]
pub enum Program {
    Expr(Expr),
    Block(Vec<Stmt>),
}

impl Expr {
    fn visit_vars(&self, f: &mut dyn FnMut(&str)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => f(name),
            Expr::Member(base, _) => base.visit_vars(f),
            Expr::Call(_, args) | Expr::List(args) => {
                for arg in args {
                    arg.visit_vars(f);
                }
            }
            Expr::Unary(_, operand) => operand.visit_vars(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.visit_vars(f);
                rhs.visit_vars(f);
            }
        }
    }
}

fn visit_stmts(stmts: &[Stmt], f: &mut dyn FnMut(&str)) {
    for stmt in stmts {
        match stmt {
            Stmt::Let(_, expr) | Stmt::Return(expr) => expr.visit_vars(f),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                cond.visit_vars(f);
                visit_stmts(then, f);
                visit_stmts(otherwise, f);
            }
        }
    }
}

impl Program {
    /// Parse matcher text whose token prefixes are already escaped (`r_sub`, not `r.sub`)
    pub fn parse(input: &str) -> Result<Program> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
            depth: 0,
        };
        parser.skip_separators();
        let program = if parser.peek_is(&TokenKind::LBrace) {
            parser.advance();
            let stmts = parser.parse_block_body()?;
            Program::Block(stmts)
        } else {
            Program::Expr(parser.parse_expr()?)
        };
        parser.skip_separators();
        if let Some(token) = parser.peek() {
            return Err(parser.error_at(token, "unexpected trailing input"));
        }
        Ok(program)
    }

    /// Whether any variable starting with `prefix` is referenced
    pub fn references_prefix(&self, prefix: &str) -> bool {
        let mut found = false;
        let mut check = |name: &str| found |= name.starts_with(prefix);
        match self {
            Program::Expr(expr) => expr.visit_vars(&mut check),
            Program::Block(stmts) => visit_stmts(stmts, &mut check),
        }
        found
    }
}

/// Deepest nesting of parentheses, calls, lists, unary operators and `if` blocks
const MAX_NESTING: usize = 100;

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> RampartError {
        make_error(self.input, token.span.start, message)
    }

    fn error_eof(&self, message: impl Into<String>) -> RampartError {
        make_error(self.input, self.input.len(), message)
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            let message = format!("expression nested deeper than {} levels", MAX_NESTING);
            return Err(match self.peek() {
                Some(token) => self.error_at(token, message),
                None => self.error_eof(message),
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(self.error_at(&token, format!("expected {}", what))),
            None => Err(self.error_eof(format!("expected {}, found end of input", what))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_is(&TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while self.peek_is(&TokenKind::Newline) || self.peek_is(&TokenKind::Semi) {
            self.pos += 1;
        }
    }

    /// Next token after any newlines, so binary operators may start a continuation line
    fn peek_past_newlines(&self) -> Option<&TokenKind> {
        self.tokens[self.pos..]
            .iter()
            .find(|t| t.kind != TokenKind::Newline)
            .map(|t| &t.kind)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    /// Statements up to and including the closing `}`
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            let Some(token) = self.peek().cloned() else {
                return Err(self.error_eof("expected '}' to close block"));
            };
            match token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    return Ok(stmts);
                }
                TokenKind::Let => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(name),
                            ..
                        }) => name,
                        Some(other) => return Err(self.error_at(&other, "expected variable name")),
                        None => return Err(self.error_eof("expected variable name")),
                    };
                    self.expect(TokenKind::Assign, "'='")?;
                    let expr = self.parse_expr()?;
                    stmts.push(Stmt::Let(name, expr));
                }
                TokenKind::Return => {
                    self.advance();
                    stmts.push(Stmt::Return(self.parse_expr()?));
                }
                TokenKind::If => {
                    self.advance();
                    stmts.push(self.parse_if()?);
                }
                _ => return Err(self.error_at(&token, "expected 'let', 'if', 'return' or '}'")),
            }
        }
    }

    /// After the `if` keyword
    fn parse_if(&mut self) -> Result<Stmt> {
        self.nested(Self::parse_if_inner)
    }

    fn parse_if_inner(&mut self) -> Result<Stmt> {
        let cond = self.parse_expr()?;
        self.skip_newlines();
        self.expect(TokenKind::LBrace, "'{' after if condition")?;
        let then = self.parse_block_body()?;

        let otherwise = if self.peek_past_newlines() == Some(&TokenKind::Else) {
            self.skip_newlines();
            self.advance();
            self.skip_newlines();
            if self.peek_is(&TokenKind::If) {
                self.advance();
                vec![self.parse_if()?]
            } else {
                self.expect(TokenKind::LBrace, "'{' after else")?;
                self.parse_block_body()?
            }
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(Self::parse_or)
    }

    /// Consume `op` (possibly after newlines) when it is next
    fn eat_infix(&mut self, ops: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        let next = self.peek_past_newlines()?;
        let op = ops.iter().find(|(kind, _)| kind == next).map(|(_, op)| *op)?;
        self.skip_newlines();
        self.advance();
        self.skip_newlines();
        Some(op)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while let Some(op) = self.eat_infix(&[(TokenKind::Or, BinaryOp::Or)]) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_comparison()?;
        while let Some(op) = self.eat_infix(&[(TokenKind::And, BinaryOp::And)]) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.eat_infix(&[
            (TokenKind::Eq, BinaryOp::Eq),
            (TokenKind::Ne, BinaryOp::Ne),
            (TokenKind::Lt, BinaryOp::Lt),
            (TokenKind::Le, BinaryOp::Le),
            (TokenKind::Gt, BinaryOp::Gt),
            (TokenKind::Ge, BinaryOp::Ge),
            (TokenKind::RegexEq, BinaryOp::RegexEq),
            (TokenKind::In, BinaryOp::In),
        ]) {
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.eat_infix(&[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Sub),
        ]) {
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_infix(&[
            (TokenKind::Star, BinaryOp::Mul),
            (TokenKind::Slash, BinaryOp::Div),
            (TokenKind::Percent, BinaryOp::Mod),
        ]) {
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_is(&TokenKind::Not) {
            self.advance();
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.peek_is(&TokenKind::Minus) {
            self.advance();
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.peek_is(&TokenKind::Dot) {
            self.advance();
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Ident(field),
                    ..
                }) => expr = Expr::Member(Box::new(expr), field),
                Some(other) => return Err(self.error_at(&other, "expected attribute name")),
                None => return Err(self.error_eof("expected attribute name")),
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Ident(name) => {
                if self.peek_is(&TokenKind::LParen) {
                    self.advance();
                    let args = self.parse_list(TokenKind::RParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            TokenKind::LBracket => Ok(Expr::List(self.parse_list(TokenKind::RBracket, "']'")?)),
            TokenKind::LParen => {
                self.skip_newlines();
                if self.peek_is(&TokenKind::RParen) {
                    self.advance();
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                self.skip_newlines();
                if self.peek_is(&TokenKind::Comma) {
                    self.advance();
                    let mut items = vec![first];
                    items.extend(self.parse_list(TokenKind::RParen, "')'")?);
                    Ok(Expr::List(items))
                } else {
                    self.expect(TokenKind::RParen, "')'")?;
                    Ok(first)
                }
            }
            _ => Err(self.error_at(&token, "expected a value")),
        }
    }

    /// Comma-separated expressions up to and including `close`
    fn parse_list(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        self.skip_newlines();
        if self.peek_is(&close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            self.skip_newlines();
            match self.advance() {
                Some(token) if token.kind == TokenKind::Comma => self.skip_newlines(),
                Some(token) if token.kind == close => return Ok(items),
                Some(token) => {
                    return Err(self.error_at(&token, format!("expected ',' or {}", what)))
                }
                None => return Err(self.error_eof(format!("expected {}", what))),
            }
        }
    }
}
