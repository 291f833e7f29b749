//! Recursive-descent parser for the scripting language
//!
//! Backtracking is cheap (the token stream is a `Vec`), which keeps arrow
//! function detection simple: try the arrow interpretation, restore the
//! cursor if it does not pan out. Semicolons are consumed where present
//! but not required between statements.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, Tok, Token, TplPiece};
use std::sync::Arc;

/// Reserved words that cannot be used as plain identifiers.
const RESERVED: &[&str] = &[
    "let", "const", "var", "function", "return", "if", "else", "while", "for", "of", "break",
    "continue", "throw", "try", "catch", "finally", "new", "typeof", "await",
];

/// Parse a complete program.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.check(&Tok::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse a single expression (used for template-literal holes).
fn parse_expr_source(source: &str, line: u32, column: u32) -> Result<Expr, ParseError> {
    let tokens = Lexer::new_at(source, line, column).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.assignment()?;
    if !parser.check(&Tok::Eof) {
        return Err(parser.error_here("unexpected trailing tokens in template expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn here(&self) -> (u32, u32) {
        let t = &self.tokens[self.pos];
        (t.line, t.column)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.here();
        ParseError::new(line, column, message)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, context: &str) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected {} in {}, found {}",
                tok.describe(),
                context,
                self.peek().describe()
            )))
        }
    }

    fn is_keyword(&self, name: &str) -> bool {
        matches!(self.peek(), Tok::Ident(id) if id == name)
    }

    fn keyword_at(&self, offset: usize, name: &str) -> bool {
        matches!(self.peek_at(offset), Tok::Ident(id) if id == name)
    }

    fn eat_keyword(&mut self, name: &str) -> bool {
        if self.is_keyword(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn ident(&mut self, context: &str) -> Result<String, ParseError> {
        match self.peek() {
            Tok::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error_here(format!(
                "expected identifier in {}, found {}",
                context,
                other.describe()
            ))),
        }
    }

    fn eat_semi(&mut self) {
        while self.eat(&Tok::Semi) {}
    }

    // ----- statements -------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var") {
            let stmt = self.var_decl()?;
            self.eat_semi();
            return Ok(stmt);
        }
        if self.is_keyword("function") {
            return self.function_decl(false);
        }
        if self.is_keyword("async") && self.keyword_at(1, "function") {
            self.advance();
            return self.function_decl(true);
        }
        if self.eat_keyword("return") {
            let value = if self.check(&Tok::Semi)
                || self.check(&Tok::RBrace)
                || self.check(&Tok::Eof)
            {
                None
            } else {
                Some(self.expression()?)
            };
            self.eat_semi();
            return Ok(Stmt::Return(value));
        }
        if self.is_keyword("if") {
            return self.if_stmt();
        }
        if self.is_keyword("while") {
            return self.while_stmt();
        }
        if self.is_keyword("for") {
            return self.for_stmt();
        }
        if self.eat_keyword("break") {
            self.eat_semi();
            return Ok(Stmt::Break);
        }
        if self.eat_keyword("continue") {
            self.eat_semi();
            return Ok(Stmt::Continue);
        }
        if self.eat_keyword("throw") {
            let value = self.expression()?;
            self.eat_semi();
            return Ok(Stmt::Throw(value));
        }
        if self.is_keyword("try") {
            return self.try_stmt();
        }
        if self.check(&Tok::LBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat(&Tok::Semi) {
            return Ok(Stmt::Empty);
        }

        let expr = self.expression()?;
        self.eat_semi();
        Ok(Stmt::Expr(expr))
    }

    fn decl_kind(&mut self) -> Result<DeclKind, ParseError> {
        if self.eat_keyword("let") {
            Ok(DeclKind::Let)
        } else if self.eat_keyword("const") {
            Ok(DeclKind::Const)
        } else if self.eat_keyword("var") {
            Ok(DeclKind::Var)
        } else {
            Err(self.error_here("expected declaration keyword"))
        }
    }

    fn var_decl(&mut self) -> Result<Stmt, ParseError> {
        let kind = self.decl_kind()?;
        let mut decls = Vec::new();
        loop {
            let name = self.ident("variable declaration")?;
            let init = if self.eat(&Tok::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push(VarDeclarator { name, init });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(Stmt::VarDecl { kind, decls })
    }

    fn function_decl(&mut self, is_async: bool) -> Result<Stmt, ParseError> {
        self.advance(); // 'function'
        let name = self.ident("function declaration")?;
        let params = self.param_list()?;
        let body = self.block()?;
        Ok(Stmt::FunctionDecl {
            name: name.clone(),
            func: Arc::new(Function {
                name: Some(name),
                params,
                body,
                concise_body: None,
                is_async,
                is_arrow: false,
            }),
        })
    }

    fn param_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(Tok::LParen, "parameter list")?;
        let mut params = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                params.push(self.ident("parameter list")?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "parameter list")?;
        Ok(params)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // 'if'
        self.expect(Tok::LParen, "if condition")?;
        let cond = self.expression()?;
        self.expect(Tok::RParen, "if condition")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.eat_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // 'while'
        self.expect(Tok::LParen, "while condition")?;
        let cond = self.expression()?;
        self.expect(Tok::RParen, "while condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { cond, body })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // 'for'
        self.expect(Tok::LParen, "for statement")?;

        // for (<decl> x of iterable) { ... }
        if self.is_keyword("let") || self.is_keyword("const") || self.is_keyword("var") {
            let kind = self.decl_kind()?;
            let name = self.ident("for declaration")?;
            if self.eat_keyword("of") {
                let iterable = self.expression()?;
                self.expect(Tok::RParen, "for-of statement")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForOf {
                    decl: kind,
                    name,
                    iterable,
                    body,
                });
            }

            // classic for with a declaration initializer
            let mut decls = Vec::new();
            let init = if self.eat(&Tok::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push(VarDeclarator { name, init });
            while self.eat(&Tok::Comma) {
                let name = self.ident("for declaration")?;
                let init = if self.eat(&Tok::Assign) {
                    Some(self.assignment()?)
                } else {
                    None
                };
                decls.push(VarDeclarator { name, init });
            }
            self.expect(Tok::Semi, "for statement")?;
            let init_stmt = Some(Box::new(Stmt::VarDecl { kind, decls }));
            return self.for_tail(init_stmt);
        }

        // bare initializer (expression) or none
        let init_stmt = if self.eat(&Tok::Semi) {
            None
        } else {
            let expr = self.expression()?;
            self.expect(Tok::Semi, "for statement")?;
            Some(Box::new(Stmt::Expr(expr)))
        };
        self.for_tail(init_stmt)
    }

    fn for_tail(&mut self, init: Option<Box<Stmt>>) -> Result<Stmt, ParseError> {
        let cond = if self.check(&Tok::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(Tok::Semi, "for statement")?;
        let step = if self.check(&Tok::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(Tok::RParen, "for statement")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn try_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // 'try'
        let block = self.block()?;
        let catch = if self.eat_keyword("catch") {
            let param = if self.eat(&Tok::LParen) {
                let name = self.ident("catch clause")?;
                self.expect(Tok::RParen, "catch clause")?;
                Some(name)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.block()?,
            })
        } else {
            None
        };
        let finally = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.error_here("try statement requires a catch or finally clause"));
        }
        Ok(Stmt::Try {
            block,
            catch,
            finally,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Tok::LBrace, "block")?;
        let mut body = Vec::new();
        while !self.check(&Tok::RBrace) {
            if self.check(&Tok::Eof) {
                return Err(self.error_here("unterminated block"));
            }
            body.push(self.statement()?);
        }
        self.expect(Tok::RBrace, "block")?;
        Ok(body)
    }

    // ----- expressions ------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        if let Some(arrow) = self.maybe_arrow()? {
            return Ok(arrow);
        }

        let left = self.conditional()?;
        let op = match self.peek() {
            Tok::Assign => Some(AssignOp::Assign),
            Tok::PlusAssign => Some(AssignOp::Add),
            Tok::MinusAssign => Some(AssignOp::Sub),
            Tok::StarAssign => Some(AssignOp::Mul),
            Tok::SlashAssign => Some(AssignOp::Div),
            Tok::PercentAssign => Some(AssignOp::Mod),
            _ => None,
        };
        if let Some(op) = op {
            if !matches!(left, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(self.error_here("invalid assignment target"));
            }
            self.advance();
            let value = self.assignment()?;
            return Ok(Expr::Assign {
                op,
                target: Box::new(left),
                value: Box::new(value),
            });
        }
        Ok(left)
    }

    /// Try to parse an arrow function; restores the cursor on failure.
    fn maybe_arrow(&mut self) -> Result<Option<Expr>, ParseError> {
        let saved = self.pos;
        let is_async = if self.is_keyword("async")
            && (matches!(self.peek_at(1), Tok::Ident(_)) || matches!(self.peek_at(1), Tok::LParen))
        {
            self.advance();
            true
        } else {
            false
        };

        let params = match self.peek().clone() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                if matches!(self.peek_at(1), Tok::Arrow) {
                    self.advance();
                    vec![name]
                } else {
                    self.pos = saved;
                    return Ok(None);
                }
            }
            Tok::LParen => {
                self.advance();
                let mut params = Vec::new();
                let ok = loop {
                    match self.peek().clone() {
                        Tok::RParen => {
                            self.advance();
                            break true;
                        }
                        Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                            self.advance();
                            params.push(name);
                            match self.peek() {
                                Tok::Comma => {
                                    self.advance();
                                }
                                Tok::RParen => {}
                                _ => break false,
                            }
                        }
                        _ => break false,
                    }
                };
                if !ok {
                    self.pos = saved;
                    return Ok(None);
                }
                params
            }
            _ => {
                self.pos = saved;
                return Ok(None);
            }
        };

        if !self.eat(&Tok::Arrow) {
            self.pos = saved;
            return Ok(None);
        }

        let func = if self.check(&Tok::LBrace) {
            Function::arrow_block(params, self.block()?, is_async)
        } else {
            Function::arrow_expr(params, self.assignment()?, is_async)
        };
        Ok(Some(Expr::Function(Arc::new(func))))
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.logical_or()?;
        if self.eat(&Tok::Question) {
            let then_expr = self.assignment()?;
            self.expect(Tok::Colon, "conditional expression")?;
            let else_expr = self.assignment()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        Ok(cond)
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.logical_and()?;
        loop {
            let op = match self.peek() {
                Tok::OrOr => LogicalOp::Or,
                Tok::QuestionQuestion => LogicalOp::Nullish,
                _ => break,
            };
            self.advance();
            let right = self.logical_and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.equality()?;
        while self.eat(&Tok::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinaryOp::Eq,
                Tok::NotEq => BinaryOp::NotEq,
                Tok::EqEqEq => BinaryOp::StrictEq,
                Tok::NotEqEq => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.advance();
            let right = self.relational()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinaryOp::Lt,
                Tok::LtEq => BinaryOp::LtEq,
                Tok::Gt => BinaryOp::Gt,
                Tok::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinaryOp::Mul,
                Tok::Slash => BinaryOp::Div,
                Tok::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Tok::Not => Some(UnaryOp::Not),
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Plus => Some(UnaryOp::Plus),
            Tok::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        if self.eat_keyword("await") {
            let expr = self.unary()?;
            return Ok(Expr::Await(Box::new(expr)));
        }
        let update = match self.peek() {
            Tok::PlusPlus => Some(UpdateOp::Inc),
            Tok::MinusMinus => Some(UpdateOp::Dec),
            _ => None,
        };
        if let Some(op) = update {
            self.advance();
            let target = self.unary()?;
            if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(self.error_here("invalid update target"));
            }
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.call_member()?;
        loop {
            let op = match self.peek() {
                Tok::PlusPlus => UpdateOp::Inc,
                Tok::MinusMinus => UpdateOp::Dec,
                _ => break,
            };
            if !matches!(expr, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(self.error_here("invalid update target"));
            }
            self.advance();
            expr = Expr::Update {
                op,
                prefix: false,
                target: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.eat_keyword("new") {
            let mut callee = self.primary()?;
            loop {
                match self.peek() {
                    Tok::Dot => {
                        self.advance();
                        let name = self.ident("member access")?;
                        callee = Expr::static_member(callee, name);
                    }
                    Tok::LBracket => {
                        self.advance();
                        let index = self.expression()?;
                        self.expect(Tok::RBracket, "member access")?;
                        callee = Expr::Member {
                            object: Box::new(callee),
                            property: MemberProp::Computed(Box::new(index)),
                        };
                    }
                    _ => break,
                }
            }
            let args = if self.check(&Tok::LParen) {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.primary()?
        };

        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let name = self.ident("member access")?;
                    expr = Expr::static_member(expr, name);
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket, "member access")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(index)),
                    };
                }
                Tok::LParen => {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(Tok::LParen, "argument list")?;
        let mut args = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                args.push(self.assignment()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "argument list")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Tok::Num(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Tok::Template(pieces) => {
                self.advance();
                let mut parts = Vec::new();
                for piece in pieces {
                    match piece {
                        TplPiece::Chunk(text) => parts.push(TemplatePart::Chunk(text)),
                        TplPiece::Expr {
                            source,
                            line,
                            column,
                        } => {
                            let expr = parse_expr_source(&source, line, column)?;
                            parts.push(TemplatePart::Expr(Box::new(expr)));
                        }
                    }
                }
                Ok(Expr::Template(parts))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "function" => {
                    self.advance();
                    let name = match self.peek() {
                        Tok::Ident(n) if !RESERVED.contains(&n.as_str()) => {
                            let n = n.clone();
                            self.advance();
                            Some(n)
                        }
                        _ => None,
                    };
                    let params = self.param_list()?;
                    let body = self.block()?;
                    Ok(Expr::Function(Arc::new(Function {
                        name,
                        params,
                        body,
                        concise_body: None,
                        is_async: false,
                        is_arrow: false,
                    })))
                }
                "async" if self.keyword_at(1, "function") => {
                    self.advance();
                    self.advance();
                    let name = match self.peek() {
                        Tok::Ident(n) if !RESERVED.contains(&n.as_str()) => {
                            let n = n.clone();
                            self.advance();
                            Some(n)
                        }
                        _ => None,
                    };
                    let params = self.param_list()?;
                    let body = self.block()?;
                    Ok(Expr::Function(Arc::new(Function {
                        name,
                        params,
                        body,
                        concise_body: None,
                        is_async: true,
                        is_arrow: false,
                    })))
                }
                _ if RESERVED.contains(&name.as_str()) => {
                    Err(self.error_here(format!("unexpected keyword '{}'", name)))
                }
                _ => {
                    self.advance();
                    Ok(Expr::Ident(name))
                }
            },
            Tok::LParen => {
                self.advance();
                let expr = self.assignment()?;
                self.expect(Tok::RParen, "parenthesized expression")?;
                Ok(expr)
            }
            Tok::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&Tok::RBracket) {
                    elements.push(self.assignment()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBracket, "array literal")?;
                Ok(Expr::Array(elements))
            }
            Tok::LBrace => {
                self.advance();
                let mut props = Vec::new();
                while !self.check(&Tok::RBrace) {
                    let key = match self.peek().clone() {
                        Tok::Ident(name) => {
                            self.advance();
                            PropKey::Ident(name)
                        }
                        Tok::Str(text) => {
                            self.advance();
                            PropKey::Str(text)
                        }
                        Tok::Num(n) => {
                            self.advance();
                            PropKey::Str(crate::printer::format_number(n))
                        }
                        other => {
                            return Err(self.error_here(format!(
                                "expected property key, found {}",
                                other.describe()
                            )))
                        }
                    };
                    if self.eat(&Tok::Colon) {
                        let value = self.assignment()?;
                        props.push((key, value));
                    } else {
                        // shorthand { name }
                        match &key {
                            PropKey::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                                let value = Expr::Ident(name.clone());
                                props.push((key, value));
                            }
                            _ => {
                                return Err(
                                    self.error_here("expected ':' after property key")
                                )
                            }
                        }
                    }
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBrace, "object literal")?;
                Ok(Expr::Object(props))
            }
            other => Err(self.error_here(format!("unexpected {}", other.describe()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        parse_program(source).unwrap()
    }

    #[test]
    fn parses_return_expression() {
        let program = parse("return 1 + 2;");
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::Return(Some(Expr::Binary { op, .. })) => assert_eq!(*op, BinaryOp::Add),
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_await_member_call() {
        let program = parse(r#"return await atp.llm.complete({prompt: "hi"});"#);
        match &program.body[0] {
            Stmt::Return(Some(Expr::Await(inner))) => match inner.as_ref() {
                Expr::Call { callee, args } => {
                    assert!(matches!(
                        callee.as_ref(),
                        Expr::Member {
                            property: MemberProp::Static(name),
                            ..
                        } if name == "complete"
                    ));
                    assert!(matches!(args[0], Expr::Object(_)));
                }
                other => panic!("unexpected inner {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_arrow_functions() {
        let program = parse("const f = async x => await g(x); const h = (a, b) => { return a; };");
        match &program.body[0] {
            Stmt::VarDecl { decls, .. } => match decls[0].init.as_ref().unwrap() {
                Expr::Function(func) => {
                    assert!(func.is_async);
                    assert!(func.is_arrow);
                    assert_eq!(func.params, vec!["x".to_string()]);
                    assert!(func.concise_body.is_some());
                }
                other => panic!("unexpected init {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
        match &program.body[1] {
            Stmt::VarDecl { decls, .. } => match decls[0].init.as_ref().unwrap() {
                Expr::Function(func) => {
                    assert!(!func.is_async);
                    assert_eq!(func.params.len(), 2);
                    assert!(func.concise_body.is_none());
                }
                other => panic!("unexpected init {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_for_of() {
        let program = parse("for (const x of [10, 20, 30]) { s += x; }");
        match &program.body[0] {
            Stmt::ForOf { decl, name, .. } => {
                assert_eq!(*decl, DeclKind::Const);
                assert_eq!(name, "x");
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_classic_for() {
        let program = parse("for (let i = 0; i < 10; i++) { f(i); }");
        match &program.body[0] {
            Stmt::For {
                init, cond, step, ..
            } => {
                assert!(init.is_some());
                assert!(cond.is_some());
                assert!(step.is_some());
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_try_catch_and_throw() {
        let program = parse(r#"try { throw new Error("boom"); } catch (e) { return e.message; }"#);
        match &program.body[0] {
            Stmt::Try { block, catch, .. } => {
                assert_eq!(block.len(), 1);
                assert_eq!(catch.as_ref().unwrap().param.as_deref(), Some("e"));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_template_literal() {
        let program = parse("return `item ${n + 1} done`;");
        match &program.body[0] {
            Stmt::Return(Some(Expr::Template(parts))) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[1], TemplatePart::Expr(_)));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parse_error_has_line_and_column() {
        let err = parse_program("let x = ;").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 9);
    }

    #[test]
    fn parse_error_on_second_line() {
        let err = parse_program("let a = 1;\nlet b = @;").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn object_shorthand_expands() {
        let program = parse("const o = {a, b: 2};");
        match &program.body[0] {
            Stmt::VarDecl { decls, .. } => match decls[0].init.as_ref().unwrap() {
                Expr::Object(props) => {
                    assert_eq!(props.len(), 2);
                    assert!(matches!(&props[0].1, Expr::Ident(name) if name == "a"));
                }
                other => panic!("unexpected init {:?}", other),
            },
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn multi_declarator_let() {
        let program = parse("let a = 1, b = 2;");
        match &program.body[0] {
            Stmt::VarDecl { decls, .. } => assert_eq!(decls.len(), 2),
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn async_call_is_not_an_arrow() {
        // 'async' used as a plain function name
        let program = parse("async(1);");
        match &program.body[0] {
            Stmt::Expr(Expr::Call { callee, .. }) => {
                assert!(matches!(callee.as_ref(), Expr::Ident(name) if name == "async"));
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }
}
