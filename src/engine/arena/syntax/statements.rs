//! Statement parsing implementation
//!
//! Handles declarations (`let`, `const`, `var`, `function`), blocks, and the
//! control-flow statements: `if`/`else`, `while`, `for`, `break`, `continue`,
//! `return`, `throw` and `try`/`catch`/`finally`.

use super::ast::*;
use super::lexer::Token;
use super::parse::{ParseError, Parser, GROUP_COST};

impl Parser {
    /// Parse a single statement
    pub(crate) fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(GROUP_COST, Self::parse_statement_kind)
    }

    fn parse_statement_kind(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.current_location();
        match self.peek_token() {
            Token::Let(_) | Token::Const(_) | Token::Var(_) => {
                let stmt = self.parse_declaration()?;
                self.consume_terminator()?;
                Ok(stmt)
            }
            Token::Function(_) => {
                let def = self.parse_function_literal()?;
                if def.name.is_none() {
                    return Err(ParseError {
                        message: "function statement requires a name".to_string(),
                        location: loc,
                    });
                }
                Ok(Stmt::Function(def))
            }
            Token::LBrace(_) => Ok(Stmt::Block(self.parse_block_body()?)),
            Token::If(_) => self.parse_if(),
            Token::While(_) => self.parse_while(),
            Token::For(_) => self.parse_for(),
            Token::Break(_) => {
                self.advance();
                self.consume_terminator()?;
                Ok(Stmt::Break)
            }
            Token::Continue(_) => {
                self.advance();
                self.consume_terminator()?;
                Ok(Stmt::Continue)
            }
            Token::Return(_) => {
                self.advance();
                let next = self.current_location();
                let value = if self.check(&Token::Semicolon(next))
                    || self.check(&Token::RBrace(next))
                    || self.is_at_end()
                    || next.line > loc.line
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_terminator()?;
                Ok(Stmt::Return(value))
            }
            Token::Throw(_) => {
                self.advance();
                let value = self.parse_expression()?;
                self.consume_terminator()?;
                Ok(Stmt::Throw(value))
            }
            Token::Try(_) => self.parse_try(),
            Token::Semicolon(_) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.consume_terminator()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Parse `{ statements }` and return the statements
    pub(crate) fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_token(&Token::LBrace(self.current_location()), "expected '{'")?;
        let mut body = Vec::new();
        while !self.match_token(&Token::RBrace(self.current_location())) {
            if self.is_at_end() {
                return Err(self.error_here("expected '}'"));
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /// Parse `let|const|var name [= init], ...` without the terminator
    fn parse_declaration(&mut self) -> Result<Stmt, ParseError> {
        let location = self.current_location();
        let kind = match self.advance() {
            Token::Let(_) => DeclKind::Let,
            Token::Const(_) => DeclKind::Const,
            _ => DeclKind::Var,
        };

        let mut declarations = Vec::new();
        loop {
            let name = self.expect_identifier("expected variable name")?;
            let init = if self.match_token(&Token::Eq(self.current_location())) {
                Some(self.parse_expression()?)
            } else if kind == DeclKind::Const {
                return Err(self.error_here("missing initializer in const declaration"));
            } else {
                None
            };
            declarations.push((name, init));
            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }

        Ok(Stmt::Decl {
            kind,
            declarations,
            location,
        })
    }

    fn parse_condition(&mut self) -> Result<Expr, ParseError> {
        self.expect_token(&Token::LParen(self.current_location()), "expected '('")?;
        let condition = self.parse_expression()?;
        self.expect_token(&Token::RParen(self.current_location()), "expected ')'")?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let condition = self.parse_condition()?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.match_token(&Token::Else(self.current_location())) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let condition = self.parse_condition()?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While { condition, body })
    }

    /// Parse `for (init; condition; update) body`
    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect_token(&Token::LParen(self.current_location()), "expected '(' after 'for'")?;

        let init = if self.match_token(&Token::Semicolon(self.current_location())) {
            None
        } else {
            let init = if matches!(
                self.peek_token(),
                Token::Let(_) | Token::Const(_) | Token::Var(_)
            ) {
                self.parse_declaration()?
            } else {
                Stmt::Expr(self.parse_expression()?)
            };
            self.expect_token(
                &Token::Semicolon(self.current_location()),
                "expected ';' after for-loop initializer",
            )?;
            Some(Box::new(init))
        };

        let condition = if self.check(&Token::Semicolon(self.current_location())) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_token(
            &Token::Semicolon(self.current_location()),
            "expected ';' after for-loop condition",
        )?;

        let update = if self.check(&Token::RParen(self.current_location())) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_token(&Token::RParen(self.current_location()), "expected ')'")?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let block = self.parse_block_body()?;

        let mut param = None;
        let handler = if self.match_token(&Token::Catch(self.current_location())) {
            if self.match_token(&Token::LParen(self.current_location())) {
                param = Some(self.expect_identifier("expected catch binding")?);
                self.expect_token(&Token::RParen(self.current_location()), "expected ')'")?;
            }
            Some(self.parse_block_body()?)
        } else {
            None
        };

        let finalizer = if self.match_token(&Token::Finally(self.current_location())) {
            Some(self.parse_block_body()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_here("expected 'catch' or 'finally'"));
        }

        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }
}
