//! Expression parsing
//!
//! Precedence climbing for binary operators and recursive descent for the
//! rest, lowest precedence first:
//!
//! - assignment and arrow functions (right-associative)
//! - conditional `? :`
//! - `||`, then `&&`
//! - equality `== != === !==`
//! - relational `< <= > >=`
//! - additive, then multiplicative
//! - unary `! - + typeof ++ --`
//! - postfix `++ --`
//! - calls, member access, `new`
//! - primary expressions and literals

use super::ast::*;
use super::lexer::Token;
use super::parse::{ParseError, Parser, GROUP_COST};
use std::sync::Arc;

fn is_assignment_target(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. })
}

/// Property key spelling of a numeric literal
fn number_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Parser {
    /// Full expression, assignment included
    pub(crate) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.nested(GROUP_COST, Self::parse_assignment_level)
    }

    /// Parse assignment, compound assignment or arrow function
    fn parse_assignment_level(&mut self) -> Result<Expr, ParseError> {
        if self.is_arrow_ahead() {
            return self.parse_arrow_function();
        }

        let expr = self.parse_conditional()?;

        let loc = self.current_location();
        if self.match_token(&Token::Eq(loc)) {
            if !is_assignment_target(&expr) {
                return Err(ParseError {
                    message: "invalid assignment target".to_string(),
                    location: loc,
                });
            }
            let value = Box::new(self.parse_assignment()?);
            return Ok(Expr::Assign {
                target: Box::new(expr),
                value,
                location: loc,
            });
        }

        let compound_op = match self.peek_token() {
            Token::PlusEq(_) => Some(BinOp::Add),
            Token::MinusEq(_) => Some(BinOp::Sub),
            Token::StarEq(_) => Some(BinOp::Mul),
            Token::SlashEq(_) => Some(BinOp::Div),
            Token::PercentEq(_) => Some(BinOp::Mod),
            _ => None,
        };

        if let Some(op) = compound_op {
            self.advance();
            if !is_assignment_target(&expr) {
                return Err(ParseError {
                    message: "invalid assignment target".to_string(),
                    location: loc,
                });
            }
            let value = Box::new(self.parse_assignment()?);
            return Ok(Expr::CompoundAssign {
                op,
                target: Box::new(expr),
                value,
                location: loc,
            });
        }

        Ok(expr)
    }

    /// Detect `x =>` or `( ... ) =>` without consuming tokens.
    fn is_arrow_ahead(&self) -> bool {
        let loc = self.current_location();
        if matches!(self.peek_token(), Token::Ident(..)) {
            return self.check_ahead(1, &Token::FatArrow(loc));
        }
        if !self.check(&Token::LParen(loc)) {
            return false;
        }
        let mut depth = 0usize;
        for (i, token) in self.tokens[self.position..].iter().enumerate() {
            match token {
                Token::LParen(_) => depth += 1,
                Token::RParen(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.check_ahead(i + 1, &Token::FatArrow(loc));
                    }
                }
                Token::Eof(_) => return false,
                _ => {}
            }
        }
        false
    }

    fn parse_arrow_function(&mut self) -> Result<Expr, ParseError> {
        let start = self.current_location().offset;
        let params = if let Token::Ident(name, _) = self.peek_token() {
            let name = name.clone();
            self.advance();
            vec![name]
        } else {
            self.parse_parameter_list()?
        };
        self.expect_token(&Token::FatArrow(self.current_location()), "expected '=>'")?;

        let body = if self.check(&Token::LBrace(self.current_location())) {
            FunctionBody::Block(self.parse_block_body()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };

        Ok(Expr::Function(Arc::new(FunctionDef {
            name: None,
            params,
            body,
            is_arrow: true,
            source: self.source_since(start),
        })))
    }

    /// Parse `function [name](params) { body }`; the `function` keyword is the current token.
    pub(crate) fn parse_function_literal(&mut self) -> Result<Arc<FunctionDef>, ParseError> {
        let start = self.current_location().offset;
        self.expect_token(&Token::Function(self.current_location()), "expected 'function'")?;
        let name = match self.peek_token() {
            Token::Ident(name, _) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let params = self.parse_parameter_list()?;
        let body = FunctionBody::Block(self.parse_block_body()?);
        Ok(Arc::new(FunctionDef {
            name,
            params,
            body,
            is_arrow: false,
            source: self.source_since(start),
        }))
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_token(&Token::LParen(self.current_location()), "expected '('")?;
        let mut params = Vec::new();
        if !self.match_token(&Token::RParen(self.current_location())) {
            loop {
                params.push(self.expect_identifier("expected parameter name")?);
                if self.match_token(&Token::RParen(self.current_location())) {
                    break;
                }
                self.expect_token(&Token::Comma(self.current_location()), "expected ',' or ')'")?;
            }
        }
        Ok(params)
    }

    /// Parse condition ? then : else
    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_logical_or()?;

        if self.match_token(&Token::Question(self.current_location())) {
            let then_expr = Box::new(self.parse_assignment()?);
            self.expect_token(
                &Token::Colon(self.current_location()),
                "expected ':' in conditional expression",
            )?;
            let else_expr = Box::new(self.parse_assignment()?);
            return Ok(Expr::Conditional {
                condition: Box::new(expr),
                then_expr,
                else_expr,
            });
        }

        Ok(expr)
    }

    /// Parse logical OR (||)
    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_logical_and()?;

        while self.match_token(&Token::OrOr(self.current_location())) {
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_logical_and()?);
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_equality()?;

        while self.match_token(&Token::AndAnd(self.current_location())) {
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_equality()?);
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_relational()?;

        loop {
            let op = match self.peek_token() {
                Token::EqEq(_) => BinOp::Eq,
                Token::NotEq(_) => BinOp::Ne,
                Token::EqEqEq(_) => BinOp::StrictEq,
                Token::NotEqEq(_) => BinOp::StrictNe,
                _ => break,
            };
            self.advance();
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_relational()?);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.peek_token() {
                Token::Lt(_) => BinOp::Lt,
                Token::Le(_) => BinOp::Le,
                Token::Gt(_) => BinOp::Gt,
                Token::Ge(_) => BinOp::Ge,
                _ => break,
            };
            self.advance();
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_additive()?);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.peek_token() {
                Token::Plus(_) => BinOp::Add,
                Token::Minus(_) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_multiplicative()?);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mark = self.nesting;
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek_token() {
                Token::Star(_) => BinOp::Mul,
                Token::Slash(_) => BinOp::Div,
                Token::Percent(_) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.spend_nesting(1)?;
            let right = Box::new(self.parse_unary()?);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right,
            };
        }

        self.nesting = mark;
        Ok(left)
    }

    /// Parse unary operators and prefix increment/decrement
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.current_location();
        let op = match self.peek_token() {
            Token::Bang(_) => Some(UnaryOp::Not),
            Token::Minus(_) => Some(UnaryOp::Neg),
            Token::Plus(_) => Some(UnaryOp::Plus),
            Token::Typeof(_) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = Box::new(self.nested(1, Self::parse_unary)?);
            return Ok(Expr::Unary { op, operand });
        }

        let increment = match self.peek_token() {
            Token::PlusPlus(_) => Some(true),
            Token::MinusMinus(_) => Some(false),
            _ => None,
        };
        if let Some(increment) = increment {
            self.advance();
            let target = self.nested(1, Self::parse_unary)?;
            if !is_assignment_target(&target) {
                return Err(ParseError {
                    message: "invalid increment/decrement operand".to_string(),
                    location: loc,
                });
            }
            return Ok(Expr::Update {
                target: Box::new(target),
                increment,
                prefix: true,
                location: loc,
            });
        }

        self.parse_postfix()
    }

    /// Parse postfix increment/decrement
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_call_member()?;

        let loc = self.current_location();
        // a line break before ++ starts a new statement
        if loc.line != self.previous_location().line {
            return Ok(expr);
        }
        let increment = match self.peek_token() {
            Token::PlusPlus(_) => true,
            Token::MinusMinus(_) => false,
            _ => return Ok(expr),
        };
        if !is_assignment_target(&expr) {
            return Err(ParseError {
                message: "invalid increment/decrement operand".to_string(),
                location: loc,
            });
        }
        self.advance();
        Ok(Expr::Update {
            target: Box::new(expr),
            increment,
            prefix: false,
            location: loc,
        })
    }

    /// Parse calls, `.name`, `[index]` and `new`
    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.check(&Token::New(self.current_location())) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        let mark = self.nesting;
        loop {
            let loc = self.current_location();
            let chained = self.check(&Token::LParen(loc))
                || self.check(&Token::Dot(loc))
                || self.check(&Token::LBracket(loc));
            if chained {
                self.spend_nesting(1)?;
            }
            if self.check(&Token::LParen(loc)) {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    location: loc,
                };
            } else if self.match_token(&Token::Dot(loc)) {
                let property = self.parse_property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    location: loc,
                };
            } else if self.match_token(&Token::LBracket(loc)) {
                let index = Box::new(self.parse_expression()?);
                self.expect_token(&Token::RBracket(self.current_location()), "expected ']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index,
                    location: loc,
                };
            } else {
                break;
            }
        }

        self.nesting = mark;
        Ok(expr)
    }

    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        let loc = self.current_location();
        self.advance();
        let mut callee = self.parse_primary()?;
        let mark = self.nesting;
        loop {
            let member_loc = self.current_location();
            if self.match_token(&Token::Dot(member_loc)) {
                self.spend_nesting(1)?;
                let property = self.parse_property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property,
                    location: member_loc,
                };
            } else {
                break;
            }
        }
        let args = if self.check(&Token::LParen(self.current_location())) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        self.nesting = mark;
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
            location: loc,
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_token(&Token::LParen(self.current_location()), "expected '('")?;
        let mut args = Vec::new();
        while !self.match_token(&Token::RParen(self.current_location())) {
            args.push(self.parse_assignment()?);
            if !self.match_token(&Token::Comma(self.current_location())) {
                self.expect_token(&Token::RParen(self.current_location()), "expected ')' after arguments")?;
                break;
            }
        }
        Ok(args)
    }

    /// Identifier or keyword used as a property name
    fn parse_property_name(&mut self) -> Result<String, ParseError> {
        if let Some(keyword) = self.peek_token().keyword_text() {
            self.advance();
            return Ok(keyword.to_string());
        }
        self.expect_identifier("expected property name")
    }

    /// Parse primary expressions: literals, identifiers, grouping, object and
    /// array literals, function expressions
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek_token().clone();
        match token {
            Token::Number(n, _) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Str(s, _) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::True(_) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False(_) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Null(_) => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::This(_) => {
                self.advance();
                Ok(Expr::This)
            }
            Token::Ident(name, location) => {
                self.advance();
                Ok(Expr::Ident { name, location })
            }
            Token::Function(_) => Ok(Expr::Function(self.parse_function_literal()?)),
            Token::LParen(_) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_token(&Token::RParen(self.current_location()), "expected ')'")?;
                Ok(expr)
            }
            Token::LBracket(_) => {
                self.advance();
                let mut elements = Vec::new();
                while !self.match_token(&Token::RBracket(self.current_location())) {
                    elements.push(self.parse_assignment()?);
                    if !self.match_token(&Token::Comma(self.current_location())) {
                        self.expect_token(
                            &Token::RBracket(self.current_location()),
                            "expected ']' after array elements",
                        )?;
                        break;
                    }
                }
                Ok(Expr::Array(elements))
            }
            Token::LBrace(_) => self.parse_object_literal(),
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        let mut entries = Vec::new();
        while !self.match_token(&Token::RBrace(self.current_location())) {
            let key_token = self.peek_token().clone();
            let key = match &key_token {
                Token::Ident(name, _) => name.clone(),
                Token::Str(s, _) => s.clone(),
                Token::Number(n, _) => number_key(*n),
                other => match other.keyword_text() {
                    Some(keyword) => keyword.to_string(),
                    None => return Err(self.error_here("expected property key")),
                },
            };
            self.advance();

            let value = if self.match_token(&Token::Colon(self.current_location())) {
                self.parse_assignment()?
            } else if let Token::Ident(name, location) = key_token {
                // shorthand `{ name }`
                Expr::Ident { name, location }
            } else {
                return Err(self.error_here("expected ':' after property key"));
            };
            entries.push((key, value));

            if !self.match_token(&Token::Comma(self.current_location())) {
                self.expect_token(
                    &Token::RBrace(self.current_location()),
                    "expected '}' after object properties",
                )?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        let mut parser = Parser::new(source).unwrap();
        parser.parse_expression().unwrap()
    }

    #[test]
    fn test_precedence() {
        match expr("1 + 2 * 3") {
            Expr::Binary {
                op: BinOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. })),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        match expr("a = b = 3") {
            Expr::Assign { value, .. } => assert!(matches!(*value, Expr::Assign { .. })),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_member_call_chain() {
        match expr("obj.items[0].run(1, 2)") {
            Expr::Call { callee, args, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(*callee, Expr::Member { ref property, .. } if property == "run"));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        assert!(matches!(expr("(1 + 2) * 3"), Expr::Binary { op: BinOp::Mul, .. }));
        assert!(matches!(expr("() => 1"), Expr::Function(_)));
        assert!(matches!(expr("x => x"), Expr::Function(_)));
    }

    #[test]
    fn test_object_literal_keys() {
        match expr("({ a: 1, 'b c': 2, 3: 4, new: 5, d })") {
            Expr::Object(entries) => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b c", "3", "new", "d"]);
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        let mut parser = Parser::new("1 = 2").unwrap();
        assert!(parser.parse_expression().is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "[".repeat(30), "]".repeat(30));
        assert!(matches!(expr(&deep), Expr::Array(_)));

        for source in ["[".repeat(10_000), "(".repeat(10_000), "!".repeat(10_000)] {
            let mut parser = Parser::new(&source).unwrap();
            let err = parser.parse_expression().unwrap_err();
            assert_eq!(err.message, "nesting too deep");
        }
    }

    #[test]
    fn test_operator_chains_count_toward_nesting() {
        let chain = |terms: usize| vec!["1"; terms].join(" + ");
        assert!(matches!(expr(&chain(200)), Expr::Binary { op: BinOp::Add, .. }));

        let mut parser = Parser::new(&chain(5_000)).unwrap();
        assert!(parser.parse_expression().is_err());

        let members = format!("a{}", ".b".repeat(5_000));
        let mut parser = Parser::new(&members).unwrap();
        assert!(parser.parse_expression().is_err());
    }
}
