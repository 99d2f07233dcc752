//! Recursive-descent parser for the script dialect
//!
//! [`Parser`] owns the token stream and the cursor helpers. The grammar is
//! spread over `impl Parser` blocks: `statements` covers declarations and
//! control flow, `expressions` covers operators by precedence and function
//! literals.

use super::ast::*;
use super::lexer::{LexError, Lexer, Token};
use crate::constants::MAX_NESTING_DEPTH;
use std::fmt;
use std::sync::Arc;

/// Parser error type
#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyntaxError: {} (line {}, column {})",
            self.message, self.location.line, self.location.column
        )
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            location: err.location,
        }
    }
}

/// Recursive descent parser for the script dialect
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) position: usize,
    /// Nesting spent by the constructs currently being parsed
    pub(crate) nesting: usize,
    source: Vec<char>,
}

/// Nesting cost of a bracketed expression, nested statement or body.
pub(crate) const GROUP_COST: usize = 4;

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
            nesting: 0,
            source: source.chars().collect(),
        })
    }

    /// Parse a whole script
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::default();

        while !self.is_at_end() {
            program.body.push(self.parse_statement()?);
        }

        Ok(program)
    }

    /// Parse source text that holds exactly one function literal or declaration.
    pub fn parse_function_source(&mut self) -> Result<Arc<FunctionDef>, ParseError> {
        let loc = self.current_location();
        let expr = self.parse_expression()?;
        if !self.is_at_end() {
            return Err(self.error_here("unexpected trailing input after function"));
        }
        match expr {
            Expr::Function(def) => Ok(def),
            _ => Err(ParseError {
                message: "expected function source".to_string(),
                location: loc,
            }),
        }
    }

    // nesting

    /// Run `parse` with `cost` more nesting spent.
    pub(crate) fn nested<T>(
        &mut self,
        cost: usize,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.spend_nesting(cost)?;
        let result = parse(self);
        self.nesting -= cost;
        result
    }

    /// Charge `cost` without releasing it. Operator and member chains reset
    /// [`Parser::nesting`] to their starting mark once the chain is built.
    pub(crate) fn spend_nesting(&mut self, cost: usize) -> Result<(), ParseError> {
        if self.nesting + cost > MAX_NESTING_DEPTH {
            return Err(ParseError {
                message: "nesting too deep".to_string(),
                location: self.current_location(),
            });
        }
        self.nesting += cost;
        Ok(())
    }

    // token cursor

    pub(crate) fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek_token()) == std::mem::discriminant(token)
    }

    pub(crate) fn check_ahead(&self, n: usize, token: &Token) -> bool {
        self.tokens
            .get(self.position + n)
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(token))
    }

    pub(crate) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.previous()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(self.peek_token(), Token::Eof(_))
    }

    pub(crate) fn peek_token(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.position.saturating_sub(1)]
    }

    pub(crate) fn current_location(&self) -> SourceLocation {
        self.peek_token().location()
    }

    pub(crate) fn previous_location(&self) -> SourceLocation {
        self.previous().location()
    }

    pub(crate) fn expect_token(&mut self, token: &Token, message: &str) -> Result<(), ParseError> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    pub(crate) fn expect_identifier(&mut self, message: &str) -> Result<String, ParseError> {
        if let Token::Ident(name, _) = self.peek_token() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here(message))
        }
    }

    pub(crate) fn error_here(&self, message: &str) -> ParseError {
        ParseError {
            message: format!("{}, found {}", message, self.peek_token()),
            location: self.current_location(),
        }
    }

    /// Consume a statement terminator.
    ///
    /// A `;` may be omitted before `}`, at end of input, or at a line break.
    pub(crate) fn consume_terminator(&mut self) -> Result<(), ParseError> {
        let loc = self.current_location();
        if self.match_token(&Token::Semicolon(loc))
            || self.check(&Token::RBrace(loc))
            || self.is_at_end()
            || (self.position > 0 && loc.line > self.previous_location().line)
        {
            Ok(())
        } else {
            Err(self.error_here("expected ';'"))
        }
    }

    /// Source text from character offset `start` up to the current token.
    pub(crate) fn source_since(&self, start: usize) -> String {
        let end = self.current_location().offset.min(self.source.len());
        let text: String = self.source[start.min(end)..end].iter().collect();
        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        let mut parser = Parser::new(source).expect("lexing failed");
        parser.parse_program().expect("parsing failed")
    }

    #[test]
    fn test_semicolons_optional_at_line_breaks() {
        let program = parse("let a = 1\nlet b = 2\na + b");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_missing_semicolon_on_same_line() {
        let mut parser = Parser::new("let a = 1 let b = 2").unwrap();
        assert!(parser.parse_program().is_err());
    }

    #[test]
    fn test_statement_nesting_limit() {
        let blocks = format!("{}{}", "{".repeat(20), "}".repeat(20));
        assert_eq!(parse(&blocks).body.len(), 1);

        let mut parser = Parser::new(&"{".repeat(10_000)).unwrap();
        let err = parser.parse_program().unwrap_err();
        assert_eq!(err.message, "nesting too deep");
    }

    #[test]
    fn test_function_source_is_captured() {
        let program = parse("const f = (a, b) => a * b; f(2, 3);");
        match &program.body[0] {
            Stmt::Decl { declarations, .. } => match &declarations[0].1 {
                Some(Expr::Function(def)) => {
                    assert_eq!(def.source, "(a, b) => a * b");
                    assert_eq!(def.params, vec!["a", "b"]);
                    assert!(def.is_arrow);
                }
                other => panic!("expected arrow function, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_function_source_round_trip() {
        let program = parse("function add(x, y) { return x + y; }");
        let def = match &program.body[0] {
            Stmt::Function(def) => def.clone(),
            other => panic!("expected function declaration, got {:?}", other),
        };
        let reparsed = Parser::new(&def.source)
            .unwrap()
            .parse_function_source()
            .unwrap();
        assert_eq!(*reparsed, *def);
    }
}
