//! Lexer (tokenizer) for the script dialect
//!
//! Splits script source into [`Token`]s, ending with `Eof`.
//! Line and block comments are skipped. Every token records the character
//! offset it starts at so the parser can slice function source text.

use super::ast::SourceLocation;
use std::fmt;

/// Script tokens.
///
/// Each token keeps its [`SourceLocation`]; parse errors and function source
/// slicing both read it.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64, SourceLocation),
    Str(String, SourceLocation),

    // Identifiers
    Ident(String, SourceLocation),

    // Keywords
    Let(SourceLocation),
    Const(SourceLocation),
    Var(SourceLocation),
    Function(SourceLocation),
    Return(SourceLocation),
    If(SourceLocation),
    Else(SourceLocation),
    While(SourceLocation),
    For(SourceLocation),
    Break(SourceLocation),
    Continue(SourceLocation),
    Throw(SourceLocation),
    Try(SourceLocation),
    Catch(SourceLocation),
    Finally(SourceLocation),
    New(SourceLocation),
    Typeof(SourceLocation),
    True(SourceLocation),
    False(SourceLocation),
    Null(SourceLocation),
    This(SourceLocation),

    // Arithmetic
    Plus(SourceLocation),    // +
    Minus(SourceLocation),   // -
    Star(SourceLocation),    // *
    Slash(SourceLocation),   // /
    Percent(SourceLocation), // %

    // Comparison
    EqEq(SourceLocation),     // ==
    EqEqEq(SourceLocation),   // ===
    NotEq(SourceLocation),    // !=
    NotEqEq(SourceLocation),  // !==
    Lt(SourceLocation),       // <
    Le(SourceLocation),       // <=
    Gt(SourceLocation),       // >
    Ge(SourceLocation),       // >=

    // Logical
    AndAnd(SourceLocation), // &&
    OrOr(SourceLocation),   // ||
    Bang(SourceLocation),   // !

    // Assignment
    Eq(SourceLocation),        // =
    PlusEq(SourceLocation),    // +=
    MinusEq(SourceLocation),   // -=
    StarEq(SourceLocation),    // *=
    SlashEq(SourceLocation),   // /=
    PercentEq(SourceLocation), // %=

    // Increment/Decrement
    PlusPlus(SourceLocation),   // ++
    MinusMinus(SourceLocation), // --

    FatArrow(SourceLocation), // =>
    Dot(SourceLocation),      // .
    Question(SourceLocation), // ?
    Colon(SourceLocation),    // :

    // Punctuation
    LParen(SourceLocation),    // (
    RParen(SourceLocation),    // )
    LBrace(SourceLocation),    // {
    RBrace(SourceLocation),    // }
    LBracket(SourceLocation),  // [
    RBracket(SourceLocation),  // ]
    Semicolon(SourceLocation), // ;
    Comma(SourceLocation),     // ,

    // End of file
    Eof(SourceLocation),
}

impl Token {
    /// Where the token starts.
    pub fn location(&self) -> SourceLocation {
        match self {
            Token::Number(_, loc) | Token::Str(_, loc) | Token::Ident(_, loc) => *loc,
            Token::Let(loc)
            | Token::Const(loc)
            | Token::Var(loc)
            | Token::Function(loc)
            | Token::Return(loc)
            | Token::If(loc)
            | Token::Else(loc)
            | Token::While(loc)
            | Token::For(loc)
            | Token::Break(loc)
            | Token::Continue(loc)
            | Token::Throw(loc)
            | Token::Try(loc)
            | Token::Catch(loc)
            | Token::Finally(loc)
            | Token::New(loc)
            | Token::Typeof(loc)
            | Token::True(loc)
            | Token::False(loc)
            | Token::Null(loc)
            | Token::This(loc)
            | Token::Plus(loc)
            | Token::Minus(loc)
            | Token::Star(loc)
            | Token::Slash(loc)
            | Token::Percent(loc)
            | Token::EqEq(loc)
            | Token::EqEqEq(loc)
            | Token::NotEq(loc)
            | Token::NotEqEq(loc)
            | Token::Lt(loc)
            | Token::Le(loc)
            | Token::Gt(loc)
            | Token::Ge(loc)
            | Token::AndAnd(loc)
            | Token::OrOr(loc)
            | Token::Bang(loc)
            | Token::Eq(loc)
            | Token::PlusEq(loc)
            | Token::MinusEq(loc)
            | Token::StarEq(loc)
            | Token::SlashEq(loc)
            | Token::PercentEq(loc)
            | Token::PlusPlus(loc)
            | Token::MinusMinus(loc)
            | Token::FatArrow(loc)
            | Token::Dot(loc)
            | Token::Question(loc)
            | Token::Colon(loc)
            | Token::LParen(loc)
            | Token::RParen(loc)
            | Token::LBrace(loc)
            | Token::RBrace(loc)
            | Token::LBracket(loc)
            | Token::RBracket(loc)
            | Token::Semicolon(loc)
            | Token::Comma(loc)
            | Token::Eof(loc) => *loc,
        }
    }

    /// Keyword spelling, if this token is a keyword. Keywords are valid
    /// property names after `.` and in object literals.
    pub fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            Token::Let(_) => "let",
            Token::Const(_) => "const",
            Token::Var(_) => "var",
            Token::Function(_) => "function",
            Token::Return(_) => "return",
            Token::If(_) => "if",
            Token::Else(_) => "else",
            Token::While(_) => "while",
            Token::For(_) => "for",
            Token::Break(_) => "break",
            Token::Continue(_) => "continue",
            Token::Throw(_) => "throw",
            Token::Try(_) => "try",
            Token::Catch(_) => "catch",
            Token::Finally(_) => "finally",
            Token::New(_) => "new",
            Token::Typeof(_) => "typeof",
            Token::True(_) => "true",
            Token::False(_) => "false",
            Token::Null(_) => "null",
            Token::This(_) => "this",
            _ => return None,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(keyword) = self.keyword_text() {
            return write!(f, "'{}'", keyword);
        }
        match self {
            Token::Number(n, _) => write!(f, "number {}", n),
            Token::Str(s, _) => write!(f, "string \"{}\"", s),
            Token::Ident(s, _) => write!(f, "identifier '{}'", s),
            Token::Plus(_) => write!(f, "'+'"),
            Token::Minus(_) => write!(f, "'-'"),
            Token::Star(_) => write!(f, "'*'"),
            Token::Slash(_) => write!(f, "'/'"),
            Token::Percent(_) => write!(f, "'%'"),
            Token::EqEq(_) => write!(f, "'=='"),
            Token::EqEqEq(_) => write!(f, "'==='"),
            Token::NotEq(_) => write!(f, "'!='"),
            Token::NotEqEq(_) => write!(f, "'!=='"),
            Token::Lt(_) => write!(f, "'<'"),
            Token::Le(_) => write!(f, "'<='"),
            Token::Gt(_) => write!(f, "'>'"),
            Token::Ge(_) => write!(f, "'>='"),
            Token::AndAnd(_) => write!(f, "'&&'"),
            Token::OrOr(_) => write!(f, "'||'"),
            Token::Bang(_) => write!(f, "'!'"),
            Token::Eq(_) => write!(f, "'='"),
            Token::PlusEq(_) => write!(f, "'+='"),
            Token::MinusEq(_) => write!(f, "'-='"),
            Token::StarEq(_) => write!(f, "'*='"),
            Token::SlashEq(_) => write!(f, "'/='"),
            Token::PercentEq(_) => write!(f, "'%='"),
            Token::PlusPlus(_) => write!(f, "'++'"),
            Token::MinusMinus(_) => write!(f, "'--'"),
            Token::FatArrow(_) => write!(f, "'=>'"),
            Token::Dot(_) => write!(f, "'.'"),
            Token::Question(_) => write!(f, "'?'"),
            Token::Colon(_) => write!(f, "':'"),
            Token::LParen(_) => write!(f, "'('"),
            Token::RParen(_) => write!(f, "')'"),
            Token::LBrace(_) => write!(f, "'{{'"),
            Token::RBrace(_) => write!(f, "'}}'"),
            Token::LBracket(_) => write!(f, "'['"),
            Token::RBracket(_) => write!(f, "']'"),
            Token::Semicolon(_) => write!(f, "';'"),
            Token::Comma(_) => write!(f, "','"),
            Token::Eof(_) => write!(f, "end of input"),
            _ => write!(f, "token"),
        }
    }
}

/// Lexer error type
#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.location.line, self.location.column
        )
    }
}

impl std::error::Error for LexError {}

/// Lexer for script source
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    /// Lexer over `input`.
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lex everything up to and including `Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(Token::Eof(self.current_location()));
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    /// Get next token
    fn next_token(&mut self) -> Result<Token, LexError> {
        let loc = self.current_location();
        let ch = self.advance().ok_or_else(|| LexError {
            message: "Unexpected end of input".to_string(),
            location: loc,
        })?;

        match ch {
            '"' | '\'' => self.string_literal(ch, loc),
            '0'..='9' => self.number_literal(ch, loc),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                self.number_literal(ch, loc)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                Ok(self.identifier_or_keyword(ch, loc))
            }

            '+' => {
                if self.match_char('+') {
                    Ok(Token::PlusPlus(loc))
                } else if self.match_char('=') {
                    Ok(Token::PlusEq(loc))
                } else {
                    Ok(Token::Plus(loc))
                }
            }
            '-' => {
                if self.match_char('-') {
                    Ok(Token::MinusMinus(loc))
                } else if self.match_char('=') {
                    Ok(Token::MinusEq(loc))
                } else {
                    Ok(Token::Minus(loc))
                }
            }
            '*' => {
                if self.match_char('=') {
                    Ok(Token::StarEq(loc))
                } else {
                    Ok(Token::Star(loc))
                }
            }
            '/' => {
                if self.match_char('=') {
                    Ok(Token::SlashEq(loc))
                } else {
                    Ok(Token::Slash(loc))
                }
            }
            '%' => {
                if self.match_char('=') {
                    Ok(Token::PercentEq(loc))
                } else {
                    Ok(Token::Percent(loc))
                }
            }
            '=' => {
                if self.match_char('=') {
                    if self.match_char('=') {
                        Ok(Token::EqEqEq(loc))
                    } else {
                        Ok(Token::EqEq(loc))
                    }
                } else if self.match_char('>') {
                    Ok(Token::FatArrow(loc))
                } else {
                    Ok(Token::Eq(loc))
                }
            }
            '!' => {
                if self.match_char('=') {
                    if self.match_char('=') {
                        Ok(Token::NotEqEq(loc))
                    } else {
                        Ok(Token::NotEq(loc))
                    }
                } else {
                    Ok(Token::Bang(loc))
                }
            }
            '<' => {
                if self.match_char('=') {
                    Ok(Token::Le(loc))
                } else {
                    Ok(Token::Lt(loc))
                }
            }
            '>' => {
                if self.match_char('=') {
                    Ok(Token::Ge(loc))
                } else {
                    Ok(Token::Gt(loc))
                }
            }
            '&' if self.match_char('&') => Ok(Token::AndAnd(loc)),
            '|' if self.match_char('|') => Ok(Token::OrOr(loc)),
            '.' => Ok(Token::Dot(loc)),
            '?' => Ok(Token::Question(loc)),
            ':' => Ok(Token::Colon(loc)),
            '(' => Ok(Token::LParen(loc)),
            ')' => Ok(Token::RParen(loc)),
            '{' => Ok(Token::LBrace(loc)),
            '}' => Ok(Token::RBrace(loc)),
            '[' => Ok(Token::LBracket(loc)),
            ']' => Ok(Token::RBracket(loc)),
            ';' => Ok(Token::Semicolon(loc)),
            ',' => Ok(Token::Comma(loc)),

            _ => Err(LexError {
                message: format!("unexpected character '{}'", ch),
                location: loc,
            }),
        }
    }

    /// Parse string literal delimited by `quote`
    fn string_literal(&mut self, quote: char, loc: SourceLocation) -> Result<Token, LexError> {
        let mut string = String::new();

        while let Some(ch) = self.peek() {
            if ch == quote {
                self.advance();
                return Ok(Token::Str(string, loc));
            }
            if ch == '\n' {
                break;
            }

            if ch == '\\' {
                self.advance();
                let escaped = self.advance().ok_or_else(|| LexError {
                    message: "unterminated string literal".to_string(),
                    location: loc,
                })?;

                let unescaped = match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    'u' => self.unicode_escape()?,
                    other => other,
                };
                string.push(unescaped);
            } else {
                string.push(ch);
                self.advance();
            }
        }

        Err(LexError {
            message: "unterminated string literal".to_string(),
            location: loc,
        })
    }

    fn unicode_escape(&mut self) -> Result<char, LexError> {
        let loc = self.current_location();
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .advance()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| LexError {
                    message: "malformed Unicode escape".to_string(),
                    location: loc,
                })?;
            code = code * 16 + digit;
        }
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// Parse numeric literal (decimal, fraction, exponent or `0x` hex)
    fn number_literal(&mut self, first: char, loc: SourceLocation) -> Result<Token, LexError> {
        if first == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.peek().filter(|c| c.is_ascii_hexdigit()) {
                digits.push(c);
                self.advance();
            }
            return u64::from_str_radix(&digits, 16)
                .map(|n| Token::Number(n as f64, loc))
                .map_err(|_| LexError {
                    message: "malformed hexadecimal literal".to_string(),
                    location: loc,
                });
        }

        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance();
            } else if (c == 'e' || c == 'E') && !text.contains(['e', 'E']) {
                text.push(c);
                self.advance();
                if let Some(sign) = self.peek().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }

        text.parse::<f64>()
            .map(|n| Token::Number(n, loc))
            .map_err(|_| LexError {
                message: format!("malformed number literal '{}'", text),
                location: loc,
            })
    }

    /// Identifier, keyword or literal word (`true`, `null`, ...)
    fn identifier_or_keyword(&mut self, first: char, loc: SourceLocation) -> Token {
        let mut ident = String::new();
        ident.push(first);

        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "let" => Token::Let(loc),
            "const" => Token::Const(loc),
            "var" => Token::Var(loc),
            "function" => Token::Function(loc),
            "return" => Token::Return(loc),
            "if" => Token::If(loc),
            "else" => Token::Else(loc),
            "while" => Token::While(loc),
            "for" => Token::For(loc),
            "break" => Token::Break(loc),
            "continue" => Token::Continue(loc),
            "throw" => Token::Throw(loc),
            "try" => Token::Try(loc),
            "catch" => Token::Catch(loc),
            "finally" => Token::Finally(loc),
            "new" => Token::New(loc),
            "typeof" => Token::Typeof(loc),
            "true" => Token::True(loc),
            "false" => Token::False(loc),
            "null" => Token::Null(loc),
            "this" => Token::This(loc),
            _ => Token::Ident(ident, loc),
        }
    }

    /// Skip whitespace, `//` comments and `/* */` comments
    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_ahead(1) == Some('*') => {
                    let loc = self.current_location();
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(LexError {
                                    message: "unterminated comment".to_string(),
                                    location: loc,
                                });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // character cursor

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.position)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.input.get(self.position + n).copied()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied()?;
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }
}
