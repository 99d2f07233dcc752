//! Script dialect front end
//!
//! - [`lexer`]: source text to tokens
//! - [`parse`]: parser state, error type and entry points
//! - `expressions` / `statements`: the `impl Parser` grammar rules
//! - [`ast`]: syntax tree shared with the interpreter

pub mod ast;
mod expressions;
pub mod lexer;
pub mod parse;
mod statements;

pub use parse::{ParseError, Parser};
