//! Novus front end: lexer and parser.
//!
//! Source bytes go through [`lexer::Lexer`] into tokens, then through
//! [`parser::Parser`] into a parse tree. Lex and parse errors are carried
//! as error tokens / error nodes inside the output rather than aborting;
//! the later pipeline stages (analysis, optimization, bytecode emission)
//! consume the tree from here.

pub mod lexer;
pub mod node;
pub mod parser;
pub mod token;

pub use lexer::{Lexer, lex};
pub use node::Node;
pub use parser::Parser;
pub use token::{Keyword, Span, Token, TokenKind};

/// Parse a complete source string into top-level statements.
pub fn parse(source: &str) -> Vec<Node> {
    let mut parser = Parser::new(Lexer::new(source.bytes()));
    let mut stmts = Vec::new();
    while let Some(stmt) = parser.next_stmt() {
        stmts.push(stmt);
    }
    stmts
}

/// Parse a source string as a sequence of expressions (test/REPL helper).
pub fn parse_exprs(source: &str) -> Vec<Node> {
    let mut parser = Parser::new(Lexer::new(source.bytes()));
    let mut exprs = Vec::new();
    while let Some(expr) = parser.next_expr() {
        exprs.push(expr);
    }
    exprs
}
