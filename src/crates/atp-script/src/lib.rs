//! # atp-script - Scripting front end for the resumable execution engine
//!
//! Agent programs are written in a small JavaScript-like language. This
//! crate owns everything that happens to program text before it runs:
//!
//! - [`lexer`] / [`parser`] - tokenization and recursive-descent parsing
//!   into the [`ast`] types, with line/column error reporting
//! - [`printer`] - deterministic code generation (same AST in, byte
//!   identical text out)
//! - [`transform`] - the resumable rewrite: loops, async array methods
//!   and `Promise.all` are rewritten into calls to the `__atp` host
//!   primitives so a replayed run can fast-forward through completed work
//! - [`hash`] - content-strength hashing of source text, used as the
//!   transform-cache key
//!
//! The crate is purely syntactic: it knows the *names* of the host
//! primitives it emits calls to, but execution semantics live in the
//! engine crate.

pub mod ast;
pub mod error;
pub mod hash;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod transform;

pub use ast::{Expr, Function, Program, Stmt};
pub use error::ParseError;
pub use hash::code_hash;
pub use parser::parse_program;
pub use printer::{format_number, print_program};
pub use transform::{transform_program, transform_source, TransformMetadata, TransformOutput};
