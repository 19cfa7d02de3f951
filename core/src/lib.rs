//! cmm-core: shared data model for the cmm compiler
//!
//! This crate carries the types both the front end (lexer/parser, not part
//! of this workspace) and the middle/back end (`cmm-compiler`) need to
//! agree on:
//!
//! - `types`: the language's `Type` lattice, size table, compatibility and
//!   inference predicates, plus `TokenCategory`.
//! - `lexval`: `LexicalValue`, the immutable token-like record AST builders
//!   consume.
//! - `symbol` / `symtable`: a single scope's symbol table.
//! - `scope`: the scope-stack primitives (`enter_scope`, `leave_scope`,
//!   `declare_symbol`, `get_symbol`). The AST-aware batch operations
//!   (`declare_variables`, `declare_function`, `add_to_var_list`) live in
//!   `cmm-compiler::builder` since they need AST node types this crate does
//!   not have.
//! - `diagnostics`: the `ErrorKind` taxonomy and `CompileError`.

pub mod diagnostics;
pub mod lexval;
pub mod scope;
pub mod symbol;
pub mod symtable;
pub mod types;

pub use diagnostics::{CompileError, ErrorKind};
pub use lexval::{LexPayload, LexicalValue};
pub use scope::ScopeManager;
pub use symbol::{Nature, Symbol};
pub use symtable::SymbolTable;
pub use types::{TokenCategory, Type};
