//! Scope stack: a stack of symbol tables, bottom = global (spec §4.1).
//!
//! This module only implements the primitive scope operations
//! (`enter_scope`, `leave_scope`, `declare_symbol`, `get_symbol`). The
//! AST-aware batch operations `declare_variables`, `declare_function` and
//! `add_to_var_list` live in `cmm-compiler::builder`, which layers them on
//! top of this manager — those need AST node types this crate does not
//! have, exactly as the teacher's own `core`/`compiler` split keeps
//! AST-free foundations in `core`.

use crate::diagnostics::{CompileError, ErrorKind};
use crate::symbol::Symbol;
use crate::symtable::SymbolTable;

/// A stack of `SymbolTable`s. Depth 0 is global; depth 1 is a function
/// body; deeper depths are unnamed nested blocks.
pub struct ScopeManager {
    stack: Vec<SymbolTable>,
    /// Name of the function whose body is currently open, if any.
    current_function: Option<String>,
}

impl ScopeManager {
    pub fn new() -> Self {
        ScopeManager {
            stack: vec![SymbolTable::new(0)],
            current_function: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    pub fn current_function(&self) -> Option<&str> {
        self.current_function.as_deref()
    }

    pub fn set_current_function(&mut self, name: Option<String>) {
        self.current_function = name;
    }

    /// Pushes a new symbol table. Its cursor is 0 when entering a function
    /// body (depth 0 -> 1) and the current top's cursor otherwise (nested
    /// blocks share the enclosing function's frame).
    pub fn enter_scope(&mut self) {
        let entering_function_body = self.depth() == 0;
        let initial_offset = if entering_function_body {
            0
        } else {
            self.stack.last().unwrap().next_offset()
        };
        let mut table = SymbolTable::new(initial_offset);
        if let Some(f) = &self.current_function {
            table = table.with_owning_function(f.clone());
        }
        self.stack.push(table);
    }

    /// Pops the top table. If leaving a nested block (depth > 1), the
    /// parent's cursor is overwritten with the popped cursor so frame space
    /// is monotonically extended within a function. Clears
    /// `current_function` when leaving a function body (depth 1 -> 0).
    pub fn leave_scope(&mut self) -> SymbolTable {
        let was_function_body = self.depth() == 1;
        let popped = self.stack.pop().expect("cannot leave the global scope");
        if self.depth() >= 1 {
            let parent = self.stack.last_mut().unwrap();
            parent.set_next_offset(popped.next_offset());
        }
        if was_function_body {
            self.current_function = None;
        }
        popped
    }

    pub fn top(&self) -> &SymbolTable {
        self.stack.last().unwrap()
    }

    pub fn top_mut(&mut self) -> &mut SymbolTable {
        self.stack.last_mut().unwrap()
    }

    pub fn global(&self) -> &SymbolTable {
        &self.stack[0]
    }

    pub fn global_mut(&mut self) -> &mut SymbolTable {
        &mut self.stack[0]
    }

    /// Inserts into the top table, or the global one when `global` is set
    /// (used for function and literal symbols). **Redeclared** on conflict.
    pub fn declare_symbol(&mut self, sym: Symbol, global: bool) -> Result<(), CompileError> {
        let line = sym.decl_line;
        let target = if global { self.global_mut() } else { self.top_mut() };
        target.insert(sym).map_err(|prior| {
            CompileError::redeclared(line, prior.name.clone(), prior.decl_line)
        })
    }

    /// Lookup that walks the stack outward (top to global). Returns `None`
    /// only when the name is genuinely absent (callers distinguish literal
    /// lookups, where absence is expected, from identifier lookups, where
    /// absence is a fatal **Undeclared**).
    pub fn get_symbol(&self, name: &str) -> Option<&Symbol> {
        self.stack.iter().rev().find_map(|t| t.get(name))
    }

    /// Mutable counterpart of `get_symbol`, for updating a symbol already in
    /// scope in place (spec §4.4's first-assignment string sizing).
    pub fn get_symbol_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.stack.iter_mut().rev().find_map(|t| t.get_mut(name))
    }

    /// Same as `get_symbol` but renders the fatal **Undeclared** diagnostic
    /// a parser asking for an identifier (as opposed to a literal) wants.
    pub fn require_symbol(&self, name: &str, line: usize) -> Result<&Symbol, CompileError> {
        self.get_symbol(name)
            .ok_or_else(|| CompileError::new(ErrorKind::Undeclared, line, name.to_string()))
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexval::{LexPayload, LexicalValue};
    use crate::symbol::Nature;
    use crate::types::{TokenCategory, Type};

    fn lv(name: &str) -> LexicalValue {
        LexicalValue::new(1, TokenCategory::Identifier, LexPayload::Name(name.into()))
    }

    fn sym(name: &str, ty: Type) -> Symbol {
        Symbol::new(name, Nature::Identifier, ty, 1, lv(name))
    }

    #[test]
    fn enter_then_leave_nested_block_is_balanced() {
        let mut mgr = ScopeManager::new();
        mgr.declare_symbol(sym("g", Type::Int), false).unwrap();
        mgr.set_current_function(Some("f".into()));
        mgr.enter_scope(); // function body, depth 1
        mgr.declare_symbol(sym("x", Type::Int), false).unwrap();
        assert_eq!(mgr.top().next_offset(), 4);
        mgr.enter_scope(); // nested block, depth 2, shares offset
        assert_eq!(mgr.top().next_offset(), 4);
        mgr.declare_symbol(sym("y", Type::Int), false).unwrap();
        mgr.leave_scope();
        // parent (function body) cursor now reflects the nested block's growth
        assert_eq!(mgr.top().next_offset(), 8);
        mgr.leave_scope();
        assert_eq!(mgr.depth(), 0);
        assert!(mgr.current_function().is_none());
    }

    #[test]
    fn lookup_walks_outward() {
        let mut mgr = ScopeManager::new();
        mgr.declare_symbol(sym("g", Type::Int), false).unwrap();
        mgr.enter_scope();
        mgr.declare_symbol(sym("x", Type::Int), false).unwrap();
        assert!(mgr.get_symbol("g").is_some());
        assert!(mgr.get_symbol("x").is_some());
        mgr.leave_scope();
        assert!(mgr.get_symbol("x").is_none());
    }

    #[test]
    fn redeclaration_reports_prior_line() {
        let mut mgr = ScopeManager::new();
        mgr.declare_symbol(sym("x", Type::Int), false).unwrap();
        let dup = Symbol::new(
            "x",
            Nature::Identifier,
            Type::Int,
            9,
            LexicalValue::new(9, TokenCategory::Identifier, LexPayload::Name("x".into())),
        );
        let err = mgr.declare_symbol(dup, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redeclared);
    }

    #[test]
    fn global_flag_inserts_into_bottom_table() {
        let mut mgr = ScopeManager::new();
        mgr.enter_scope();
        mgr.declare_symbol(sym("f", Type::Int), true).unwrap();
        assert!(mgr.global().contains("f"));
        assert!(!mgr.top().contains("f"));
    }
}
