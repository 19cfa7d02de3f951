//! The Semantic Builder (spec §4.2): one constructor per AST-builder
//! operation of spec §6, each performing its checks and, for nodes that
//! carry runtime value, invoking the matching lowering rule in `irgen.rs`
//! in the same call — a single-pass design, matching the original's own
//! `Node.cpp` methods which type-check and translate simultaneously, and
//! the only way the IR generator can read a scope's assigned offsets
//! before `leave_scope` discards them.
//!
//! `declare_variables`, `declare_function` and `add_to_var_list` also live
//! here rather than in `cmm_core::ScopeManager`: they need `NodeId`, which
//! `cmm-core` does not have.

use cmm_core::types::{compatible, infer};
use cmm_core::{CompileError, ErrorKind, LexPayload, LexicalValue, Nature, ScopeManager, Symbol, Type};
use std::collections::HashMap;

use crate::ast::{Ast, AstKind, BinOp, NodeId, UnOp};
use crate::ir::IrArena;
use crate::namebag::{Hole, NameBag};

/// Per-loop back-patch state for `break`/`continue`, pushed on entering a
/// `while`/`for` and drained once its exit/step labels are known.
pub(crate) struct LoopCtx {
    pub break_holes: Vec<Hole>,
    pub continue_holes: Vec<Hole>,
}

/// Everything the builder and IR generator share: the scope stack, the AST
/// arena, the IR arena, the name bag, and a little bookkeeping (batched
/// variable lists, pending forward-call patches, loop context).
pub struct Compiler {
    pub ast: Ast,
    pub scope: ScopeManager,
    pub arena: IrArena,
    pub bag: NameBag,
    /// Batched (symbol, optional initializer node) pairs from
    /// `add_to_var_list`, drained by whichever of `declare_variables` /
    /// `enter_scope` runs next.
    pub(crate) pending_vars: Vec<(Symbol, Option<NodeId>)>,
    /// Holes awaiting a function's label, keyed by function name — lets a
    /// call lower before its callee's body (forward reference, recursion).
    pub(crate) pending_call_patches: HashMap<String, Vec<Hole>>,
    pub(crate) loop_stack: Vec<LoopCtx>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            ast: Ast::new(),
            scope: ScopeManager::new(),
            arena: IrArena::new(),
            bag: NameBag::new(),
            pending_vars: Vec::new(),
            pending_call_patches: HashMap::new(),
            loop_stack: Vec::new(),
        }
    }

    // ---- scope management -------------------------------------------------

    /// Pushes a new scope, flushing any batched parameter symbols into it
    /// in order (spec §4.1).
    pub fn enter_scope(&mut self) {
        self.scope.enter_scope();
        if !self.pending_vars.is_empty() {
            let batch = std::mem::take(&mut self.pending_vars);
            for (sym, _init) in batch {
                // Parameters are always pre-typed; declaration cannot fail
                // here because parameters are freshly named by the parser.
                let _ = self.scope.declare_symbol(sym, false);
            }
        }
    }

    pub fn leave_scope(&mut self) {
        self.scope.leave_scope();
    }

    /// Queues `symbol` (with `node` as its optional initializer) for the
    /// next `declare_variables` or `enter_scope` call.
    pub fn add_to_var_list(&mut self, symbol: Symbol, node: Option<NodeId>) {
        self.pending_vars.push((symbol, node));
    }

    /// Assigns `ty` to every batched variable, declares each into the
    /// current scope, and bulk-checks and lowers any paired initializer.
    ///
    /// An initializer's IR can only be generated here, not at
    /// `create_initialization` time: the symbol (and therefore its frame
    /// offset) doesn't exist until the declaration's type is known, which
    /// for a batch like `int x = 1, y = 2;` is only true once the whole
    /// statement has been parsed.
    pub fn declare_variables(&mut self, ty: Type) -> Result<(), CompileError> {
        let batch = std::mem::take(&mut self.pending_vars);
        for (mut sym, init_node) in batch {
            sym.ty = ty;
            let line = sym.decl_line;
            let name = sym.name.clone();
            self.scope.declare_symbol(sym.clone(), false)?;
            let declared = self.scope.get_symbol(&name).unwrap().clone();
            if let Some(init_node) = init_node {
                self.lower_initializer(init_node, &declared, line)?;
            }
        }
        Ok(())
    }

    /// Creates the function symbol (in the global table) with the batched
    /// parameter list attached, without draining the batch — `enter_scope`
    /// drains it into the function's body scope right after this call.
    pub fn declare_function(&mut self, lexval: LexicalValue, return_type: Type) -> Result<Symbol, CompileError> {
        let name = lexval.name().unwrap().to_string();
        let line = lexval.line;
        let params: Vec<Symbol> = self.pending_vars.iter().map(|(s, _)| s.clone()).collect();
        let sym = Symbol::new(&name, Nature::Function, return_type, line, lexval)
            .with_global(true)
            .with_params(params);
        self.scope.declare_symbol(sym.clone(), true)?;
        self.scope.set_current_function(Some(name));
        Ok(sym)
    }

    // ---- leaves -------------------------------------------------------

    pub fn create_declaration(&mut self, lexval: LexicalValue, vector_count: Option<usize>) -> NodeId {
        let name = lexval.name().unwrap().to_string();
        self.ast.push(Some(lexval), AstKind::Declaration { name, vector_count }, Type::Any)
    }

    pub fn create_id(&mut self, lexval: LexicalValue, is_lval: bool) -> Result<NodeId, CompileError> {
        let name = lexval.name().unwrap().to_string();
        let line = lexval.line;
        let sym = self.scope.require_symbol(&name, line)?.clone();
        if sym.nature != Nature::Identifier {
            return Err(CompileError::new(ErrorKind::WrongUsageVariable, line, name));
        }
        let ty = sym.ty;
        let id = self.ast.push(Some(lexval), AstKind::Operand { symbol_name: name }, ty);
        self.ast.get_mut(id).is_lval = is_lval;
        self.gen_operand_address(id, &sym);
        Ok(id)
    }

    pub fn create_literal(&mut self, lexval: LexicalValue, ty: Type) -> NodeId {
        let key = lexval.to_string();
        let line = lexval.line;
        if let Some(existing) = self.scope.global_mut().get_mut(&key) {
            existing.decl_line = line;
        } else {
            let count = match (&lexval.payload, ty) {
                (LexPayload::Name(s), Type::String) => s.len().max(1),
                _ => 1,
            };
            let sym = Symbol::new(&key, Nature::None, ty, line, lexval.clone())
                .with_count(count)
                .with_global(true);
            self.scope
                .declare_symbol(sym, true)
                .expect("a literal's canonical text key cannot already be taken by another nature");
        }
        let sym = self.scope.global().get(&key).unwrap().clone();
        let id = self.ast.push(Some(lexval), AstKind::Operand { symbol_name: key }, ty);
        self.gen_operand_address(id, &sym);
        id
    }

    pub fn create_vector_access(&mut self, base_lexval: LexicalValue, index: NodeId) -> Result<NodeId, CompileError> {
        let name = base_lexval.name().unwrap().to_string();
        let line = base_lexval.line;
        let sym = self.scope.require_symbol(&name, line)?.clone();
        if sym.nature != Nature::Vector {
            return Err(CompileError::new(ErrorKind::WrongUsageVector, line, name));
        }
        let idx_ty = self.ast.get(index).ty;
        if !compatible(idx_ty, Type::Int) {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                line,
                format!("vector index must be Int-compatible, found {idx_ty} in {}", self.ast.render(index)),
            ));
        }
        let base = self.ast.push(Some(base_lexval), AstKind::Operand { symbol_name: name }, sym.ty);
        let id = self.ast.push(None, AstKind::VectorAccess { base, index }, sym.ty);
        self.gen_vector_access(id, &sym, index);
        Ok(id)
    }

    // ---- statements ----------------------------------------------------

    pub fn create_input(&mut self, arg: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(arg).line();
        let ty = self.ast.get(arg).ty;
        if !(compatible(ty, Type::Int) || compatible(ty, Type::Float)) {
            return Err(CompileError::new(ErrorKind::WrongParameterInput, line, format!("{}: found {ty}", self.ast.render(arg))));
        }
        if !self.ast.get(arg).is_lval {
            return Err(CompileError::new(
                ErrorKind::WrongParameterInput,
                line,
                format!("{}: argument must be a writable identifier", self.ast.render(arg)),
            ));
        }
        let id = self.ast.push(None, AstKind::IO { is_input: true, arg }, Type::NA);
        self.gen_io(id, true, arg);
        Ok(id)
    }

    pub fn create_output(&mut self, arg: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(arg).line();
        let ty = self.ast.get(arg).ty;
        if !(compatible(ty, Type::Int) || compatible(ty, Type::Float)) {
            return Err(CompileError::new(ErrorKind::WrongParameterOutput, line, format!("{}: found {ty}", self.ast.render(arg))));
        }
        let id = self.ast.push(None, AstKind::IO { is_input: false, arg }, Type::NA);
        self.gen_io(id, false, arg);
        Ok(id)
    }

    pub fn create_break(&mut self, line: usize) -> NodeId {
        let id = self.ast.push(None, AstKind::BreakContinue { is_break: true }, Type::NA);
        let _ = line;
        self.gen_break(id);
        id
    }

    pub fn create_continue(&mut self, line: usize) -> NodeId {
        let id = self.ast.push(None, AstKind::BreakContinue { is_break: false }, Type::NA);
        let _ = line;
        self.gen_continue(id);
        id
    }

    pub fn create_return(&mut self, line: usize, value: NodeId) -> Result<NodeId, CompileError> {
        let fname = self
            .scope
            .current_function()
            .ok_or_else(|| CompileError::new(ErrorKind::WrongParameterReturn, line, "return outside a function".to_string()))?
            .to_string();
        let ret_ty = self.scope.global().get(&fname).unwrap().ty;
        let vty = self.ast.get(value).ty;
        if !compatible(vty, ret_ty) {
            return Err(CompileError::new(
                ErrorKind::WrongParameterReturn,
                line,
                format!("returned {}, function returns {ret_ty}", self.ast.render(value)),
            ));
        }
        let id = self.ast.push(None, AstKind::Return { value }, Type::NA);
        self.gen_return(id, value);
        Ok(id)
    }

    pub fn create_shift(&mut self, id_node: NodeId, left: bool, amount: i64, line: usize) -> Result<NodeId, CompileError> {
        if amount > 16 {
            return Err(CompileError::new(
                ErrorKind::WrongParameterShift,
                line,
                format!("{}: shift amount {amount} exceeds 16", self.ast.render(id_node)),
            ));
        }
        let id = self.ast.push(None, AstKind::Shift { id: id_node, left, amount }, Type::NA);
        self.gen_shift(id, id_node, left, amount);
        Ok(id)
    }

    pub fn create_attribution(&mut self, lval: NodeId, rval: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(lval).line();
        self.check_assignment_types(lval, line, rval)?;
        let ty = self.ast.get(lval).ty;
        let id = self.ast.push(None, AstKind::AttribVariable { lval, rval }, ty);
        self.gen_attribution(id, lval, rval);
        Ok(id)
    }

    pub fn create_initialization(&mut self, lval: NodeId, rval: Option<NodeId>) -> NodeId {
        let ty = self.ast.get(lval).ty;
        self.ast.push(None, AstKind::InitVariable { lval, rval }, ty)
    }

    pub fn create_unop(&mut self, line: usize, op: UnOp, operand: NodeId) -> Result<NodeId, CompileError> {
        let oty = self.ast.get(operand).ty;
        let result_ty = match op {
            UnOp::Neg => match oty {
                Type::Int | Type::Float => oty,
                Type::Any => Type::Int,
                _ => {
                    return Err(CompileError::new(ErrorKind::WrongType, line, format!("cannot negate {}: {oty}", self.ast.render(operand))));
                }
            },
            UnOp::Not => match oty {
                Type::Bool | Type::Any => Type::Bool,
                _ => {
                    return Err(CompileError::new(ErrorKind::WrongType, line, format!("cannot negate {} with !: {oty}", self.ast.render(operand))));
                }
            },
        };
        let id = self.ast.push(None, AstKind::Unop { op, operand }, result_ty);
        self.gen_unop(id, op, operand);
        Ok(id)
    }

    pub fn create_binop(&mut self, line: usize, op: BinOp, l: NodeId, r: NodeId) -> Result<NodeId, CompileError> {
        let lty = self.ast.get(l).ty;
        let rty = self.ast.get(r).ty;
        let combined = infer(lty, rty).ok_or_else(|| type_error(lty, rty, line))?;
        let result_ty = if op.is_comparison() {
            Type::Bool
        } else if op.is_logic() {
            if !compatible(combined, Type::Bool) {
                return Err(CompileError::new(
                    ErrorKind::WrongType,
                    line,
                    format!("{combined} is not Bool-compatible: {} and {}", self.ast.render(l), self.ast.render(r)),
                ));
            }
            Type::Bool
        } else {
            combined
        };
        let id = self.ast.push(None, AstKind::Binop { op, lhs: l, rhs: r }, result_ty);
        self.gen_binop(id, op, l, r);
        Ok(id)
    }

    pub fn create_ternop(&mut self, cond: NodeId, then_branch: NodeId, else_branch: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(cond).line();
        let cty = self.ast.get(cond).ty;
        if !compatible(cty, Type::Bool) {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                line,
                format!("ternary condition must be Bool, found {cty} in {}", self.ast.render(cond)),
            ));
        }
        let tty = self.ast.get(then_branch).ty;
        let ety = self.ast.get(else_branch).ty;
        let result_ty = infer(tty, ety).ok_or_else(|| type_error(tty, ety, line))?;
        let id = self.ast.push(None, AstKind::Ternop { cond, then_branch, else_branch }, result_ty);
        self.gen_ternop(id, cond, then_branch, else_branch);
        Ok(id)
    }

    pub fn create_if(&mut self, cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId>) -> Result<NodeId, CompileError> {
        let line = self.ast.get(cond).line();
        let cty = self.ast.get(cond).ty;
        if !compatible(cty, Type::Bool) {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                line,
                format!("if condition must be Bool, found {cty} in {}", self.ast.render(cond)),
            ));
        }
        let id = self.ast.push(None, AstKind::If { cond, then_branch, else_branch }, Type::NA);
        self.gen_if(id, cond, then_branch, else_branch);
        Ok(id)
    }

    pub fn create_while(&mut self, cond: NodeId, body: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(cond).line();
        let cty = self.ast.get(cond).ty;
        if !compatible(cty, Type::Bool) {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                line,
                format!("while condition must be Bool, found {cty} in {}", self.ast.render(cond)),
            ));
        }
        let id = self.ast.push(None, AstKind::While { cond, body }, Type::NA);
        self.gen_while(id, cond, body);
        Ok(id)
    }

    pub fn create_for(&mut self, init: NodeId, cond: NodeId, step: NodeId, body: NodeId) -> Result<NodeId, CompileError> {
        let line = self.ast.get(cond).line();
        let cty = self.ast.get(cond).ty;
        if !compatible(cty, Type::Bool) {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                line,
                format!("for condition must be Bool, found {cty} in {}", self.ast.render(cond)),
            ));
        }
        let id = self.ast.push(None, AstKind::For { init, cond, step, body }, Type::NA);
        self.gen_for(id, init, cond, step, body);
        Ok(id)
    }

    pub fn create_function_declaration(&mut self, lexval: LexicalValue, body: Option<NodeId>) -> NodeId {
        let name = lexval.name().unwrap().to_string();
        let id = self.ast.push(Some(lexval), AstKind::FunctionDeclaration { name: name.clone(), body }, Type::NA);
        self.gen_function_declaration(id, &name, body);
        id
    }

    pub fn create_function_call(&mut self, lexval: LexicalValue, args: Vec<NodeId>) -> Result<NodeId, CompileError> {
        let name = lexval.name().unwrap().to_string();
        let line = lexval.line;
        let sym = self.scope.require_symbol(&name, line)?.clone();
        if sym.nature != Nature::Function {
            return Err(CompileError::new(ErrorKind::WrongUsageFunction, line, name));
        }
        let params = sym.params.clone().unwrap_or_default();
        if args.len() < params.len() {
            return Err(CompileError::new(ErrorKind::MissingArgs, line, format!("{} expects {} args, got {}", name, params.len(), args.len())));
        }
        if args.len() > params.len() {
            return Err(CompileError::new(ErrorKind::ExcessArgs, line, format!("{} expects {} args, got {}", name, params.len(), args.len())));
        }
        for (i, (&arg, param)) in args.iter().zip(params.iter()).enumerate() {
            let aty = self.ast.get(arg).ty;
            if !compatible(aty, param.ty) {
                return Err(CompileError::new(
                    ErrorKind::WrongTypeArgs,
                    line,
                    format!("argument {i} ({}): found {aty}, expected {}", self.ast.render(arg), param.ty),
                ));
            }
        }
        let ty = sym.ty;
        let id = self.ast.push(Some(lexval), AstKind::FunctionCall { name: name.clone(), args: args.clone() }, ty);
        self.gen_function_call(id, &name, &args, &sym);
        Ok(id)
    }

    // ---- statement sequencing -------------------------------------------

    /// Threads `next` after `head` within a block (`next_command`, spec §3)
    /// and folds `next`'s IR onto `head`'s so the block head's `.ir` always
    /// holds the whole sequence generated so far — the shape
    /// `gen_function_declaration`/`gen_if`/`gen_while`/`gen_for` rely on
    /// when they read a body's `.ir` as "the body's code". Returns `next`
    /// as the new head when `head` is `None` (first statement of a block).
    pub fn chain_statement(&mut self, head: Option<NodeId>, next: NodeId) -> NodeId {
        match head {
            None => next,
            Some(h) => {
                let mut cursor = h;
                while let Some(n) = self.ast.get(cursor).next_command {
                    cursor = n;
                }
                self.ast.get_mut(cursor).next_command = Some(next);
                let head_ir = self.ast.get(h).ir.unwrap_or(crate::ir::Chain::empty());
                let next_ir = self.ast.get(next).ir.unwrap_or(crate::ir::Chain::empty());
                self.ast.get_mut(h).ir = Some(self.arena.append(head_ir, next_ir));
                h
            }
        }
    }

    // ---- shared checks --------------------------------------------------

    fn check_assignment_types(&mut self, lval: NodeId, line: usize, rval: NodeId) -> Result<(), CompileError> {
        let lty = self.ast.get(lval).ty;
        let rty = self.ast.get(rval).ty;
        if !compatible(lty, rty) {
            return Err(type_error(lty, rty, line));
        }
        if lty == Type::String {
            let len = crate::strsize::string_length(&self.ast, &self.scope, rval);
            let name = match &self.ast.get(lval).kind {
                AstKind::Operand { symbol_name } => symbol_name.clone(),
                _ => return Ok(()),
            };
            if let Some(sym) = self.scope.get_symbol_mut(&name) {
                let declared = sym.count;
                if !sym.update_size(len) {
                    return Err(CompileError::new(
                        ErrorKind::StringSize,
                        line,
                        format!("{}: assigned length {len} exceeds declared size {declared}", self.ast.render(lval)),
                    ));
                }
            }
        }
        Ok(())
    }

}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn type_error(a: Type, b: Type, line: usize) -> CompileError {
    if a == Type::String || b == Type::String {
        CompileError::new(ErrorKind::StringToX, line, format!("{a} vs {b}"))
    } else if a == Type::Char || b == Type::Char {
        CompileError::new(ErrorKind::CharToX, line, format!("{a} vs {b}"))
    } else {
        CompileError::new(ErrorKind::WrongType, line, format!("{a} vs {b}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::TokenCategory;

    fn lv(line: usize, name: &str) -> LexicalValue {
        LexicalValue::new(line, TokenCategory::Identifier, LexPayload::Name(name.into()))
    }

    #[test]
    fn declare_then_reference_scalar() {
        let mut c = Compiler::new();
        let decl = c.create_declaration(lv(1, "x"), None);
        let _ = decl;
        c.add_to_var_list(
            Symbol::new("x", Nature::Identifier, Type::Any, 1, lv(1, "x")),
            None,
        );
        c.declare_variables(Type::Int).unwrap();
        let id = c.create_id(lv(2, "x"), false).unwrap();
        assert_eq!(c.ast.get(id).ty, Type::Int);
        assert!(c.ast.get(id).has_address);
    }

    #[test]
    fn undeclared_identifier_is_fatal() {
        let mut c = Compiler::new();
        let err = c.create_id(lv(1, "missing"), false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Undeclared);
    }

    #[test]
    fn redeclaration_in_same_scope_is_fatal() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Any, 1, lv(1, "x")), None);
        c.declare_variables(Type::Int).unwrap();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Any, 2, lv(2, "x")), None);
        let err = c.declare_variables(Type::Int).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redeclared);
        assert_eq!(err.prior_line, Some(1));
    }

    #[test]
    fn wrong_usage_vector_is_detected() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Any, 1, lv(1, "x")), None);
        c.declare_variables(Type::Int).unwrap();
        let idx = c.create_literal(LexicalValue::new(2, TokenCategory::Literal, LexPayload::Int(0)), Type::Int);
        let err = c.create_vector_access(lv(2, "x"), idx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WrongUsageVector);
    }

    #[test]
    fn shift_over_sixteen_is_fatal() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Any, 1, lv(1, "x")), None);
        c.declare_variables(Type::Int).unwrap();
        let x = c.create_id(lv(2, "x"), true).unwrap();
        let err = c.create_shift(x, true, 17, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::WrongParameterShift);
        assert_eq!(err.kind.code(), 53);
    }

    #[test]
    fn function_call_arity_mismatch() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Int, 1, lv(1, "x")), None);
        let _f = c.declare_function(lv(1, "f"), Type::Int).unwrap();
        c.enter_scope();
        let ret0 = c.create_literal(LexicalValue::new(1, TokenCategory::Literal, LexPayload::Int(0)), Type::Int);
        let ret = c.create_return(1, ret0).unwrap();
        let _ = ret;
        c.create_function_declaration(lv(1, "f"), Some(ret0));
        c.leave_scope();
        let err = c.create_function_call(lv(2, "f"), vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingArgs);
    }
}
