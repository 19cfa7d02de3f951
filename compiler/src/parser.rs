//! A small recursive-descent parser driving the builder API of spec §6.
//! Out of scope for the core pipeline (lexer/parser "produces tokens and
//! drives tree construction through the operations in §6"); included only
//! so the CLI has a runnable end-to-end path. Grounded on the teacher's
//! `parser.rs` shape: a `Parser` struct holding tokens + position, one
//! method per grammar production, `Result<_, CompileError>` throughout.
//!
//! Scope decision: top-level (file-scope) declarations may not carry an
//! initializer. The driver prelude only ever materializes *literal*
//! symbols into `rbss` (`irgen::gen_program_driver`); a global `int g =
//! f();` would need its own runtime-computed init store threaded into that
//! prelude, which has no block to chain it onto. Locals don't have this
//! problem (their initializer chains into the enclosing function body), so
//! only they support `= expr`.

use cmm_core::{CompileError, ErrorKind, LexPayload, LexicalValue, Nature, Symbol, TokenCategory, Type};

use crate::ast::{BinOp, NodeId, UnOp};
use crate::builder::Compiler;
use crate::lexer::{ident_lexval, lex, Tok, Token};

pub struct Parser<'c> {
    toks: Vec<Token>,
    pos: usize,
    c: &'c mut Compiler,
}

/// Parses `source` and drives `compiler` through every top-level
/// declaration. Afterwards `compiler.arena`/`compiler.scope` hold the
/// whole program's AST and IR; the returned `NodeId`s are the top-level
/// function declarations in source order, which is what `lib.rs` needs to
/// assemble the final instruction chain (each node's `.ir` already holds
/// that function's fully lowered body, per `gen_function_declaration`).
pub fn parse_program(compiler: &mut Compiler, source: &str) -> Result<Vec<NodeId>, CompileError> {
    let toks = lex(source)?;
    let mut p = Parser { toks, pos: 0, c: compiler };
    let mut functions = Vec::new();
    while !p.check(&Tok::Eof) {
        if let Some(f) = p.parse_toplevel_item()? {
            functions.push(f);
        }
    }
    Ok(functions)
}

impl<'c> Parser<'c> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn line(&self) -> usize {
        self.toks[self.pos].line
    }

    fn check(&self, t: &Tok) -> bool {
        self.peek() == t
    }

    fn eat(&mut self, t: Tok) -> bool {
        if self.check(&t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Tok) -> Result<(), CompileError> {
        if self.eat(t.clone()) {
            Ok(())
        } else {
            Err(self.err(format!("expected {t:?}, found {:?}", self.peek())))
        }
    }

    fn err(&self, msg: String) -> CompileError {
        CompileError::new(ErrorKind::Undeclared, self.line(), msg)
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        self.pos += 1;
        t
    }

    fn expect_ident(&mut self) -> Result<(String, usize), CompileError> {
        let line = self.line();
        match self.advance() {
            Tok::Ident(name) => Ok((name, line)),
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_int(&mut self) -> Result<i64, CompileError> {
        match self.advance() {
            Tok::IntLit(v) => Ok(v),
            other => Err(self.err(format!("expected integer literal, found {other:?}"))),
        }
    }

    fn parse_type(&mut self) -> Result<Type, CompileError> {
        match self.advance() {
            Tok::Int => Ok(Type::Int),
            Tok::Float => Ok(Type::Float),
            Tok::BoolKw => Ok(Type::Bool),
            Tok::Char => Ok(Type::Char),
            Tok::StringKw => Ok(Type::String),
            other => Err(self.err(format!("expected a type, found {other:?}"))),
        }
    }

    // ---- top level --------------------------------------------------

    fn parse_toplevel_item(&mut self) -> Result<Option<NodeId>, CompileError> {
        let ty = self.parse_type()?;
        let (name, line) = self.expect_ident()?;
        if self.eat(Tok::LParen) {
            self.parse_function_rest(ty, name, line).map(Some)
        } else {
            self.parse_global_decl_rest(ty, name, line).map(|()| None)
        }
    }

    fn parse_function_rest(&mut self, ty: Type, name: String, line: usize) -> Result<NodeId, CompileError> {
        if !self.check(&Tok::RParen) {
            loop {
                let pty = self.parse_type()?;
                let (pname, pline) = self.expect_ident()?;
                let sym = Symbol::new(&pname, Nature::Identifier, pty, pline, ident_lexval(&pname, pline));
                self.c.add_to_var_list(sym, None);
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        let lexval = ident_lexval(&name, line);
        self.c.declare_function(lexval.clone(), ty)?;
        self.c.enter_scope();
        self.expect(Tok::LBrace)?;
        let body = self.parse_stmts_until_rbrace()?;
        self.expect(Tok::RBrace)?;
        self.c.leave_scope();
        Ok(self.c.create_function_declaration(lexval, body))
    }

    fn parse_global_decl_rest(&mut self, ty: Type, name: String, line: usize) -> Result<(), CompileError> {
        self.c.add_to_var_list(self.global_symbol(name, line)?, None);
        while self.eat(Tok::Comma) {
            let (name, line) = self.expect_ident()?;
            self.c.add_to_var_list(self.global_symbol(name, line)?, None);
        }
        self.expect(Tok::Semi)?;
        self.c.declare_variables(ty)
    }

    fn global_symbol(&mut self, name: String, line: usize) -> Result<Symbol, CompileError> {
        let mut count = None;
        if self.eat(Tok::LBracket) {
            count = Some(self.expect_int()? as usize);
            self.expect(Tok::RBracket)?;
        }
        let nature = if count.is_some() { Nature::Vector } else { Nature::Identifier };
        let mut sym = Symbol::new(&name, nature, Type::Any, line, ident_lexval(&name, line));
        if let Some(n) = count {
            sym = sym.with_count(n);
        }
        Ok(sym)
    }

    // ---- statements ---------------------------------------------------

    fn parse_stmts_until_rbrace(&mut self) -> Result<Option<NodeId>, CompileError> {
        let mut head = None;
        while !self.check(&Tok::RBrace) {
            if let Some(stmt) = self.parse_stmt()? {
                head = Some(self.c.chain_statement(head, stmt));
            }
        }
        Ok(head)
    }

    fn parse_stmt(&mut self) -> Result<Option<NodeId>, CompileError> {
        match self.peek().clone() {
            Tok::Semi => {
                self.pos += 1;
                Ok(None)
            }
            Tok::LBrace => {
                self.pos += 1;
                self.c.enter_scope();
                let body = self.parse_stmts_until_rbrace()?;
                self.expect(Tok::RBrace)?;
                self.c.leave_scope();
                Ok(body)
            }
            Tok::Int | Tok::Float | Tok::BoolKw | Tok::Char | Tok::StringKw => {
                let ty = self.parse_type()?;
                let inits = self.parse_local_decl_entries()?;
                self.expect(Tok::Semi)?;
                self.c.declare_variables(ty)?;
                let mut head = None;
                for init in inits {
                    head = Some(self.c.chain_statement(head, init));
                }
                Ok(head)
            }
            Tok::If => self.parse_if(),
            Tok::While => self.parse_while(),
            Tok::For => self.parse_for(),
            Tok::Return => self.parse_return(),
            Tok::Break => {
                let line = self.line();
                self.pos += 1;
                self.expect(Tok::Semi)?;
                Ok(Some(self.c.create_break(line)))
            }
            Tok::Continue => {
                let line = self.line();
                self.pos += 1;
                self.expect(Tok::Semi)?;
                Ok(Some(self.c.create_continue(line)))
            }
            Tok::Input => {
                self.pos += 1;
                self.expect(Tok::LParen)?;
                let (name, line) = self.expect_ident()?;
                let arg = self.c.create_id(ident_lexval(&name, line), true)?;
                self.expect(Tok::RParen)?;
                self.expect(Tok::Semi)?;
                Ok(Some(self.c.create_input(arg)?))
            }
            Tok::Output => {
                self.pos += 1;
                self.expect(Tok::LParen)?;
                let arg = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                self.expect(Tok::Semi)?;
                Ok(Some(self.c.create_output(arg)?))
            }
            Tok::Ident(_) => self.parse_ident_led_stmt(),
            other => Err(self.err(format!("unexpected token in statement position: {other:?}"))),
        }
    }

    /// Declaration entries for a local (function-body) declaration, which
    /// unlike a global one may carry `= expr` initializers.
    fn parse_local_decl_entries(&mut self) -> Result<Vec<NodeId>, CompileError> {
        let mut inits = Vec::new();
        loop {
            let (name, line) = self.expect_ident()?;
            let mut count = None;
            if self.eat(Tok::LBracket) {
                count = Some(self.expect_int()? as usize);
                self.expect(Tok::RBracket)?;
            }
            let nature = if count.is_some() { Nature::Vector } else { Nature::Identifier };
            let mut sym = Symbol::new(&name, nature, Type::Any, line, ident_lexval(&name, line));
            if let Some(n) = count {
                sym = sym.with_count(n);
            }
            let init = if self.eat(Tok::Assign) {
                let rval = self.parse_expr()?;
                // `lval` is unused by `lower_initializer` (it re-derives the
                // address from the just-declared symbol); `rval` stands in
                // as a harmless placeholder so `create_initialization` has
                // a valid node to read `.ty` from at construction time.
                Some(self.c.create_initialization(rval, Some(rval)))
            } else {
                None
            };
            self.c.add_to_var_list(sym, init);
            if let Some(i) = init {
                inits.push(i);
            }
            if !self.eat(Tok::Comma) {
                break;
            }
        }
        Ok(inits)
    }

    fn parse_ident_led_stmt(&mut self) -> Result<Option<NodeId>, CompileError> {
        let (name, line) = self.expect_ident()?;
        if self.eat(Tok::LParen) {
            let args = self.parse_call_args()?;
            let id = self.c.create_function_call(ident_lexval(&name, line), args)?;
            self.expect(Tok::Semi)?;
            return Ok(Some(id));
        }
        if self.eat(Tok::LBracket) {
            let idx = self.parse_expr()?;
            self.expect(Tok::RBracket)?;
            self.expect(Tok::Assign)?;
            let lval = self.c.create_vector_access(ident_lexval(&name, line), idx)?;
            self.c.ast.get_mut(lval).is_lval = true;
            let rval = self.parse_expr()?;
            self.expect(Tok::Semi)?;
            return Ok(Some(self.c.create_attribution(lval, rval)?));
        }
        if self.check(&Tok::Shl) || self.check(&Tok::Shr) {
            let left = self.check(&Tok::Shl);
            self.pos += 1;
            let amount = self.expect_int()?;
            self.expect(Tok::Semi)?;
            let id_node = self.c.create_id(ident_lexval(&name, line), true)?;
            return Ok(Some(self.c.create_shift(id_node, left, amount, line)?));
        }
        if self.eat(Tok::Assign) {
            let lval = self.c.create_id(ident_lexval(&name, line), true)?;
            let rval = self.parse_expr()?;
            self.expect(Tok::Semi)?;
            return Ok(Some(self.c.create_attribution(lval, rval)?));
        }
        Err(self.err(format!("'{name}' is not a valid statement start")))
    }

    fn parse_call_args(&mut self) -> Result<Vec<NodeId>, CompileError> {
        let mut args = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;
        Ok(args)
    }

    fn parse_if(&mut self) -> Result<Option<NodeId>, CompileError> {
        self.pos += 1;
        self.expect(Tok::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::RParen)?;
        let then_branch = self.parse_single_stmt_as_node()?;
        let else_branch = if self.eat(Tok::Else) { Some(self.parse_single_stmt_as_node()?) } else { None };
        Ok(Some(self.c.create_if(cond, then_branch, else_branch)?))
    }

    fn parse_while(&mut self) -> Result<Option<NodeId>, CompileError> {
        self.pos += 1;
        self.expect(Tok::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::RParen)?;
        let body = self.parse_single_stmt_as_node()?;
        Ok(Some(self.c.create_while(cond, body)?))
    }

    fn parse_for(&mut self) -> Result<Option<NodeId>, CompileError> {
        self.pos += 1;
        self.expect(Tok::LParen)?;
        let init = self.parse_assignment()?;
        self.expect(Tok::Semi)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::Semi)?;
        let step = self.parse_assignment()?;
        self.expect(Tok::RParen)?;
        let body = self.parse_single_stmt_as_node()?;
        Ok(Some(self.c.create_for(init, cond, step, body)?))
    }

    /// A bare assignment with no trailing `;`, for a `for` header's init
    /// and step clauses.
    fn parse_assignment(&mut self) -> Result<NodeId, CompileError> {
        let (name, line) = self.expect_ident()?;
        if self.eat(Tok::LBracket) {
            let idx = self.parse_expr()?;
            self.expect(Tok::RBracket)?;
            self.expect(Tok::Assign)?;
            let lval = self.c.create_vector_access(ident_lexval(&name, line), idx)?;
            self.c.ast.get_mut(lval).is_lval = true;
            let rval = self.parse_expr()?;
            self.c.create_attribution(lval, rval)
        } else {
            self.expect(Tok::Assign)?;
            let lval = self.c.create_id(ident_lexval(&name, line), true)?;
            let rval = self.parse_expr()?;
            self.c.create_attribution(lval, rval)
        }
    }

    /// A single statement used as an `if`/`while`/`for` body: either a
    /// braced block or one simple statement. An empty body (`;` or `{}`)
    /// is represented as a no-op `continue` node so callers always get a
    /// real `NodeId` back, matching `create_if`/`create_while`/`create_for`'s
    /// non-optional body parameters.
    fn parse_single_stmt_as_node(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        match self.parse_stmt()? {
            Some(id) => Ok(id),
            None => Ok(self.c.create_continue(line)),
        }
    }

    fn parse_return(&mut self) -> Result<Option<NodeId>, CompileError> {
        let line = self.line();
        self.pos += 1;
        let value = self.parse_expr()?;
        self.expect(Tok::Semi)?;
        Ok(Some(self.c.create_return(line, value)?))
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<NodeId, CompileError> {
        let cond = self.parse_or()?;
        if self.eat(Tok::Question) {
            let then_branch = self.parse_expr()?;
            self.expect(Tok::Colon)?;
            let else_branch = self.parse_expr()?;
            return self.c.create_ternop(cond, then_branch, else_branch);
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_and()?;
        while self.check(&Tok::OrOr) {
            let line = self.line();
            self.pos += 1;
            let r = self.parse_and()?;
            l = self.c.create_binop(line, BinOp::Or, l, r)?;
        }
        Ok(l)
    }

    fn parse_and(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_equality()?;
        while self.check(&Tok::AndAnd) {
            let line = self.line();
            self.pos += 1;
            let r = self.parse_equality()?;
            l = self.c.create_binop(line, BinOp::And, l, r)?;
        }
        Ok(l)
    }

    fn parse_equality(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::Ne,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let r = self.parse_relational()?;
            l = self.c.create_binop(line, op, l, r)?;
        }
        Ok(l)
    }

    fn parse_relational(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let r = self.parse_additive()?;
            l = self.c.create_binop(line, op, l, r)?;
        }
        Ok(l)
    }

    fn parse_additive(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let r = self.parse_multiplicative()?;
            l = self.c.create_binop(line, op, l, r)?;
        }
        Ok(l)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, CompileError> {
        let mut l = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                _ => break,
            };
            let line = self.line();
            self.pos += 1;
            let r = self.parse_unary()?;
            l = self.c.create_binop(line, op, l, r)?;
        }
        Ok(l)
    }

    fn parse_unary(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        match self.peek() {
            Tok::Minus => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                self.c.create_unop(line, UnOp::Neg, operand)
            }
            Tok::Not => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                self.c.create_unop(line, UnOp::Not, operand)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        match self.advance() {
            Tok::IntLit(v) => Ok(self.c.create_literal(LexicalValue::new(line, TokenCategory::Literal, LexPayload::Int(v)), Type::Int)),
            Tok::FloatLit(v) => Ok(self.c.create_literal(LexicalValue::new(line, TokenCategory::Literal, LexPayload::Float(v)), Type::Float)),
            Tok::CharLit(v) => Ok(self.c.create_literal(LexicalValue::new(line, TokenCategory::Literal, LexPayload::Char(v)), Type::Char)),
            Tok::BoolLit(v) => Ok(self.c.create_literal(LexicalValue::new(line, TokenCategory::Literal, LexPayload::Bool(v)), Type::Bool)),
            Tok::StringLit(s) => Ok(self.c.create_literal(LexicalValue::new(line, TokenCategory::Literal, LexPayload::Name(s)), Type::String)),
            Tok::Ident(name) => {
                if self.eat(Tok::LParen) {
                    let args = self.parse_call_args()?;
                    self.c.create_function_call(ident_lexval(&name, line), args)
                } else if self.eat(Tok::LBracket) {
                    let idx = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    self.c.create_vector_access(ident_lexval(&name, line), idx)
                } else {
                    self.c.create_id(ident_lexval(&name, line), false)
                }
            }
            Tok::LParen => {
                let e = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(e)
            }
            other => Err(self.err(format!("unexpected token in expression: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_program() {
        let mut c = Compiler::new();
        parse_program(&mut c, "int main() { int x = 1; return x; }").unwrap();
        assert!(c.scope.global().contains("main"));
    }

    #[test]
    fn parses_if_else_and_while() {
        let mut c = Compiler::new();
        parse_program(
            &mut c,
            "int main() { int x = 0; if (x < 10) { x = x + 1; } else { x = 0; } while (x < 5) { x = x + 1; } return 0; }",
        )
        .unwrap();
        assert!(c.scope.global().contains("main"));
    }

    #[test]
    fn parses_vector_declaration_and_access() {
        let mut c = Compiler::new();
        parse_program(&mut c, "int v[4]; int main() { v[0] = 1; output(v[0]); return 0; }").unwrap();
        assert_eq!(c.scope.global().get("v").unwrap().count, 4);
    }

    #[test]
    fn rejects_global_initializer() {
        let mut c = Compiler::new();
        let err = parse_program(&mut c, "int g = 1; int main() { return 0; }");
        assert!(err.is_err());
    }

    #[test]
    fn parses_function_call_with_args() {
        let mut c = Compiler::new();
        let functions = parse_program(
            &mut c,
            "int add(int a, int b) { return a + b; } int main() { int r = add(1, 2); return r; }",
        )
        .unwrap();
        assert_eq!(functions.len(), 2);
        assert!(c.scope.global().contains("add"));
    }

    #[test]
    fn parses_for_loop_with_shift_body() {
        let mut c = Compiler::new();
        parse_program(&mut c, "int main() { int i; for (i = 0; i < 4; i = i + 1) { i << 1; } return 0; }").unwrap();
        assert!(c.scope.global().contains("main"));
    }
}
