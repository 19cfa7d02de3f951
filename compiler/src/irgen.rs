//! The IR generator (spec §4.3): per-node lowering templates, attached to
//! `Compiler` as a second `impl` block alongside `builder.rs`'s
//! constructors — every `create_*` call ends by invoking exactly one of
//! these methods once its node's children are already checked and lowered.
//!
//! Two conversions resolve the spec's boolean-representation open
//! question: [`Compiler::ensure_value`] turns a branch-shaped node (true/
//! false hole lists, no value yet) into a materialized `0`/`1`, and
//! [`Compiler::ensure_branch`] turns a value-shaped node into a `cbr`
//! comparing it against zero. Every consumer picks whichever its own
//! context needs; a node is never forced to produce both eagerly.

use cmm_core::types::compatible;
use cmm_core::{CompileError, ErrorKind, Symbol, Type};

use crate::ast::{take_lists, AstKind, BinOp, NodeId, UnOp};
use crate::builder::{type_error, Compiler, LoopCtx};
use crate::ir::{Chain, Opcode, Operand, Reg};
use crate::namebag::{patch, Hole};

/// Byte offset of the first parameter slot: return address, caller `rsp`,
/// caller `rfp` each occupy one `size(Int)` slot ahead of it.
const FRAME_PARAMS_START: usize = 3 * 4;

/// Fixed instruction count of a call's marshalling sequence (store each
/// argument is *not* counted here, only the 4 linkage instructions plus the
/// `addI`/jump pair that follow them), derived from the original's
/// return-address arithmetic (`K = 5` with zero arguments — see
/// SPEC_FULL.md).
const RETURN_ADDR_FIXED_INSTRS: i64 = 5;

impl Compiler {
    // ---- boolean materialization ----------------------------------------

    /// Ensures `node` carries a value in a temp, returning its name.
    /// Already-valued nodes return their existing temp; address-shaped
    /// nodes get a `load` appended; branch-shaped nodes (populated
    /// true/false lists) get the `{load 1, load 0}` conversion block.
    pub(crate) fn ensure_value(&mut self, node: NodeId) -> String {
        if self.ast.get(node).has_value {
            return self.ast.get(node).ir_temp.clone().unwrap();
        }
        if self.ast.get(node).has_address {
            let addr = self.ast.get(node).ir_temp.clone().unwrap();
            let dest = self.bag.fresh_temp();
            let load = self.arena.single(Opcode::Load, [Some(Operand::temp(addr)), Some(Operand::temp(dest.clone())), None]);
            let chain = self.arena.append(self.ast.get(node).ir.unwrap_or(Chain::empty()), load);
            let n = self.ast.get_mut(node);
            n.ir = Some(chain);
            n.ir_temp = Some(dest.clone());
            n.has_value = true;
            n.has_address = false;
            return dest;
        }
        // Branch-shaped: materialize via the standard conversion block.
        let (true_list, false_list) = take_lists(self.ast.get_mut(node));
        let dest = self.bag.fresh_temp();
        let l_true = self.bag.fresh_label();
        let l_false = self.bag.fresh_label();
        let l_join = self.bag.fresh_label();
        for h in &true_list {
            patch(h, &l_true);
        }
        for h in &false_list {
            patch(h, &l_false);
        }
        let load_true = self.arena.single(Opcode::LoadI, [Some(Operand::Imm(1)), Some(Operand::temp(dest.clone())), None]);
        let load_true = self.arena.label_head(load_true, &l_true);
        let hole_join = self.bag.fresh_hole();
        patch(&hole_join, &l_join);
        let jump_join = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole_join)), None, None]);
        let load_false = self.arena.single(Opcode::LoadI, [Some(Operand::Imm(0)), Some(Operand::temp(dest.clone())), None]);
        let load_false = self.arena.label_head(load_false, &l_false);
        let join = self.arena.single(Opcode::Nop, [None, None, None]);
        let join = self.arena.label_head(join, &l_join);
        let conv = self.arena.append_all([load_true, jump_join, load_false, join]);
        let chain = self.arena.append(self.ast.get(node).ir.unwrap_or(Chain::empty()), conv);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(dest.clone());
        n.has_value = true;
        dest
    }

    /// Ensures `node` carries true/false back-patch holes, returning them.
    /// Branch-shaped nodes return their existing lists; a value-shaped node
    /// gets a `cmp_NE .. 0` / `cbr` appended (nonzero is true).
    pub(crate) fn ensure_branch(&mut self, node: NodeId) -> (Vec<Hole>, Vec<Hole>) {
        let already_branchy = !self.ast.get(node).true_list.is_empty() || !self.ast.get(node).false_list.is_empty();
        if already_branchy || (!self.ast.get(node).has_value && !self.ast.get(node).has_address) {
            return take_lists(self.ast.get_mut(node));
        }
        let v = self.ensure_value(node);
        let cond = self.bag.fresh_temp();
        let cmp = self
            .arena
            .single(Opcode::CmpNE, [Some(Operand::temp(v)), Some(Operand::Imm(0)), Some(Operand::temp(cond.clone()))]);
        let h_true = self.bag.fresh_hole();
        let h_false = self.bag.fresh_hole();
        let cbr = self.arena.single(
            Opcode::Cbr,
            [Some(Operand::temp(cond)), Some(Operand::Target(h_true.clone())), Some(Operand::Target(h_false.clone()))],
        );
        let chain = self.arena.append_all([self.ast.get(node).ir.unwrap_or(Chain::empty()), cmp, cbr]);
        self.ast.get_mut(node).ir = Some(chain);
        (vec![h_true], vec![h_false])
    }

    // ---- frame layout -----------------------------------------------------

    pub(crate) fn current_function_symbol(&self) -> Symbol {
        let name = self.scope.current_function().expect("frame_offset called outside a function body");
        self.scope.global().get(name).unwrap().clone()
    }

    /// The `(base register, byte offset)` a symbol is addressed by: `rbss`
    /// for anything global (including literals), `rfp` for locals and
    /// parameters, with parameters packed at `[12, 12+4*nparams)` and
    /// locals starting one `size(Int)`-wide return-value slot after that
    /// (spec §4.5's frame layout; see SPEC_FULL.md for the derivation).
    pub(crate) fn frame_offset(&self, sym: &Symbol) -> (Reg, i64) {
        if sym.is_global {
            return (Reg::Rbss, sym.offset as i64);
        }
        let nparams = self.current_function_symbol().params.map(|p| p.len()).unwrap_or(0);
        let param_bytes = nparams * 4;
        let phys = if sym.offset < param_bytes {
            FRAME_PARAMS_START + sym.offset
        } else {
            FRAME_PARAMS_START + 4 + sym.offset
        };
        (Reg::Rfp, phys as i64)
    }

    // ---- leaves -------------------------------------------------------

    pub(crate) fn gen_operand_address(&mut self, node: NodeId, sym: &Symbol) {
        let (base, offset) = self.frame_offset(sym);
        let t = self.bag.fresh_temp();
        let chain = self.arena.single(Opcode::AddI, [Some(Operand::Reserved(base)), Some(Operand::Imm(offset)), Some(Operand::temp(t.clone()))]);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(t);
        n.has_address = true;
    }

    pub(crate) fn gen_vector_access(&mut self, node: NodeId, sym: &Symbol, index: NodeId) {
        let idx_t = self.ensure_value(index);
        let (base, offset) = self.frame_offset(sym);
        let t_base = self.bag.fresh_temp();
        let t_scaled = self.bag.fresh_temp();
        let t_addr = self.bag.fresh_temp();
        let base_instr = self.arena.single(Opcode::AddI, [Some(Operand::Reserved(base)), Some(Operand::Imm(offset)), Some(Operand::temp(t_base.clone()))]);
        let scale = self.arena.single(
            Opcode::MultI,
            [Some(Operand::temp(idx_t)), Some(Operand::Imm(sym.ty.size() as i64)), Some(Operand::temp(t_scaled.clone()))],
        );
        let add = self.arena.single(
            Opcode::Add,
            [Some(Operand::temp(t_base)), Some(Operand::temp(t_scaled)), Some(Operand::temp(t_addr.clone()))],
        );
        let chain = self.arena.append_all([self.ast.get(index).ir.unwrap_or(Chain::empty()), base_instr, scale, add]);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(t_addr);
        n.has_address = true;
    }

    /// Checks and lowers `init_node` (an `InitVariable` built by
    /// `create_initialization`) now that `sym` has a real frame offset:
    /// computes `sym`'s address, materializes the initializer's value, and
    /// stores it, attaching the result directly onto `init_node` so the
    /// parser's existing statement-chaining picks it up unchanged.
    pub(crate) fn lower_initializer(&mut self, init_node: NodeId, sym: &Symbol, line: usize) -> Result<(), CompileError> {
        let rval = match &self.ast.get(init_node).kind {
            AstKind::InitVariable { rval, .. } => *rval,
            _ => panic!("lower_initializer called on a non-InitVariable node"),
        };
        let Some(rval) = rval else { return Ok(()) };
        let rty = self.ast.get(rval).ty;
        if !compatible(sym.ty, rty) {
            return Err(type_error(sym.ty, rty, line));
        }
        if sym.ty == Type::String {
            let len = crate::strsize::string_length(&self.ast, &self.scope, rval);
            let declared = sym.count;
            let fits = self.scope.get_symbol_mut(&sym.name).map(|s| s.update_size(len)).unwrap_or(true);
            if !fits {
                return Err(CompileError::new(
                    ErrorKind::StringSize,
                    line,
                    format!("{}: assigned length {len} exceeds declared size {declared}", self.ast.render(rval)),
                ));
            }
        }
        let (base, offset) = self.frame_offset(sym);
        let t_addr = self.bag.fresh_temp();
        let addr = self.arena.single(Opcode::AddI, [Some(Operand::Reserved(base)), Some(Operand::Imm(offset)), Some(Operand::temp(t_addr.clone()))]);
        let rv = self.ensure_value(rval);
        let store = self.arena.single(Opcode::Store, [Some(Operand::temp(rv)), Some(Operand::temp(t_addr)), None]);
        let chain = self.arena.append_all([self.ast.get(rval).ir.unwrap_or(Chain::empty()), addr, store]);
        self.ast.get_mut(init_node).ir = Some(chain);
        Ok(())
    }

    // ---- statements --------------------------------------------------

    pub(crate) fn gen_io(&mut self, node: NodeId, is_input: bool, arg: NodeId) {
        let chain = if is_input {
            // The argument must already be addressable; IO's own runtime
            // effect (issuing the read/write syscall once the address or
            // value is in a temp) is an asmgen concern (spec §4.5/§6).
            self.ast.get(arg).ir.unwrap_or(Chain::empty())
        } else {
            self.ensure_value(arg);
            self.ast.get(arg).ir.unwrap_or(Chain::empty())
        };
        self.ast.get_mut(node).ir = Some(chain);
    }

    pub(crate) fn gen_break(&mut self, node: NodeId) {
        let hole = self.bag.fresh_hole();
        let jump = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole.clone())), None, None]);
        if let Some(ctx) = self.loop_stack.last_mut() {
            ctx.break_holes.push(hole);
        }
        self.ast.get_mut(node).ir = Some(jump);
    }

    pub(crate) fn gen_continue(&mut self, node: NodeId) {
        let hole = self.bag.fresh_hole();
        let jump = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole.clone())), None, None]);
        if let Some(ctx) = self.loop_stack.last_mut() {
            ctx.continue_holes.push(hole);
        }
        self.ast.get_mut(node).ir = Some(jump);
    }

    pub(crate) fn gen_return(&mut self, node: NodeId, value: NodeId) {
        let nparams = self.current_function_symbol().params.map(|p| p.len()).unwrap_or(0);
        let return_offset = (FRAME_PARAMS_START + nparams * 4) as i64;
        let mut parts = Vec::new();
        parts.push(self.ast.get(value).ir.unwrap_or(Chain::empty()));
        let t = self.ensure_value(value);
        parts.push(self.arena.single(
            Opcode::StoreAI,
            [Some(Operand::temp(t)), Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Imm(return_offset))],
        ));
        parts.push(self.epilogue_jump_home());
        let chain = self.arena.append_all(parts);
        self.ast.get_mut(node).ir = Some(chain);
    }

    /// The shared tail of every return path: reload the caller's linkage
    /// triple from the current frame and jump back.
    fn epilogue_jump_home(&mut self) -> Chain {
        let t_ra = self.bag.fresh_temp();
        let t_rsp = self.bag.fresh_temp();
        let t_rfp = self.bag.fresh_temp();
        let load_ra = self.arena.single(Opcode::LoadAI, [Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Imm(0)), Some(Operand::temp(t_ra.clone()))]);
        let load_rsp = self.arena.single(Opcode::LoadAI, [Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Imm(4)), Some(Operand::temp(t_rsp.clone()))]);
        let load_rfp = self.arena.single(Opcode::LoadAI, [Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Imm(8)), Some(Operand::temp(t_rfp.clone()))]);
        let restore_rsp = self.arena.single(Opcode::I2i, [Some(Operand::temp(t_rsp)), Some(Operand::Reserved(Reg::Rsp)), None]);
        let restore_rfp = self.arena.single(Opcode::I2i, [Some(Operand::temp(t_rfp)), Some(Operand::Reserved(Reg::Rfp)), None]);
        let jump = self.arena.single(Opcode::Jump, [Some(Operand::temp(t_ra)), None, None]);
        self.arena.append_all([load_ra, load_rsp, load_rfp, restore_rsp, restore_rfp, jump])
    }

    pub(crate) fn gen_shift(&mut self, node: NodeId, target: NodeId, left: bool, amount: i64) {
        let addr = self.ast.get(target).ir_temp.clone().expect("shift target must be addressable");
        let t_val = self.bag.fresh_temp();
        let t_shifted = self.bag.fresh_temp();
        let load = self.arena.single(Opcode::Load, [Some(Operand::temp(addr.clone())), Some(Operand::temp(t_val.clone())), None]);
        let op = if left { Opcode::LshiftI } else { Opcode::RshiftI };
        let shift = self.arena.single(op, [Some(Operand::temp(t_val)), Some(Operand::Imm(amount)), Some(Operand::temp(t_shifted.clone()))]);
        let store = self.arena.single(Opcode::Store, [Some(Operand::temp(t_shifted)), Some(Operand::temp(addr)), None]);
        let chain = self.arena.append_all([self.ast.get(target).ir.unwrap_or(Chain::empty()), load, shift, store]);
        self.ast.get_mut(node).ir = Some(chain);
    }

    pub(crate) fn gen_attribution(&mut self, node: NodeId, lval: NodeId, rval: NodeId) {
        let rv = self.ensure_value(rval);
        let laddr = self.ast.get(lval).ir_temp.clone().expect("lval must be addressable");
        let store = self.arena.single(Opcode::Store, [Some(Operand::temp(rv)), Some(Operand::temp(laddr)), None]);
        let chain = self.arena.append_all([
            self.ast.get(lval).ir.unwrap_or(Chain::empty()),
            self.ast.get(rval).ir.unwrap_or(Chain::empty()),
            store,
        ]);
        self.ast.get_mut(node).ir = Some(chain);
        self.ast.get_mut(node).has_value = true;
        self.ast.get_mut(node).ir_temp = self.ast.get(rval).ir_temp.clone();
    }

    pub(crate) fn gen_unop(&mut self, node: NodeId, op: UnOp, operand: NodeId) {
        match op {
            UnOp::Neg => {
                let v = self.ensure_value(operand);
                let t = self.bag.fresh_temp();
                let neg = self.arena.single(Opcode::RsubI, [Some(Operand::temp(v)), Some(Operand::Imm(0)), Some(Operand::temp(t.clone()))]);
                let chain = self.arena.append(self.ast.get(operand).ir.unwrap_or(Chain::empty()), neg);
                let n = self.ast.get_mut(node);
                n.ir = Some(chain);
                n.ir_temp = Some(t);
                n.has_value = true;
            }
            UnOp::Not => {
                // Logical negation just swaps the operand's true/false lists.
                let (true_list, false_list) = self.ensure_branch(operand);
                let chain = self.ast.get(operand).ir.unwrap_or(Chain::empty());
                let n = self.ast.get_mut(node);
                n.ir = Some(chain);
                n.true_list = false_list;
                n.false_list = true_list;
            }
        }
    }

    pub(crate) fn gen_binop(&mut self, node: NodeId, op: BinOp, lhs: NodeId, rhs: NodeId) {
        if op.is_logic() {
            self.gen_logic_binop(node, op, lhs, rhs);
            return;
        }
        if op.is_comparison() {
            self.gen_comparison_binop(node, op, lhs, rhs);
            return;
        }
        let lv = self.ensure_value(lhs);
        let rv = self.ensure_value(rhs);
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mult,
            BinOp::Div => Opcode::Div,
            _ => unreachable!("arithmetic binop"),
        };
        let t = self.bag.fresh_temp();
        let instr = self.arena.single(opcode, [Some(Operand::temp(lv)), Some(Operand::temp(rv)), Some(Operand::temp(t.clone()))]);
        let chain = self.arena.append_all([
            self.ast.get(lhs).ir.unwrap_or(Chain::empty()),
            self.ast.get(rhs).ir.unwrap_or(Chain::empty()),
            instr,
        ]);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(t);
        n.has_value = true;
    }

    fn gen_comparison_binop(&mut self, node: NodeId, op: BinOp, lhs: NodeId, rhs: NodeId) {
        let lv = self.ensure_value(lhs);
        let rv = self.ensure_value(rhs);
        let opcode = match op {
            BinOp::Lt => Opcode::CmpLT,
            BinOp::Le => Opcode::CmpLE,
            BinOp::Eq => Opcode::CmpEQ,
            BinOp::Ge => Opcode::CmpGE,
            BinOp::Gt => Opcode::CmpGT,
            BinOp::Ne => Opcode::CmpNE,
            _ => unreachable!("comparison binop"),
        };
        let t = self.bag.fresh_temp();
        let cmp = self.arena.single(opcode, [Some(Operand::temp(lv)), Some(Operand::temp(rv)), Some(Operand::temp(t.clone()))]);
        let h_true = self.bag.fresh_hole();
        let h_false = self.bag.fresh_hole();
        let cbr = self.arena.single(
            Opcode::Cbr,
            [Some(Operand::temp(t)), Some(Operand::Target(h_true.clone())), Some(Operand::Target(h_false.clone()))],
        );
        let chain = self.arena.append_all([
            self.ast.get(lhs).ir.unwrap_or(Chain::empty()),
            self.ast.get(rhs).ir.unwrap_or(Chain::empty()),
            cmp,
            cbr,
        ]);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.true_list = vec![h_true];
        n.false_list = vec![h_false];
    }

    fn gen_logic_binop(&mut self, node: NodeId, op: BinOp, lhs: NodeId, rhs: NodeId) {
        let (l_true, l_false) = self.ensure_branch(lhs);
        let label_rhs = self.bag.fresh_label();
        match op {
            BinOp::And => {
                for h in &l_true {
                    patch(h, &label_rhs);
                }
            }
            BinOp::Or => {
                for h in &l_false {
                    patch(h, &label_rhs);
                }
            }
            _ => unreachable!("logic binop"),
        }
        let (r_true, r_false) = self.ensure_branch(rhs);
        let rhs_chain = self.arena.label_head(self.ast.get(rhs).ir.unwrap_or(Chain::empty()), &label_rhs);
        let chain = self.arena.append(self.ast.get(lhs).ir.unwrap_or(Chain::empty()), rhs_chain);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        match op {
            BinOp::And => {
                n.true_list = r_true;
                n.false_list = l_false.into_iter().chain(r_false).collect();
            }
            BinOp::Or => {
                n.true_list = l_true.into_iter().chain(r_true).collect();
                n.false_list = r_false;
            }
            _ => unreachable!("logic binop"),
        }
    }

    pub(crate) fn gen_ternop(&mut self, node: NodeId, cond: NodeId, then_branch: NodeId, else_branch: NodeId) {
        let (true_list, false_list) = self.ensure_branch(cond);
        let l_then = self.bag.fresh_label();
        let l_else = self.bag.fresh_label();
        let l_join = self.bag.fresh_label();
        for h in &true_list {
            patch(h, &l_then);
        }
        for h in &false_list {
            patch(h, &l_else);
        }
        let t = self.bag.fresh_temp();

        let then_val = self.ensure_value(then_branch);
        let then_chain = self.arena.append_all([
            self.ast.get(then_branch).ir.unwrap_or(Chain::empty()),
            self.arena_i2i(&then_val, &t),
        ]);
        let then_chain = self.arena.label_head(then_chain, &l_then);
        let hole_join = self.bag.fresh_hole();
        patch(&hole_join, &l_join);
        let jump_join = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole_join)), None, None]);
        let then_chain = self.arena.append(then_chain, jump_join);

        let else_val = self.ensure_value(else_branch);
        let else_chain = self.arena.append_all([
            self.ast.get(else_branch).ir.unwrap_or(Chain::empty()),
            self.arena_i2i(&else_val, &t),
        ]);
        let else_chain = self.arena.label_head(else_chain, &l_else);

        let join = self.arena.single(Opcode::Nop, [None, None, None]);
        let join = self.arena.label_head(join, &l_join);

        let cond_chain = self.ast.get(cond).ir.unwrap_or(Chain::empty());
        let chain = self.arena.append_all([cond_chain, then_chain, else_chain, join]);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(t);
        n.has_value = true;
    }

    fn arena_i2i(&mut self, src: &str, dest: &str) -> Chain {
        self.arena.single(Opcode::I2i, [Some(Operand::temp(src.to_string())), Some(Operand::temp(dest.to_string())), None])
    }

    pub(crate) fn gen_if(&mut self, node: NodeId, cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId>) {
        let (true_list, false_list) = self.ensure_branch(cond);
        let l_then = self.bag.fresh_label();
        for h in &true_list {
            patch(h, &l_then);
        }
        let then_chain = self.arena.label_head(self.ast.get(then_branch).ir.unwrap_or(Chain::empty()), &l_then);

        let (else_chain, skip_else) = if let Some(e) = else_branch {
            let l_else = self.bag.fresh_label();
            for h in &false_list {
                patch(h, &l_else);
            }
            let l_join = self.bag.fresh_label();
            let hole_join = self.bag.fresh_hole();
            patch(&hole_join, &l_join);
            let jump_join = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole_join)), None, None]);
            let body = self.arena.label_head(self.ast.get(e).ir.unwrap_or(Chain::empty()), &l_else);
            let join = self.arena.single(Opcode::Nop, [None, None, None]);
            let join = self.arena.label_head(join, &l_join);
            (Some(self.arena.append_all([body, join])), Some(jump_join))
        } else {
            let l_join = self.bag.fresh_label();
            for h in &false_list {
                patch(h, &l_join);
            }
            let join = self.arena.single(Opcode::Nop, [None, None, None]);
            (Some(self.arena.label_head(join, &l_join)), None)
        };

        let cond_chain = self.ast.get(cond).ir.unwrap_or(Chain::empty());
        let mut parts = vec![cond_chain, then_chain];
        if let Some(jump) = skip_else {
            parts.push(jump);
        }
        if let Some(e) = else_chain {
            parts.push(e);
        }
        let chain = self.arena.append_all(parts);
        self.ast.get_mut(node).ir = Some(chain);
    }

    pub(crate) fn gen_while(&mut self, node: NodeId, cond: NodeId, body: NodeId) {
        self.loop_stack.push(LoopCtx { break_holes: Vec::new(), continue_holes: Vec::new() });
        let l_cond = self.bag.fresh_label();
        let (true_list, false_list) = self.ensure_branch(cond);
        let l_body = self.bag.fresh_label();
        for h in &true_list {
            patch(h, &l_body);
        }
        let l_exit = self.bag.fresh_label();
        for h in &false_list {
            patch(h, &l_exit);
        }
        let cond_chain = self.arena.label_head(self.ast.get(cond).ir.unwrap_or(Chain::empty()), &l_cond);
        let body_chain = self.arena.label_head(self.ast.get(body).ir.unwrap_or(Chain::empty()), &l_body);
        let hole_back = self.bag.fresh_hole();
        patch(&hole_back, &l_cond);
        let jump_back = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole_back)), None, None]);
        let exit = self.arena.single(Opcode::Nop, [None, None, None]);
        let exit = self.arena.label_head(exit, &l_exit);

        let ctx = self.loop_stack.pop().unwrap();
        for h in &ctx.continue_holes {
            patch(h, &l_cond);
        }
        for h in &ctx.break_holes {
            patch(h, &l_exit);
        }

        let chain = self.arena.append_all([cond_chain, body_chain, jump_back, exit]);
        self.ast.get_mut(node).ir = Some(chain);
    }

    pub(crate) fn gen_for(&mut self, node: NodeId, init: NodeId, cond: NodeId, step: NodeId, body: NodeId) {
        self.loop_stack.push(LoopCtx { break_holes: Vec::new(), continue_holes: Vec::new() });
        let l_cond = self.bag.fresh_label();
        let (true_list, false_list) = self.ensure_branch(cond);
        let l_body = self.bag.fresh_label();
        for h in &true_list {
            patch(h, &l_body);
        }
        let l_exit = self.bag.fresh_label();
        for h in &false_list {
            patch(h, &l_exit);
        }
        let l_step = self.bag.fresh_label();

        let init_chain = self.ast.get(init).ir.unwrap_or(Chain::empty());
        let cond_chain = self.arena.label_head(self.ast.get(cond).ir.unwrap_or(Chain::empty()), &l_cond);
        let body_chain = self.arena.label_head(self.ast.get(body).ir.unwrap_or(Chain::empty()), &l_body);
        let step_chain = self.arena.label_head(self.ast.get(step).ir.unwrap_or(Chain::empty()), &l_step);
        let hole_back = self.bag.fresh_hole();
        patch(&hole_back, &l_cond);
        let jump_back = self.arena.single(Opcode::JumpI, [Some(Operand::Target(hole_back)), None, None]);
        let exit = self.arena.single(Opcode::Nop, [None, None, None]);
        let exit = self.arena.label_head(exit, &l_exit);

        let ctx = self.loop_stack.pop().unwrap();
        for h in &ctx.continue_holes {
            patch(h, &l_step);
        }
        for h in &ctx.break_holes {
            patch(h, &l_exit);
        }

        let chain = self.arena.append_all([init_chain, cond_chain, body_chain, step_chain, jump_back, exit]);
        self.ast.get_mut(node).ir = Some(chain);
    }

    // ---- functions ------------------------------------------------------

    pub(crate) fn gen_function_declaration(&mut self, node: NodeId, name: &str, body: Option<NodeId>) {
        let local_bytes = self.scope.top().next_offset();
        let nparams = self.current_function_symbol().params.map(|p| p.len()).unwrap_or(0);
        let param_bytes = nparams * 4;
        let locals_only = local_bytes.saturating_sub(param_bytes);

        let set_rfp = self.arena.single(Opcode::I2i, [Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Reserved(Reg::Rfp)), None]);
        let grow_rsp = self.arena.single(
            Opcode::AddI,
            [Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(locals_only as i64)), Some(Operand::Reserved(Reg::Rsp))],
        );
        let prologue = self.arena.append(set_rfp, grow_rsp);

        let body_chain = body.map(|b| self.ast.get(b).ir.unwrap_or(Chain::empty())).unwrap_or(Chain::empty());
        // Every function terminates with the canonical epilogue, even if
        // every path through the body already returned explicitly — a
        // harmless extra exit rather than a reachability analysis. A
        // function that falls off the end without an explicit `return`
        // returns the artificial value 0 (spec §4.3), stored the same way
        // `gen_return` stores an explicit value before jumping home.
        let return_offset = (FRAME_PARAMS_START + nparams * 4) as i64;
        let t_zero = self.bag.fresh_temp();
        let load_zero = self.arena.single(Opcode::LoadI, [Some(Operand::Imm(0)), Some(Operand::temp(t_zero.clone())), None]);
        let store_zero = self.arena.single(
            Opcode::StoreAI,
            [Some(Operand::temp(t_zero)), Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Imm(return_offset))],
        );
        let jump_home = self.epilogue_jump_home();
        let implicit_return = self.arena.append_all([load_zero, store_zero, jump_home]);

        let label = self.bag.fresh_label();
        let full = self.arena.append_all([prologue, body_chain, implicit_return]);
        let full = self.arena.label_head(full, &label);

        if let Some(sym) = self.scope.global_mut().get_mut(name) {
            sym.label = Some(label.clone());
        }
        if let Some(holes) = self.pending_call_patches.remove(name) {
            for h in &holes {
                patch(h, &label);
            }
        }

        self.ast.get_mut(node).ir = Some(full);
    }

    pub(crate) fn gen_function_call(&mut self, node: NodeId, name: &str, args: &[NodeId], sym: &Symbol) {
        let mut parts = Vec::new();
        for (i, &arg) in args.iter().enumerate() {
            parts.push(self.ast.get(arg).ir.unwrap_or(Chain::empty()));
            let v = self.ensure_value(arg);
            parts.push(self.arena.single(
                Opcode::StoreAI,
                [Some(Operand::temp(v)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm((FRAME_PARAMS_START + i * 4) as i64))],
            ));
        }

        let k = RETURN_ADDR_FIXED_INSTRS + args.len() as i64;
        let t_ra = self.bag.fresh_temp();
        parts.push(self.arena.single(
            Opcode::AddI,
            [Some(Operand::Reserved(Reg::Rpc)), Some(Operand::Imm(k)), Some(Operand::temp(t_ra.clone()))],
        ));
        parts.push(self.arena.single(
            Opcode::StoreAI,
            [Some(Operand::temp(t_ra)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(0))],
        ));
        parts.push(self.arena.single(
            Opcode::StoreAI,
            [Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(4))],
        ));
        parts.push(self.arena.single(
            Opcode::StoreAI,
            [Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(8))],
        ));

        let target = match &sym.label {
            Some(label) => {
                let h = self.bag.fresh_hole();
                patch(&h, label);
                h
            }
            None => {
                let h = self.bag.fresh_hole();
                self.pending_call_patches.entry(name.to_string()).or_default().push(h.clone());
                h
            }
        };
        parts.push(self.arena.single(Opcode::JumpI, [Some(Operand::Target(target)), None, None]));

        let nparams = sym.params.as_ref().map(|p| p.len()).unwrap_or(0);
        let return_offset = (FRAME_PARAMS_START + nparams * 4) as i64;
        let rv = self.bag.fresh_temp();
        parts.push(self.arena.single(
            Opcode::LoadAI,
            [Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(return_offset)), Some(Operand::temp(rv.clone()))],
        ));

        let chain = self.arena.append_all(parts);
        let n = self.ast.get_mut(node);
        n.ir = Some(chain);
        n.ir_temp = Some(rv);
        n.has_value = true;
    }

    // ---- program driver ---------------------------------------------------

    /// The once-only prelude prepended to the whole program (spec §4.3):
    /// initializes the software stack registers, calls `main`, then halts.
    /// Globals, vectors and literals all resolve to their own static label
    /// (spec §6's `.comm`/`.long __name:` data segment), addressed directly
    /// by `asmgen`'s `leaq name(%rip), reg` rendering of `gen_operand_address`'s
    /// `addI rbss,offset` — there is nothing left for the driver to patch in
    /// at runtime.
    pub fn gen_program_driver(&mut self, stack_start: i64, _data_start: i64) -> Chain {
        let set_rsp = self.arena.single(Opcode::LoadI, [Some(Operand::Imm(stack_start)), Some(Operand::Reserved(Reg::Rsp)), None]);
        let set_rfp = self.arena.single(Opcode::LoadI, [Some(Operand::Imm(stack_start)), Some(Operand::Reserved(Reg::Rfp)), None]);
        let mut parts = vec![set_rsp, set_rfp];

        if let Some(main_sym) = self.scope.global().get("main").cloned() {
            let target = match &main_sym.label {
                Some(label) => {
                    let h = self.bag.fresh_hole();
                    patch(&h, label);
                    h
                }
                None => {
                    let h = self.bag.fresh_hole();
                    self.pending_call_patches.entry("main".to_string()).or_default().push(h.clone());
                    h
                }
            };
            // The driver's own call-linkage area lives right below
            // stack_start; reuse the same storeAI/jumpI shape as a normal
            // call with zero arguments.
            let t_ra = self.bag.fresh_temp();
            let k = RETURN_ADDR_FIXED_INSTRS;
            parts.push(self.arena.single(
                Opcode::AddI,
                [Some(Operand::Reserved(Reg::Rpc)), Some(Operand::Imm(k)), Some(Operand::temp(t_ra.clone()))],
            ));
            parts.push(self.arena.single(
                Opcode::StoreAI,
                [Some(Operand::temp(t_ra)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(0))],
            ));
            parts.push(self.arena.single(
                Opcode::StoreAI,
                [Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(4))],
            ));
            parts.push(self.arena.single(
                Opcode::StoreAI,
                [Some(Operand::Reserved(Reg::Rfp)), Some(Operand::Reserved(Reg::Rsp)), Some(Operand::Imm(8))],
            ));
            parts.push(self.arena.single(Opcode::JumpI, [Some(Operand::Target(target)), None, None]));
        }
        parts.push(self.arena.single(Opcode::Halt, [None, None, None]));
        self.arena.append_all(parts)
    }
}

pub(crate) fn literal_bits(sym: &Symbol) -> i64 {
    use cmm_core::LexPayload;
    match &sym.lexval.payload {
        LexPayload::Int(v) => *v,
        LexPayload::Float(v) => v.to_bits() as i64,
        LexPayload::Char(c) => *c as i64,
        LexPayload::Bool(b) => *b as i64,
        LexPayload::Name(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::{LexPayload, LexicalValue, Nature, TokenCategory, Type};

    fn lv(line: usize, name: &str) -> LexicalValue {
        LexicalValue::new(line, TokenCategory::Identifier, LexPayload::Name(name.into()))
    }

    #[test]
    fn comparison_populates_branch_lists_not_value() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Int, 1, lv(1, "x")), None);
        c.declare_variables(Type::Int).unwrap();
        let x = c.create_id(lv(2, "x"), false).unwrap();
        let zero = c.create_literal(LexicalValue::new(2, TokenCategory::Literal, LexPayload::Int(0)), Type::Int);
        let cmp = c.create_binop(2, BinOp::Gt, x, zero).unwrap();
        assert!(!c.ast.get(cmp).has_value);
        assert_eq!(c.ast.get(cmp).true_list.len(), 1);
        assert_eq!(c.ast.get(cmp).false_list.len(), 1);
    }

    #[test]
    fn ensure_value_materializes_a_comparison() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("x", Nature::Identifier, Type::Int, 1, lv(1, "x")), None);
        c.declare_variables(Type::Int).unwrap();
        let x = c.create_id(lv(2, "x"), false).unwrap();
        let zero = c.create_literal(LexicalValue::new(2, TokenCategory::Literal, LexPayload::Int(0)), Type::Int);
        let cmp = c.create_binop(2, BinOp::Gt, x, zero).unwrap();
        let _ = c.ensure_value(cmp);
        assert!(c.ast.get(cmp).has_value);
        assert!(c.ast.get(cmp).true_list.is_empty());
    }

    #[test]
    fn logic_and_chains_rhs_off_lhs_true_list() {
        let mut c = Compiler::new();
        c.add_to_var_list(Symbol::new("a", Nature::Identifier, Type::Bool, 1, lv(1, "a")), None);
        c.add_to_var_list(Symbol::new("b", Nature::Identifier, Type::Bool, 1, lv(1, "b")), None);
        c.declare_variables(Type::Bool).unwrap();
        let a = c.create_id(lv(2, "a"), false).unwrap();
        let b = c.create_id(lv(2, "b"), false).unwrap();
        let and = c.create_binop(2, BinOp::And, a, b).unwrap();
        assert!(!c.ast.get(and).true_list.is_empty());
        assert!(!c.ast.get(and).false_list.is_empty());
    }

    #[test]
    fn function_declaration_assigns_a_label() {
        let mut c = Compiler::new();
        c.declare_function(lv(1, "f"), Type::Int).unwrap();
        c.enter_scope();
        let zero = c.create_literal(LexicalValue::new(1, TokenCategory::Literal, LexPayload::Int(0)), Type::Int);
        c.create_return(1, zero).unwrap();
        c.create_function_declaration(lv(1, "f"), Some(zero));
        c.leave_scope();
        assert!(c.scope.global().get("f").unwrap().label.is_some());
    }
}
