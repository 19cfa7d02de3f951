//! Three-address code (TAC), ILOC-style (spec §4.3).
//!
//! Instructions live in an arena (`IrArena`, `Vec<Instruction>` indexed by
//! `InstrId`) with `prev`/`next` fields modeling the doubly-linked chain of
//! spec §3 — the idiomatic-Rust rendering of an intrusive linked list (no
//! raw pointers), the same technique `ast.rs` uses for the AST. A `Chain`
//! is a lightweight `(head, tail)` handle into that arena; "append to last"
//! concatenation from spec §4.3 is O(1) pointer relinking.

use crate::namebag::Hole;
use std::collections::HashSet;
use std::fmt;

/// The full ILOC-style opcode alphabet (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mult,
    Div,
    AddI,
    SubI,
    RsubI,
    MultI,
    DivI,
    RdivI,
    Lshift,
    LshiftI,
    Rshift,
    RshiftI,
    Load,
    LoadI,
    LoadAI,
    LoadA0,
    Store,
    StoreAI,
    StoreAO,
    I2i,
    CmpLT,
    CmpLE,
    CmpEQ,
    CmpGE,
    CmpGT,
    CmpNE,
    And,
    Or,
    Cbr,
    JumpI,
    Jump,
    Nop,
    Halt,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mult => "mult",
            Opcode::Div => "div",
            Opcode::AddI => "addI",
            Opcode::SubI => "subI",
            Opcode::RsubI => "rsubI",
            Opcode::MultI => "multI",
            Opcode::DivI => "divI",
            Opcode::RdivI => "rdivI",
            Opcode::Lshift => "lshift",
            Opcode::LshiftI => "lshiftI",
            Opcode::Rshift => "rshift",
            Opcode::RshiftI => "rshiftI",
            Opcode::Load => "load",
            Opcode::LoadI => "loadI",
            Opcode::LoadAI => "loadAI",
            Opcode::LoadA0 => "loadA0",
            Opcode::Store => "store",
            Opcode::StoreAI => "storeAI",
            Opcode::StoreAO => "storeAO",
            Opcode::I2i => "i2i",
            Opcode::CmpLT => "cmp_LT",
            Opcode::CmpLE => "cmp_LE",
            Opcode::CmpEQ => "cmp_EQ",
            Opcode::CmpGE => "cmp_GE",
            Opcode::CmpGT => "cmp_GT",
            Opcode::CmpNE => "cmp_NE",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Cbr => "cbr",
            Opcode::JumpI => "jumpI",
            Opcode::Jump => "jump",
            Opcode::Nop => "nop",
            Opcode::Halt => "halt",
        };
        f.write_str(s)
    }
}

/// A reserved register name (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Rfp,
    Rsp,
    Rbss,
    Rpc,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reg::Rfp => "rfp",
            Reg::Rsp => "rsp",
            Reg::Rbss => "rbss",
            Reg::Rpc => "rpc",
        };
        f.write_str(s)
    }
}

/// One argument slot of an instruction.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A true IR temporary, `rN`.
    Temp(String),
    Reserved(Reg),
    Imm(i64),
    /// A jump/branch target: a label name or an as-yet-unpatched hole.
    /// Represented uniformly as a `Hole` so a target can start as `HN` and
    /// later be patched in place; targets that are already known simply
    /// start pre-patched to their final label text.
    Target(Hole),
}

impl Operand {
    pub fn temp(name: impl Into<String>) -> Self {
        Operand::Temp(name.into())
    }

    /// `true` for arguments that name a true IR temporary (spec §4.5 step
    /// 1: names starting with `r` that are not one of the reserved
    /// prefixes `rs`, `rf`, `rb`, `rp`).
    pub fn as_user_temp(&self) -> Option<&str> {
        match self {
            Operand::Temp(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(name) => write!(f, "{name}"),
            Operand::Reserved(r) => write!(f, "{r}"),
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::Target(hole) => write!(f, "{}", hole.borrow()),
        }
    }
}

pub type InstrId = usize;

/// A single TAC instruction plus its doubly-linked position and liveness
/// annotation.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub args: [Option<Operand>; 3],
    pub label: Option<String>,
    prev: Option<InstrId>,
    next: Option<InstrId>,
    pub live_in: HashSet<String>,
    pub live_out: HashSet<String>,
}

impl Instruction {
    fn new(opcode: Opcode, args: [Option<Operand>; 3]) -> Self {
        Instruction {
            opcode,
            args,
            label: None,
            prev: None,
            next: None,
            live_in: HashSet::new(),
            live_out: HashSet::new(),
        }
    }

    pub fn prev(&self) -> Option<InstrId> {
        self.prev
    }

    pub fn next(&self) -> Option<InstrId> {
        self.next
    }

    /// Every IR-temp argument of this instruction (spec §4.5 step 1).
    pub fn user_temps(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|a| a.as_ref().and_then(Operand::as_user_temp))
    }
}

impl fmt::Display for Instruction {
    /// Renders one ILOC-style text line, e.g. `addI r0, 4 => r1` or
    /// `cbr r2 -> L0, L1`. Purely a debugging aid (`--dump-ir`); the
    /// authoritative representation is the arena itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "{label}: ")?;
        }
        let a = |i: usize| self.args[i].as_ref().map(|o| o.to_string()).unwrap_or_default();
        match self.opcode {
            Opcode::Cbr => write!(f, "cbr {} -> {}, {}", a(0), a(1), a(2)),
            Opcode::JumpI => write!(f, "jumpI -> {}", a(0)),
            Opcode::Jump => write!(f, "jump {}", a(0)),
            Opcode::Nop | Opcode::Halt => write!(f, "{}", self.opcode),
            Opcode::LoadI => write!(f, "loadI {} => {}", a(0), a(1)),
            Opcode::Load => write!(f, "load {} => {}", a(0), a(1)),
            Opcode::LoadAI => write!(f, "loadAI {}, {} => {}", a(0), a(1), a(2)),
            Opcode::LoadA0 => write!(f, "loadA0 {}, {} => {}", a(0), a(1), a(2)),
            Opcode::Store => write!(f, "store {} => {}", a(0), a(1)),
            Opcode::StoreAI => write!(f, "storeAI {} => {}, {}", a(0), a(1), a(2)),
            Opcode::StoreAO => write!(f, "storeAO {} => {}, {}", a(0), a(1), a(2)),
            Opcode::I2i => write!(f, "i2i {} => {}", a(0), a(1)),
            _ => write!(f, "{} {}, {} => {}", self.opcode, a(0), a(1), a(2)),
        }
    }
}

/// A `(head, tail)` handle into an `IrArena`. Represents one node's owned
/// instruction chain; `None` means an empty chain (e.g. a `break` body with
/// no other side effects before its jump is appended).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub head: Option<InstrId>,
    pub tail: Option<InstrId>,
}

impl Chain {
    pub fn empty() -> Self {
        Chain { head: None, tail: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// The arena owning every instruction generated during lowering.
#[derive(Debug, Default)]
pub struct IrArena {
    instrs: Vec<Instruction>,
}

impl IrArena {
    pub fn new() -> Self {
        IrArena { instrs: Vec::new() }
    }

    pub fn get(&self, id: InstrId) -> &Instruction {
        &self.instrs[id]
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instrs[id]
    }

    /// A one-instruction chain.
    pub fn single(&mut self, opcode: Opcode, args: [Option<Operand>; 3]) -> Chain {
        let id = self.instrs.len();
        self.instrs.push(Instruction::new(opcode, args));
        Chain { head: Some(id), tail: Some(id) }
    }

    /// Appends `b` after `a` in place, O(1). Either side may be empty.
    pub fn append(&mut self, a: Chain, b: Chain) -> Chain {
        match (a.tail, b.head) {
            (Some(at), Some(bh)) => {
                self.instrs[at].next = Some(bh);
                self.instrs[bh].prev = Some(at);
                Chain { head: a.head, tail: b.tail }
            }
            (None, _) => b,
            (_, None) => a,
        }
    }

    pub fn append_all(&mut self, chains: impl IntoIterator<Item = Chain>) -> Chain {
        chains.into_iter().fold(Chain::empty(), |acc, c| self.append(acc, c))
    }

    /// Attaches `label` to the chain's first instruction, inserting a `nop`
    /// to carry it if the chain is empty (spec: "a nop carries the exit
    /// label").
    pub fn label_head(&mut self, chain: Chain, label: &str) -> Chain {
        let chain = if chain.is_empty() {
            self.single(Opcode::Nop, [None, None, None])
        } else {
            chain
        };
        self.instrs[chain.head.unwrap()].label = Some(label.to_string());
        chain
    }

    /// Deep-copies `chain`'s instructions (new `InstrId`s), sharing temp and
    /// label/hole names by design (spec §3).
    pub fn deep_copy(&mut self, chain: Chain) -> Chain {
        let mut result = Chain::empty();
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            let instr = self.instrs[id].clone();
            let copy = self.single(instr.opcode, instr.args);
            self.instrs[copy.head.unwrap()].label = instr.label.clone();
            result = self.append(result, copy);
            cursor = self.instrs[id].next;
        }
        result
    }

    /// Iterates instruction ids from `head` to the end of the chain they
    /// belong to (follows `next`, not scoped to the `Chain`'s own tail —
    /// callers pass a function-scoped head for whole-function walks).
    pub fn walk(&self, head: Option<InstrId>) -> impl Iterator<Item = InstrId> + '_ {
        std::iter::successors(head, move |&id| self.instrs[id].next)
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namebag::NameBag;

    #[test]
    fn append_links_prev_and_next() {
        let mut arena = IrArena::new();
        let a = arena.single(Opcode::Nop, [None, None, None]);
        let b = arena.single(Opcode::Halt, [None, None, None]);
        let chain = arena.append(a, b);
        assert_eq!(chain.head, a.head);
        assert_eq!(chain.tail, b.tail);
        assert_eq!(arena.get(a.head.unwrap()).next(), b.head);
        assert_eq!(arena.get(b.head.unwrap()).prev(), a.head);
    }

    #[test]
    fn first_prev_and_last_next_are_none() {
        let mut arena = IrArena::new();
        let a = arena.single(Opcode::Nop, [None, None, None]);
        let b = arena.single(Opcode::Halt, [None, None, None]);
        let chain = arena.append(a, b);
        assert!(arena.get(chain.head.unwrap()).prev().is_none());
        assert!(arena.get(chain.tail.unwrap()).next().is_none());
    }

    #[test]
    fn empty_chain_gets_a_nop_when_labelled() {
        let mut arena = IrArena::new();
        let chain = arena.label_head(Chain::empty(), "L0");
        assert!(!chain.is_empty());
        assert_eq!(arena.get(chain.head.unwrap()).opcode, Opcode::Nop);
        assert_eq!(arena.get(chain.head.unwrap()).label.as_deref(), Some("L0"));
    }

    #[test]
    fn deep_copy_shares_names_but_not_instruction_ids() {
        let mut arena = IrArena::new();
        let mut bag = NameBag::new();
        let t = bag.fresh_temp();
        let orig = arena.single(Opcode::LoadI, [Some(Operand::Imm(1)), Some(Operand::temp(t.clone())), None]);
        let copy = arena.deep_copy(orig);
        assert_ne!(orig.head, copy.head);
        match &arena.get(copy.head.unwrap()).args[1] {
            Some(Operand::Temp(name)) => assert_eq!(name, &t),
            _ => panic!("expected temp operand"),
        }
    }

    #[test]
    fn patching_a_shared_hole_updates_every_reference() {
        let mut bag = NameBag::new();
        let mut arena = IrArena::new();
        let hole = bag.fresh_hole();
        let c1 = arena.single(Opcode::JumpI, [Some(Operand::Target(hole.clone())), None, None]);
        let c2 = arena.single(Opcode::Cbr, [None, Some(Operand::Target(hole.clone())), None]);
        crate::namebag::patch(&hole, "L9");
        for id in [c1.head.unwrap(), c2.head.unwrap()] {
            let rendered = arena.get(id).args.iter().flatten().map(|a| a.to_string()).collect::<Vec<_>>();
            assert!(rendered.iter().any(|s| s == "L9"));
        }
    }
}
