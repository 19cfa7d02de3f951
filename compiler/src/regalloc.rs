//! The register allocator (spec §4.5): liveness annotation, interference
//! graph construction, and a greedy k-colouring heuristic mapping IR
//! temporaries to physical register slots.
//!
//! Operates on one function's instruction chain at a time — the caller
//! (`asmgen`) walks the program once per function-labelled block and calls
//! [`allocate`] on each.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ir::{InstrId, IrArena};

/// Failure to fit a function's temporaries into the physical register
/// budget. Not a `CompileError` (spec §7's taxonomy is entirely front-end
/// semantic checks); this is a backend capacity failure, reported the way
/// the teacher's codegen errors are — a small hand-rolled enum with a
/// `Display` impl, no `thiserror`.
#[derive(Debug)]
pub enum AllocError {
    Overflow { colors_used: usize, budget: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::Overflow { colors_used, budget } => {
                write!(f, "register allocation needs {colors_used} colours, budget is {budget}")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Temp name → physical register colour (0-based). `asmgen` renders colour
/// `c` as `%r{base+c}` or similar, depending on the chosen physical set.
#[derive(Debug, Default)]
pub struct RegisterMap {
    colors: HashMap<String, usize>,
}

impl RegisterMap {
    pub fn color_of(&self, temp: &str) -> Option<usize> {
        self.colors.get(temp).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Step 1-2: walks `head..` linearly, tracking each temp's most recent use
/// and annotating `live_out` as it goes, then undoes the annotation at each
/// temp's final use (spec §4.5 steps 1-2 verbatim: "the act of add_live_out
/// also propagates t into the next instruction's live-in and live-out").
pub fn annotate_liveness(arena: &mut IrArena, head: InstrId) {
    let order: Vec<InstrId> = arena.walk(Some(head)).collect();
    let mut last_use: HashMap<String, InstrId> = HashMap::new();

    for &id in &order {
        let temps: Vec<String> = arena.get(id).user_temps().map(str::to_string).collect();
        for t in temps {
            if let Some(&prev_id) = last_use.get(&t) {
                arena.get_mut(prev_id).live_out.remove(&t);
            }
            add_live_out(arena, &order, id, &t);
            last_use.insert(t, id);
        }
    }
    for (t, id) in last_use {
        arena.get_mut(id).live_out.remove(&t);
    }
}

/// Propagates `t` into `id`'s live-out and, transitively, into the
/// following instruction's live-in/live-out — this is how a live range
/// extends forward from one use to the next (spec §4.5 step 2).
fn add_live_out(arena: &mut IrArena, order: &[InstrId], id: InstrId, t: &str) {
    let pos = order.iter().position(|&x| x == id).unwrap();
    for &cur in &order[pos..] {
        let inserted_out = arena.get_mut(cur).live_out.insert(t.to_string());
        let next = arena.get(cur).next();
        if let Some(next_id) = next {
            arena.get_mut(next_id).live_in.insert(t.to_string());
        }
        if !inserted_out && cur != id {
            break;
        }
    }
}

/// Step 3: one vertex per temp, edges between every pair simultaneously
/// live at any instruction (i.e. co-occurring in a `live_out` set, the
/// standard interference-graph construction from a live-out annotation).
struct InterferenceGraph {
    index: HashMap<String, usize>,
    names: Vec<String>,
    adjacency: Vec<HashSet<usize>>,
}

impl InterferenceGraph {
    fn new() -> Self {
        InterferenceGraph { index: HashMap::new(), names: Vec::new(), adjacency: Vec::new() }
    }

    fn vertex(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.index.insert(name.to_string(), i);
        self.names.push(name.to_string());
        self.adjacency.push(HashSet::new());
        i
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        if a != b {
            self.adjacency[a].insert(b);
            self.adjacency[b].insert(a);
        }
    }

    fn build(arena: &IrArena, head: InstrId) -> Self {
        let mut g = InterferenceGraph::new();
        for id in arena.walk(Some(head)) {
            let live: Vec<&String> = arena.get(id).live_out.iter().collect();
            let verts: Vec<usize> = live.iter().map(|t| g.vertex(t)).collect();
            for i in 0..verts.len() {
                for j in (i + 1)..verts.len() {
                    g.add_edge(verts[i], verts[j]);
                }
            }
        }
        g
    }
}

/// Step 4-5: colours the graph greedily (lowest colour index not used by an
/// already-coloured neighbour) and reports overflow past `regcount`.
/// "Pick a random uncoloured vertex" per spec §4.5 is implemented as a
/// fixed insertion-order walk instead of an actual RNG — any order is
/// correct per the heuristic's own definition, and a fixed order keeps
/// allocation reproducible across runs of the same program.
fn color_graph(g: &InterferenceGraph, regcount: usize) -> Result<HashMap<String, usize>, AllocError> {
    let mut colors: Vec<Option<usize>> = vec![None; g.names.len()];
    let mut max_used = 0usize;

    for v in 0..g.names.len() {
        let used: HashSet<usize> = g.adjacency[v]
            .iter()
            .filter_map(|&n| colors[n])
            .collect();
        let mut c = 0;
        while used.contains(&c) {
            c += 1;
        }
        colors[v] = Some(c);
        max_used = max_used.max(c + 1);
    }

    if max_used > regcount {
        return Err(AllocError::Overflow { colors_used: max_used, budget: regcount });
    }

    Ok(g.names.iter().cloned().zip(colors.into_iter().map(Option::unwrap)).collect())
}

/// Runs the full pipeline for one function's instruction chain: liveness,
/// interference graph, colouring.
pub fn allocate(arena: &mut IrArena, function_head: InstrId, regcount: usize) -> Result<RegisterMap, AllocError> {
    annotate_liveness(arena, function_head);
    let graph = InterferenceGraph::build(arena, function_head);
    let colors = color_graph(&graph, regcount)?;
    Ok(RegisterMap { colors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, Operand};

    #[test]
    fn disjoint_live_ranges_share_a_colour() {
        let mut arena = IrArena::new();
        let a = arena.single(Opcode::LoadI, [Some(Operand::Imm(1)), Some(Operand::temp("r0")), None]);
        let use_a = arena.single(Opcode::AddI, [Some(Operand::temp("r0")), Some(Operand::Imm(1)), Some(Operand::temp("r1"))]);
        let use_b = arena.single(Opcode::AddI, [Some(Operand::temp("r1")), Some(Operand::Imm(1)), Some(Operand::temp("r2"))]);
        let chain = arena.append(arena.append(a, use_a), use_b);
        let map = allocate(&mut arena, chain.head.unwrap(), 6).unwrap();
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn overlapping_live_ranges_interfere() {
        let mut arena = IrArena::new();
        // r0 and r1 both live across the add that consumes both.
        let load0 = arena.single(Opcode::LoadI, [Some(Operand::Imm(1)), Some(Operand::temp("r0")), None]);
        let load1 = arena.single(Opcode::LoadI, [Some(Operand::Imm(2)), Some(Operand::temp("r1")), None]);
        let add = arena.single(Opcode::Add, [Some(Operand::temp("r0")), Some(Operand::temp("r1")), Some(Operand::temp("r2"))]);
        let chain = arena.append(arena.append(load0, load1), add);
        let map = allocate(&mut arena, chain.head.unwrap(), 6).unwrap();
        assert_ne!(map.color_of("r0"), map.color_of("r1"));
    }

    #[test]
    fn overflow_past_budget_is_reported() {
        // Loads r0..r5, then a left-associative fold add(...add(r0,r1),r2)...
        // keeps every not-yet-consumed operand alive across each fold step,
        // so the live set right after the first fold holds five temps at
        // once — more than a budget of 2 can colour.
        let mut arena = IrArena::new();
        let mut chain = arena.single(Opcode::LoadI, [Some(Operand::Imm(0)), Some(Operand::temp("r0")), None]);
        for i in 1..6 {
            let load = arena.single(Opcode::LoadI, [Some(Operand::Imm(i)), Some(Operand::temp(format!("r{i}"))), None]);
            chain = arena.append(chain, load);
        }
        let mut acc = "r0".to_string();
        for i in 1..6 {
            let dest = format!("t{i}");
            let add = arena.single(Opcode::Add, [Some(Operand::temp(acc.clone())), Some(Operand::temp(format!("r{i}"))), Some(Operand::temp(dest.clone()))]);
            chain = arena.append(chain, add);
            acc = dest;
        }
        let result = allocate(&mut arena, chain.head.unwrap(), 2);
        assert!(result.is_err());
    }
}
