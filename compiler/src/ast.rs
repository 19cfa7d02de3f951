//! The abstract syntax tree (spec §3, §9).
//!
//! Nodes live in an arena (`Ast`, `Vec<AstNode>` indexed by `NodeId`) rather
//! than behind `Rc<RefCell<..>>`: the "uniform `void*` tree" of the
//! original is rendered, per spec §9's Design Note, as a tagged sum type
//! (`AstKind`) whose variants carry only the fields each statement kind
//! needs (`if` has 2-3 children, `for` has 4, ...), while comma-separated
//! declaration lists and call-argument lists keep a list shape (`Vec`,
//! arguably a cleaner rendering of "sibling chains" than hand-rolled
//! sibling pointers). `next_command` remains a distinct field: it threads
//! statements sequentially within a block, independent of a node's own
//! children.

use cmm_core::{LexicalValue, Type};

use crate::ir::Chain;
use crate::namebag::Hole;

pub type NodeId = usize;

/// AST node discriminator (spec §3). `Declaration` is an implementation
/// addition for the bare pre-typed declaration nodes `create_declaration`
/// produces; it carries no symbol-table effects of its own (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Operand,
    VectorAccess,
    FunctionDeclaration,
    FunctionCall,
    InitVariable,
    AttribVariable,
    IO,
    Shift,
    BreakContinue,
    Return,
    If,
    For,
    While,
    Unop,
    Binop,
    Ternop,
    Declaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Ge | BinOp::Gt | BinOp::Ne
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// Variant-specific children, one arm per `StatementKind`.
#[derive(Debug, Clone)]
pub enum AstKind {
    /// An identifier reference or a literal; both resolve to a symbol
    /// (identifiers in a user scope, literals in the global table).
    Operand { symbol_name: String },
    VectorAccess { base: NodeId, index: NodeId },
    FunctionDeclaration { name: String, body: Option<NodeId> },
    FunctionCall { name: String, args: Vec<NodeId> },
    /// Declared-but-not-yet-typed name from a `create_declaration` call,
    /// batched until `declare_variables` assigns the type (spec §4.2).
    Declaration { name: String, vector_count: Option<usize> },
    InitVariable { lval: NodeId, rval: Option<NodeId> },
    AttribVariable { lval: NodeId, rval: NodeId },
    IO { is_input: bool, arg: NodeId },
    Shift { id: NodeId, left: bool, amount: i64 },
    BreakContinue { is_break: bool },
    Return { value: NodeId },
    If { cond: NodeId, then_branch: NodeId, else_branch: Option<NodeId> },
    For { init: NodeId, cond: NodeId, step: NodeId, body: NodeId },
    While { cond: NodeId, body: NodeId },
    Unop { op: UnOp, operand: NodeId },
    Binop { op: BinOp, lhs: NodeId, rhs: NodeId },
    Ternop { cond: NodeId, then_branch: NodeId, else_branch: NodeId },
}

impl AstKind {
    pub fn tag(&self) -> StatementKind {
        match self {
            AstKind::Operand { .. } => StatementKind::Operand,
            AstKind::VectorAccess { .. } => StatementKind::VectorAccess,
            AstKind::FunctionDeclaration { .. } => StatementKind::FunctionDeclaration,
            AstKind::FunctionCall { .. } => StatementKind::FunctionCall,
            AstKind::Declaration { .. } => StatementKind::Declaration,
            AstKind::InitVariable { .. } => StatementKind::InitVariable,
            AstKind::AttribVariable { .. } => StatementKind::AttribVariable,
            AstKind::IO { .. } => StatementKind::IO,
            AstKind::Shift { .. } => StatementKind::Shift,
            AstKind::BreakContinue { .. } => StatementKind::BreakContinue,
            AstKind::Return { .. } => StatementKind::Return,
            AstKind::If { .. } => StatementKind::If,
            AstKind::For { .. } => StatementKind::For,
            AstKind::While { .. } => StatementKind::While,
            AstKind::Unop { .. } => StatementKind::Unop,
            AstKind::Binop { .. } => StatementKind::Binop,
            AstKind::Ternop { .. } => StatementKind::Ternop,
        }
    }

    /// Ordered children, for generic tree walks (diagnostic rendering,
    /// frees). Argument/declaration lists already carry their own order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            AstKind::Operand { .. } | AstKind::Declaration { .. } | AstKind::BreakContinue { .. } => {
                vec![]
            }
            AstKind::VectorAccess { base, index } => vec![*base, *index],
            AstKind::FunctionDeclaration { body, .. } => body.into_iter().collect(),
            AstKind::FunctionCall { args, .. } => args.clone(),
            AstKind::InitVariable { lval, rval } => {
                let mut v = vec![*lval];
                v.extend(rval.iter().copied());
                v
            }
            AstKind::AttribVariable { lval, rval } => vec![*lval, *rval],
            AstKind::IO { arg, .. } => vec![*arg],
            AstKind::Shift { id, .. } => vec![*id],
            AstKind::Return { value } => vec![*value],
            AstKind::If { cond, then_branch, else_branch } => {
                let mut v = vec![*cond, *then_branch];
                v.extend(else_branch.iter().copied());
                v
            }
            AstKind::For { init, cond, step, body } => vec![*init, *cond, *step, *body],
            AstKind::While { cond, body } => vec![*cond, *body],
            AstKind::Unop { operand, .. } => vec![*operand],
            AstKind::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            AstKind::Ternop { cond, then_branch, else_branch } => vec![*cond, *then_branch, *else_branch],
        }
    }
}

/// One AST node: lexical value, checked type, variant-specific children,
/// l-value/r-value bookkeeping and the attached IR chain (spec §3).
#[derive(Debug, Clone)]
pub struct AstNode {
    pub lexval: Option<LexicalValue>,
    pub kind: AstKind,
    pub ty: Type,
    /// Threads statements sequentially within a block.
    pub next_command: Option<NodeId>,
    pub is_lval: bool,
    pub has_address: bool,
    pub has_value: bool,
    pub ir: Option<Chain>,
    pub ir_temp: Option<String>,
    pub true_list: Vec<Hole>,
    pub false_list: Vec<Hole>,
}

impl AstNode {
    fn new(lexval: Option<LexicalValue>, kind: AstKind, ty: Type) -> Self {
        AstNode {
            lexval,
            kind,
            ty,
            next_command: None,
            is_lval: false,
            has_address: false,
            has_value: false,
            ir: None,
            ir_temp: None,
            true_list: Vec::new(),
            false_list: Vec::new(),
        }
    }

    pub fn line(&self) -> usize {
        self.lexval.as_ref().map(|lv| lv.line).unwrap_or(0)
    }
}

/// The arena owning every AST node built during parsing.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
}

impl Ast {
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    pub fn push(&mut self, lexval: Option<LexicalValue>, kind: AstKind, ty: Type) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(AstNode::new(lexval, kind, ty));
        id
    }

    pub fn get(&self, id: NodeId) -> &AstNode {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id]
    }

    pub fn tag(&self, id: NodeId) -> StatementKind {
        self.nodes[id].kind.tag()
    }

    /// A plain-text reconstruction of a subtree, for diagnostic rendering
    /// (spec §7: "a textual reconstruction of the offending AST subtree").
    pub fn render(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        match &node.kind {
            AstKind::Operand { symbol_name } => symbol_name.clone(),
            AstKind::Declaration { name, .. } => name.clone(),
            AstKind::VectorAccess { base, index } => {
                format!("{}[{}]", self.render(*base), self.render(*index))
            }
            AstKind::FunctionCall { name, args } => {
                let rendered: Vec<_> = args.iter().map(|a| self.render(*a)).collect();
                format!("{name}({})", rendered.join(", "))
            }
            AstKind::FunctionDeclaration { name, .. } => format!("function {name}"),
            AstKind::InitVariable { lval, rval } => match rval {
                Some(r) => format!("{} = {}", self.render(*lval), self.render(*r)),
                None => self.render(*lval),
            },
            AstKind::AttribVariable { lval, rval } => {
                format!("{} <= {}", self.render(*lval), self.render(*rval))
            }
            AstKind::IO { is_input, arg } => {
                format!("{} {}", if *is_input { "input" } else { "output" }, self.render(*arg))
            }
            AstKind::Shift { id: target, left, amount } => {
                format!("{} {} {}", self.render(*target), if *left { "<<" } else { ">>" }, amount)
            }
            AstKind::BreakContinue { is_break } => {
                if *is_break { "break".to_string() } else { "continue".to_string() }
            }
            AstKind::Return { value } => format!("return {}", self.render(*value)),
            AstKind::If { cond, .. } => format!("if ({})", self.render(*cond)),
            AstKind::For { .. } => "for (...)".to_string(),
            AstKind::While { cond, .. } => format!("while ({})", self.render(*cond)),
            AstKind::Unop { op, operand } => {
                let sym = match op {
                    UnOp::Neg => "-",
                    UnOp::Not => "!",
                };
                format!("{sym}{}", self.render(*operand))
            }
            AstKind::Binop { op, lhs, rhs } => {
                format!("{} {} {}", self.render(*lhs), binop_symbol(*op), self.render(*rhs))
            }
            AstKind::Ternop { cond, then_branch, else_branch } => {
                format!(
                    "{} ? {} : {}",
                    self.render(*cond),
                    self.render(*then_branch),
                    self.render(*else_branch)
                )
            }
        }
    }

    /// An indented multi-line tree dump (spec §1 excludes GraphViz output;
    /// this is the plain textual substitute the CLI's `--ast` flag prints).
    pub fn dump(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(id, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let indent = "  ".repeat(depth);
        let _ = std::fmt::Write::write_fmt(out, format_args!("{indent}{:?}: {}\n", node.kind.tag(), self.render(id)));
        for child in node.kind.children() {
            self.dump_into(child, depth + 1, out);
        }
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Eq => "==",
        BinOp::Ge => ">=",
        BinOp::Gt => ">",
        BinOp::Ne => "!=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

/// Pending back-patch holes attached to a condition node, returned to the
/// caller so it can patch both lists and clear them (spec §4.3: "clear
/// those lists to prevent reuse").
pub fn take_lists(node: &mut AstNode) -> (Vec<Hole>, Vec<Hole>) {
    (std::mem::take(&mut node.true_list), std::mem::take(&mut node.false_list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::{LexPayload, TokenCategory};

    fn id_node(ast: &mut Ast, name: &str) -> NodeId {
        let lv = LexicalValue::new(1, TokenCategory::Identifier, LexPayload::Name(name.into()));
        ast.push(Some(lv), AstKind::Operand { symbol_name: name.into() }, Type::Int)
    }

    #[test]
    fn tag_matches_variant() {
        let mut ast = Ast::new();
        let x = id_node(&mut ast, "x");
        assert_eq!(ast.tag(x), StatementKind::Operand);
    }

    #[test]
    fn render_reconstructs_vector_access() {
        let mut ast = Ast::new();
        let v = id_node(&mut ast, "v");
        let i = id_node(&mut ast, "i");
        let access = ast.push(None, AstKind::VectorAccess { base: v, index: i }, Type::Int);
        assert_eq!(ast.render(access), "v[i]");
    }

    #[test]
    fn dump_indents_one_level_per_child() {
        let mut ast = Ast::new();
        let a = id_node(&mut ast, "a");
        let b = id_node(&mut ast, "b");
        let binop = ast.push(None, AstKind::Binop { op: BinOp::Add, lhs: a, rhs: b }, Type::Int);
        let dump = ast.dump(binop);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Binop"));
        assert!(lines[1].starts_with("  Operand"));
    }

    #[test]
    fn children_lists_are_ordered() {
        let mut ast = Ast::new();
        let a = id_node(&mut ast, "a");
        let b = id_node(&mut ast, "b");
        let binop = ast.push(None, AstKind::Binop { op: BinOp::Add, lhs: a, rhs: b }, Type::Int);
        assert_eq!(ast.get(binop).kind.children(), vec![a, b]);
    }
}
