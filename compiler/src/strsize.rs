//! String-size analysis (spec §4.4): the declared/literal length an
//! expression contributes, used by the attribution checks in `builder.rs`.

use cmm_core::ScopeManager;

use crate::ast::{Ast, AstKind, NodeId};

/// The length `node` contributes if used where a `String` value is
/// expected. An `Operand` leaf contributes its symbol's declared count (a
/// literal's count is its text length, set at `create_literal` time); a
/// `Binop` of any kind sums its two children's lengths (string
/// concatenation is spelled with `+` at the source level); every other
/// shape contributes 0.
pub fn string_length(ast: &Ast, scope: &ScopeManager, node: NodeId) -> usize {
    match &ast.get(node).kind {
        AstKind::Operand { symbol_name } => scope.get_symbol(symbol_name).map(|s| s.count).unwrap_or(0),
        AstKind::Binop { lhs, rhs, .. } => string_length(ast, scope, *lhs) + string_length(ast, scope, *rhs),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmm_core::{LexPayload, LexicalValue, Nature, TokenCategory, Type};

    use crate::ast::BinOp;

    fn lv(name: &str) -> LexicalValue {
        LexicalValue::new(1, TokenCategory::Identifier, LexPayload::Name(name.into()))
    }

    #[test]
    fn operand_leaf_uses_declared_count() {
        let mut ast = Ast::new();
        let mut scope = ScopeManager::new();
        scope
            .declare_symbol(
                cmm_core::Symbol::new("s", Nature::Identifier, Type::String, 1, lv("s")).with_count(8),
                false,
            )
            .unwrap();
        let id = ast.push(Some(lv("s")), AstKind::Operand { symbol_name: "s".into() }, Type::String);
        assert_eq!(string_length(&ast, &scope, id), 8);
    }

    #[test]
    fn binop_sums_both_children() {
        let mut ast = Ast::new();
        let mut scope = ScopeManager::new();
        scope
            .declare_symbol(
                cmm_core::Symbol::new("a", Nature::Identifier, Type::String, 1, lv("a")).with_count(3),
                false,
            )
            .unwrap();
        scope
            .declare_symbol(
                cmm_core::Symbol::new("b", Nature::Identifier, Type::String, 1, lv("b")).with_count(5),
                false,
            )
            .unwrap();
        let a = ast.push(Some(lv("a")), AstKind::Operand { symbol_name: "a".into() }, Type::String);
        let b = ast.push(Some(lv("b")), AstKind::Operand { symbol_name: "b".into() }, Type::String);
        let sum = ast.push(None, AstKind::Binop { op: BinOp::Add, lhs: a, rhs: b }, Type::String);
        assert_eq!(string_length(&ast, &scope, sum), 8);
    }

    #[test]
    fn unrelated_shapes_contribute_zero() {
        let ast_mut = {
            let mut ast = Ast::new();
            let scope = ScopeManager::new();
            let lit = ast.push(None, AstKind::BreakContinue { is_break: true }, Type::NA);
            assert_eq!(string_length(&ast, &scope, lit), 0);
            ast
        };
        let _ = ast_mut;
    }
}
