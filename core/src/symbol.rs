//! Symbols: a declared identifier's checked type, nature and frame slot.

use crate::lexval::LexicalValue;
use crate::types::Type;

/// The axis orthogonal to `Type` that distinguishes variables, vectors,
/// functions, and the literal symbols inserted into the global table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nature {
    Identifier,
    Vector,
    Function,
    /// Used for literal symbols inserted into the global table.
    None,
}

/// A declared identifier, vector, function or literal (spec §3).
///
/// Invariant: `size == count * type.size()` at all times; held by
/// construction (`Symbol::new*` always computes `size` from `count`) rather
/// than re-checked elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub nature: Nature,
    pub ty: Type,
    pub decl_line: usize,
    pub count: usize,
    pub is_global: bool,
    /// Code label of a function's first IR instruction, set during lowering.
    pub label: Option<String>,
    /// Ordered parameter list, each entry itself a symbol (functions only).
    pub params: Option<Vec<Symbol>>,
    pub lexval: LexicalValue,
    /// Byte offset within the owning frame (or data segment for globals),
    /// set once at insertion.
    pub offset: usize,
}

impl Symbol {
    /// `count` defaults to 1 (a scalar). Offset is assigned by the symbol
    /// table on insertion via `with_offset`.
    pub fn new(
        name: impl Into<String>,
        nature: Nature,
        ty: Type,
        decl_line: usize,
        lexval: LexicalValue,
    ) -> Self {
        Symbol {
            name: name.into(),
            nature,
            ty,
            decl_line,
            count: 1,
            is_global: false,
            label: None,
            params: None,
            lexval,
            offset: 0,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_global(mut self, is_global: bool) -> Self {
        self.is_global = is_global;
        self
    }

    pub fn with_params(mut self, params: Vec<Symbol>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// `size = count * size(type)`. Functions occupy no frame slot; callers
    /// that need "size" for a function symbol should not call this (the
    /// scope manager skips the cursor bump for `Nature::Function` instead
    /// of special-casing size itself).
    pub fn size(&self) -> usize {
        self.count * self.ty.size()
    }

    /// Spec §4.2/§4.4: a `String` declared without an explicit vector size
    /// is unsized until its first assignment, which fixes its `count` to
    /// the assigned length. `count == 1` (the scalar default every
    /// `Symbol::new` starts with) doubles as that unsized sentinel — an
    /// explicit `string s[1];` and a never-yet-assigned `string s;` are
    /// indistinguishable, exactly as in the original. Returns `false`
    /// (leaving `count` untouched) when `count` already exceeds 1 and
    /// `new_count` would grow past it.
    pub fn update_size(&mut self, new_count: usize) -> bool {
        if self.count == 1 || new_count <= self.count {
            self.count = new_count;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenCategory;
    use crate::LexPayload;

    fn lv(name: &str) -> LexicalValue {
        LexicalValue::new(1, TokenCategory::Identifier, LexPayload::Name(name.into()))
    }

    #[test]
    fn size_is_count_times_type_size() {
        let s = Symbol::new("v", Nature::Vector, Type::Int, 1, lv("v")).with_count(4);
        assert_eq!(s.size(), 16);
    }

    #[test]
    fn scalar_defaults_to_count_one() {
        let s = Symbol::new("x", Nature::Identifier, Type::Char, 1, lv("x"));
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn unsized_string_takes_its_count_from_the_first_assignment() {
        let mut s = Symbol::new("s", Nature::Identifier, Type::String, 1, lv("s"));
        assert!(s.update_size(5));
        assert_eq!(s.count, 5);
    }

    #[test]
    fn a_sized_string_rejects_a_longer_second_assignment() {
        let mut s = Symbol::new("s", Nature::Identifier, Type::String, 1, lv("s"));
        assert!(s.update_size(5));
        assert!(!s.update_size(8));
        assert_eq!(s.count, 5);
    }

    #[test]
    fn a_sized_string_accepts_a_shorter_second_assignment() {
        let mut s = Symbol::new("s", Nature::Identifier, Type::String, 1, lv("s"));
        assert!(s.update_size(5));
        assert!(s.update_size(2));
        assert_eq!(s.count, 2);
    }
}
