//! Fresh temporaries, labels and back-patch holes (spec §3, §9).
//!
//! The original's process-wide "name bag" of generated strings becomes, in
//! this arena-based rendering, a `NameBag` threaded explicitly through
//! lowering (per the Design Note in spec §9: "package global mutable state
//! into a Compiler context object"). A `Hole` is an interior-mutable string
//! (`Rc<RefCell<String>>`) exactly as spec §9 suggests, so that every
//! producer of a hole can hold the single shared handle `patch` rewrites.

use std::cell::RefCell;
use std::rc::Rc;

/// A back-patch placeholder: unpatched, its string starts with `H`; after
/// `patch`, it holds the real label name.
pub type Hole = Rc<RefCell<String>>;

/// Source of fresh IR temporaries (`rN`), labels (`LN`) and holes (`HN`).
#[derive(Debug, Default)]
pub struct NameBag {
    next_temp: u32,
    next_label: u32,
    next_hole: u32,
}

impl NameBag {
    pub fn new() -> Self {
        NameBag::default()
    }

    /// A fresh IR temporary name, e.g. `r3`.
    pub fn fresh_temp(&mut self) -> String {
        let n = self.next_temp;
        self.next_temp += 1;
        format!("r{n}")
    }

    /// A fresh label name, e.g. `L3`.
    pub fn fresh_label(&mut self) -> String {
        let n = self.next_label;
        self.next_label += 1;
        format!("L{n}")
    }

    /// A fresh, unpatched back-patch hole, e.g. `H3`.
    pub fn fresh_hole(&mut self) -> Hole {
        let n = self.next_hole;
        self.next_hole += 1;
        Rc::new(RefCell::new(format!("H{n}")))
    }
}

/// Rewrites `hole`'s string to `label`. Safe to call at most once per hole
/// (spec §8 invariant: after backpatching, no hole string begins with `H`).
pub fn patch(hole: &Hole, label: &str) {
    *hole.borrow_mut() = label.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temps_and_labels_are_distinct_and_increasing() {
        let mut bag = NameBag::new();
        assert_eq!(bag.fresh_temp(), "r0");
        assert_eq!(bag.fresh_temp(), "r1");
        assert_eq!(bag.fresh_label(), "L0");
        assert_eq!(bag.fresh_label(), "L1");
    }

    #[test]
    fn patch_rewrites_shared_handle() {
        let mut bag = NameBag::new();
        let hole = bag.fresh_hole();
        let alias = hole.clone();
        assert!(alias.borrow().starts_with('H'));
        patch(&hole, "L7");
        assert_eq!(*alias.borrow(), "L7");
        assert!(!alias.borrow().starts_with('H'));
    }
}
