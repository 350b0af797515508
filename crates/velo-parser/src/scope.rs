//! Scope tracking for shadow analysis.
//!
//! The parser keeps a stack of declared-name sets while it walks the
//! source. A binding that re-uses a name visible in any outer scope must
//! carry the `shadow` keyword; `shadow` on a fresh name is an error. The
//! stack lives only for the duration of the parse.

use rustc_hash::FxHashSet;

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<FxHashSet<String>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashSet::default()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(FxHashSet::default());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the module scope");
        self.scopes.pop();
    }

    /// Record a declaration in the innermost scope.
    pub fn declare(&mut self, name: &str) {
        if let Some(top) = self.scopes.last_mut() {
            top.insert(name.to_string());
        }
    }

    /// Is the name already declared in the innermost scope?
    pub fn declared_here(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|s| s.contains(name))
    }

    /// Is the name declared in any scope outside the innermost one?
    pub fn declared_outer(&self, name: &str) -> bool {
        self.scopes[..self.scopes.len() - 1]
            .iter()
            .any(|s| s.contains(name))
    }

    /// Is the name visible anywhere on the stack?
    pub fn visible(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_detection() {
        let mut scopes = ScopeStack::new();
        scopes.declare("x");
        scopes.push();

        assert!(!scopes.declared_here("x"));
        assert!(scopes.declared_outer("x"));
        assert!(scopes.visible("x"));

        scopes.declare("x"); // the shadowing binding
        assert!(scopes.declared_here("x"));

        scopes.pop();
        assert!(scopes.declared_here("x"));
        assert!(!scopes.declared_outer("x"));
    }

    #[test]
    fn test_fresh_name_is_not_outer() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.declare("y");
        assert!(!scopes.declared_outer("y"));
    }
}
