// SPDX-License-Identifier: AGPL-3.0

//! Canonical variables by name

use bimap::BiHashMap;
use std::rc::Rc;

use crate::expr::Expr;

/// Dense identifier of a registered variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// Append-only registry mapping names to a single variable instance.
///
/// Asking for the same name twice returns a handle to the very same node,
/// so `Expr::ptr_eq` holds between them.
#[derive(Debug, Default)]
pub struct VariableRegistry {
    ids: BiHashMap<Rc<str>, VarId>,
    vars: Vec<Expr>,
    fresh_counter: usize,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The variable called `name`, created on first request
    pub fn var(&mut self, name: &str) -> Expr {
        if let Some(id) = self.ids.get_by_left(name) {
            return self.vars[id.0 as usize].clone();
        }
        let name: Rc<str> = Rc::from(name);
        let id = VarId(self.vars.len() as u32);
        let expr = Expr::var(name.clone());
        self.ids.insert(name, id);
        self.vars.push(expr.clone());
        expr
    }

    /// A variable whose name starts with `prefix` and is not registered yet
    pub fn fresh(&mut self, prefix: &str) -> Expr {
        loop {
            let name = format!("{}_{}", prefix, self.fresh_counter);
            self.fresh_counter += 1;
            if !self.contains(&name) {
                return self.var(&name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.ids
            .get_by_left(name)
            .map(|id| &self.vars[id.0 as usize])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_left(name)
    }

    pub fn id(&self, name: &str) -> Option<VarId> {
        self.ids.get_by_left(name).copied()
    }

    pub fn name(&self, id: VarId) -> Option<&str> {
        self.ids.get_by_right(&id).map(|name| name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Registered variables in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.vars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_instance() {
        let mut registry = VariableRegistry::new();
        let a = registry.var("loop_12");
        let b = registry.var("loop_12");
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_different_names_never_alias() {
        let mut registry = VariableRegistry::new();
        let a = registry.var("calldata_4");
        let b = registry.var("calldata_36");
        assert!(!a.ptr_eq(&b));
        assert_ne!(a, b);
        assert_eq!(registry.id("calldata_4"), Some(VarId(0)));
        assert_eq!(registry.name(VarId(1)), Some("calldata_36"));
    }

    #[test]
    fn test_fresh_skips_taken_names() {
        let mut registry = VariableRegistry::new();
        registry.var("k_0");
        let fresh = registry.fresh("k");
        assert_eq!(fresh.var_name(), Some("k_1"));
        let next = registry.fresh("k");
        assert_eq!(next.var_name(), Some("k_2"));
    }

    #[test]
    fn test_get_does_not_create() {
        let mut registry = VariableRegistry::new();
        assert!(registry.get("x").is_none());
        let x = registry.var("x");
        assert!(registry.get("x").is_some_and(|e| e.ptr_eq(&x)));
        assert_eq!(registry.iter().count(), 1);
    }
}
