//! Lexical environments
//!
//! A chain of scopes; closures hold an `EnvRef` to their defining scope.
//! Guards are always dropped before walking to the parent, so recursive
//! evaluation cannot deadlock on the chain.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::value::Value;

pub type EnvRef = Arc<Mutex<EnvData>>;

pub struct EnvData {
    vars: HashMap<String, Value>,
    parent: Option<EnvRef>,
}

/// Create a new scope with an optional parent.
pub fn new_env(parent: Option<EnvRef>) -> EnvRef {
    Arc::new(Mutex::new(EnvData {
        vars: HashMap::new(),
        parent,
    }))
}

/// Define (or shadow) a binding in this scope.
pub fn define(env: &EnvRef, name: &str, value: Value) {
    env.lock().vars.insert(name.to_string(), value);
}

/// Look a name up through the scope chain.
pub fn lookup(env: &EnvRef, name: &str) -> Option<Value> {
    let mut current = env.clone();
    loop {
        let next = {
            let guard = current.lock();
            if let Some(value) = guard.vars.get(name) {
                return Some(value.clone());
            }
            guard.parent.clone()
        };
        match next {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Assign to an existing binding; `false` when the name is undeclared.
pub fn assign(env: &EnvRef, name: &str, value: Value) -> bool {
    let mut current = env.clone();
    loop {
        let next = {
            let mut guard = current.lock();
            if let Some(slot) = guard.vars.get_mut(name) {
                *slot = value;
                return true;
            }
            guard.parent.clone()
        };
        match next {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_lookup_through_chain() {
        let root = new_env(None);
        define(&root, "a", Value::Number(1.0));
        let child = new_env(Some(root.clone()));
        define(&child, "b", Value::Number(2.0));

        assert!(matches!(lookup(&child, "a"), Some(Value::Number(n)) if n == 1.0));
        assert!(matches!(lookup(&child, "b"), Some(Value::Number(n)) if n == 2.0));
        assert!(lookup(&root, "b").is_none());
    }

    #[test]
    fn assign_updates_owning_scope() {
        let root = new_env(None);
        define(&root, "x", Value::Number(1.0));
        let child = new_env(Some(root.clone()));

        assert!(assign(&child, "x", Value::Number(5.0)));
        assert!(matches!(lookup(&root, "x"), Some(Value::Number(n)) if n == 5.0));
        assert!(!assign(&child, "missing", Value::Null));
    }

    #[test]
    fn shadowing_does_not_touch_parent() {
        let root = new_env(None);
        define(&root, "x", Value::Number(1.0));
        let child = new_env(Some(root.clone()));
        define(&child, "x", Value::Number(2.0));

        assert!(assign(&child, "x", Value::Number(3.0)));
        assert!(matches!(lookup(&root, "x"), Some(Value::Number(n)) if n == 1.0));
        assert!(matches!(lookup(&child, "x"), Some(Value::Number(n)) if n == 3.0));
    }
}
