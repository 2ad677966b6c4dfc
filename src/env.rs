// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipesh contributors

//! Environment scoping
//!
//! A stack of variable frames consulted when stages are spawned. Inner
//! frames shadow outer ones, and a frame may unset a variable that the
//! parent process (or an outer frame) defines.
//!
//! ```
//! use pipesh::Environment;
//!
//! let mut env = Environment::new();
//! env.set("LANG", "C");
//! {
//!     let mut scope = env.scope();
//!     scope.set("LANG", "en_US.UTF-8");
//!     scope.unset("PAGER");
//!     assert_eq!(scope.get("LANG"), Some("en_US.UTF-8"));
//! }
//! assert_eq!(env.get("LANG"), Some("C"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};

/// Overrides applied on top of the inherited process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Last element is the innermost frame. `None` unsets the variable.
    frames: Vec<HashMap<String, Option<String>>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Environment with one empty frame
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Pop the innermost frame. The root frame is never popped.
    pub fn pop_frame(&mut self) -> bool {
        if self.frames.len() > 1 {
            self.frames.pop();
            true
        } else {
            false
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Set a variable in the innermost frame
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), Some(value.into()));
        }
    }

    /// Unset a variable in the innermost frame
    pub fn unset(&mut self, name: impl Into<String>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), None);
        }
    }

    /// Override as seen by spawned stages, innermost frame first
    ///
    /// `None` means the frames don't mention the variable; `Some(None)`
    /// means it is unset.
    pub fn lookup(&self, name: &str) -> Option<Option<&str>> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .map(Option::as_deref)
    }

    /// Value set by the frames, if any
    pub fn get(&self, name: &str) -> Option<&str> {
        self.lookup(name).flatten()
    }

    /// Flatten the frames into the overrides applied at spawn time
    pub fn resolve(&self) -> BTreeMap<String, Option<String>> {
        let mut resolved = BTreeMap::new();
        for frame in &self.frames {
            for (name, value) in frame {
                resolved.insert(name.clone(), value.clone());
            }
        }
        resolved
    }

    /// Push a frame that is popped when the guard is dropped
    pub fn scope(&mut self) -> EnvScope<'_> {
        self.push_frame();
        EnvScope { env: self }
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        for (name, value) in iter {
            env.set(name, value);
        }
        env
    }
}

/// Guard returned by [`Environment::scope`]
#[derive(Debug)]
pub struct EnvScope<'a> {
    env: &'a mut Environment,
}

impl Deref for EnvScope<'_> {
    type Target = Environment;

    fn deref(&self) -> &Environment {
        self.env
    }
}

impl DerefMut for EnvScope<'_> {
    fn deref_mut(&mut self) -> &mut Environment {
        self.env
    }
}

impl Drop for EnvScope<'_> {
    fn drop(&mut self) {
        self.env.pop_frame();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_frame_shadows() {
        let mut env = Environment::new();
        env.set("A", "outer");
        env.push_frame();
        env.set("A", "inner");
        assert_eq!(env.get("A"), Some("inner"));
        assert!(env.pop_frame());
        assert_eq!(env.get("A"), Some("outer"));
    }

    #[test]
    fn test_root_frame_is_kept() {
        let mut env = Environment::new();
        assert!(!env.pop_frame());
        assert_eq!(env.depth(), 1);
    }

    #[test]
    fn test_unset_shadows_outer_value() {
        let mut env = Environment::new();
        env.set("A", "1");
        env.push_frame();
        env.unset("A");
        assert_eq!(env.lookup("A"), Some(None));
        assert_eq!(env.get("A"), None);
        assert_eq!(env.lookup("B"), None);
        assert_eq!(env.resolve().get("A"), Some(&None));
    }

    #[test]
    fn test_resolve_flattens_frames() {
        let mut env: Environment = [("A", "1"), ("B", "2")].into_iter().collect();
        env.push_frame();
        env.set("B", "3");
        let resolved = env.resolve();
        assert_eq!(resolved.get("A"), Some(&Some("1".to_string())));
        assert_eq!(resolved.get("B"), Some(&Some("3".to_string())));
    }

    #[test]
    fn test_scope_guard_pops() {
        let mut env = Environment::new();
        {
            let mut scope = env.scope();
            scope.set("X", "1");
            assert_eq!(scope.depth(), 2);
        }
        assert_eq!(env.depth(), 1);
        assert_eq!(env.get("X"), None);
    }
}
