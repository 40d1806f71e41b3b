//! Variable rewrites.
//!
//! When the unifier elides a `reshape` or `ident` op, the post-variable
//! becomes an alias of the pre-variable. This table records those
//! aliases for the whole compilation; insertion resolves the target
//! first, so chains stay flat, and lookup follows any remaining links
//! until a name is no longer a key.

use std::collections::BTreeMap;
use std::fmt;

/// A transitively closed `renamed -> canonical` name mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VarRewrites {
    forwarding: BTreeMap<String, String>,
}

impl VarRewrites {
    /// Record that `from` is an alias of `to`.
    pub fn insert(&mut self, from: impl Into<String>, to: &str) {
        let to = self.lookup(to).to_string();
        self.forwarding.insert(from.into(), to);
    }

    /// Resolve `name` to its canonical spelling.
    pub fn lookup<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        while let Some(next) = self.forwarding.get(current) {
            current = next;
        }
        current
    }

    /// Number of recorded aliases.
    pub fn len(&self) -> usize {
        self.forwarding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarding.is_empty()
    }
}

impl fmt::Display for VarRewrites {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (from, to) in &self.forwarding {
            writeln!(f, "{from} -> {to}")?;
        }
        Ok(())
    }
}
