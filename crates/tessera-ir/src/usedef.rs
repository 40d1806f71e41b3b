//! Use-def maps over program operations.
//!
//! Two mappings built once per program: which op defines each variable,
//! and which ops consume it. Ops are referenced by index into
//! `Program::ops`, never by owning reference, so the maps stay valid as
//! long as the program does. Constants and program inputs have no entry
//! in the def map.

use std::collections::{BTreeMap, BTreeSet};

use crate::ops::Program;

/// Immutable def/use maps for one program.
#[derive(Clone, Debug)]
pub struct UseDef {
    op_defs: BTreeMap<String, usize>,
    uses: BTreeMap<String, BTreeSet<usize>>,
}

impl UseDef {
    /// Build the maps by a single walk over the program.
    pub fn new(prog: &Program) -> Self {
        let mut op_defs = BTreeMap::new();
        let mut uses: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for (i, op) in prog.ops.iter().enumerate() {
            if !op.is_constant() {
                op_defs.insert(op.output.clone(), i);
            }
            for input in &op.inputs {
                uses.entry(input.clone()).or_default().insert(i);
            }
        }
        Self { op_defs, uses }
    }

    /// The op index defining `var`, if any op does.
    pub fn def_of(&self, var: &str) -> Option<usize> {
        self.op_defs.get(var).copied()
    }

    /// The op indices consuming `var`.
    pub fn uses_of(&self, var: &str) -> Option<&BTreeSet<usize>> {
        self.uses.get(var)
    }
}
