//! The canonical lowered form of a contraction.
//!
//! A `FlatContraction` replaces symbolic index polynomials with explicit
//! per-index stride vectors: a flat loop nest over `names`/`ranges`,
//! one access descriptor per tensor operand (index 0 is the output),
//! optional linear constraints, and the elementwise post-ops fused into
//! the kernel. Created by the flattener, mutated by the simplifier,
//! unifier, and vectorizer, then read by the tile optimizer and the
//! kernel assembler.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use crate::ops::{AggOp, ComboOp, Op};
use crate::shape::ScalarType;

/// How one tensor is addressed by the flat loop nest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlatTensorAccess {
    /// Element type of the tensor.
    pub ty: ScalarType,
    /// Vector lane width (1 = scalar access).
    pub vector: u64,
    /// Constant element offset added to every address.
    pub offset: i64,
    /// Total addressable elements (in `vector`-wide units once folded).
    pub global_index_limit: u64,
    /// Per-index element strides, parallel to `FlatContraction::names`.
    pub strides: Vec<i64>,
}

impl FlatTensorAccess {
    pub fn new(ty: ScalarType, global_index_limit: u64) -> Self {
        Self {
            ty,
            vector: 1,
            offset: 0,
            global_index_limit,
            strides: Vec::new(),
        }
    }
}

/// A linear constraint `sum(lhs[i] * idx[i]) <= rhs` over the flat indices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlatConstraint {
    /// Coefficients, parallel to `FlatContraction::names`.
    pub lhs: Vec<i64>,
    pub rhs: i64,
}

/// A flattened contraction plus its fused elementwise tail.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatContraction {
    /// Aggregation operator (meaningful when `generate_contraction`).
    pub agg: AggOp,
    /// Combination operator (meaningful when `generate_contraction`).
    pub combo: ComboOp,
    /// Index names; order is a simplification artifact.
    pub names: Vec<String>,
    /// Iteration count per index, parallel to `names`.
    pub ranges: Vec<u64>,
    /// Tensor accesses; index 0 describes the output.
    pub access: Vec<FlatTensorAccess>,
    /// Linear constraints restricting the index space.
    pub constraints: Vec<FlatConstraint>,
    /// The variable the aggregation writes.
    pub output: String,
    /// False for kernels consisting only of elementwise post-ops.
    pub generate_contraction: bool,
    /// Aggregation vectorization width (1 until the vectorizer folds).
    pub agg_vec: u64,
    /// Fused elementwise ops, in valid topological order.
    pub post_ops: Vec<Op>,
    /// Extra tensors read by post-ops, addressed via the output indices.
    pub post_op_inputs: BTreeMap<String, FlatTensorAccess>,
    /// Variables this kernel must actually write.
    pub kernel_outputs: Vec<String>,
}

impl Default for FlatContraction {
    fn default() -> Self {
        Self {
            agg: AggOp::Assign,
            combo: ComboOp::Mul,
            names: Vec::new(),
            ranges: Vec::new(),
            access: Vec::new(),
            constraints: Vec::new(),
            output: String::new(),
            generate_contraction: true,
            agg_vec: 1,
            post_ops: Vec::new(),
            post_op_inputs: BTreeMap::new(),
            kernel_outputs: Vec::new(),
        }
    }
}

impl FlatContraction {
    /// A stable identifier of the loop-nest structure, used as a cache
    /// key. Covers everything codegen depends on except variable names.
    pub fn key_string(&self) -> String {
        let mut key = String::new();
        if self.generate_contraction {
            let _ = write!(key, "{}{}", self.agg.symbol(), self.combo.symbol());
        } else {
            key.push_str("el");
        }
        let _ = write!(key, ":v{}", self.agg_vec);
        for (name, range) in self.names.iter().zip(&self.ranges) {
            let _ = write!(key, "|{name}:{range}");
        }
        for a in self.access.iter().chain(self.post_op_inputs.values()) {
            let _ = write!(
                key,
                "|{}:v{}:o{}:g{}:",
                a.ty, a.vector, a.offset, a.global_index_limit
            );
            for (i, s) in a.strides.iter().enumerate() {
                if i > 0 {
                    key.push(',');
                }
                let _ = write!(key, "{s}");
            }
        }
        for c in &self.constraints {
            key.push_str("|c:");
            for (i, l) in c.lhs.iter().enumerate() {
                if i > 0 {
                    key.push(',');
                }
                let _ = write!(key, "{l}");
            }
            let _ = write!(key, "<={}", c.rhs);
        }
        for op in &self.post_ops {
            if let Some(f) = op.function() {
                let _ = write!(key, "|p:{}", f.name);
            }
        }
        key
    }
}

impl fmt::Display for FlatContraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "flat {} (contraction: {}, agg_vec: {})",
            self.output, self.generate_contraction, self.agg_vec
        )?;
        for (i, name) in self.names.iter().enumerate() {
            write!(f, "  {name}:{}", self.ranges[i])?;
            for a in &self.access {
                write!(f, "  {}", a.strides[i])?;
            }
            writeln!(f)?;
        }
        for a in &self.access {
            writeln!(
                f,
                "  access off={} vec={} lim={}",
                a.offset, a.vector, a.global_index_limit
            )?;
        }
        for c in &self.constraints {
            write!(f, "  constraint ")?;
            for (i, l) in c.lhs.iter().enumerate() {
                if i > 0 {
                    write!(f, " + ")?;
                }
                write!(f, "{l}*{}", self.names[i])?;
            }
            writeln!(f, " <= {}", c.rhs)?;
        }
        for op in &self.post_ops {
            writeln!(f, "  post {op}")?;
        }
        Ok(())
    }
}
