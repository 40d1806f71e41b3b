//! The program model: operations, contractions, and constraints.

use std::fmt;

use crate::poly::Poly;

/// Aggregation operator of a contraction (how combined values reduce).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggOp {
    /// Plain assignment, no reduction.
    Assign,
    /// Summation.
    Sum,
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// Product.
    Prod,
}

impl AggOp {
    /// The operator's spelling in contraction syntax.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Sum => "+",
            Self::Max => ">",
            Self::Min => "<",
            Self::Prod => "*",
        }
    }
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Combination operator of a contraction (how operand values merge).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComboOp {
    /// Elementwise product.
    Mul,
    /// Elementwise sum.
    Add,
    /// Equality test.
    Eq,
    /// Conditional select.
    Cond,
}

impl ComboOp {
    /// The operator's spelling in contraction syntax.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Add => "+",
            Self::Eq => "==",
            Self::Cond => "?",
        }
    }
}

impl fmt::Display for ComboOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One tensor operand of a contraction: the variable it names and one
/// affine index polynomial per dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorSpec {
    pub id: String,
    pub spec: Vec<Poly>,
}

impl TensorSpec {
    pub fn new(id: impl Into<String>, spec: Vec<Poly>) -> Self {
        Self {
            id: id.into(),
            spec,
        }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.id)?;
        for (i, p) in self.spec.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str("]")
    }
}

/// A range constraint on a contraction's index space: `0 <= poly < range`.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolicConstraint {
    pub poly: Poly,
    pub range: u64,
}

impl fmt::Display for SymbolicConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} < {}", self.poly, self.range)
    }
}

/// A symbolic tensor contraction.
///
/// `specs[0]` is the output; the remaining 1..=3 entries are inputs.
/// `use_default` optionally names a tensor whose contents prefill output
/// positions the aggregation does not write.
#[derive(Clone, Debug, PartialEq)]
pub struct Contraction {
    pub agg: AggOp,
    pub combo: ComboOp,
    pub specs: Vec<TensorSpec>,
    pub constraints: Vec<SymbolicConstraint>,
    pub use_default: Option<String>,
}

impl fmt::Display for Contraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}(", self.specs[0], self.agg)?;
        for (i, spec) in self.specs.iter().skip(1).enumerate() {
            if i > 0 {
                write!(f, " {} ", self.combo)?;
            }
            write!(f, "{spec}")?;
        }
        f.write_str(")")?;
        for c in &self.constraints {
            write!(f, ", {c}")?;
        }
        if let Some(d) = &self.use_default {
            write!(f, " default {d}")?;
        }
        Ok(())
    }
}

/// Function names treated as special (never fused, custom kernels).
const SPECIAL_FNS: &[&str] = &[
    "prng_step",
    "prng_state",
    "prng_value",
    "gather",
    "scatter",
    "shape",
];

/// An elementwise or special function application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Function {
    /// Function name, e.g. `add`, `reshape`, `prng_step`.
    pub name: String,
    /// Extra non-variable parameters (extended by the driver for specials).
    pub params: Vec<String>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// True for functions that get dedicated kernels and never fuse.
    pub fn is_special(&self) -> bool {
        SPECIAL_FNS.contains(&self.name.as_str())
    }
}

/// A literal constant bound to a variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// The payload of an operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    Contraction(Contraction),
    Function(Function),
    Constant(ConstValue),
}

/// One operation in a program: a single output, ordered inputs, and a
/// variant-specific payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    pub output: String,
    pub inputs: Vec<String>,
    pub kind: OpKind,
}

impl Op {
    /// The function payload, if this is a function op.
    pub fn function(&self) -> Option<&Function> {
        match &self.kind {
            OpKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The contraction payload, if this is a contraction op.
    pub fn contraction(&self) -> Option<&Contraction> {
        match &self.kind {
            OpKind::Contraction(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OpKind::Constant(_))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OpKind::Contraction(c) => write!(f, "{c}"),
            OpKind::Function(func) => {
                write!(f, "{} = {}(", self.output, func.name)?;
                for (i, input) in self.inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(input)?;
                }
                for p in &func.params {
                    write!(f, ", {p}")?;
                }
                f.write_str(")")
            }
            OpKind::Constant(v) => write!(f, "{} = {v}", self.output),
        }
    }
}

/// An ordered sequence of operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}
