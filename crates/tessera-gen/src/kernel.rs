//! Kernel descriptors.
//!
//! A [`KernelInfo`] carries everything a downstream code generator needs
//! for one kernel: the chosen tile, ordered input/output names, cost
//! estimates, alternate tilings, and a structured debug record of the
//! contraction it was generated from. A [`KernelList`] is the ordered
//! result of compiling one program.

use std::collections::BTreeSet;
use std::fmt;

use tessera_ir::ShapeMap;
use tessera_opt::HardwareSettings;

use crate::rewrite::VarRewrites;

/// What a kernel computes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelKind {
    /// An aggregation loop nest (possibly with fused post-ops).
    Contraction,
    /// Elementwise post-ops only, no aggregation.
    Elementwise,
    /// Prefill: write zeros over the output region.
    Zero,
    /// Prefill: broadcast-copy a default tensor over the output region.
    Copy,
    /// A special function with a dedicated generator.
    Special,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contraction => "contraction",
            Self::Elementwise => "elementwise",
            Self::Zero => "zero",
            Self::Copy => "copy",
            Self::Special => "special",
        })
    }
}

/// Per-index view of a flat contraction for the debug record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub range: u64,
    /// One stride per tensor access, output first.
    pub strides: Vec<i64>,
}

/// One constraint row for the debug record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConstraintInfo {
    pub lhs: Vec<i64>,
    pub rhs: i64,
}

/// Structured debug record of the contraction a kernel was built from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContractionInfo {
    /// Source forms of the contraction and its fused post-ops.
    pub ops: Vec<String>,
    /// Per-index ranges and strides.
    pub accesses: Vec<IndexInfo>,
    /// Per-access constant offsets, output first.
    pub offsets: Vec<i64>,
    /// Per-access vector widths, output first.
    pub vectors: Vec<u64>,
    /// Constraint rows over the flat indices.
    pub constraints: Vec<ConstraintInfo>,
    pub flops: u64,
    pub bytes: u64,
}

impl fmt::Display for ContractionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        for a in &self.accesses {
            write!(f, "  {}:{}", a.name, a.range)?;
            for s in &a.strides {
                write!(f, " {s}")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "  flops={} bytes={}", self.flops, self.bytes)
    }
}

/// Everything codegen needs to emit one kernel.
#[derive(Clone, Debug)]
pub struct KernelInfo {
    /// Canonical kernel name, unique within the program.
    pub name: String,
    pub kind: KernelKind,
    pub settings: HardwareSettings,
    /// Chosen per-index tile sizes.
    pub tile_size: Vec<u64>,
    /// Input variable names, contraction operands first, then post-op
    /// inputs, all resolved through the rewrite table.
    pub inputs: Vec<String>,
    /// Variables this kernel writes.
    pub outputs: Vec<String>,
    /// Stable structural identifier for caching.
    pub key: String,
    /// Estimated bytes moved for the whole kernel.
    pub tot_bytes: u64,
    /// Estimated arithmetic operations for the whole kernel.
    pub tot_flops: u64,
    /// Alternate tilings, best first after the primary.
    pub candidates: Vec<KernelInfo>,
    /// Inputs read only after the aggregation stage; safe against
    /// write-after-read hazards within this kernel.
    pub war_safe_reads: BTreeSet<String>,
    /// Structured debug record.
    pub info: ContractionInfo,
}

impl KernelInfo {
    /// A descriptor with empty name lists and zeroed estimates.
    pub fn new(name: impl Into<String>, kind: KernelKind, settings: &HardwareSettings) -> Self {
        Self {
            name: name.into(),
            kind,
            settings: settings.clone(),
            tile_size: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            key: String::new(),
            tot_bytes: 0,
            tot_flops: 0,
            candidates: Vec::new(),
            war_safe_reads: BTreeSet::new(),
            info: ContractionInfo::default(),
        }
    }
}

impl fmt::Display for KernelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] in={:?} out={:?} flops={} bytes={}",
            self.name, self.kind, self.inputs, self.outputs, self.tot_flops, self.tot_bytes
        )
    }
}

/// The ordered result of compiling one program.
#[derive(Clone, Debug, Default)]
pub struct KernelList {
    /// Kernels in execution order (ascending seed-op order).
    pub kernels: Vec<KernelInfo>,
    /// Aliases created by elided reshape/ident ops.
    pub var_rewrites: VarRewrites,
    /// Shapes of every variable appearing as a kernel input or output.
    pub types: ShapeMap,
}
