//! Scalar types and strided tensor shapes.

use std::fmt;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar element type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// A scalar element type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ScalarType {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl ScalarType {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I8: Self = Self {
        kind: ScalarKind::Sint,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ScalarKind::Bool => "b",
            ScalarKind::Sint => "i",
            ScalarKind::Uint => "u",
            ScalarKind::Float => "f",
        };
        write!(f, "{}{}", prefix, u32::from(self.width) * 8)
    }
}

/// One dimension of a strided tensor: element count and element stride.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dim {
    pub size: u64,
    pub stride: i64,
}

/// The element type and dimensions of a tensor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TensorShape {
    pub elem: ScalarType,
    pub dims: Vec<Dim>,
}

impl TensorShape {
    /// A densely packed row-major shape with the given dimension sizes.
    pub fn row_major(elem: ScalarType, sizes: &[u64]) -> Self {
        let mut dims = vec![
            Dim {
                size: 0,
                stride: 0
            };
            sizes.len()
        ];
        let mut stride = 1i64;
        for (dim, &size) in dims.iter_mut().zip(sizes).rev() {
            dim.size = size;
            dim.stride = stride;
            stride *= size as i64;
        }
        Self {
            elem,
            dims,
        }
    }

    /// Total number of elements.
    pub fn elem_size(&self) -> u64 {
        self.dims.iter().map(|d| d.size).product()
    }

    /// Total size in bytes.
    pub fn byte_size(&self) -> u64 {
        self.elem_size() * u64::from(self.elem.width)
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.elem)?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", d.size, d.stride)?;
        }
        f.write_str("]")
    }
}
