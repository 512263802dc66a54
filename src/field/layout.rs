use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Records of a chunk in [`FieldLayout::AoSoA`] unless stated otherwise.
pub const DEFAULT_INNERMOST_ARRAY_SIZE: usize = 32;

/// How the components of fixed-shape records are packed across all records of a field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldLayout {
    /// Array of structures: the components of one record are adjacent.
    #[default]
    Aos,
    /// Structure of arrays: the same component of all records is adjacent.
    Soa,
    /// Array of structures of arrays: records are grouped into chunks,
    /// each chunk is stored as a structure of arrays.
    AoSoA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("{layout}[{innermost_array_size}]")]
pub struct LayoutInfo {
    layout: FieldLayout,
    innermost_array_size: usize,
}

impl Default for LayoutInfo {
    #[inline]
    fn default() -> Self {
        Self::new(FieldLayout::default())
    }
}

impl From<FieldLayout> for LayoutInfo {
    #[inline]
    fn from(layout: FieldLayout) -> Self {
        Self::new(layout)
    }
}

impl LayoutInfo {
    #[inline]
    pub const fn new(layout: FieldLayout) -> Self {
        Self::with_innermost_array_size(layout, DEFAULT_INNERMOST_ARRAY_SIZE)
    }

    /// The chunk size is only meaningful for [`FieldLayout::AoSoA`].
    #[inline]
    pub const fn with_innermost_array_size(layout: FieldLayout, innermost_array_size: usize) -> Self {
        Self {
            layout,
            innermost_array_size,
        }
    }

    #[inline]
    pub const fn layout(&self) -> FieldLayout {
        self.layout
    }

    #[inline]
    pub const fn innermost_array_size(&self) -> usize {
        self.innermost_array_size
    }

    /// Storage bytes needed to hold `count` records of `struct_stride` bytes each.
    ///
    /// Returns `None` if the size overflows or the chunk size of [`FieldLayout::AoSoA`] is zero.
    pub const fn required_bytes(&self, struct_stride: usize, count: usize) -> Option<usize> {
        match self.layout {
            FieldLayout::Aos | FieldLayout::Soa => struct_stride.checked_mul(count),
            FieldLayout::AoSoA => {
                let inner = self.innermost_array_size;
                if inner == 0 {
                    return None;
                }
                match struct_stride.checked_mul(inner) {
                    Some(chunk) => chunk.checked_mul(count.div_ceil(inner)),
                    None => None,
                }
            }
        }
    }
}

/// Rows and columns of one record of a field entry.
/// A scalar is `1x1`, a vector of `M` components is `Mx1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("{rows}x{cols}")]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Default for Shape {
    #[inline]
    fn default() -> Self {
        Self::SCALAR
    }
}

impl Shape {
    pub const SCALAR: Self = Self::matrix(1, 1);

    #[inline]
    pub const fn vector(rows: usize) -> Self {
        Self::matrix(rows, 1)
    }

    #[inline]
    pub const fn matrix(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Number of scalar components in one record.
    #[inline]
    pub const fn component_count(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub const fn checked_component_count(&self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    #[inline]
    pub const fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    #[inline]
    pub const fn is_vector(&self) -> bool {
        self.cols == 1
    }
}

/// The numbers that place one field entry inside its storage, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    /// Size of one scalar component.
    pub elem_byte_size: usize,
    /// Offset of the entry inside one record.
    pub offset_in_struct: usize,
    /// Distance between two consecutive records of the array of structures.
    pub struct_stride: usize,
    /// Number of records.
    pub count: usize,
    /// Records per chunk, only read by [`AoSoA`].
    pub innermost_array_size: usize,
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Aos {}
    impl Sealed for super::Soa {}
    impl Sealed for super::AoSoA {}
}

/// Type-level selector of a [`FieldLayout`].
///
/// Address computation is an associated function of the marker type, so every typed view
/// is monomorphized for exactly one layout and never branches on it at runtime.
pub trait Layout: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    const LAYOUT: FieldLayout;

    /// Byte offset of component `j` of record `i` from the start of the storage.
    /// The caller has checked both indices.
    fn byte_offset(addressing: &Addressing, i: usize, j: usize) -> usize;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Aos;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Soa;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AoSoA;

impl Layout for Aos {
    const LAYOUT: FieldLayout = FieldLayout::Aos;

    #[inline(always)]
    fn byte_offset(addressing: &Addressing, i: usize, j: usize) -> usize {
        let Addressing {
            elem_byte_size,
            offset_in_struct,
            struct_stride,
            ..
        } = *addressing;
        offset_in_struct + struct_stride * i + elem_byte_size * j
    }
}

impl Layout for Soa {
    const LAYOUT: FieldLayout = FieldLayout::Soa;

    #[inline(always)]
    fn byte_offset(addressing: &Addressing, i: usize, j: usize) -> usize {
        let Addressing {
            elem_byte_size,
            offset_in_struct,
            count,
            ..
        } = *addressing;
        // every byte of a record becomes an array of `count` bytes
        offset_in_struct * count + elem_byte_size * (j * count + i)
    }
}

impl Layout for AoSoA {
    const LAYOUT: FieldLayout = FieldLayout::AoSoA;

    #[inline(always)]
    fn byte_offset(addressing: &Addressing, i: usize, j: usize) -> usize {
        let Addressing {
            elem_byte_size,
            offset_in_struct,
            struct_stride,
            innermost_array_size: inner,
            ..
        } = *addressing;
        let (outer, lane) = (i / inner, i % inner);
        outer * struct_stride * inner + offset_in_struct * inner + elem_byte_size * (j * inner + lane)
    }
}
