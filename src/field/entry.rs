use std::{marker::PhantomData, ptr::NonNull, sync::Arc};

use bytemuck::Pod;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::layout::{Addressing, FieldLayout, Layout, LayoutInfo, Shape};
use crate::num::DataType;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field entry `{0}`: shape {1} has no components")]
    EmptyShape(Arc<str>, Shape),
    #[error("field entry `{0}`: innermost array size of {1} must be positive")]
    InnermostArraySize(Arc<str>, FieldLayout),
    #[error(
        "field entry `{name}`: record of {record} bytes at offset {offset} exceeds struct stride {stride}"
    )]
    Stride {
        name: Arc<str>,
        record: usize,
        offset: usize,
        stride: usize,
    },
    #[error("field entry `{name}`: storage of {len} bytes is smaller than the required {required}")]
    Storage {
        name: Arc<str>,
        len: usize,
        required: usize,
    },
    #[error("field entry `{0}`: data type {1} mismatches {2}")]
    Type(Arc<str>, DataType, DataType),
    #[error("field entry `{0}`: shape {1} mismatches {2}")]
    Shape(Arc<str>, Shape, Shape),
    #[error("field entry `{0}`: layout {1} mismatches {2}")]
    Layout(Arc<str>, FieldLayout, FieldLayout),
    #[error("field entry `{name}`: (offset, size) is out of range, offset={offset}, size={size}, count={count}")]
    Window {
        name: Arc<str>,
        offset: usize,
        size: usize,
        count: usize,
    },
}

/// Handle into externally owned field storage.
///
/// The handle never owns the bytes. It borrows them for `'a`, so the owner cannot resize or free
/// the storage while any core, view or viewer built on it is alive.
#[derive(Debug, Clone, Copy)]
pub struct FieldStorage<'a> {
    ptr: NonNull<u8>,
    len: usize,
    phantom: PhantomData<&'a mut [u8]>,
}

// SAFETY: the handle is a borrowed byte range. Reads and writes go through raw pointers and
// writers promise exclusive access to each element they touch (see the `unsafe` write methods
// of the viewers), so sharing the handle between threads cannot race on its own.
unsafe impl Send for FieldStorage<'_> {}
unsafe impl Sync for FieldStorage<'_> {}

impl<'a> FieldStorage<'a> {
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        let len = bytes.len();
        let ptr = NonNull::from(bytes).cast();
        Self {
            ptr,
            len,
            phantom: PhantomData,
        }
    }

    /// Borrows a slice of plain data as field storage.
    #[inline]
    pub fn from_slice<T: Pod>(data: &'a mut [T]) -> Self {
        Self::new(bytemuck::cast_slice_mut(data))
    }

    /// Wraps a raw byte range.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`, and nothing else may
    /// access those bytes while the handle or anything built on it is alive.
    #[inline]
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

/// Everything needed to address one entry of a field, as handed out by the field registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntryDesc {
    pub name: Arc<str>,
    pub layout_info: LayoutInfo,
    pub data_type: DataType,
    pub shape: Shape,
    /// Byte offset of the entry inside one record of the array of structures.
    pub offset_in_struct: usize,
    /// Byte size of one whole record of the array of structures.
    pub struct_stride: usize,
    /// Number of records.
    pub count: usize,
}

impl EntryDesc {
    /// Describes a field that holds this entry only.
    pub fn packed(
        name: impl Into<Arc<str>>,
        layout_info: impl Into<LayoutInfo>,
        data_type: DataType,
        shape: Shape,
        count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            layout_info: layout_info.into(),
            data_type,
            shape,
            offset_in_struct: 0,
            struct_stride: record_byte_size(data_type, shape).unwrap_or(usize::MAX),
            count,
        }
    }

    /// Byte size of one record of this entry alone, `None` on overflow.
    #[inline]
    pub fn record_byte_size(&self) -> Option<usize> {
        record_byte_size(self.data_type, self.shape)
    }

    /// Storage bytes needed by the whole field this entry belongs to, `None` on overflow.
    #[inline]
    pub fn required_bytes(&self) -> Option<usize> {
        self.layout_info
            .required_bytes(self.struct_stride, self.count)
    }
}

#[inline]
fn record_byte_size(data_type: DataType, shape: Shape) -> Option<usize> {
    shape
        .checked_component_count()
        .and_then(|components| components.checked_mul(data_type.size()))
}

/// Untyped descriptor of one field entry bound to its storage.
///
/// This is the single place where element addresses are computed. It is cheap to clone and is
/// copied into every view and viewer.
#[derive(Debug, Clone)]
pub struct EntryCore<'a> {
    storage: FieldStorage<'a>,
    desc: EntryDesc,
    addressing: Addressing,
}

impl<'a> EntryCore<'a> {
    /// Binds a descriptor to storage, checking that every element it addresses fits.
    pub fn new(storage: FieldStorage<'a>, desc: EntryDesc) -> Result<Self, FieldError> {
        let name = desc.name.clone();
        if desc.shape.rows == 0 || desc.shape.cols == 0 {
            return Err(FieldError::EmptyShape(name, desc.shape));
        }
        if desc.layout_info.innermost_array_size() == 0 {
            return Err(FieldError::InnermostArraySize(name, desc.layout_info.layout()));
        }

        // sizes that overflow saturate, so that they fail the checks below
        let record = desc.record_byte_size().unwrap_or(usize::MAX);
        let end = desc.offset_in_struct.checked_add(record);
        if end.is_none_or(|end| end > desc.struct_stride) {
            return Err(FieldError::Stride {
                name,
                record,
                offset: desc.offset_in_struct,
                stride: desc.struct_stride,
            });
        }

        let required = desc.required_bytes().unwrap_or(usize::MAX);
        if storage.len() < required {
            return Err(FieldError::Storage {
                name,
                len: storage.len(),
                required,
            });
        }

        let addressing = Addressing {
            elem_byte_size: desc.data_type.size(),
            offset_in_struct: desc.offset_in_struct,
            struct_stride: desc.struct_stride,
            count: desc.count,
            innermost_array_size: desc.layout_info.innermost_array_size(),
        };
        Ok(Self {
            storage,
            desc,
            addressing,
        })
    }

    #[inline]
    pub fn desc(&self) -> &EntryDesc {
        &self.desc
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn layout_info(&self) -> LayoutInfo {
        self.desc.layout_info
    }

    #[inline]
    pub fn layout(&self) -> FieldLayout {
        self.desc.layout_info.layout()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.desc.data_type
    }

    #[inline]
    pub fn elem_byte_size(&self) -> usize {
        self.addressing.elem_byte_size
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.desc.shape
    }

    #[inline]
    pub fn struct_stride(&self) -> usize {
        self.desc.struct_stride
    }

    #[inline]
    pub fn offset_in_struct(&self) -> usize {
        self.desc.offset_in_struct
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.desc.count
    }

    #[inline]
    pub fn storage(&self) -> FieldStorage<'a> {
        self.storage
    }

    /// Address of component `j` of record `i`.
    ///
    /// # Panics
    /// Panics if `i` or `j` is out of range, or if `L` is not the layout the entry is stored in.
    /// The panic is the only defined outcome of a bad index: it is never clamped or wrapped.
    #[inline]
    pub fn address<L: Layout>(&self, i: usize, j: usize) -> *mut u8 {
        let count = self.desc.count;
        let components = self.desc.shape.component_count();
        assert!(
            i < count,
            "field entry `{}`: record index {i} is out of range [0, {count})",
            self.desc.name
        );
        assert!(
            j < components,
            "field entry `{}`: component index {j} is out of range [0, {components}) for shape {}",
            self.desc.name,
            self.desc.shape
        );
        assert_eq!(
            L::LAYOUT,
            self.layout(),
            "field entry `{}`: addressed as {} but stored as {}",
            self.desc.name,
            L::LAYOUT,
            self.layout()
        );

        let offset = L::byte_offset(&self.addressing, i, j);
        assert!(
            offset
                .checked_add(self.addressing.elem_byte_size)
                .is_some_and(|end| end <= self.storage.len()),
            "field entry `{}`: element ({i}, {j}) at byte {offset} is outside the storage of {} bytes",
            self.desc.name,
            self.storage.len()
        );
        // SAFETY: construction checked that the storage holds every addressable element
        unsafe { self.storage.as_ptr().add(offset) }
    }

    /// Address of entry `(row, col)` of matrix record `i`. Matrices are stored column-major.
    ///
    /// # Panics
    /// Panics if `i`, `row` or `col` is out of range, or if `L` is not the stored layout.
    #[inline]
    pub fn matrix_address<L: Layout>(&self, i: usize, row: usize, col: usize) -> *mut u8 {
        let Shape { rows, cols } = self.desc.shape;
        assert!(
            row < rows && col < cols,
            "field entry `{}`: matrix index ({row}, {col}) is out of range for shape {}",
            self.desc.name,
            self.desc.shape
        );
        self.address::<L>(i, col * rows + row)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{EntryCore, EntryDesc, FieldError, FieldStorage};
    use crate::{
        field::layout::{AoSoA, Aos, FieldLayout, LayoutInfo, Shape, Soa},
        num::DataType,
    };

    #[test]
    fn test_packed() -> Result<(), Box<dyn Error>> {
        let mut data = vec![0.0f32; 30];
        let storage = FieldStorage::from_slice(&mut data);
        assert_eq!(storage.len(), 120);

        let desc = EntryDesc::packed("x", FieldLayout::Aos, DataType::F32, Shape::vector(3), 10);
        assert_eq!(desc.struct_stride, 12);
        assert_eq!(desc.record_byte_size(), Some(12));
        assert_eq!(desc.required_bytes(), Some(120));

        let core = EntryCore::new(storage, desc)?;
        assert_eq!(core.name(), "x");
        assert_eq!(core.elem_byte_size(), 4);
        assert_eq!(core.count(), 10);

        let base = core.storage().as_ptr();
        // SAFETY: both pointers come from the same storage
        let offset = |ptr: *mut u8| unsafe { ptr.offset_from(base) };
        assert_eq!(offset(core.address::<Aos>(1, 2)), 20);
        Ok(())
    }

    #[test]
    fn test_matrix_column_major() -> Result<(), Box<dyn Error>> {
        let mut data = vec![0u32; 24];
        let storage = FieldStorage::from_slice(&mut data);
        let desc = EntryDesc::packed("m", FieldLayout::Soa, DataType::U32, Shape::matrix(2, 3), 4);
        let core = EntryCore::new(storage, desc)?;

        let base = core.storage().as_ptr();
        // SAFETY: both pointers come from the same storage
        let offset = |ptr: *mut u8| unsafe { ptr.offset_from(base) };
        // (row 1, col 2) is component 5, which lives 5 * count elements in
        assert_eq!(offset(core.matrix_address::<Soa>(0, 1, 2)), 5 * 4 * 4);
        assert_eq!(offset(core.matrix_address::<Soa>(3, 1, 0)), (4 + 3) * 4);
        Ok(())
    }

    #[test]
    fn test_invalid_desc() {
        let mut data = vec![0u8; 64];

        let desc = EntryDesc::packed("e", FieldLayout::Aos, DataType::U8, Shape::matrix(0, 3), 4);
        let err = EntryCore::new(FieldStorage::new(&mut data), desc).unwrap_err();
        assert!(matches!(err, FieldError::EmptyShape(..)), "{err}");

        let desc = EntryDesc {
            offset_in_struct: 8,
            ..EntryDesc::packed("s", FieldLayout::Aos, DataType::F32, Shape::vector(2), 4)
        };
        let err = EntryCore::new(FieldStorage::new(&mut data), desc).unwrap_err();
        assert!(matches!(err, FieldError::Stride { .. }), "{err}");

        let desc = EntryDesc::packed("big", FieldLayout::Soa, DataType::F64, Shape::SCALAR, 9);
        let err = EntryCore::new(FieldStorage::new(&mut data), desc).unwrap_err();
        assert!(
            matches!(err, FieldError::Storage { len: 64, required: 72, .. }),
            "{err}"
        );

        let layout = LayoutInfo::with_innermost_array_size(FieldLayout::AoSoA, 0);
        let desc = EntryDesc::packed("lanes", layout, DataType::U8, Shape::SCALAR, 4);
        let err = EntryCore::new(FieldStorage::new(&mut data), desc).unwrap_err();
        assert!(matches!(err, FieldError::InnermostArraySize(..)), "{err}");
    }

    #[test]
    fn test_overflowing_desc() -> Result<(), Box<dyn Error>> {
        let mut empty: [u8; 0] = [];

        // 2 records of 2^63 bytes wrap to 0 without checked arithmetic
        let desc = EntryDesc {
            struct_stride: 1 << 63,
            ..EntryDesc::packed("wide", FieldLayout::Aos, DataType::U8, Shape::SCALAR, 2)
        };
        assert_eq!(desc.required_bytes(), None);
        let err = EntryCore::new(FieldStorage::new(&mut empty), desc).unwrap_err();
        assert!(
            matches!(err, FieldError::Storage { len: 0, required: usize::MAX, .. }),
            "{err}"
        );

        let desc = EntryDesc {
            struct_stride: 1 << 62,
            ..EntryDesc::packed("wide", FieldLayout::Soa, DataType::F32, Shape::vector(2), 4)
        };
        let err = EntryCore::new(FieldStorage::new(&mut empty), desc).unwrap_err();
        assert!(matches!(err, FieldError::Storage { .. }), "{err}");

        let desc = EntryDesc {
            offset_in_struct: usize::MAX,
            ..EntryDesc::packed("far", FieldLayout::Aos, DataType::F32, Shape::SCALAR, 1)
        };
        let err = EntryCore::new(FieldStorage::new(&mut empty), desc).unwrap_err();
        assert!(matches!(err, FieldError::Stride { .. }), "{err}");

        let huge = Shape::matrix(usize::MAX, 2);
        let desc = EntryDesc::packed("huge", FieldLayout::Aos, DataType::U8, huge, 1);
        assert_eq!(desc.record_byte_size(), None);
        let err = EntryCore::new(FieldStorage::new(&mut empty), desc).unwrap_err();
        assert!(matches!(err, FieldError::Stride { .. }), "{err}");

        // an empty field still binds to empty storage
        let desc = EntryDesc::packed("none", FieldLayout::Aos, DataType::U8, Shape::SCALAR, 0);
        EntryCore::new(FieldStorage::new(&mut empty), desc)?;
        Ok(())
    }

    #[test]
    #[should_panic(expected = "addressed as AoSoA but stored as Aos")]
    fn test_layout_mismatch() {
        let mut data = vec![0.0f32; 6];
        let desc = EntryDesc::packed("x", FieldLayout::Aos, DataType::F32, Shape::vector(3), 2);
        let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc).unwrap();
        core.address::<AoSoA>(1, 2);
    }

    #[test]
    #[should_panic(expected = "record index 10 is out of range [0, 10)")]
    fn test_record_out_of_range() {
        let mut data = vec![0.0f32; 10];
        let desc = EntryDesc::packed("x", FieldLayout::Aos, DataType::F32, Shape::SCALAR, 10);
        let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc).unwrap();
        core.address::<Aos>(10, 0);
    }

    #[test]
    #[should_panic(expected = "component index 3 is out of range [0, 3)")]
    fn test_component_out_of_range() {
        let mut data = vec![0.0f32; 30];
        let desc = EntryDesc::packed("x", FieldLayout::Aos, DataType::F32, Shape::vector(3), 10);
        let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc).unwrap();
        core.address::<Aos>(0, 3);
    }
}
