use std::marker::PhantomData;

use super::{
    entry::{EntryCore, FieldError},
    layout::{Layout, LayoutInfo, Shape},
};
use crate::num::Scalar;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::ReadWrite {}
    impl Sealed for super::ReadOnly {}
}

/// Compile-time capability of a view or viewer.
pub trait Access: sealed::Sealed + Copy + Default + Send + Sync + 'static {
    const WRITABLE: bool;
}

/// Grants reads and writes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadWrite;

/// Grants reads only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadOnly;

impl Access for ReadWrite {
    const WRITABLE: bool = true;
}

impl Access for ReadOnly {
    const WRITABLE: bool = false;
}

/// Maps a view type to its read-only form.
pub trait AsReadOnly {
    type ReadOnly;
}

/// Maps a view type to its mutable form.
pub trait AsReadWrite {
    type ReadWrite;
}

pub type ReadOnlyOf<V> = <V as AsReadOnly>::ReadOnly;
pub type ReadWriteOf<V> = <V as AsReadWrite>::ReadWrite;

/// Records `[offset, offset + size)` of a core.
#[derive(Debug, Clone)]
pub(crate) struct Window<'a> {
    core: EntryCore<'a>,
    offset: usize,
    size: usize,
}

impl<'a> Window<'a> {
    pub(crate) fn new(core: EntryCore<'a>, offset: usize, size: usize) -> Result<Self, FieldError> {
        let count = core.count();
        match offset.checked_add(size) {
            Some(end) if end <= count => Ok(Self { core, offset, size }),
            _ => Err(FieldError::Window {
                name: core.desc().name.clone(),
                offset,
                size,
                count,
            }),
        }
    }

    #[inline]
    pub(crate) fn core(&self) -> &EntryCore<'a> {
        &self.core
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Translates a window-relative index into a record index of the core.
    #[inline]
    fn record(&self, i: usize) -> usize {
        assert!(
            i < self.size,
            "field entry `{}`: index {i} is out of range [0, {}) of the window at offset {}",
            self.core.name(),
            self.size,
            self.offset
        );
        self.offset + i
    }

    #[inline]
    pub(crate) fn address<L: Layout>(&self, i: usize, j: usize) -> *mut u8 {
        self.core.address::<L>(self.record(i), j)
    }

    #[inline]
    pub(crate) fn matrix_address<L: Layout>(&self, i: usize, row: usize, col: usize) -> *mut u8 {
        self.core.matrix_address::<L>(self.record(i), row, col)
    }
}

/// Lightweight accessor of a window of a field entry, usable from inside a launch.
///
/// `T` is the element type, `L` the layout, `M x N` the shape of one record and `A` the
/// capability. Mutable and read-only viewers share all addressing code.
#[derive(Debug, Clone)]
pub struct Viewer<'a, T, L, const M: usize, const N: usize, A> {
    window: Window<'a>,
    phantom: PhantomData<(T, L, A)>,
}

pub type FieldEntryViewer<'a, T, L, const M: usize, const N: usize> =
    Viewer<'a, T, L, M, N, ReadWrite>;
pub type CFieldEntryViewer<'a, T, L, const M: usize, const N: usize> =
    Viewer<'a, T, L, M, N, ReadOnly>;

pub type ScalarViewer<'a, T, L> = FieldEntryViewer<'a, T, L, 1, 1>;
pub type CScalarViewer<'a, T, L> = CFieldEntryViewer<'a, T, L, 1, 1>;
pub type VectorViewer<'a, T, L, const M: usize> = FieldEntryViewer<'a, T, L, M, 1>;
pub type CVectorViewer<'a, T, L, const M: usize> = CFieldEntryViewer<'a, T, L, M, 1>;
pub type MatrixViewer<'a, T, L, const M: usize, const N: usize> = FieldEntryViewer<'a, T, L, M, N>;
pub type CMatrixViewer<'a, T, L, const M: usize, const N: usize> =
    CFieldEntryViewer<'a, T, L, M, N>;

impl<'a, T, L, const M: usize, const N: usize, A> AsReadOnly for Viewer<'a, T, L, M, N, A>
where
    A: Access,
{
    type ReadOnly = Viewer<'a, T, L, M, N, ReadOnly>;
}

impl<'a, T, L, const M: usize, const N: usize, A> AsReadWrite for Viewer<'a, T, L, M, N, A>
where
    A: Access,
{
    type ReadWrite = Viewer<'a, T, L, M, N, ReadWrite>;
}

impl<'a, T, L, const M: usize, const N: usize> From<FieldEntryViewer<'a, T, L, M, N>>
    for CFieldEntryViewer<'a, T, L, M, N>
{
    #[inline]
    fn from(value: FieldEntryViewer<'a, T, L, M, N>) -> Self {
        let window = value.window;
        let phantom = PhantomData;
        Self { window, phantom }
    }
}

impl<'a, T, L, const M: usize, const N: usize, A> Viewer<'a, T, L, M, N, A>
where
    T: Scalar,
    L: Layout,
    A: Access,
{
    #[inline]
    pub(crate) fn new(window: Window<'a>) -> Self {
        let phantom = PhantomData;
        Self { window, phantom }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.window.core().name()
    }

    #[inline]
    pub fn layout_info(&self) -> LayoutInfo {
        self.window.core().layout_info()
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        Shape::matrix(M, N)
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.window.offset()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.window.size()
    }

    #[inline]
    pub fn total_count(&self) -> usize {
        self.window.core().count()
    }

    /// A read-only viewer of the same window.
    #[inline]
    pub fn as_const(&self) -> CFieldEntryViewer<'a, T, L, M, N> {
        Viewer::new(self.window.clone())
    }

    #[inline(always)]
    fn load(ptr: *mut u8) -> T {
        // SAFETY: the address was bounds-checked against storage sized for `T` elements
        unsafe { ptr.cast::<T>().read_unaligned() }
    }

    /// Reads entry `(row, col)` of record `i`.
    #[inline]
    pub fn read_entry(&self, i: usize, row: usize, col: usize) -> T {
        Self::load(self.window.matrix_address::<L>(i, row, col))
    }

    /// Reads record `i` as rows of columns.
    #[inline]
    pub fn read_matrix(&self, i: usize) -> [[T; N]; M] {
        std::array::from_fn(|row| std::array::from_fn(|col| self.read_entry(i, row, col)))
    }
}

impl<'a, T, L, const M: usize, const N: usize> FieldEntryViewer<'a, T, L, M, N>
where
    T: Scalar,
    L: Layout,
{
    #[inline(always)]
    unsafe fn store(ptr: *mut u8, value: T) {
        // SAFETY: the address was bounds-checked; exclusivity is the caller's promise
        unsafe { ptr.cast::<T>().write_unaligned(value) }
    }

    /// Writes entry `(row, col)` of record `i`.
    ///
    /// # Safety
    /// No other thread may read or write the same element concurrently.
    #[inline]
    pub unsafe fn write_entry(&self, i: usize, row: usize, col: usize, value: T) {
        let ptr = self.window.matrix_address::<L>(i, row, col);
        unsafe { Self::store(ptr, value) }
    }

    /// Writes record `i` from rows of columns.
    ///
    /// # Safety
    /// No other thread may access record `i` concurrently.
    #[inline]
    pub unsafe fn write_matrix(&self, i: usize, value: [[T; N]; M]) {
        for (row, value) in value.into_iter().enumerate() {
            for (col, value) in value.into_iter().enumerate() {
                unsafe { self.write_entry(i, row, col, value) }
            }
        }
    }
}

impl<'a, T, L, const M: usize, A> Viewer<'a, T, L, M, 1, A>
where
    T: Scalar,
    L: Layout,
    A: Access,
{
    /// Reads component `j` of record `i`.
    #[inline]
    pub fn read_component(&self, i: usize, j: usize) -> T {
        Self::load(self.window.address::<L>(i, j))
    }

    #[inline]
    pub fn read_vector(&self, i: usize) -> [T; M] {
        std::array::from_fn(|j| self.read_component(i, j))
    }
}

impl<'a, T, L, const M: usize> VectorViewer<'a, T, L, M>
where
    T: Scalar,
    L: Layout,
{
    /// Writes component `j` of record `i`.
    ///
    /// # Safety
    /// No other thread may read or write the same element concurrently.
    #[inline]
    pub unsafe fn write_component(&self, i: usize, j: usize, value: T) {
        let ptr = self.window.address::<L>(i, j);
        unsafe { Self::store(ptr, value) }
    }

    /// # Safety
    /// No other thread may access record `i` concurrently.
    #[inline]
    pub unsafe fn write_vector(&self, i: usize, value: [T; M]) {
        for (j, value) in value.into_iter().enumerate() {
            unsafe { self.write_component(i, j, value) }
        }
    }
}

impl<'a, T, L, A> Viewer<'a, T, L, 1, 1, A>
where
    T: Scalar,
    L: Layout,
    A: Access,
{
    #[inline]
    pub fn read(&self, i: usize) -> T {
        Self::load(self.window.address::<L>(i, 0))
    }
}

impl<'a, T, L> ScalarViewer<'a, T, L>
where
    T: Scalar,
    L: Layout,
{
    /// # Safety
    /// No other thread may read or write record `i` concurrently.
    #[inline]
    pub unsafe fn write(&self, i: usize, value: T) {
        let ptr = self.window.address::<L>(i, 0);
        unsafe { Self::store(ptr, value) }
    }
}
