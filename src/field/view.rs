use std::marker::PhantomData;

use super::{
    entry::{EntryCore, FieldError},
    layout::{FieldLayout, Layout, LayoutInfo, Shape},
    viewer::{Access, AsReadOnly, AsReadWrite, ReadOnly, ReadWrite, Viewer, Window},
};
use crate::num::Scalar;

/// A typed window `[offset, offset + size)` over the records of a field entry.
///
/// Views never own storage. Slicing a view only narrows the window.
///
/// A read-only view hands out read-only viewers only. Its untyped core stays private, so the
/// raw element addresses behind it cannot be reached through the view:
///
/// ```compile_fail
/// use weft::{
///     field::{Aos, CScalarView, EntryCore, EntryDesc, FieldLayout, FieldStorage, Shape},
///     num::DataType,
/// };
///
/// let mut data = [0.0f32; 4];
/// let desc = EntryDesc::packed("x", FieldLayout::Aos, DataType::F32, Shape::SCALAR, 4);
/// let core = EntryCore::new(FieldStorage::from_slice(&mut data), desc).unwrap();
/// let view = CScalarView::<f32, Aos>::new(core).unwrap();
/// let _ = view.core().address::<Aos>(0, 0);
/// ```
#[derive(Debug, Clone)]
pub struct EntryView<'a, T, L, const M: usize, const N: usize, A = ReadWrite> {
    window: Window<'a>,
    phantom: PhantomData<(T, L, A)>,
}

pub type FieldEntryView<'a, T, L, const M: usize, const N: usize> =
    EntryView<'a, T, L, M, N, ReadWrite>;
pub type CFieldEntryView<'a, T, L, const M: usize, const N: usize> =
    EntryView<'a, T, L, M, N, ReadOnly>;

pub type ScalarView<'a, T, L> = FieldEntryView<'a, T, L, 1, 1>;
pub type CScalarView<'a, T, L> = CFieldEntryView<'a, T, L, 1, 1>;
pub type VectorView<'a, T, L, const M: usize> = FieldEntryView<'a, T, L, M, 1>;
pub type CVectorView<'a, T, L, const M: usize> = CFieldEntryView<'a, T, L, M, 1>;
pub type MatrixView<'a, T, L, const M: usize, const N: usize> = FieldEntryView<'a, T, L, M, N>;
pub type CMatrixView<'a, T, L, const M: usize, const N: usize> = CFieldEntryView<'a, T, L, M, N>;

impl<'a, T, L, const M: usize, const N: usize, A> AsReadOnly for EntryView<'a, T, L, M, N, A>
where
    A: Access,
{
    type ReadOnly = EntryView<'a, T, L, M, N, ReadOnly>;
}

impl<'a, T, L, const M: usize, const N: usize, A> AsReadWrite for EntryView<'a, T, L, M, N, A>
where
    A: Access,
{
    type ReadWrite = EntryView<'a, T, L, M, N, ReadWrite>;
}

impl<'a, T, L, const M: usize, const N: usize> From<FieldEntryView<'a, T, L, M, N>>
    for CFieldEntryView<'a, T, L, M, N>
{
    #[inline]
    fn from(value: FieldEntryView<'a, T, L, M, N>) -> Self {
        let window = value.window;
        let phantom = PhantomData;
        Self { window, phantom }
    }
}

impl<'a, T, L, const M: usize, const N: usize, A> EntryView<'a, T, L, M, N, A>
where
    T: Scalar,
    L: Layout,
    A: Access,
{
    /// Views every record of the entry.
    #[inline]
    pub fn new(core: EntryCore<'a>) -> Result<Self, FieldError> {
        let count = core.count();
        Self::with_window(core, 0, count)
    }

    /// Views records `[offset, offset + size)` of the entry.
    ///
    /// Fails if the element type, shape or layout of the entry differ from the view's, or if
    /// the window does not fit in `[0, count)`.
    pub fn with_window(core: EntryCore<'a>, offset: usize, size: usize) -> Result<Self, FieldError> {
        let name = || core.desc().name.clone();
        if core.data_type() != T::DATA_TYPE {
            return Err(FieldError::Type(name(), core.data_type(), T::DATA_TYPE));
        }
        if core.shape() != Shape::matrix(M, N) {
            return Err(FieldError::Shape(name(), core.shape(), Shape::matrix(M, N)));
        }
        if core.layout() != L::LAYOUT {
            return Err(FieldError::Layout(name(), core.layout(), L::LAYOUT));
        }

        let window = Window::new(core, offset, size)?;
        let phantom = PhantomData;
        Ok(Self { window, phantom })
    }

    /// Narrows the view to `[offset, offset + size)` relative to the current window.
    pub fn try_subview(&self, offset: usize, size: usize) -> Result<Self, FieldError> {
        let count = self.size();
        match offset.checked_add(size) {
            Some(end) if end <= count => {
                let core = self.window.core().clone();
                let window = Window::new(core, self.offset() + offset, size)?;
                let phantom = PhantomData;
                Ok(Self { window, phantom })
            }
            _ => Err(FieldError::Window {
                name: self.window.core().desc().name.clone(),
                offset,
                size,
                count,
            }),
        }
    }

    /// Narrows the view to `[offset, offset + size)` relative to the current window.
    ///
    /// # Panics
    /// Panics if the range does not fit in the current window.
    #[inline]
    pub fn subview(&self, offset: usize, size: usize) -> Self {
        match self.try_subview(offset, size) {
            Ok(view) => view,
            Err(err) => panic!("{err}"),
        }
    }

    #[inline]
    pub(crate) fn core(&self) -> &EntryCore<'a> {
        self.window.core()
    }

    #[inline]
    pub fn layout_info(&self) -> LayoutInfo {
        self.core().layout_info()
    }

    #[inline]
    pub fn layout(&self) -> FieldLayout {
        self.layout_info().layout()
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.window.offset()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.window.size()
    }

    /// Number of records of the whole entry, ignoring the window.
    #[inline]
    pub fn total_count(&self) -> usize {
        self.core().count()
    }

    #[inline]
    pub fn elem_byte_size(&self) -> usize {
        self.core().elem_byte_size()
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.core().shape()
    }

    #[inline]
    pub fn struct_stride(&self) -> usize {
        self.core().struct_stride()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.core().name()
    }

    /// A viewer with the capability of this view.
    #[inline]
    pub fn viewer(&self) -> Viewer<'a, T, L, M, N, A> {
        Viewer::new(self.window.clone())
    }

    /// A read-only viewer.
    #[inline]
    pub fn cviewer(&self) -> Viewer<'a, T, L, M, N, ReadOnly> {
        Viewer::new(self.window.clone())
    }

    #[inline]
    pub fn as_const(&self) -> CFieldEntryView<'a, T, L, M, N> {
        let window = self.window.clone();
        let phantom = PhantomData;
        EntryView { window, phantom }
    }
}

impl<'a, T, L, A> EntryView<'a, T, L, 1, 1, A>
where
    T: Scalar,
    L: Layout,
    A: Access,
{
    /// Copies the records of the window into `dst`.
    ///
    /// # Panics
    /// Panics if `dst` and the window differ in length.
    pub fn copy_to_slice(&self, dst: &mut [T]) {
        assert_eq!(
            dst.len(),
            self.size(),
            "field entry `{}`: destination length mismatches the window",
            self.name()
        );
        let viewer = self.cviewer();
        for (i, x) in dst.iter_mut().enumerate() {
            *x = viewer.read(i);
        }
    }
}
