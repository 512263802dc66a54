//! Layout-aware, bounds-checked views over field entries.
//!
//! A *field* is a collection of records; each *entry* of the field is a named, homogeneously
//! typed scalar, vector or matrix component attached to every record. The storage of a field is
//! owned elsewhere: this module only addresses it.
//!
//! - [`EntryCore`] binds an [`EntryDesc`] to a [`FieldStorage`] and computes element addresses.
//! - [`Layout`] markers ([`Aos`], [`Soa`], [`AoSoA`]) select the address computation statically.
//! - [`EntryView`] is a typed window of records, sliceable without copying.
//! - [`Viewer`] is the accessor captured by kernels, tagged [`ReadWrite`] or [`ReadOnly`].

pub mod entry;
pub mod layout;
pub mod view;
pub mod viewer;

pub use entry::{EntryCore, EntryDesc, FieldError, FieldStorage};
pub use layout::{AoSoA, Aos, FieldLayout, Layout, LayoutInfo, Shape, Soa};
pub use view::{
    CFieldEntryView, CMatrixView, CScalarView, CVectorView, EntryView, FieldEntryView, MatrixView,
    ScalarView, VectorView,
};
pub use viewer::{
    Access, AsReadOnly, AsReadWrite, CFieldEntryViewer, CMatrixViewer, CScalarViewer,
    CVectorViewer, FieldEntryViewer, MatrixViewer, ReadOnly, ReadOnlyOf, ReadWrite, ReadWriteOf,
    ScalarViewer, VectorViewer, Viewer,
};
