//! Data-parallel kernel launches over layout-polymorphic field storage.
//!
//! - [`field`] addresses the entries of a field stored as AoS, SoA or AoSoA through typed,
//!   bounds-checked views and viewers.
//! - [`launch`] runs a callable once per index of `[0, count)`, with exact-cover or grid-stride
//!   dispatch, on the streams of a [`device`].

pub mod device;
pub mod field;
pub mod launch;
pub mod num;

pub use device::{Device, DeviceBuilder, DeviceLimits, Stream};
pub use launch::{KernelTag, ParallelFor, ParallelForDetails, ParallelForType};
