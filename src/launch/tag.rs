/// Derives [`KernelTag`] for a marker type.
///
/// ```ignore
/// #[derive(KernelTag)]
/// #[kernel_tag(name = "integrate")]
/// struct Integrate;
/// ```
pub use weft_derive::KernelTag;

/// Distinguishes launches of the same callable type, e.g. for occupancy caching and diagnostics.
pub trait KernelTag: 'static {
    /// Kernel name used in logs and errors.
    const NAME: &'static str;
}

/// The tag of untagged launches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, KernelTag)]
#[kernel_tag(crate = "crate", name = "default")]
pub struct DefaultTag;
