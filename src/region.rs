//! Page-aligned test regions and their acquisition capability.
//!
//! # Scope
//!
//! A test region is one contiguous, page-aligned span of anonymous memory,
//! viewed word-at-a-time and logically split into two equal halves that the
//! detectors use as a comparison pair. The region may additionally be pinned
//! against paging; a region that cannot be pinned is still usable, just
//! slower and less trustworthy as a RAM diagnostic.
//!
//! # Invariants
//!
//! - A region's base address is page-aligned for its whole lifetime (anonymous
//!   mappings guarantee this; no manual alignment arithmetic is needed).
//! - `unpin` is idempotent and always runs before the backing memory is
//!   returned, either explicitly or via `Drop`.
//! - The two halves returned by `halves()` are always exactly equal in length.
//!
//! # Trait Seam
//!
//! The acquisition state machine is generic over [`RegionSource`] so that
//! allocation and pin failures can be injected deterministically in tests.
//! [`MmapRegionSource`] is the production implementation.

use std::fmt;
use std::io;

use memmap2::MmapMut;

/// Native word: the granularity of every read/write the detectors perform.
pub type Word = usize;

/// Bytes per word.
pub const WORD_BYTES: usize = std::mem::size_of::<Word>();

// ============================================================================
// Pin failures
// ============================================================================

/// Why pinning a region against paging failed.
///
/// The acquisition protocol branches on these: size-related failures shrink
/// the request and retry, permission failures disable pinning for the rest of
/// the worker's lifetime, anything else gives up on pinning immediately.
#[derive(Debug)]
pub enum PinError {
    /// Pinning would exceed a per-process or system limit (`EAGAIN`).
    OverLimit,
    /// Too many pages for the kernel to pin right now (`ENOMEM`).
    OutOfMemory,
    /// The process lacks the privilege to pin memory at all (`EPERM`).
    PermissionDenied,
    /// Anything else; carried verbatim for the log.
    Other(io::Error),
}

impl PinError {
    /// Classify an OS error from the pin syscall.
    pub fn from_os(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EAGAIN) => PinError::OverLimit,
            Some(libc::ENOMEM) => PinError::OutOfMemory,
            Some(libc::EPERM) => PinError::PermissionDenied,
            _ => PinError::Other(err),
        }
    }
}

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinError::OverLimit => write!(f, "over system/per-process pin limit"),
            PinError::OutOfMemory => write!(f, "too many pages to pin"),
            PinError::PermissionDenied => write!(f, "insufficient permission to pin"),
            PinError::Other(e) => write!(f, "pin failed: {}", e),
        }
    }
}

// ============================================================================
// Region capability
// ============================================================================

/// A contiguous page-aligned span of testable memory.
pub trait Region {
    /// Span length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the span is currently pinned against paging.
    fn is_locked(&self) -> bool;

    /// Pin the whole span against paging.
    fn pin(&mut self) -> Result<(), PinError>;

    /// Release the pin. Idempotent; errors are ignored because the region is
    /// about to be freed anyway and there is nothing useful to do with them.
    fn unpin(&mut self);

    /// The whole span, word-granular.
    fn words(&mut self) -> &mut [Word];

    /// The comparison pair: two equal-length halves of the span.
    fn halves(&mut self) -> (&mut [Word], &mut [Word]) {
        let all = self.words();
        let half = all.len() / 2;
        let (a, rest) = all.split_at_mut(half);
        (a, &mut rest[..half])
    }
}

/// Capability to materialize regions of a requested size.
///
/// `request` is all-or-nothing: `None` means this size cannot be had and the
/// caller should try a smaller one.
pub trait RegionSource: Send + Sync {
    type Region: Region;

    fn request(&self, bytes: usize) -> Option<Self::Region>;
}

// ============================================================================
// Production implementation: anonymous mappings
// ============================================================================

/// Region backed by a private anonymous mapping.
pub struct MmapRegion {
    map: MmapMut,
    locked: bool,
}

impl Region for MmapRegion {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn pin(&mut self) -> Result<(), PinError> {
        self.map.lock().map_err(PinError::from_os)?;
        self.locked = true;
        Ok(())
    }

    fn unpin(&mut self) {
        if self.locked {
            let _ = self.map.unlock();
            self.locked = false;
        }
    }

    fn words(&mut self) -> &mut [Word] {
        let count = self.map.len() / WORD_BYTES;
        // SAFETY: the mapping is page-aligned (hence word-aligned), `count`
        // words never exceed its length, and `&mut self` guarantees the view
        // is exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.map.as_mut_ptr().cast::<Word>(), count) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // The unmap would implicitly unpin too; doing it explicitly keeps the
        // locked flag honest if a Drop ever grows observable side effects.
        self.unpin();
    }
}

/// Materializes regions as anonymous private mappings.
#[derive(Clone, Copy, Debug, Default)]
pub struct MmapRegionSource;

impl MmapRegionSource {
    pub fn new() -> Self {
        MmapRegionSource
    }
}

impl RegionSource for MmapRegionSource {
    type Region = MmapRegion;

    fn request(&self, bytes: usize) -> Option<MmapRegion> {
        if bytes == 0 {
            return None;
        }
        let map = MmapMut::map_anon(bytes).ok()?;
        Some(MmapRegion { map, locked: false })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_error_classification() {
        assert!(matches!(
            PinError::from_os(io::Error::from_raw_os_error(libc::EAGAIN)),
            PinError::OverLimit
        ));
        assert!(matches!(
            PinError::from_os(io::Error::from_raw_os_error(libc::ENOMEM)),
            PinError::OutOfMemory
        ));
        assert!(matches!(
            PinError::from_os(io::Error::from_raw_os_error(libc::EPERM)),
            PinError::PermissionDenied
        ));
        assert!(matches!(
            PinError::from_os(io::Error::from_raw_os_error(libc::EINVAL)),
            PinError::Other(_)
        ));
    }

    #[test]
    fn mmap_region_basic_shape() {
        let source = MmapRegionSource::new();
        let mut region = source.request(64 * 1024).expect("map 64 KiB");
        assert_eq!(region.len(), 64 * 1024);
        assert!(!region.is_locked());

        let words = region.words();
        assert_eq!(words.len(), 64 * 1024 / WORD_BYTES);
        // Word-aligned base.
        assert_eq!(words.as_ptr() as usize % WORD_BYTES, 0);

        let (a, b) = region.halves();
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), 64 * 1024 / WORD_BYTES / 2);
    }

    #[test]
    fn halves_are_disjoint_and_writable() {
        let source = MmapRegionSource::new();
        let mut region = source.request(8 * 1024).expect("map 8 KiB");
        let (a, b) = region.halves();
        a.fill(0x11);
        b.fill(0x22);
        assert!(a.iter().all(|&w| w == 0x11));
        assert!(b.iter().all(|&w| w == 0x22));
    }

    #[test]
    fn zero_byte_request_is_refused() {
        let source = MmapRegionSource::new();
        assert!(source.request(0).is_none());
    }

    #[test]
    fn unpin_is_idempotent() {
        let source = MmapRegionSource::new();
        let mut region = source.request(4 * 1024).expect("map 4 KiB");
        // Pin may or may not succeed depending on RLIMIT_MEMLOCK; either way
        // unpin must be safe to call repeatedly.
        let _ = region.pin();
        region.unpin();
        region.unpin();
        assert!(!region.is_locked());
    }
}
