//! Render Target Allocation
//!
//! Per-session presentable surfaces and the stable texture ids consumers
//! use to attach a display widget. The bridge never draws; the protocol
//! engine writes decoded framebuffer content into the surface directly.

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque presentable surface handle.
///
/// Stands in for whatever the embedding shell presents framebuffer
/// content with (a GPU surface, an external texture entry, ...).
#[derive(Debug)]
pub struct Surface {
    id: u64,
}

impl Surface {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A per-session rendering target: a surface plus the stable texture id
/// consumers bind a display widget to.
#[derive(Debug)]
pub struct RenderTarget {
    surface: Surface,
    texture_id: u64,
}

impl RenderTarget {
    pub fn texture_id(&self) -> u64 {
        self.texture_id
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }
}

/// Allocation seam for render targets.
///
/// `allocate` must not block on network state. `release` consumes the
/// target; it is invoked from exactly one code path (the dispatcher's
/// Closed handler, or `create` unwinding a failed engine construction)
/// and tolerates targets it no longer knows about.
pub trait RenderTargetAllocator: Send + Sync {
    fn allocate(&self) -> RenderTarget;
    fn release(&self, target: RenderTarget);
}

/// Default in-process allocator backed by an atomic id counter
pub struct TextureAllocator {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
}

impl TextureAllocator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Number of targets allocated and not yet released
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for TextureAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargetAllocator for TextureAllocator {
    fn allocate(&self) -> RenderTarget {
        let texture_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(texture_id);
        debug!("Allocated render target (texture {})", texture_id);
        RenderTarget {
            surface: Surface { id: texture_id },
            texture_id,
        }
    }

    fn release(&self, target: RenderTarget) {
        if self.live.lock().remove(&target.texture_id) {
            debug!("Released render target (texture {})", target.texture_id);
        } else {
            warn!(
                "Release of unknown render target (texture {})",
                target.texture_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_issues_distinct_texture_ids() {
        let allocator = TextureAllocator::new();
        let a = allocator.allocate();
        let b = allocator.allocate();

        assert_ne!(a.texture_id(), b.texture_id());
        assert_eq!(a.surface().id(), a.texture_id());
        assert_eq!(allocator.live_count(), 2);
    }

    #[test]
    fn test_release_removes_from_live_set() {
        let allocator = TextureAllocator::new();
        let target = allocator.allocate();
        assert_eq!(allocator.live_count(), 1);

        allocator.release(target);
        assert_eq!(allocator.live_count(), 0);
    }

    #[test]
    fn test_release_of_foreign_target_is_harmless() {
        let ours = TextureAllocator::new();
        let theirs = TextureAllocator::new();

        let target = theirs.allocate();
        ours.release(target);

        assert_eq!(ours.live_count(), 0);
        assert_eq!(theirs.live_count(), 1);
    }
}
