use std::collections::HashMap;

use crate::foundation::error::{StrataError, StrataResult};

/// Retention limits for recycled pixmaps.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained pixmaps per size bucket.
    pub max_surfaces_per_bucket: usize,
}

impl Default for SurfacePoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 64 * 1024 * 1024,
            max_surfaces_per_bucket: 8,
        }
    }
}

/// Pixmap size, the pool's bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SurfaceDesc {
    pub(crate) width: u16,
    pub(crate) height: u16,
}

impl SurfaceDesc {
    pub(crate) fn new(width: u32, height: u32) -> StrataResult<Self> {
        let w: u16 = width
            .try_into()
            .map_err(|_| StrataError::allocation(format!("surface width {width} exceeds u16")))?;
        let h: u16 = height
            .try_into()
            .map_err(|_| StrataError::allocation(format!("surface height {height} exceeds u16")))?;
        Ok(Self {
            width: w,
            height: h,
        })
    }

    pub(crate) fn byte_len(self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(4)
    }
}

/// Pool counters.
#[derive(Debug, Default, Clone)]
pub struct SurfacePoolStats {
    /// Pixmaps currently parked in the pool.
    pub retained_surfaces: usize,
    /// Bytes currently parked in the pool.
    pub retained_bytes: usize,
    /// Fresh pixmap allocations.
    pub alloc_surfaces: u64,
    /// Borrows served from the pool.
    pub reused_surfaces: u64,
    /// Releases dropped because a limit was reached.
    pub dropped_on_release: u64,
}

/// Bounded recycler for CPU pixmaps, keyed by size.
///
/// Borrowed pixmaps are cleared to transparent before they are handed out.
pub(crate) struct SurfacePool {
    opts: SurfacePoolOpts,
    stats: SurfacePoolStats,
    buckets: HashMap<SurfaceDesc, Vec<vello_cpu::Pixmap>>,
}

impl SurfacePool {
    pub(crate) fn new(opts: SurfacePoolOpts) -> Self {
        Self {
            opts,
            stats: SurfacePoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    pub(crate) fn stats(&self) -> SurfacePoolStats {
        self.stats.clone()
    }

    pub(crate) fn borrow(&mut self, desc: SurfaceDesc) -> vello_cpu::Pixmap {
        if let Some(mut p) = self.buckets.get_mut(&desc).and_then(Vec::pop) {
            self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(desc.byte_len());
            self.stats.reused_surfaces = self.stats.reused_surfaces.saturating_add(1);
            p.data_as_u8_slice_mut().fill(0);
            return p;
        }

        self.stats.alloc_surfaces = self.stats.alloc_surfaces.saturating_add(1);
        vello_cpu::Pixmap::new(desc.width, desc.height)
    }

    pub(crate) fn release(&mut self, desc: SurfaceDesc, pixmap: vello_cpu::Pixmap) {
        let bytes = desc.byte_len();
        if self.opts.max_surfaces_per_bucket == 0
            || self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes
        {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bucket = self.buckets.entry(desc).or_default();
        if bucket.len() >= self.opts.max_surfaces_per_bucket {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.push(pixmap);
        self.stats.retained_surfaces = self.stats.retained_surfaces.saturating_add(1);
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(bytes);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/surface_pool.rs"]
mod tests;
