//! Size-classed buffer pool.
//!
//! # Responsibilities
//! - Hand out byte buffers, reusing released ones of a matching size class
//! - Enforce a ceiling on bytes held across all classes
//! - Evict buffers that sat unused longer than the configured age
//!
//! # Design Decisions
//! - Classes are kept sorted ascending by capacity; lookup is a binary search
//! - Each class is a stack over release order: `get` pops the newest entry,
//!   eviction trims the oldest prefix
//! - A miss is never an error, it degrades to a direct allocation
//! - Size classes sit behind a `parking_lot` mutex, which spins briefly before
//!   parking; the critical sections are a few vector operations

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::BufferConfig;
use crate::observability::metrics;

/// A fixed-capacity byte buffer borrowed from a [`BufferPool`].
///
/// The zero-length buffer never allocates, so every empty buffer shares the
/// same immutable backing and releasing it is a no-op.
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// The shared empty buffer.
    pub fn empty() -> Self {
        Self {
            data: Box::default(),
        }
    }

    /// Capacity of the buffer, which is also its length.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("capacity", &self.data.len()).finish()
    }
}

struct Entry {
    data: Box<[u8]>,
    released_at: Instant,
}

struct SizeClass {
    size: usize,
    /// Ordered by `released_at`, oldest first.
    entries: VecDeque<Entry>,
}

struct PoolInner {
    classes: Vec<SizeClass>,
    pooled_bytes: usize,
    last_maintenance: Instant,
}

/// Snapshot of pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pooled_bytes: usize,
    pub pooled_buffers: usize,
    pub size_classes: usize,
    pub hits: u64,
    pub misses: u64,
    pub discarded: u64,
}

/// Pool of reusable byte buffers grouped by capacity.
pub struct BufferPool {
    enabled: bool,
    min_size: usize,
    max_size: usize,
    max_pool_bytes: usize,
    max_age: Duration,
    maintenance_interval: Duration,
    inner: Mutex<PoolInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_size: config.min_buffer_size.max(1),
            max_size: config.max_buffer_size,
            max_pool_bytes: config.max_pool_bytes,
            max_age: config.max_age(),
            maintenance_interval: config.maintenance_interval(),
            inner: Mutex::new(PoolInner {
                classes: Vec::new(),
                pooled_bytes: 0,
                last_maintenance: Instant::now(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Size a request is rounded to when larger buffers are acceptable.
    pub fn rounded_size(&self, size: usize) -> usize {
        let size = size.max(self.min_size);
        size.checked_next_power_of_two().unwrap_or(size)
    }

    /// Borrow a buffer of at least `size` bytes.
    ///
    /// With `allow_larger` the size is rounded up to a power of two (never
    /// below the configured floor) and any free class at or above it may
    /// serve the request. Without it only an exact-size class can.
    pub fn get(&self, size: usize, allow_larger: bool) -> Buffer {
        if size == 0 {
            return Buffer::empty();
        }
        let size = if allow_larger { self.rounded_size(size) } else { size };

        if self.enabled {
            if let Some(data) = self.take_pooled(size, allow_larger) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_buffer_lookup(true);
                return Buffer { data };
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_buffer_lookup(false);
        Buffer::zeroed(size)
    }

    fn take_pooled(&self, size: usize, allow_larger: bool) -> Option<Box<[u8]>> {
        let mut inner = self.inner.lock();
        let start = inner.classes.partition_point(|c| c.size < size);

        let class = if allow_larger {
            inner.classes[start..]
                .iter_mut()
                .find(|c| c.size.is_power_of_two() && !c.entries.is_empty())?
        } else {
            inner
                .classes
                .get_mut(start)
                .filter(|c| c.size == size && !c.entries.is_empty())?
        };

        let entry = class.entries.pop_back()?;
        let class_size = class.size;
        inner.pooled_bytes -= class_size;
        Some(entry.data)
    }

    /// Return a buffer to the pool.
    ///
    /// The buffer is discarded instead of stored when pooling is disabled,
    /// its size is outside the pool-eligible bounds, or holding it would
    /// push the pool over its byte ceiling.
    pub fn release(&self, buffer: Buffer) {
        let size = buffer.capacity();
        if size == 0 {
            return;
        }
        if !self.enabled || size < self.min_size || size > self.max_size {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut inner = self.inner.lock();
        if inner.pooled_bytes + size > self.max_pool_bytes {
            drop(inner);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let idx = inner.classes.partition_point(|c| c.size < size);
        if inner.classes.get(idx).map_or(true, |c| c.size != size) {
            inner.classes.insert(
                idx,
                SizeClass {
                    size,
                    entries: VecDeque::new(),
                },
            );
        }

        let class = &mut inner.classes[idx];
        debug_assert!(
            !class
                .entries
                .iter()
                .any(|e| e.data.as_ptr() == buffer.data.as_ptr()),
            "buffer of {size} bytes released twice"
        );
        class.entries.push_back(Entry {
            data: buffer.data,
            released_at: Instant::now(),
        });
        inner.pooled_bytes += size;
    }

    /// Swap `buffer` for one of at least `new_size` bytes.
    ///
    /// Unless `clear` is set, the old contents are copied into the new buffer.
    /// With `clear` the new buffer is zero-filled. The old buffer is released.
    pub fn resize(&self, buffer: Buffer, new_size: usize, allow_larger: bool, clear: bool) -> Buffer {
        let mut resized = self.get(new_size, allow_larger);
        if clear {
            resized.fill(0);
        } else {
            let n = resized.len().min(buffer.len());
            resized[..n].copy_from_slice(&buffer[..n]);
        }
        self.release(buffer);
        resized
    }

    /// Evict entries older than the configured age. Returns how many were evicted.
    pub fn maintain(&self) -> usize {
        self.maintain_at(Instant::now())
    }

    /// Maintenance pass against an explicit clock.
    ///
    /// Skipped entirely when called again within the maintenance interval.
    pub fn maintain_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        if now.saturating_duration_since(inner.last_maintenance) < self.maintenance_interval {
            return 0;
        }
        inner.last_maintenance = now;

        let mut evicted = 0;
        let mut freed = 0;
        for class in inner.classes.iter_mut() {
            while class
                .entries
                .front()
                .is_some_and(|e| now.saturating_duration_since(e.released_at) >= self.max_age)
            {
                class.entries.pop_front();
                evicted += 1;
                freed += class.size;
            }
        }
        inner.classes.retain(|c| !c.entries.is_empty());
        inner.pooled_bytes -= freed;
        let pooled_bytes = inner.pooled_bytes;
        drop(inner);

        metrics::record_buffer_pool_bytes(pooled_bytes);
        if evicted > 0 {
            tracing::debug!(evicted, freed_bytes = freed, pooled_bytes, "Buffer pool maintenance");
        }
        evicted
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.classes.clear();
        inner.pooled_bytes = 0;
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            pooled_bytes: inner.pooled_bytes,
            pooled_buffers: inner.classes.iter().map(|c| c.entries.len()).sum(),
            size_classes: inner.classes.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(max_pool_bytes: usize) -> BufferPool {
        BufferPool::new(&BufferConfig {
            enabled: true,
            min_buffer_size: 256,
            max_buffer_size: 64 * 1024,
            max_pool_bytes,
            max_age_secs: 10,
            maintenance_interval_secs: 1,
        })
    }

    #[test]
    fn test_rounding_is_power_of_two_above_floor() {
        let pool = pool_with(1 << 20);
        for size in [1, 100, 255, 256, 257, 1000, 4096, 4097, 50_000] {
            let buf = pool.get(size, true);
            assert!(buf.len().is_power_of_two(), "size {size} -> {}", buf.len());
            assert!(buf.len() >= 256);
            assert!(buf.len() >= size);
        }
    }

    #[test]
    fn test_exact_size_without_allow_larger() {
        let pool = pool_with(1 << 20);
        let buf = pool.get(1000, false);
        assert_eq!(buf.len(), 1000);
    }

    #[test]
    fn test_zero_length_is_empty_and_unpooled() {
        let pool = pool_with(1 << 20);
        let buf = pool.get(0, true);
        assert!(buf.is_empty());
        pool.release(buf);
        let stats = pool.stats();
        assert_eq!(stats.pooled_buffers, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_release_then_get_reuses() {
        let pool = pool_with(1 << 20);
        let buf = pool.get(1000, true);
        let ptr = buf.as_ptr();
        pool.release(buf);

        let again = pool.get(1000, true);
        assert_eq!(again.as_ptr(), ptr);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.pooled_bytes, 0);
    }

    #[test]
    fn test_most_recently_released_first() {
        let pool = pool_with(1 << 20);
        let a = pool.get(512, true);
        let b = pool.get(512, true);
        let b_ptr = b.as_ptr();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.get(512, true).as_ptr(), b_ptr);
    }

    #[test]
    fn test_larger_class_serves_smaller_request() {
        let pool = pool_with(1 << 20);
        pool.release(pool.get(4096, true));
        let buf = pool.get(300, true);
        assert_eq!(buf.len(), 4096);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_exact_request_skips_larger_class() {
        let pool = pool_with(1 << 20);
        pool.release(pool.get(4096, true));
        let buf = pool.get(1000, false);
        assert_eq!(buf.len(), 1000);
        assert_eq!(pool.stats().hits, 0);
    }

    #[test]
    fn test_ceiling_never_exceeded() {
        let pool = pool_with(3000);
        let bufs: Vec<_> = (0..10).map(|_| pool.get(1024, true)).collect();
        for b in bufs {
            pool.release(b);
            assert!(pool.stats().pooled_bytes <= 3000);
        }
        let stats = pool.stats();
        assert_eq!(stats.pooled_buffers, 2);
        assert_eq!(stats.discarded, 8);
    }

    #[test]
    fn test_out_of_bounds_sizes_discarded() {
        let pool = pool_with(1 << 20);
        pool.release(pool.get(100, false));
        pool.release(pool.get(128 * 1024, false));
        assert_eq!(pool.stats().pooled_buffers, 0);
        assert_eq!(pool.stats().discarded, 2);
    }

    #[test]
    fn test_classes_sorted() {
        let pool = pool_with(1 << 20);
        for size in [8192, 512, 2048, 1024] {
            pool.release(pool.get(size, false));
        }
        let inner = pool.inner.lock();
        let sizes: Vec<_> = inner.classes.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![512, 1024, 2048, 8192]);
    }

    #[test]
    fn test_maintenance_evicts_old_entries() {
        let pool = pool_with(1 << 20);
        pool.release(pool.get(1024, true));
        pool.release(pool.get(2048, true));

        // Too soon: the interval gate skips the pass.
        assert_eq!(pool.maintain_at(Instant::now()), 0);

        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(pool.maintain_at(later), 2);
        let stats = pool.stats();
        assert_eq!(stats.pooled_bytes, 0);
        assert_eq!(stats.size_classes, 0);
    }

    #[test]
    fn test_resize_copies_contents() {
        let pool = pool_with(1 << 20);
        let mut buf = pool.get(256, true);
        buf[..5].copy_from_slice(b"hello");
        let bigger = pool.resize(buf, 1024, true, false);
        assert_eq!(bigger.len(), 1024);
        assert_eq!(&bigger[..5], b"hello");
        assert_eq!(pool.stats().pooled_buffers, 1);
    }

    #[test]
    fn test_concurrent_get_release_respects_ceiling() {
        let pool = std::sync::Arc::new(pool_with(8 * 1024));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let buf = pool.get(512 << (i % 3), true);
                        pool.release(buf);
                        assert!(pool.stats().pooled_bytes <= 8 * 1024);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 8 * 500);
        assert!(stats.pooled_bytes <= 8 * 1024);
    }

    #[test]
    fn test_disabled_pool_never_stores() {
        let pool = BufferPool::new(&BufferConfig {
            enabled: false,
            ..BufferConfig::default()
        });
        pool.release(pool.get(1024, true));
        assert_eq!(pool.stats().pooled_buffers, 0);
    }
}
