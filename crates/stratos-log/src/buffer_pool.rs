//! Size-bucketed buffer pool for hot-path record encode/decode.
//!
//! Buckets double from 512 B up to 16 MiB. A checked-out [`PooledBuffer`] is
//! an RAII guard: dropping it returns the buffer to its bucket (zeroed
//! first) instead of requiring callers to remember an explicit `put`.
//! Buffers that grew past their bucket's ceiling, and anything larger than
//! the top bucket to begin with, are simply dropped rather than pooled.

use std::sync::Arc;

use parking_lot::Mutex;

const MIN_BUCKET: usize = 512;
const MAX_BUCKET: usize = 16 * 1024 * 1024;
const NUM_BUCKETS: usize = 16; // 512B * 2^15 = 16MiB

/// A pool of reusable `Vec<u8>` buffers, bucketed by power-of-two capacity.
pub struct BufferPool {
    buckets: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buckets: (0..NUM_BUCKETS).map(|_| Mutex::new(Vec::new())).collect(),
        })
    }

    fn bucket_index(size: usize) -> Option<usize> {
        if size > MAX_BUCKET {
            return None;
        }
        let mut cap = MIN_BUCKET;
        for i in 0..NUM_BUCKETS {
            if size <= cap {
                return Some(i);
            }
            cap *= 2;
        }
        None
    }

    fn bucket_capacity(index: usize) -> usize {
        MIN_BUCKET * (1 << index)
    }

    /// Check out a buffer with at least `size` capacity. Oversize requests
    /// bypass the pool entirely and allocate directly.
    pub fn get(self: &Arc<Self>, size: usize) -> PooledBuffer {
        match Self::bucket_index(size) {
            Some(idx) => {
                let mut bucket = self.buckets[idx].lock();
                let buf = bucket.pop().unwrap_or_else(|| Vec::with_capacity(Self::bucket_capacity(idx)));
                PooledBuffer {
                    pool: Some(self.clone()),
                    bucket: idx,
                    buf,
                }
            }
            None => PooledBuffer {
                pool: None,
                bucket: usize::MAX,
                buf: Vec::with_capacity(size),
            },
        }
    }

    fn put(&self, bucket: usize, mut buf: Vec<u8>) {
        if bucket >= self.buckets.len() || buf.capacity() > Self::bucket_capacity(bucket) {
            return; // grew past its bucket's ceiling; discard instead of pooling.
        }
        let cap = buf.capacity();
        buf.clear();
        buf.resize(cap, 0);
        buf.clear();
        self.buckets[bucket].lock().push(buf);
    }
}

/// RAII handle to a pooled buffer. Returns itself to the pool on drop.
pub struct PooledBuffer {
    pool: Option<Arc<BufferPool>>,
    bucket: usize,
    buf: Vec<u8>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let buf = std::mem::take(&mut self.buf);
            pool.put(self.bucket, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_buffers_within_bucket() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.get(1024);
            buf.extend_from_slice(&[1u8; 100]);
        }
        let buf2 = pool.get(1024);
        assert!(buf2.capacity() >= 1024);
    }

    #[test]
    fn oversize_bypasses_pool() {
        let pool = BufferPool::new();
        let buf = pool.get(64 * 1024 * 1024);
        assert!(buf.pool.is_none());
    }
}
