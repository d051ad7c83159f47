//! Pooled send buffers.
//!
//! Buffers flow pool → encoder → transport → pool: a [`PooledBuffer`] is an
//! RAII handle that returns its storage to the pool on drop, on every exit
//! path including an encode or write failure.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

struct Shared {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    capacity: usize,
}

#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        BufferPool {
            shared: Arc::new(Shared {
                free: Mutex::new(Vec::with_capacity(capacity)),
                buffer_size,
                capacity,
            }),
        }
    }

    /// Rents a buffer, reusing one from the pool if available and allocating
    /// a fresh one otherwise.
    pub fn rent(&self) -> PooledBuffer {
        let mut buf = self
            .shared
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.shared.buffer_size));
        buf.clear();
        PooledBuffer {
            buf: Some(buf),
            shared: self.shared.clone(),
        }
    }
}

pub struct PooledBuffer {
    buf: Option<BytesMut>,
    shared: Arc<Shared>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let mut free = self.shared.free.lock().unwrap();
            if free.len() < self.shared.capacity {
                free.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rented_buffer_returns_to_pool_on_drop() {
        let pool = BufferPool::new(4, 64);
        {
            let mut buf = pool.rent();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.shared.free.lock().unwrap().len(), 1);
    }

    #[test]
    fn pool_does_not_grow_past_capacity() {
        let pool = BufferPool::new(1, 64);
        let a = pool.rent();
        let b = pool.rent();
        drop(a);
        drop(b);
        assert_eq!(pool.shared.free.lock().unwrap().len(), 1);
    }
}
