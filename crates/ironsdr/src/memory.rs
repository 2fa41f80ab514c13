// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Bounded pool of fixed-size frame buffers.
//!
//! Pre-allocates equal-size, 8-byte-aligned byte buffers managed through a
//! free list. The streaming path never allocates under steady state; the
//! pool grows only during start-up and on FIFO growth events, up to a hard
//! cap. Double-free is detected and reported as a programming error.

use crate::error::{Error, Result};
use parking_lot::Mutex;

/// One buffer checked out of a [`MemoryPool`].
///
/// Moves between the pool, the bulk pipe's in-flight queue and the codec;
/// it returns to its owning pool through [`MemoryPool::free`].
#[derive(Debug)]
pub struct PoolBuffer {
    slot: u16,
    data: Box<[u8]>,
}

impl PoolBuffer {
    /// Stable identity of this buffer within its pool.
    #[must_use]
    pub fn slot(&self) -> u16 {
        self.slot
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct PoolState {
    free: Vec<PoolBuffer>,
    /// Checked-out flag per created slot; indexed by `PoolBuffer::slot`.
    outstanding: Vec<bool>,
}

/// Bounded free-list pool of equal-size buffers.
pub struct MemoryPool {
    state: Mutex<PoolState>,
    buffer_size: usize,
    hard_cap: usize,
    name: &'static str,
}

impl MemoryPool {
    /// Create a pool with `initial` buffers pre-allocated and room to grow
    /// to `hard_cap` buffers of `buffer_size` bytes each.
    ///
    /// # Panics
    /// Panics if `initial > hard_cap` or `hard_cap > u16::MAX` slots.
    #[must_use]
    pub fn new(initial: usize, hard_cap: usize, buffer_size: usize, name: &'static str) -> Self {
        assert!(initial <= hard_cap, "initial pool size exceeds hard cap");
        assert!(hard_cap <= usize::from(u16::MAX), "pool cap exceeds slot id range");

        let mut state = PoolState {
            free: Vec::with_capacity(hard_cap),
            outstanding: Vec::with_capacity(hard_cap),
        };
        for slot in 0..initial {
            state.free.push(PoolBuffer {
                slot: slot as u16,
                data: aligned_buffer(buffer_size),
            });
            state.outstanding.push(false);
        }

        Self {
            state: Mutex::new(state),
            buffer_size,
            hard_cap,
            name,
        }
    }

    /// Take a buffer from the free list, O(1).
    ///
    /// Grows the pool by one buffer if the free list is empty and the hard
    /// cap has not been reached.
    ///
    /// # Errors
    /// [`Error::Exhausted`] once `hard_cap` buffers are all checked out.
    pub fn allocate(&self) -> Result<PoolBuffer> {
        let mut state = self.state.lock();
        if let Some(buf) = state.free.pop() {
            state.outstanding[usize::from(buf.slot)] = true;
            return Ok(buf);
        }
        if state.outstanding.len() < self.hard_cap {
            let slot = state.outstanding.len() as u16;
            state.outstanding.push(true);
            log::debug!(
                "[POOL] {}: grown to {} buffers",
                self.name,
                state.outstanding.len()
            );
            return Ok(PoolBuffer {
                slot,
                data: aligned_buffer(self.buffer_size),
            });
        }
        Err(Error::Exhausted)
    }

    /// Return a buffer to the free list.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] when the buffer is not currently checked
    /// out of this pool (double free, or a foreign buffer).
    pub fn free(&self, buf: PoolBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let slot = usize::from(buf.slot);
        if slot >= state.outstanding.len() || !state.outstanding[slot] {
            return Err(Error::InvalidArgument(format!(
                "{}: double free of pool buffer {}",
                self.name, buf.slot
            )));
        }
        state.outstanding[slot] = false;
        state.free.push(buf);
        Ok(())
    }

    /// Number of buffers currently checked out.
    #[must_use]
    pub fn used(&self) -> usize {
        let state = self.state.lock();
        state.outstanding.iter().filter(|o| **o).count()
    }

    /// Number of buffers created so far (free + checked out).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Size of each buffer, in bytes.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Allocate an 8-byte-aligned zeroed byte buffer.
///
/// Uses a raw allocation with an explicit 8-byte-aligned layout; frame
/// sizes are always a multiple of 8.
fn aligned_buffer(size: usize) -> Box<[u8]> {
    assert!(size % 8 == 0, "buffer size must be a multiple of 8");
    if size == 0 {
        return Box::new([]);
    }
    let layout = std::alloc::Layout::from_size_align(size, 8).expect("valid layout");
    unsafe {
        let ptr = std::alloc::alloc_zeroed(layout);
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Box::from_raw(std::slice::from_raw_parts_mut(ptr, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_release_cycle() {
        let pool = MemoryPool::new(2, 4, 256, "test");
        let a = pool.allocate().expect("allocation should succeed");
        let b = pool.allocate().expect("allocation should succeed");
        assert_eq!(pool.used(), 2);
        assert_ne!(a.slot(), b.slot());

        pool.free(a).expect("free should succeed");
        assert_eq!(pool.used(), 1);
        pool.free(b).expect("free should succeed");
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_grows_to_hard_cap_then_fails() {
        let pool = MemoryPool::new(1, 3, 64, "test");
        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.allocate().expect("allocation under cap should succeed"));
        }
        assert_eq!(pool.capacity(), 3);
        assert!(matches!(pool.allocate(), Err(Error::Exhausted)));

        pool.free(held.pop().expect("buffer should exist"))
            .expect("free should succeed");
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn test_double_free_detected() {
        let pool = MemoryPool::new(1, 1, 64, "test");
        let buf = pool.allocate().expect("allocation should succeed");
        let slot = buf.slot();
        pool.free(buf).expect("first free should succeed");

        // Forge a second return of the same slot; the pool must reject it.
        let forged = PoolBuffer {
            slot,
            data: aligned_buffer(64),
        };
        assert!(matches!(pool.free(forged), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_buffers_are_aligned_and_sized() {
        let pool = MemoryPool::new(1, 1, 4096, "test");
        let buf = pool.allocate().expect("allocation should succeed");
        assert_eq!(buf.as_slice().len(), 4096);
        assert_eq!(buf.as_slice().as_ptr() as usize % 8, 0);
        pool.free(buf).expect("free should succeed");
    }
}
