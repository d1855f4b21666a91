//! Realtime-safe primitives shared by the audio thread and background threads
//!
//! - [`RingBuffer`]: fixed-capacity single-producer/single-consumer sample ring
//!   on top of `rtrb`, with monotonic read/write positions for seek fences
//! - [`RtCell`]: exclusive-access cell the audio thread claims with
//!   `try_lock()`, skipping work instead of waiting
//!
//! Neither type allocates after construction.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, TryLockError};

// ═══════════════════════════════════════════════════════════════════════════
// RingBuffer
// ═══════════════════════════════════════════════════════════════════════════

/// Constructor namespace for the two halves of a ring buffer
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

impl<T: Copy> RingBuffer<T> {
    /// Allocate a ring of `capacity` slots and split it into its two halves
    ///
    /// Capacity is fixed for the life of the buffer; resizing means building a
    /// new one once both halves have been dropped.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (Producer<T>, Consumer<T>) {
        let capacity = capacity.max(1);
        let (producer, consumer) = rtrb::RingBuffer::<T>::new(capacity);
        (
            Producer {
                inner: producer,
                capacity,
                written: 0,
            },
            Consumer {
                inner: consumer,
                capacity,
                read: 0,
            },
        )
    }
}

/// Writing half of a [`RingBuffer`]
pub struct Producer<T> {
    inner: rtrb::Producer<T>,
    capacity: usize,
    /// Total elements ever written
    written: u64,
}

impl<T: Copy> Producer<T> {
    /// Copy as many elements as fit. Never blocks, never overwrites unread data.
    ///
    /// Returns the number of elements written (possibly 0).
    pub fn write(&mut self, data: &[T]) -> usize {
        let n = self.inner.slots().min(data.len());
        if n == 0 {
            return 0;
        }
        let Ok(chunk) = self.inner.write_chunk_uninit(n) else {
            return 0;
        };
        let written = chunk.fill_from_iter(data[..n].iter().copied());
        self.written += written as u64;
        written
    }

    /// Free slots (elements that can be written right now)
    pub fn free(&self) -> usize {
        self.inner.slots()
    }

    /// Elements written but not yet consumed
    pub fn available(&self) -> usize {
        self.capacity - self.inner.slots()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Monotonic count of elements ever written
    pub fn write_position(&self) -> u64 {
        self.written
    }
}

/// Reading half of a [`RingBuffer`]
pub struct Consumer<T> {
    inner: rtrb::Consumer<T>,
    capacity: usize,
    /// Total elements ever consumed
    read: u64,
}

impl<T: Copy> Consumer<T> {
    /// Copy up to `out.len()` elements. Never blocks.
    ///
    /// Returns the number of elements read (possibly 0).
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let n = self.inner.slots().min(out.len());
        if n == 0 {
            return 0;
        }
        let Ok(chunk) = self.inner.read_chunk(n) else {
            return 0;
        };
        let (first, second) = chunk.as_slices();
        out[..first.len()].copy_from_slice(first);
        out[first.len()..n].copy_from_slice(second);
        chunk.commit_all();
        self.read += n as u64;
        n
    }

    /// Discard up to `n` readable elements, returning how many were dropped
    pub fn skip(&mut self, n: usize) -> usize {
        let n = self.inner.slots().min(n);
        if n == 0 {
            return 0;
        }
        let Ok(chunk) = self.inner.read_chunk(n) else {
            return 0;
        };
        chunk.commit_all();
        self.read += n as u64;
        n
    }

    /// Discard everything written before `position` (a producer write position).
    /// A position already consumed is a no-op.
    pub fn skip_to(&mut self, position: u64) {
        let written = self.read + self.inner.slots() as u64;
        let target = position.min(written);
        if target > self.read {
            self.skip((target - self.read) as usize);
        }
    }

    /// Discard everything currently readable
    pub fn clear(&mut self) {
        self.skip(self.inner.slots());
    }

    /// Elements ready to read
    pub fn available(&self) -> usize {
        self.inner.slots()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Monotonic count of elements ever read
    pub fn read_position(&self) -> u64 {
        self.read
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RtCell
// ═══════════════════════════════════════════════════════════════════════════

/// Exclusive-access cell that never makes the audio thread wait
///
/// The realtime thread calls [`RtCell::try_borrow_mut`] and simply skips work
/// when another thread holds the value. Control threads that must get in
/// (e.g. after a driver stop) spin on the same `try_lock()` rather than
/// parking, so releasing the claim never has a sleeper to wake.
pub struct RtCell<T> {
    value: Mutex<T>,
}

impl<T> RtCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Claim the value, or `None` if another thread holds it
    pub fn try_borrow_mut(&self) -> Option<RtGuard<'_, T>> {
        match self.value.try_lock() {
            Ok(guard) => Some(RtGuard { guard }),
            // A panicked holder left the value as it was; keep using it
            Err(TryLockError::Poisoned(poisoned)) => Some(RtGuard {
                guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Claim the value, yielding until it is free. Never call from the audio thread.
    pub fn borrow_mut_blocking(&self) -> RtGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_borrow_mut() {
                return guard;
            }
            std::thread::yield_now();
        }
    }

    pub fn into_inner(self) -> T {
        self.value
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Guard returned by [`RtCell::try_borrow_mut`]; releases the claim on drop
pub struct RtGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for RtGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RtGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_partial_write_when_full() {
        let (mut tx, mut rx) = RingBuffer::<f32>::new(4);
        assert_eq!(tx.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(tx.write(&[4.0, 5.0, 6.0]), 1);
        assert_eq!(tx.free(), 0);

        let mut out = [0.0; 8];
        assert_eq!(rx.read(&mut out), 4);
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rx.read(&mut out), 0);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let (mut tx, mut rx) = RingBuffer::<u32>::new(5);
        let mut out = [0u32; 3];
        for round in 0..10u32 {
            let base = round * 3;
            assert_eq!(tx.write(&[base, base + 1, base + 2]), 3);
            assert_eq!(rx.read(&mut out), 3);
            assert_eq!(out, [base, base + 1, base + 2]);
        }
    }

    #[test]
    fn test_skip_to_discards_prefix() {
        let (mut tx, mut rx) = RingBuffer::<u32>::new(16);
        tx.write(&[1, 2, 3, 4]);
        let fence = tx.write_position();
        tx.write(&[10, 11]);

        rx.skip_to(fence);
        let mut out = [0u32; 4];
        assert_eq!(rx.read(&mut out), 2);
        assert_eq!(&out[..2], &[10, 11]);

        // Already past the fence: no-op
        rx.skip_to(fence);
        assert_eq!(rx.read_position(), 6);
    }

    #[test]
    fn test_skip_to_clamps_to_write_position() {
        let (mut tx, mut rx) = RingBuffer::<u32>::new(8);
        tx.write(&[1, 2]);
        rx.skip_to(100);
        assert_eq!(rx.available(), 0);
        assert_eq!(rx.read_position(), 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u16>),
        Read(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::collection::vec(any::<u16>(), 0..40).prop_map(Op::Write),
            (0usize..40).prop_map(Op::Read),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_fifo_model(capacity in 1usize..32, ops in proptest::collection::vec(op_strategy(), 1..64)) {
            let (mut tx, mut rx) = RingBuffer::<u16>::new(capacity);
            let mut model: VecDeque<u16> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(data) => {
                        let expected = data.len().min(capacity - model.len());
                        let n = tx.write(&data);
                        prop_assert_eq!(n, expected);
                        model.extend(&data[..n]);
                    }
                    Op::Read(len) => {
                        let mut out = vec![0u16; len];
                        let n = rx.read(&mut out);
                        prop_assert_eq!(n, len.min(model.len()));
                        for value in &out[..n] {
                            prop_assert_eq!(Some(*value), model.pop_front());
                        }
                    }
                }
                prop_assert!(rx.available() <= capacity);
                prop_assert_eq!(rx.available(), model.len());
                prop_assert_eq!(tx.free(), capacity - model.len());
            }
        }
    }

    #[test]
    fn test_concurrent_sequence_integrity() {
        const TOTAL: u64 = 200_000;
        let (mut tx, mut rx) = RingBuffer::<u64>::new(257);

        let producer = thread::spawn(move || {
            let mut next = 0u64;
            let mut chunk = [0u64; 31];
            while next < TOTAL {
                let len = chunk.len().min((TOTAL - next) as usize);
                for (i, v) in chunk[..len].iter_mut().enumerate() {
                    *v = next + i as u64;
                }
                let n = tx.write(&chunk[..len]);
                assert!(tx.available() <= tx.capacity());
                next += n as u64;
                if n == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0u64;
        let mut out = [0u64; 17];
        while expected < TOTAL {
            assert!(rx.available() <= rx.capacity());
            let n = rx.read(&mut out);
            for v in &out[..n] {
                assert_eq!(*v, expected);
                expected += 1;
            }
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_rt_cell_is_exclusive() {
        let cell = RtCell::new(5u32);
        let mut guard = cell.try_borrow_mut().unwrap();
        assert!(cell.try_borrow_mut().is_none());
        *guard += 1;
        drop(guard);
        assert_eq!(*cell.try_borrow_mut().unwrap(), 6);
    }

    #[test]
    fn test_rt_cell_concurrent_increments() {
        let cell = Arc::new(RtCell::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *cell.borrow_mut_blocking() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*cell.borrow_mut_blocking(), 40_000);
    }
}
