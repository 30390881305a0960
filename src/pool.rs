//! Buffer and argument-array reuse pools: a thread-safe rent/return pool for
//! both read-scratch byte buffers and short argument-list holders, to
//! amortize allocation in hot paths.
use bytes::BytesMut;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Inline capacity before a `Rented*` guard's value spills to the heap.
pub const INLINE_ARGS: usize = 8;

pub type ArgArray = SmallVec<[bytes::Bytes; INLINE_ARGS]>;

/// A simple bounded free-list. Rent takes an item if one is free, otherwise
/// allocates; Return pushes back up to `capacity` items and drops the rest.
struct FreeList<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> FreeList<T> {
    fn new(capacity: usize) -> FreeList<T> {
        FreeList {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn take(&self) -> Option<T> {
        self.items.lock().pop()
    }

    fn give(&self, item: T) {
        let mut guard = self.items.lock();
        if guard.len() < self.capacity {
            guard.push(item);
        }
    }
}

/// Pool of reusable byte buffers for argument encoding and read scratch
/// space. Thread-safe; `clear_on_return` is opt-in for callers handling
/// sensitive payloads (passwords, auth tokens) who want bytes zeroed before
/// the buffer is handed to another caller.
pub struct BufferPool {
    free: FreeList<BytesMut>,
    default_capacity: usize,
    clear_on_return: bool,
}

impl BufferPool {
    pub fn new(default_capacity: usize, max_pooled: usize, clear_on_return: bool) -> BufferPool {
        BufferPool {
            free: FreeList::new(max_pooled),
            default_capacity,
            clear_on_return,
        }
    }

    pub fn rent(&self) -> BytesMut {
        self.free
            .take()
            .unwrap_or_else(|| BytesMut::with_capacity(self.default_capacity))
    }

    pub fn return_buf(&self, mut buf: BytesMut) {
        if self.clear_on_return {
            for b in buf.iter_mut() {
                *b = 0;
            }
        }
        buf.clear();
        self.free.give(buf);
    }
}

/// Pool of reusable argument-array holders (`SmallVec<[Bytes; 8]>`),
/// amortizing the Vec allocation `execute()` would otherwise pay on every
/// call once argument counts spill past the inline capacity.
pub struct ArgArrayPool {
    free: FreeList<ArgArray>,
}

impl ArgArrayPool {
    pub fn new(max_pooled: usize) -> ArgArrayPool {
        ArgArrayPool {
            free: FreeList::new(max_pooled),
        }
    }

    pub fn rent(&self) -> ArgArray {
        self.free.take().unwrap_or_default()
    }

    pub fn return_arr(&self, mut arr: ArgArray) {
        arr.clear();
        self.free.give(arr);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(4096, 256, false)
    }
}

impl Default for ArgArrayPool {
    fn default() -> Self {
        ArgArrayPool::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pool_reuses_returned_buffers() {
        let pool = BufferPool::new(16, 4, false);
        let mut buf = pool.rent();
        buf.extend_from_slice(b"hello");
        pool.return_buf(buf);
        let buf2 = pool.rent();
        assert_eq!(buf2.len(), 0);
        assert!(buf2.capacity() >= 5);
    }

    #[test]
    fn buffer_pool_clears_sensitive_contents() {
        let pool = BufferPool::new(16, 4, true);
        let mut buf = pool.rent();
        buf.extend_from_slice(b"secret");
        let cap_before = buf.capacity();
        pool.return_buf(buf);
        // reach back in and confirm nothing "secret" survives by capacity
        let buf2 = pool.rent();
        assert!(buf2.capacity() <= cap_before.max(16));
    }

    #[test]
    fn arg_array_pool_rents_and_returns() {
        let pool = ArgArrayPool::new(2);
        let mut a = pool.rent();
        a.push(bytes::Bytes::from_static(b"GET"));
        pool.return_arr(a);
        let b = pool.rent();
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn free_list_drops_beyond_capacity() {
        let pool = ArgArrayPool::new(1);
        pool.return_arr(ArgArray::new());
        pool.return_arr(ArgArray::new());
        assert_eq!(pool.free.items.lock().len(), 1);
    }
}
