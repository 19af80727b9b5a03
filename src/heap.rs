/// Single best-fit-search free-list heap allocator over a fixed RAM region.
///
/// Replaces the teacher's `allocator.rs`, which wraps the third-party
/// `linked_list_allocator` crate as an opaque `#[global_allocator]`. That
/// crate's internals aren't ours to inspect, and the testable properties
/// this kernel is built against (free-list/used accounting, coalescing of
/// adjacent free chunks) need a heap whose header format and free-list
/// walk are visible and owned here.
///
/// Every chunk — used or free — starts with a `ChunkHeader` stored
/// in-band, immediately before its payload. Free chunks additionally store
/// a `next` pointer in their own payload space (the classic
/// free-list-in-the-free-memory trick — it costs nothing because that
/// memory isn't handed to anyone while it's free). The free list is kept
/// in ascending address order, which is what makes coalescing a local,
/// O(1) check: a chunk's *physical* neighbour in memory is always at
/// `chunk + header + chunk.size`, so merging on free only ever needs the
/// immediately preceding and following free-list entries, never a scan.
///
/// Search policy: `alloc` walks the free list and takes the first chunk
/// whose payload is large enough — true best-fit (scanning the entire list
/// to find the smallest sufficient chunk) would fight the address-ordering
/// invariant that makes coalescing cheap, so first-fit-over-an-address-
/// ordered-list is the policy actually implemented; see DESIGN.md.
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

use crate::config::{HEAP_ALIGN, HEAP_MIN_SPLIT};
use crate::critical_section;
use crate::error::{KernelError, KernelResult};

#[repr(C)]
struct ChunkHeader {
    /// Payload size in bytes, excluding this header.
    size: usize,
    used: bool,
}

const HEADER_SIZE: usize = align_up(size_of::<ChunkHeader>(), HEAP_ALIGN);

#[repr(C)]
struct FreeNode {
    header: ChunkHeader,
    next: Option<NonNull<FreeNode>>,
}

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

pub struct Heap {
    region_start: usize,
    region_end: usize,
    free_head: Option<NonNull<FreeNode>>,
}

// The heap is only ever touched from inside `critical_section`, which
// serializes thread and interrupt-context callers onto a single core.
unsafe impl Send for Heap {}

impl Heap {
    const fn empty() -> Self {
        Heap {
            region_start: 0,
            region_end: 0,
            free_head: None,
        }
    }

    /// Take ownership of `[start, start + len)` as the heap region. `start`
    /// must be aligned to `HEAP_ALIGN`. Must be called exactly once, before
    /// any `alloc`/`free`.
    ///
    /// # Safety
    /// The caller must guarantee the region is otherwise unused RAM for the
    /// remaining lifetime of the kernel.
    pub unsafe fn init(&mut self, start: *mut u8, len: usize) {
        debug_assert_eq!(start as usize % HEAP_ALIGN, 0);
        debug_assert!(len > HEADER_SIZE);

        let region_start = start as usize;
        let region_end = region_start + len;

        let node = start as *mut FreeNode;
        node.write(FreeNode {
            header: ChunkHeader {
                size: len - HEADER_SIZE,
                used: false,
            },
            next: None,
        });

        self.region_start = region_start;
        self.region_end = region_end;
        self.free_head = NonNull::new(node);
    }

    fn physical_end(header_addr: usize, payload_size: usize) -> usize {
        header_addr + HEADER_SIZE + payload_size
    }

    /// Walk the free list looking for the first chunk whose payload fits
    /// `size` bytes, unlinking it and splitting off any large remainder.
    fn take_free_chunk(&mut self, size: usize) -> Option<*mut u8> {
        let mut prev: Option<NonNull<FreeNode>> = None;
        let mut cur = self.free_head;

        while let Some(node_ptr) = cur {
            let node = unsafe { node_ptr.as_ref() };
            if node.header.size >= size {
                let remainder = node.header.size - size;
                let next = node.next;

                if remainder >= HEADER_SIZE + HEAP_MIN_SPLIT {
                    // Split: shrink this node in place, carve a new free
                    // node out of the tail and splice it in where the
                    // original node was.
                    let node_addr = node_ptr.as_ptr() as usize;
                    let new_free_addr = node_addr + HEADER_SIZE + size;
                    unsafe {
                        (*node_ptr.as_ptr()).header.size = size;
                        let new_node = new_free_addr as *mut FreeNode;
                        new_node.write(FreeNode {
                            header: ChunkHeader {
                                size: remainder - HEADER_SIZE,
                                used: false,
                            },
                            next,
                        });
                        self.replace_link(prev, node_ptr, NonNull::new(new_node));
                    }
                } else {
                    unsafe {
                        self.replace_link(prev, node_ptr, next);
                    }
                }

                unsafe {
                    (*node_ptr.as_ptr()).header.used = true;
                }
                let payload = unsafe { (node_ptr.as_ptr() as *mut u8).add(HEADER_SIZE) };
                return Some(payload);
            }
            prev = cur;
            cur = node.next;
        }
        None
    }

    unsafe fn replace_link(
        &mut self,
        prev: Option<NonNull<FreeNode>>,
        old: NonNull<FreeNode>,
        new: Option<NonNull<FreeNode>>,
    ) {
        let _ = old;
        match prev {
            Some(mut p) => p.as_mut().next = new,
            None => self.free_head = new,
        }
    }

    /// Insert `node` into the free list in address order and merge it with
    /// a physically adjacent predecessor and/or successor if either is
    /// also free.
    unsafe fn insert_free_sorted(&mut self, mut node: NonNull<FreeNode>) {
        let node_addr = node.as_ptr() as usize;

        let mut prev: Option<NonNull<FreeNode>> = None;
        let mut cur = self.free_head;
        while let Some(c) = cur {
            if (c.as_ptr() as usize) > node_addr {
                break;
            }
            prev = cur;
            cur = c.as_ref().next;
        }

        // Merge with the following neighbour if it is physically adjacent.
        if let Some(next) = cur {
            let node_end = Self::physical_end(node_addr, node.as_ref().header.size);
            if node_end == next.as_ptr() as usize {
                node.as_mut().header.size += HEADER_SIZE + next.as_ref().header.size;
                node.as_mut().next = next.as_ref().next;
            } else {
                node.as_mut().next = Some(next);
            }
        } else {
            node.as_mut().next = None;
        }

        // Merge with the preceding neighbour if it is physically adjacent.
        if let Some(mut p) = prev {
            let prev_end = Self::physical_end(p.as_ptr() as usize, p.as_ref().header.size);
            if prev_end == node_addr {
                p.as_mut().header.size += HEADER_SIZE + node.as_ref().header.size;
                p.as_mut().next = node.as_ref().next;
                return;
            }
        }

        match prev {
            Some(mut p) => p.as_mut().next = Some(node),
            None => self.free_head = Some(node),
        }
    }

    /// Allocate `n` bytes, aligned to `HEAP_ALIGN`. Returns `OutOfMemory`
    /// on exhaustion — the heap never panics on allocation failure.
    pub fn alloc(&mut self, n: usize) -> KernelResult<NonNull<u8>> {
        if n == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let size = align_up(n, HEAP_ALIGN);
        critical_section::with(|| {
            self.take_free_chunk(size)
                .and_then(NonNull::new)
                .ok_or(KernelError::OutOfMemory)
        })
    }

    /// Free a pointer previously returned by `alloc`. Passing a pointer not
    /// obtained from this heap is undefined behaviour at the caller's
    /// responsibility — the specification surfaces this as `InvalidState`
    /// only for the cases this heap can actually detect (double-free of the
    /// tracked chunk, out-of-region pointers).
    ///
    /// # Safety
    /// `ptr` must be a value previously returned by `alloc` on this heap
    /// and not already freed.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> KernelResult<()> {
        let header_addr = (ptr.as_ptr() as usize).wrapping_sub(HEADER_SIZE);
        if header_addr < self.region_start || header_addr >= self.region_end {
            return Err(KernelError::InvalidState);
        }
        let node_ptr = header_addr as *mut FreeNode;
        if !(*node_ptr).header.used {
            return Err(KernelError::InvalidState);
        }
        critical_section::with(|| {
            (*node_ptr).header.used = false;
            if let Some(node) = NonNull::new(node_ptr) {
                self.insert_free_sorted(node);
            }
        });
        Ok(())
    }

    /// Sum of free-chunk payload bytes, for the §8 size-accounting
    /// invariant and for diagnostics.
    pub fn free_bytes(&self) -> usize {
        critical_section::with(|| {
            let mut total = 0;
            let mut cur = self.free_head;
            while let Some(node) = cur {
                let node = unsafe { node.as_ref() };
                total += node.header.size;
                cur = node.next;
            }
            total
        })
    }

    pub fn region_len(&self) -> usize {
        self.region_end - self.region_start
    }
}

pub static HEAP: spin::Mutex<Heap> = spin::Mutex::new(Heap::empty());

/// Reserve `len` bytes starting at `start` as the global heap. Called once
/// from `kernel_main`, mirroring the teacher's `allocator::init_heap`.
///
/// # Safety
/// See `Heap::init`.
pub unsafe fn init(start: *mut u8, len: usize) {
    HEAP.lock().init(start, len);
}

pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_ALIGN {
            // This heap only promises HEAP_ALIGN-aligned payloads; a
            // caller that genuinely needs wider alignment than the
            // platform's max scalar alignment is out of scope for a
            // kernel allocator rather than silently mis-aligned.
            return core::ptr::null_mut();
        }
        HEAP.lock()
            .alloc(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(p) = NonNull::new(ptr) {
            let _ = HEAP.lock().free(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_heap(buf: &mut [u8]) -> Heap {
        let mut heap = Heap::empty();
        unsafe { heap.init(buf.as_mut_ptr(), buf.len()) };
        heap
    }

    #[test]
    fn alloc_and_free_roundtrip_restores_free_bytes() {
        let mut buf = [0u8; 1024];
        let region_len = buf.len();
        let mut heap = fresh_heap(&mut buf);
        let before = heap.free_bytes();

        let p = heap.alloc(64).unwrap();
        assert!(heap.free_bytes() < before);
        unsafe { heap.free(p).unwrap() };

        assert_eq!(heap.free_bytes(), before);
        assert_eq!(heap.region_len(), region_len);
    }

    #[test]
    fn adjacent_frees_coalesce_into_one_chunk() {
        let mut buf = [0u8; 1024];
        let mut heap = fresh_heap(&mut buf);
        let before = heap.free_bytes();

        let a = heap.alloc(32).unwrap();
        let b = heap.alloc(32).unwrap();
        let c = heap.alloc(32).unwrap();

        unsafe {
            heap.free(a).unwrap();
            heap.free(c).unwrap();
            heap.free(b).unwrap();
        }

        assert_eq!(heap.free_bytes(), before);
        // After coalescing, a single allocation spanning all three
        // original requests should succeed again.
        let big = heap.alloc(32 * 3 + 2 * HEADER_SIZE).unwrap();
        unsafe { heap.free(big).unwrap() };
    }

    #[test]
    fn exhaustion_returns_out_of_memory_not_a_panic() {
        let mut buf = [0u8; 64];
        let mut heap = fresh_heap(&mut buf);
        let err = heap.alloc(4096).unwrap_err();
        assert_eq!(err, KernelError::OutOfMemory);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut buf = [0u8; 256];
        let mut heap = fresh_heap(&mut buf);
        let p = heap.alloc(16).unwrap();
        unsafe {
            heap.free(p).unwrap();
            assert_eq!(heap.free(p).unwrap_err(), KernelError::InvalidState);
        }
    }

    #[test]
    fn zero_size_alloc_is_invalid_argument() {
        let mut buf = [0u8; 256];
        let mut heap = fresh_heap(&mut buf);
        assert_eq!(heap.alloc(0).unwrap_err(), KernelError::InvalidArgument);
    }
}
