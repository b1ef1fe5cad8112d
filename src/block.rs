//! Raw memory blocks obtained straight from the C allocator, so that we
//! see exactly what `malloc` and the kernel do under pressure.

use libc::{c_void, size_t};
use std::io;
use std::ptr::{self, NonNull};

use errors::*;

/// How big is a page on this machine?
///
/// Falls back to 4 KiB if `sysconf` can't tell us, which only matters for
/// the page counts we log.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

/// A contiguous region of memory from `malloc`.
///
/// There is deliberately no `Drop` impl: once a `Block` goes out of scope,
/// its memory stays reserved for the rest of the process.
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    len: usize,
}

impl Block {
    /// Ask the system allocator for `len` bytes.
    ///
    /// ```
    /// let block = malloc_pressure::Block::allocate(4096).unwrap();
    /// assert_eq!(block.len(), 4096);
    /// ```
    pub fn allocate(len: usize) -> Result<Block> {
        let raw = unsafe { libc::malloc(len as size_t) } as *mut u8;
        match NonNull::new(raw) {
            Some(ptr) => Ok(Block { ptr, len }),
            None => Err(ErrorKind::Allocation(len).into()),
        }
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Ask the kernel to keep this block in physical memory.
    ///
    /// This needs `CAP_IPC_LOCK` or a generous `RLIMIT_MEMLOCK`, so callers
    /// should expect it to fail on most machines.
    pub fn lock(&self) -> Result<()> {
        let rc = unsafe { libc::mlock(self.ptr.as_ptr() as *const c_void, self.len as size_t) };
        if rc != 0 {
            return Err(io::Error::last_os_error())
                .chain_err(|| ErrorKind::Lock(self.len));
        }
        Ok(())
    }

    /// Zero every byte of the block, returning how many bytes we wrote.
    ///
    /// The stores are volatile, one byte at a time, so the compiler can't
    /// turn a never-read buffer into a no-op and every page gets faulted in.
    pub fn fill(&mut self) -> usize {
        let base = self.ptr.as_ptr();
        for i in 0..self.len {
            unsafe { ptr::write_volatile(base.add(i), 0) };
        }
        self.len
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        let size = page_size();
        assert!(size >= 512);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn fill_zeroes_every_byte() {
        let mut block = Block::allocate(3 * page_size() + 17).unwrap();
        unsafe { ptr::write_bytes(block.ptr.as_ptr(), 0xAA, block.len()) };
        assert_eq!(block.fill(), block.len());
        let bytes = unsafe {
            std::slice::from_raw_parts(block.ptr.as_ptr(), block.len())
        };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn impossible_allocation_is_reported() {
        match Block::allocate(usize::max_value() / 2) {
            Err(Error(ErrorKind::Allocation(len), _)) => {
                assert_eq!(len, usize::max_value() / 2)
            }
            other => panic!("expected allocation failure, got {:?}", other),
        }
    }

    #[test]
    fn lock_either_succeeds_or_names_the_size() {
        let block = Block::allocate(page_size()).unwrap();
        if let Err(e) = block.lock() {
            match *e.kind() {
                ErrorKind::Lock(len) => assert_eq!(len, page_size()),
                ref other => panic!("unexpected error: {}", other),
            }
        }
    }
}
