//! Addressable memory seen by the coprocessor.
//!
//! The coprocessor never owns L1 or the tile's register windows. It is
//! handed an [`AddressableMemory`] capability at construction and uses it
//! to move bulk data (mover unit, TDMA commands) and to perform scalar
//! stores (STOREREG, STOREIND, ATSWAP).
//!
//! [`SparseMemory`] is a self-contained implementation used by the CLI and
//! tests. Storage is allocated in 4KB pages on first touch, so the full
//! 32-bit tile address space can be modelled without reserving it.
//!
//! # Usage
//!
//! ```
//! use tensix_sim::memory::{AddressableMemory, SparseMemory};
//!
//! let mut mem = SparseMemory::new();
//! mem.write_u32(0x1000, 0xDEAD_BEEF).unwrap();
//! assert_eq!(mem.read_u32(0x1000).unwrap(), 0xDEAD_BEEF);
//! assert_eq!(mem.read(0x1000, 2).unwrap(), vec![0xEF, 0xBE]);
//! ```

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

/// Error type for memory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Access falls outside the memory's address range
    AddressNotMapped(u64),
    /// Access length does not fit the requested word width
    BadLength { address: u64, len: usize },
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressNotMapped(addr) => write!(f, "Address 0x{:08x} not mapped", addr),
            Self::BadLength { address, len } => {
                write!(f, "Access of {} bytes at 0x{:08x} has the wrong width", len, address)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// Byte-addressable memory capability consumed by the coprocessor.
pub trait AddressableMemory {
    /// Read `size` bytes starting at `address`.
    fn read(&mut self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError>;

    /// Write `bytes` starting at `address`.
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError>;

    /// Size of the addressable range in bytes.
    fn size(&self) -> u64;

    /// Read a little-endian 32-bit word.
    fn read_u32(&mut self, address: u64) -> Result<u32, MemoryError> {
        let bytes = self.read(address, 4)?;
        if bytes.len() != 4 {
            return Err(MemoryError::BadLength { address, len: bytes.len() });
        }
        Ok(LittleEndian::read_u32(&bytes))
    }

    /// Write a little-endian 32-bit word.
    fn write_u32(&mut self, address: u64, value: u32) -> Result<(), MemoryError> {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.write(address, &bytes)
    }
}

/// Sparse, page-allocated memory covering `[0, size)`.
pub struct SparseMemory {
    /// page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,
    /// Addressable size in bytes
    size: u64,
    /// Statistics
    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl SparseMemory {
    /// Page size for sparse storage (4KB)
    pub const PAGE_SIZE: usize = 4096;

    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    /// Create a memory spanning the whole 32-bit tile address space.
    pub fn new() -> Self {
        Self::with_size(1 << 32)
    }

    /// Create a memory spanning `[0, size)`.
    pub fn with_size(size: u64) -> Self {
        Self {
            pages: BTreeMap::new(),
            size,
            total_bytes_written: 0,
            total_bytes_read: 0,
        }
    }

    /// Number of pages touched so far.
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Total bytes written since creation.
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Total bytes read since creation.
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    fn check_range(&self, address: u64, len: usize) -> Result<(), MemoryError> {
        let end = address.checked_add(len as u64).ok_or(MemoryError::AddressNotMapped(address))?;
        if end > self.size {
            return Err(MemoryError::AddressNotMapped(address));
        }
        Ok(())
    }

    fn read_byte(&self, address: u64) -> u8 {
        let page_addr = address & Self::PAGE_MASK;
        let offset = (address - page_addr) as usize;
        self.pages.get(&page_addr).map(|p| p[offset]).unwrap_or(0)
    }

    fn page_mut(&mut self, page_addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }
}

impl Default for SparseMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressableMemory for SparseMemory {
    fn read(&mut self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        self.check_range(address, size)?;
        let data = (0..size as u64).map(|i| self.read_byte(address + i)).collect();
        self.total_bytes_read += size as u64;
        Ok(data)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        self.check_range(address, bytes.len())?;
        let mut addr = address;
        let mut remaining = bytes;
        // Copy page by page
        while !remaining.is_empty() {
            let page_addr = addr & Self::PAGE_MASK;
            let offset = (addr - page_addr) as usize;
            let chunk = remaining.len().min(Self::PAGE_SIZE - offset);
            self.page_mut(page_addr)[offset..offset + chunk].copy_from_slice(&remaining[..chunk]);
            addr += chunk as u64;
            remaining = &remaining[chunk..];
        }
        self.total_bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
