//! Censor 932 memory subsystem.
//!
//! Memory is an 18-bit space of 16-bit half-word cells. Storage is
//! provided by backends registered over ranges of the space; a 32-bit
//! word at address `a` is the big-endian pair of the half-words at `a`
//! and `a + 1`.

use log::debug;
use serde::{Serialize, Deserialize};

/// Inclusive bounds for a registered memory backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    pub low: u32,
    pub high: u32,
}

impl MemoryRange {
    pub fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        self.low <= addr && addr <= self.high
    }

    fn overlaps(&self, other: &MemoryRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

/// The general interface for memory storage.
///
/// Addresses are cell indices local to the backend, 0-based and
/// independent of where the backend is registered in the address space.
pub trait MemoryBackend: Send {
    /// Retrieve the half-word at `addr`.
    fn fetch_half(&mut self, addr: u32) -> Result<u16, MemoryError>;

    /// Retrieve the word spanning `addr` and `addr + 1`.
    fn fetch_word(&mut self, addr: u32) -> Result<u32, MemoryError>;

    /// Store a half-word at `addr`, returning the previous value.
    fn write_half(&mut self, addr: u32, value: u16) -> Result<u16, MemoryError>;

    /// Store a word over `addr` and `addr + 1`, returning the word
    /// previously stored there.
    fn write_word(&mut self, addr: u32, value: u32) -> Result<u32, MemoryError>;
}

/// A backend registered over a range of the address space.
pub struct MemoryPlugin {
    pub range: MemoryRange,
    pub backend: Box<dyn MemoryBackend>,
}

/// Routes addresses to registered memory plugins.
#[derive(Default)]
pub struct AddressSpace {
    plugins: Vec<MemoryPlugin>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Register a backend over `range`.
    ///
    /// Fails with [`MemoryError::InvalidRange`] if the range is inverted,
    /// or [`MemoryError::Overlap`] if it collides with an
    /// already-registered plugin. The plugin list is unchanged on error.
    pub fn register(
        &mut self,
        range: MemoryRange,
        backend: Box<dyn MemoryBackend>,
    ) -> Result<(), MemoryError> {
        if range.low > range.high {
            return Err(MemoryError::InvalidRange {
                low: range.low,
                high: range.high,
            });
        }
        for plugin in &self.plugins {
            if plugin.range.overlaps(&range) {
                return Err(MemoryError::Overlap {
                    new: range,
                    existing: plugin.range,
                });
            }
        }
        debug!(
            "registering memory plugin over [{:#x}, {:#x}]",
            range.low, range.high
        );
        self.plugins.push(MemoryPlugin { range, backend });
        Ok(())
    }

    /// Find the plugin covering `addr`, returning its backend and the
    /// backend-local offset.
    pub fn resolve(&mut self, addr: u32) -> Result<(&mut dyn MemoryBackend, u32), MemoryError> {
        for plugin in &mut self.plugins {
            if plugin.range.contains(addr) {
                return Ok((plugin.backend.as_mut(), addr - plugin.range.low));
            }
        }
        Err(MemoryError::NoMemoryAt(addr))
    }

    pub fn fetch_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        let (backend, offset) = self.resolve(addr)?;
        backend.fetch_half(offset)
    }

    pub fn fetch_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        let (backend, offset) = self.resolve(addr)?;
        backend.fetch_word(offset)
    }

    pub fn write_half(&mut self, addr: u32, value: u16) -> Result<u16, MemoryError> {
        let (backend, offset) = self.resolve(addr)?;
        backend.write_half(offset, value)
    }

    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<u32, MemoryError> {
        let (backend, offset) = self.resolve(addr)?;
        backend.write_word(offset, value)
    }
}

/// A single-owner in-process backend: a contiguous run of half-words
/// allocated at construction.
#[derive(Clone, Serialize, Deserialize)]
pub struct DirectMemory {
    cells: Vec<u16>,
}

impl DirectMemory {
    /// Create a zero-filled memory of `size` half-word cells.
    pub fn new(size: u32) -> Self {
        Self {
            cells: vec![0; size as usize],
        }
    }

    /// Number of half-word cells.
    pub fn len(&self) -> u32 {
        self.cells.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copy `cells` into memory starting at `start`.
    pub fn load(&mut self, start: u32, cells: &[u16]) -> Result<(), MemoryError> {
        let start = start as usize;
        if start + cells.len() > self.cells.len() {
            return Err(MemoryError::AddressOutOfRange(
                (start + cells.len()) as u32,
            ));
        }
        self.cells[start..start + cells.len()].copy_from_slice(cells);
        Ok(())
    }

    fn cell(&self, addr: u32) -> Result<usize, MemoryError> {
        let index = addr as usize;
        if index >= self.cells.len() {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        Ok(index)
    }

    /// Index of the first cell of the word at `addr`, checking that the
    /// second cell exists too.
    fn word_cell(&self, addr: u32) -> Result<usize, MemoryError> {
        let index = addr as usize;
        if index + 1 >= self.cells.len() {
            return Err(MemoryError::AddressOutOfRange(addr));
        }
        Ok(index)
    }
}

impl MemoryBackend for DirectMemory {
    fn fetch_half(&mut self, addr: u32) -> Result<u16, MemoryError> {
        let index = self.cell(addr)?;
        Ok(self.cells[index])
    }

    fn fetch_word(&mut self, addr: u32) -> Result<u32, MemoryError> {
        let index = self.word_cell(addr)?;
        Ok((u32::from(self.cells[index]) << 16) | u32::from(self.cells[index + 1]))
    }

    fn write_half(&mut self, addr: u32, value: u16) -> Result<u16, MemoryError> {
        let index = self.cell(addr)?;
        let old = self.cells[index];
        self.cells[index] = value;
        Ok(old)
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<u32, MemoryError> {
        let index = self.word_cell(addr)?;
        let old = (u32::from(self.cells[index]) << 16) | u32::from(self.cells[index + 1]);
        self.cells[index] = (value >> 16) as u16;
        self.cells[index + 1] = (value & 0xffff) as u16;
        Ok(old)
    }
}

impl std::fmt::Debug for DirectMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|cell| **cell != 0).count();
        f.debug_struct("DirectMemory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &self.cells.len())
            .finish()
    }
}

/// Errors from plugin registration, address routing, and backend access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Registration with `low > high`.
    InvalidRange { low: u32, high: u32 },
    /// Registration collides with an existing plugin.
    Overlap {
        new: MemoryRange,
        existing: MemoryRange,
    },
    /// No plugin covers the address.
    NoMemoryAt(u32),
    /// A backend-local access past the end of the backing store.
    AddressOutOfRange(u32),
    /// The shared backend's agent has shut down.
    BackendClosed,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::InvalidRange { low, high } => {
                write!(f, "invalid memory range [{:#x}, {:#x}]", low, high)
            }
            MemoryError::Overlap { new, existing } => {
                write!(
                    f,
                    "memory range [{:#x}, {:#x}] conflicts with already-registered plugin [{:#x}, {:#x}]",
                    new.low, new.high, existing.low, existing.high
                )
            }
            MemoryError::NoMemoryAt(addr) => {
                write!(f, "no memory registered at address {:#x}", addr)
            }
            MemoryError::AddressOutOfRange(addr) => {
                write!(f, "backend address {:#x} out of range", addr)
            }
            MemoryError::BackendClosed => {
                write!(f, "shared memory backend is closed")
            }
        }
    }
}

impl std::error::Error for MemoryError {}
