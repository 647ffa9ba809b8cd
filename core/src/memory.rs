//! Guest memory contract.
//!
//! The memory subsystem is owned by the embedder; the engine only needs
//! byte-granular reads and writes. Accesses take `&self` so one memory
//! can be shared by every guest thread and by the background compiler.

use parking_lot::RwLock;

use crate::error::Fault;
use crate::types::GuestAddress;

/// Addressable guest byte storage.
pub trait GuestMemory: Send + Sync {
    /// Fill `buf` with the bytes at `addr`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), Fault>;

    /// Store `data` at `addr`.
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), Fault>;

    fn read_u8(&self, addr: u64) -> Result<u8, Fault> {
        let mut b = [0u8; 1];
        self.read(addr, &mut b)?;
        Ok(b[0])
    }

    fn read_u16(&self, addr: u64) -> Result<u16, Fault> {
        let mut b = [0u8; 2];
        self.read(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&self, addr: u64) -> Result<u32, Fault> {
        let mut b = [0u8; 4];
        self.read(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&self, addr: u64) -> Result<u64, Fault> {
        let mut b = [0u8; 8];
        self.read(addr, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn write_u8(&self, addr: u64, val: u8) -> Result<(), Fault> {
        self.write(addr, &[val])
    }

    fn write_u16(&self, addr: u64, val: u16) -> Result<(), Fault> {
        self.write(addr, &val.to_le_bytes())
    }

    fn write_u32(&self, addr: u64, val: u32) -> Result<(), Fault> {
        self.write(addr, &val.to_le_bytes())
    }

    fn write_u64(&self, addr: u64, val: u64) -> Result<(), Fault> {
        self.write(addr, &val.to_le_bytes())
    }

    /// Fetch one instruction word.
    fn fetch_insn(&self, addr: GuestAddress) -> Result<u32, Fault> {
        self.read_u32(addr.value())
    }
}

/// Contiguous guest RAM starting at `base`.
///
/// Reads take a shared lock, writes an exclusive one; accesses outside
/// `[base, base + size)` fault.
pub struct FlatMemory {
    base: u64,
    bytes: RwLock<Vec<u8>>,
}

impl FlatMemory {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            bytes: RwLock::new(vec![0u8; size]),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.read().len()
    }

    /// Copy `data` into guest memory at `addr`.
    pub fn load(&self, addr: u64, data: &[u8]) -> Result<(), Fault> {
        self.write(addr, data)
    }

    /// Place little-endian instruction words starting at `addr`.
    pub fn load_words(&self, addr: u64, words: &[u32]) -> Result<(), Fault> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(addr, &bytes)
    }

    fn range(&self, addr: u64, len: usize, size: usize) -> Result<std::ops::Range<usize>, Fault> {
        let fault = Fault::Memory { addr, size: len };
        let start = addr.checked_sub(self.base).ok_or_else(|| fault.clone())?;
        let start = usize::try_from(start).map_err(|_| fault.clone())?;
        let end = start.checked_add(len).ok_or_else(|| fault.clone())?;
        if end > size {
            return Err(fault);
        }
        Ok(start..end)
    }
}

impl GuestMemory for FlatMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), Fault> {
        let bytes = self.bytes.read();
        let r = self.range(addr, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[r]);
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), Fault> {
        let mut bytes = self.bytes.write();
        let r = self.range(addr, data.len(), bytes.len())?;
        bytes[r].copy_from_slice(data);
        Ok(())
    }
}
