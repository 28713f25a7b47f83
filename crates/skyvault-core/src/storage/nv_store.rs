//! Byte-addressable non-volatile storage

use alloc::vec;
use alloc::vec::Vec;

use thiserror_no_std::Error;

/// A non-volatile byte store such as an I2C EEPROM.
///
/// Only the single-byte operations are required; the bulk transfers loop
/// over them by default and should be overridden where the device supports
/// sequential access.
pub trait NvStore {
    type Error: core::fmt::Debug;

    /// Size of the store in bytes.
    fn capacity(&self) -> usize;

    fn read_byte(&mut self, addr: u16) -> impl Future<Output = Result<u8, Self::Error>>;

    fn write_byte(&mut self, addr: u16, value: u8) -> impl Future<Output = Result<(), Self::Error>>;

    fn read(&mut self, addr: u16, buf: &mut [u8]) -> impl Future<Output = Result<(), Self::Error>> {
        async move {
            for (offset, byte) in buf.iter_mut().enumerate() {
                *byte = self.read_byte(addr.wrapping_add(offset as u16)).await?;
            }
            Ok(())
        }
    }

    fn write(&mut self, addr: u16, bytes: &[u8]) -> impl Future<Output = Result<(), Self::Error>> {
        async move {
            for (offset, byte) in bytes.iter().enumerate() {
                self.write_byte(addr.wrapping_add(offset as u16), *byte).await?;
            }
            Ok(())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("access of {len} bytes at {addr:#06x} exceeds the {capacity} byte store")]
    OutOfBounds { addr: u16, len: usize, capacity: usize },
}

/// RAM-backed store, erased to `0xFF` like a fresh EEPROM.
///
/// Used by host tests and the simulator, which persists [`MemoryStore::image`]
/// between runs.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub const ERASED: u8 = 0xFF;

    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![Self::ERASED; capacity],
        }
    }

    pub fn from_image(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn image(&self) -> &[u8] {
        &self.bytes
    }

    fn span(&self, addr: u16, len: usize) -> Result<core::ops::Range<usize>, MemoryStoreError> {
        let start = usize::from(addr);
        let end = start + len;
        if end > self.bytes.len() {
            return Err(MemoryStoreError::OutOfBounds {
                addr,
                len,
                capacity: self.bytes.len(),
            });
        }
        Ok(start..end)
    }
}

impl NvStore for MemoryStore {
    type Error = MemoryStoreError;

    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    async fn read_byte(&mut self, addr: u16) -> Result<u8, Self::Error> {
        let span = self.span(addr, 1)?;
        Ok(self.bytes[span.start])
    }

    async fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), Self::Error> {
        let span = self.span(addr, 1)?;
        self.bytes[span.start] = value;
        Ok(())
    }

    async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let span = self.span(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[span]);
        Ok(())
    }

    async fn write(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        let span = self.span(addr, bytes.len())?;
        self.bytes[span].copy_from_slice(bytes);
        Ok(())
    }
}
