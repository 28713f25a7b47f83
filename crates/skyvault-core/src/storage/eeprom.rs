//! AT24C-series I2C EEPROM backend for [`NvStore`]

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use thiserror_no_std::Error;

use super::nv_store::NvStore;

/// Largest page the driver buffers for a single write frame.
pub const MAX_PAGE_SIZE: usize = 128;

/// Internal write cycle of the AT24C family [ms].
pub const WRITE_CYCLE_MS: u32 = 5;

#[derive(Error, Debug)]
pub enum EepromError<E: core::fmt::Debug> {
    #[error("I2C bus error: {0:?}")]
    Bus(E),

    #[error("access of {len} bytes at {addr:#06x} exceeds the device")]
    OutOfBounds { addr: u16, len: usize },
}

/// EEPROM with 16-bit word addresses, sequential reads and paged writes.
pub struct At24Eeprom<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    page_size: usize,
    capacity: usize,
}

impl<I, D> At24Eeprom<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D, address: u8, page_size: usize, capacity: usize) -> Self {
        Self {
            i2c,
            delay,
            address,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            capacity,
        }
    }

    /// 32 KiB part with 64-byte pages at the default address.
    pub fn at24c256(i2c: I, delay: D) -> Self {
        Self::new(i2c, delay, 0x50, 64, 32 * 1024)
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn check(&self, addr: u16, len: usize) -> Result<(), EepromError<I::Error>> {
        if usize::from(addr) + len > self.capacity {
            return Err(EepromError::OutOfBounds { addr, len });
        }
        Ok(())
    }
}

impl<I, D> NvStore for At24Eeprom<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = EepromError<I::Error>;

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn read_byte(&mut self, addr: u16) -> Result<u8, Self::Error> {
        let mut byte = [0u8];
        self.read(addr, &mut byte).await?;
        Ok(byte[0])
    }

    async fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), Self::Error> {
        self.write(addr, &[value]).await
    }

    async fn read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.check(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c
            .write_read(self.address, &addr.to_be_bytes(), buf)
            .await
            .map_err(EepromError::Bus)
    }

    async fn write(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(addr, bytes.len())?;

        let mut frame = [0u8; 2 + MAX_PAGE_SIZE];
        let mut cursor = usize::from(addr);
        let mut rest = bytes;
        while !rest.is_empty() {
            // a frame must not cross a page boundary or it wraps within the page
            let room = self.page_size - cursor % self.page_size;
            let len = room.min(rest.len());

            frame[..2].copy_from_slice(&(cursor as u16).to_be_bytes());
            frame[2..2 + len].copy_from_slice(&rest[..len]);
            self.i2c
                .write(self.address, &frame[..2 + len])
                .await
                .map_err(EepromError::Bus)?;
            self.delay.delay_ms(WRITE_CYCLE_MS).await;

            cursor += len;
            rest = &rest[len..];
        }
        Ok(())
    }
}
