use std::fmt::Display;

use thiserror::Error;

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// capacity of main memory unless configured otherwise (16 MiB).
pub const RAM_BYTE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(usize);

impl Addr {
    pub fn new(v: usize) -> Self {
        Self(v)
    }
    pub fn inner(self) -> usize {
        self.0
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryAccessError {
    #[error("access of {len} bytes at {addr} out of range for memory of {capacity} bytes")]
    OutOfBounds {
        addr: Addr,
        len: usize,
        capacity: usize,
    },
}

pub type Result<T> = std::result::Result<T, MemoryAccessError>;

/// Flat byte-addressed main memory. Only touched by block fills and
/// write-backs of dirty frames.
pub struct Memory {
    inner: Vec<u8>,
    #[cfg(feature = "stat")]
    stat: stat::MemoryStat,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: vec![0; capacity],
            #[cfg(feature = "stat")]
            stat: Default::default(),
        }
    }
    pub fn capacity(&self) -> usize {
        self.inner.len()
    }
    /// fails unless `addr..addr + len` lies inside memory.
    pub fn bounds_check(&self, addr: Addr, len: usize) -> Result<()> {
        self.range(addr, len).map(|_| ())
    }
    fn range(&self, addr: Addr, len: usize) -> Result<std::ops::Range<usize>> {
        let start = addr.inner();
        match start.checked_add(len) {
            Some(end) if end <= self.inner.len() => Ok(start..end),
            _ => Err(MemoryAccessError::OutOfBounds {
                addr,
                len,
                capacity: self.inner.len(),
            }),
        }
    }
    /// bytes at `addr..addr + len`, without counting it as a fill.
    pub fn peek(&self, addr: Addr, len: usize) -> Result<&[u8]> {
        let r = self.range(addr, len)?;
        Ok(&self.inner[r])
    }
    /// copy `buf.len()` bytes starting at `addr` into `buf`.
    pub fn fill_block(&mut self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        let r = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.inner[r]);
        #[cfg(feature = "stat")]
        self.stat.on_fill();
        log::trace!("fill {} bytes from {addr}", buf.len());
        Ok(())
    }
    /// copy `block` into memory starting at `addr`.
    pub fn write_back(&mut self, addr: Addr, block: &[u8]) -> Result<()> {
        let r = self.range(addr, block.len())?;
        self.inner[r].copy_from_slice(block);
        #[cfg(feature = "stat")]
        self.stat.on_write_back();
        log::trace!("write back {} bytes to {addr}", block.len());
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(RAM_BYTE_SIZE)
    }
}

#[cfg(feature = "stat")]
impl AddStats for Memory {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Clone, Copy, Default)]
    pub struct MemoryStat {
        fills: usize,
        write_backs: usize,
    }

    impl MemoryStat {
        pub fn on_fill(&mut self) {
            self.fills += 1;
        }
        pub fn on_write_back(&mut self) {
            self.write_backs += 1;
        }
    }

    impl Stat for MemoryStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(MemoryStatView { stat: self })
        }
    }

    pub struct MemoryStatView<'a> {
        stat: &'a MemoryStat,
    }

    impl StatView for MemoryStatView<'_> {
        fn header(&self) -> &'static str {
            "main memory traffic (in blocks)"
        }
        fn width(&self) -> usize {
            31
        }
    }

    impl fmt::Display for MemoryStatView<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "  fills:      {:>11}", self.stat.fills)?;
            write!(f, "  write-backs:{:>11}", self.stat.write_backs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_display() {
        assert_eq!("0x0", Addr::new(0).to_string());
        assert_eq!("0x400", Addr::new(0x400).to_string());
        assert_eq!("0xdeadbeef", Addr::new(0xDEADBEEF).to_string());
    }
    #[test]
    fn test_fill_and_write_back() {
        let mut m = Memory::new(64);
        m.write_back(Addr::new(16), &[1, 2, 3, 4]).unwrap();
        let mut buf = [0; 8];
        m.fill_block(Addr::new(16), &mut buf).unwrap();
        assert_eq!([1u8, 2, 3, 4, 0, 0, 0, 0], buf);
        assert_eq!(&[0u8, 0][..], m.peek(Addr::new(14), 2).unwrap());
    }
    #[test]
    fn test_out_of_bounds() {
        let mut m = Memory::new(64);
        let mut buf = [0; 16];
        assert_eq!(
            Err(MemoryAccessError::OutOfBounds {
                addr: Addr::new(56),
                len: 16,
                capacity: 64
            }),
            m.fill_block(Addr::new(56), &mut buf)
        );
        assert!(m.write_back(Addr::new(usize::MAX), &[0]).is_err());
        assert!(m.bounds_check(Addr::new(48), 16).is_ok());
        // rejected write leaves memory untouched
        assert!(m.peek(Addr::new(0), 64).unwrap().iter().all(|&b| b == 0));
    }
}
