//! Cache geometry and address decomposition.

use std::fmt;

use thiserror::Error;

use crate::{bin, memory::Addr};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    #[error("{what} must be non-zero")]
    Zero { what: &'static str },
    #[error("cache size of {cache_size_kb} KiB is too large")]
    TooLarge { cache_size_kb: usize },
    #[error("block size {block_size} is not a power of two")]
    BlockSizeNotPowerOfTwo { block_size: usize },
    #[error("{cache_bytes} bytes do not split into whole {associativity}-way sets of {block_size}-byte blocks")]
    Indivisible {
        cache_bytes: usize,
        associativity: usize,
        block_size: usize,
    },
    #[error("number of sets {num_sets} is not a power of two")]
    SetCountNotPowerOfTwo { num_sets: usize },
}

/// Shape of the cache: how many sets, how many frames per set, how many
/// bytes per frame, plus the bit widths derived from them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    block_size: usize,
    num_sets: usize,
    associativity: usize,
    offset_bits: u32,
    index_bits: u32,
}

/// An address split into its tag, set index and offset within the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decomposed {
    pub tag: usize,
    pub index: usize,
    pub offset: usize,
}

impl Geometry {
    pub fn new(
        cache_size_kb: usize,
        associativity: usize,
        block_size: usize,
    ) -> Result<Self, GeometryError> {
        if cache_size_kb == 0 {
            return Err(GeometryError::Zero { what: "cache size" });
        }
        if associativity == 0 {
            return Err(GeometryError::Zero {
                what: "associativity",
            });
        }
        if block_size == 0 {
            return Err(GeometryError::Zero { what: "block size" });
        }
        if !block_size.is_power_of_two() {
            return Err(GeometryError::BlockSizeNotPowerOfTwo { block_size });
        }
        let cache_bytes = cache_size_kb
            .checked_mul(1024)
            .ok_or(GeometryError::TooLarge { cache_size_kb })?;
        let set_bytes = block_size
            .checked_mul(associativity)
            .filter(|&b| cache_bytes % b == 0)
            .ok_or(GeometryError::Indivisible {
                cache_bytes,
                associativity,
                block_size,
            })?;
        let num_sets = cache_bytes / set_bytes;
        if !num_sets.is_power_of_two() {
            return Err(GeometryError::SetCountNotPowerOfTwo { num_sets });
        }
        Ok(Self {
            block_size,
            num_sets,
            associativity,
            offset_bits: bin::log2(block_size),
            index_bits: bin::log2(num_sets),
        })
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }
    pub fn associativity(&self) -> usize {
        self.associativity
    }
    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }
    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }
    /// total capacity of the cache in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.block_size * self.associativity * self.num_sets
    }
    #[inline]
    pub fn decompose(&self, addr: Addr) -> Decomposed {
        let a = addr.inner();
        let tag_shift = self.offset_bits + self.index_bits;
        Decomposed {
            tag: bin::extract(a, tag_shift..usize::BITS),
            index: bin::extract(a, self.offset_bits..tag_shift),
            offset: bin::mask_lower(a, self.offset_bits),
        }
    }
    /// block-aligned address of the block identified by `tag` in set `index`.
    #[inline]
    pub fn recompose(&self, tag: usize, index: usize) -> Addr {
        Addr::new((tag << (self.index_bits + self.offset_bits)) | (index << self.offset_bits))
    }
    /// block-aligned address of the block containing `addr`.
    pub fn block_of(&self, addr: Addr) -> Addr {
        Addr::new(addr.inner() & !bin::ones(self.offset_bits))
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} KiB, {}-way, {} sets of {}-byte blocks (offset bits: {}, index bits: {})",
            self.cache_bytes() / 1024,
            self.associativity,
            self.num_sets,
            self.block_size,
            self.offset_bits,
            self.index_bits
        )
    }
}
