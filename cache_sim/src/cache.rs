use std::collections::VecDeque;

use crate::geometry::Geometry;

#[cfg(feature = "stat")]
pub use stat::CacheStat;
#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// One cached copy of a memory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    block: Vec<u8>,
    tag: usize,
    valid: bool,
    dirty: bool,
}

impl Frame {
    /// a valid frame holding `block`, dirty from the start when the access
    /// that caused the fill is a store.
    pub fn new(block: Vec<u8>, tag: usize, dirty: bool) -> Self {
        Self {
            block,
            tag,
            valid: true,
            dirty,
        }
    }
    pub fn tag(&self) -> usize {
        self.tag
    }
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn block(&self) -> &[u8] {
        &self.block
    }
    /// overwrite `data.len()` bytes at `offset` and mark the frame dirty.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        self.dirty = true;
        self.block[offset..offset + data.len()].copy_from_slice(data);
    }
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.block[offset..offset + len]
    }
}

/// Frames sharing one index, oldest first.
#[derive(Debug, Clone)]
pub struct CacheSet {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl CacheSet {
    pub fn new(associativity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(associativity),
            capacity: associativity,
        }
    }
    pub fn lookup(&self, tag: usize) -> Option<&Frame> {
        self.frames.iter().find(|f| f.valid && f.tag == tag)
    }
    pub fn lookup_mut(&mut self, tag: usize) -> Option<&mut Frame> {
        self.frames.iter_mut().find(|f| f.valid && f.tag == tag)
    }
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// the frame `evict_oldest` would remove.
    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.front()
    }
    /// remove the longest-resident frame. `None` only when the set is empty.
    pub fn evict_oldest(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
    /// append `frame` as the newest member and hand back a reference to it.
    /// The caller evicts first when the set is full.
    pub fn insert(&mut self, frame: Frame) -> &mut Frame {
        debug_assert!(!self.is_full(), "insert into a full set");
        debug_assert!(self.lookup(frame.tag).is_none(), "duplicate tag in set");
        self.frames.push_back(frame);
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

pub struct Cache {
    sets: Vec<CacheSet>,
    #[cfg(feature = "stat")]
    stat: CacheStat,
}

impl Cache {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            sets: (0..geometry.num_sets())
                .map(|_| CacheSet::new(geometry.associativity()))
                .collect(),
            #[cfg(feature = "stat")]
            stat: Default::default(),
        }
    }
    pub fn set(&self, index: usize) -> Option<&CacheSet> {
        self.sets.get(index)
    }
    /// panics if `index` is not below the number of sets.
    pub fn set_mut(&mut self, index: usize) -> &mut CacheSet {
        &mut self.sets[index]
    }
    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }
    pub fn lookup(&self, index: usize, tag: usize) -> Option<&Frame> {
        self.sets.get(index).and_then(|s| s.lookup(tag))
    }
    /// number of frames currently resident in the whole cache.
    pub fn resident(&self) -> usize {
        self.sets.iter().map(CacheSet::len).sum()
    }
    #[cfg(feature = "stat")]
    pub(crate) fn stat_mut(&mut self) -> &mut CacheStat {
        &mut self.stat
    }
    #[cfg(feature = "stat")]
    pub fn stat(&self) -> &CacheStat {
        &self.stat
    }
}

#[cfg(feature = "stat")]
impl AddStats for Cache {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
    pub struct CacheStat {
        pub load_hits: usize,
        pub load_misses: usize,
        pub store_hits: usize,
        pub store_misses: usize,
        pub clean_replacements: usize,
        pub dirty_replacements: usize,
    }

    impl CacheStat {
        pub fn on_load(&mut self, hit: bool) {
            if hit {
                self.load_hits += 1
            } else {
                self.load_misses += 1
            }
        }
        pub fn on_store(&mut self, hit: bool) {
            if hit {
                self.store_hits += 1
            } else {
                self.store_misses += 1
            }
        }
        pub fn on_replacement(&mut self, dirty: bool) {
            if dirty {
                self.dirty_replacements += 1
            } else {
                self.clean_replacements += 1
            }
        }
        pub fn hits(&self) -> usize {
            self.load_hits + self.store_hits
        }
        pub fn accesses(&self) -> usize {
            self.hits() + self.load_misses + self.store_misses
        }
        pub fn hit_rate(&self) -> f64 {
            percentage(self.hits(), self.accesses())
        }
    }

    impl Stat for CacheStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ CacheStat {
        fn header(&self) -> &'static str {
            "cache accesses (format: `# of hit / # of miss`)"
        }
        fn width(&self) -> usize {
            36
        }
    }

    impl fmt::Display for &'_ CacheStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            macro_rules! output {
                ($name:expr => $hit:ident / $miss:ident) => {
                    writeln!(f, "  {:>6}:{:>11} /{:>11}", $name, self.$hit, self.$miss)
                };
            }
            output!("load" => load_hits / load_misses)?;
            output!("store" => store_hits / store_misses)?;
            writeln!(
                f,
                "  replacements: {} clean, {} dirty",
                self.clean_replacements, self.dirty_replacements
            )?;
            write!(f, "  hit rate: {:.2} %", self.hit_rate())
        }
    }
}
