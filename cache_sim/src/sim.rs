use anyhow::{Context, Result};
use thiserror::Error;

use crate::{
    cache::{Cache, Frame},
    config::{ConfigError, SimConfig},
    event::{AccessReport, Event, Lookup},
    geometry::{Decomposed, Geometry},
    io::EventSink,
    memory::{Addr, Memory, MemoryAccessError},
    trace::{AccessKind, AccessRecord, TraceError},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccessError {
    #[error("access of {size} bytes at {addr} runs past the end of its {block_size}-byte block")]
    CrossesBlock {
        addr: Addr,
        size: usize,
        block_size: usize,
    },
    #[error("store at {addr} declares {size} bytes but carries {actual}")]
    DataLength {
        addr: Addr,
        size: usize,
        actual: usize,
    },
    #[error(transparent)]
    Memory(#[from] MemoryAccessError),
}

/// Replays accesses against a FIFO set-associative write-back cache in
/// front of a flat main memory.
pub struct Simulator {
    geometry: Geometry,
    cache: Cache,
    memory: Memory,
    processed: usize,
    #[cfg(feature = "stat")]
    stat_builder: stat::SimStatBuilder,
}

impl Simulator {
    pub fn new(config: &SimConfig) -> std::result::Result<Self, ConfigError> {
        let geometry = config.geometry()?;
        Ok(Self::with_memory(geometry, Memory::new(config.memory_bytes)))
    }
    pub fn with_memory(geometry: Geometry, memory: Memory) -> Self {
        log::info!("cache: {geometry}");
        log::info!("main memory: {} bytes", memory.capacity());
        Self {
            cache: Cache::new(&geometry),
            geometry,
            memory,
            processed: 0,
            #[cfg(feature = "stat")]
            stat_builder: stat::SimStatBuilder::new(),
        }
    }
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
    /// number of accesses replayed so far.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// reject accesses that cannot be carried out, before anything is mutated.
    fn validate(&self, access: &AccessRecord, offset: usize) -> std::result::Result<(), AccessError> {
        let block_size = self.geometry.block_size();
        if let AccessKind::Store(data) = &access.kind {
            if data.len() != access.size {
                return Err(AccessError::DataLength {
                    addr: access.addr,
                    size: access.size,
                    actual: data.len(),
                });
            }
        }
        if offset
            .checked_add(access.size)
            .map_or(true, |end| end > block_size)
        {
            return Err(AccessError::CrossesBlock {
                addr: access.addr,
                size: access.size,
                block_size,
            });
        }
        self.memory.bounds_check(access.addr, access.size)?;
        self.memory
            .bounds_check(self.geometry.block_of(access.addr), block_size)?;
        Ok(())
    }

    /// replay a single access, returning the events it produced.
    pub fn access(&mut self, access: &AccessRecord) -> std::result::Result<AccessReport, AccessError> {
        let Decomposed { tag, index, offset } = self.geometry.decompose(access.addr);
        self.validate(access, offset)?;

        let set = self.cache.set_mut(index);
        let (lookup, replacement, loaded) = match set.lookup_mut(tag) {
            Some(frame) => (Lookup::Hit, None, apply(frame, offset, access)),
            None => {
                // the victim stays resident until memory traffic can no longer fail
                let victim = if set.is_full() {
                    set.oldest()
                        .map(|v| (self.geometry.recompose(v.tag(), index), v.is_dirty()))
                } else {
                    None
                };
                if let Some((addr, true)) = victim {
                    self.memory.bounds_check(addr, self.geometry.block_size())?;
                }
                let mut block = vec![0; self.geometry.block_size()];
                self.memory
                    .fill_block(self.geometry.recompose(tag, index), &mut block)?;
                let replacement = match victim {
                    Some((addr, dirty)) => {
                        log::debug!("evict {addr} from set {index} (dirty: {dirty})");
                        if let Some(old) = set.evict_oldest().filter(|_| dirty) {
                            self.memory.write_back(addr, old.block())?;
                        }
                        Some(Event::Replacement { addr, dirty })
                    }
                    None => None,
                };
                let frame = set.insert(Frame::new(block, tag, access.is_store()));
                (Lookup::Miss, replacement, apply(frame, offset, access))
            }
        };

        #[cfg(feature = "stat")]
        {
            let stat = self.cache.stat_mut();
            if let Some(Event::Replacement { dirty, .. }) = &replacement {
                stat.on_replacement(*dirty);
            }
            if access.is_store() {
                stat.on_store(lookup.is_hit());
            } else {
                stat.on_load(lookup.is_hit());
            }
        }

        let outcome = match loaded {
            Some(data) => Event::Load {
                addr: access.addr,
                lookup,
                data,
            },
            None => Event::Store {
                addr: access.addr,
                lookup,
            },
        };
        self.processed += 1;
        log::trace!("#{} {outcome}", self.processed);
        Ok(AccessReport {
            replacement,
            outcome,
        })
    }

    /// replay every access of `trace` in order, emitting events to `sink`.
    /// Stops at the first error. Returns the number of accesses replayed.
    pub fn run<I, S>(&mut self, trace: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = std::result::Result<AccessRecord, TraceError>>,
        S: EventSink + ?Sized,
    {
        let begin = self.processed;
        for access in trace {
            let access = access?;
            let report = self
                .access(&access)
                .with_context(|| format!("failed to replay access #{}", self.processed + 1))?;
            for event in report.events() {
                sink.emit(event)?;
            }
        }
        sink.flush()?;
        let n = self.processed - begin;
        #[cfg(feature = "stat")]
        self.stat_builder.stop_timer();
        log::info!("finished replaying {n} accesses");
        Ok(n)
    }

    #[cfg(feature = "stat")]
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

/// carry out `access` on a resident frame; yields the bytes read by a load.
fn apply(frame: &mut Frame, offset: usize, access: &AccessRecord) -> Option<Vec<u8>> {
    match &access.kind {
        AccessKind::Store(data) => {
            frame.write(offset, data);
            None
        }
        AccessKind::Load => Some(frame.read(offset, access.size).to_vec()),
    }
}

#[cfg(feature = "stat")]
impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.stat_builder.finish(self.processed)));
        self.cache.add_stats(buf);
        self.memory.add_stats(buf);
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::{fmt, time};

    use crate::stat::*;

    pub struct SimStatBuilder {
        begin: time::Instant,
        elapsed: Option<time::Duration>,
    }

    impl SimStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                elapsed: None,
            }
        }
        pub fn stop_timer(&mut self) {
            self.elapsed = Some(time::Instant::now() - self.begin)
        }
        /// snapshot; a run still in progress reports the time so far.
        pub fn finish(&self, processed: usize) -> SimStat {
            SimStat {
                accesses: processed,
                elapsed: self.elapsed.unwrap_or_else(|| self.begin.elapsed()),
            }
        }
    }

    impl Default for SimStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    pub struct SimStat {
        accesses: usize,
        elapsed: time::Duration,
    }

    impl Stat for SimStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ SimStat {
        fn header(&self) -> &'static str {
            "simulator stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ SimStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>9}")?;
            let accesses = format!("#{}", self.accesses);
            write!(f, "  accesses total: {accesses:>8}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::EventLog, trace::TraceReader};

    fn reference() -> Simulator {
        Simulator::new(&SimConfig::new(1, 2, 16)).unwrap()
    }

    fn replay(sim: &mut Simulator, trace: &str) -> Vec<String> {
        let mut log = EventLog::new();
        sim.run(TraceReader::new(trace.as_bytes()), &mut log).unwrap();
        log.lines()
    }

    #[test]
    fn test_store_then_load() {
        let mut sim = reference();
        let out = replay(&mut sim, "store 0x00000000 4 aabbccdd\nload 0x00000000 4\n");
        assert_eq!(vec!["store 0x0 miss", "load 0x0 hit aabbccdd"], out);
    }
    #[test]
    fn test_eviction_fifo_dirty() {
        // 0x0, 0x200 and 0x400 all map to set 0 with 32 sets of 16 bytes
        let mut sim = reference();
        let out = replay(
            &mut sim,
            "store 0x0 4 01020304\nstore 0x200 4 05060708\nstore 0x400 4 090a0b0c\n",
        );
        assert_eq!(
            vec![
                "store 0x0 miss",
                "store 0x200 miss",
                "replacement 0x0 dirty",
                "store 0x400 miss",
            ],
            out
        );
        assert_eq!(&[1u8, 2, 3, 4, 0][..], sim.memory().peek(Addr::new(0), 5).unwrap());
    }
    #[test]
    fn test_clean_eviction_leaves_memory() {
        let mut sim = reference();
        let out = replay(&mut sim, "load 0x8 2\nload 0x208 2\nload 0x408 2\nload 0x8 2\n");
        assert_eq!(
            vec![
                "load 0x8 miss 0000",
                "load 0x208 miss 0000",
                "replacement 0x0 clean",
                "load 0x408 miss 0000",
                "replacement 0x200 clean",
                "load 0x8 miss 0000",
            ],
            out
        );
        assert!(sim
            .memory()
            .peek(Addr::new(0), 0x410)
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }
    #[test]
    fn test_hit_does_not_reorder() {
        let mut sim = reference();
        let out = replay(
            &mut sim,
            "load 0x0 1\nload 0x200 1\nstore 0x0 1 ff\nload 0x400 1\nload 0x0 1\n",
        );
        assert_eq!(
            vec![
                "load 0x0 miss 00",
                "load 0x200 miss 00",
                "store 0x0 hit",
                "replacement 0x0 dirty",
                "load 0x400 miss 00",
                "replacement 0x200 clean",
                "load 0x0 miss ff",
            ],
            out
        );
    }
    #[test]
    fn test_write_back_whole_block() {
        let mut sim = reference();
        replay(
            &mut sim,
            "store 0x1c 2 beef\nload 0x21c 1\nload 0x41c 1\n",
        );
        let block = sim.memory().peek(Addr::new(0x10), 16).unwrap();
        let mut expected = [0u8; 16];
        expected[12] = 0xbe;
        expected[13] = 0xef;
        assert_eq!(&expected[..], block);
    }
    #[test]
    fn test_read_after_write_unaligned() {
        let mut sim = reference();
        let out = replay(
            &mut sim,
            "store 0x123 5 0102030405\nload 0x123 5\nload 0x125 2\n",
        );
        assert_eq!(
            vec![
                "store 0x123 miss",
                "load 0x123 hit 0102030405",
                "load 0x125 hit 0304",
            ],
            out
        );
    }
    #[test]
    fn test_capacity_invariant() {
        let mut sim = Simulator::new(&SimConfig::new(1, 4, 16)).unwrap();
        for i in 0..200usize {
            let addr = Addr::new((i * 0x130) % 0x8000);
            let access = if i % 3 == 0 {
                AccessRecord::store(addr, vec![i as u8])
            } else {
                AccessRecord::load(addr, 1)
            };
            sim.access(&access).unwrap();
            for index in 0..sim.cache().num_sets() {
                assert!(sim.cache().set(index).unwrap().len() <= 4);
            }
        }
        assert_eq!(200, sim.processed());
    }
    #[test]
    fn test_deterministic() {
        let trace = "store 0x0 4 aabbccdd\nload 0x400 8\nstore 0x800 2 1234\nload 0x0 4\nstore 0xc00 1 ff\nload 0x800 2\n";
        let a = replay(&mut reference(), trace);
        let b = replay(&mut reference(), trace);
        assert_eq!(a, b);
    }
    #[test]
    fn test_rejects_without_mutation() {
        let mut sim = Simulator::new(&SimConfig::new(1, 2, 16).with_memory_bytes(0x1000)).unwrap();
        sim.access(&AccessRecord::store(Addr::new(0), vec![1])).unwrap();
        assert_eq!(
            Err(AccessError::CrossesBlock {
                addr: Addr::new(0xe),
                size: 4,
                block_size: 16
            }),
            sim.access(&AccessRecord::load(Addr::new(0xe), 4))
        );
        assert!(matches!(
            sim.access(&AccessRecord::load(Addr::new(0x1000), 1)),
            Err(AccessError::Memory(_))
        ));
        let bad = AccessRecord {
            addr: Addr::new(0),
            size: 2,
            kind: AccessKind::Store(vec![1]),
        };
        assert!(matches!(
            sim.access(&bad),
            Err(AccessError::DataLength { .. })
        ));
        assert_eq!(1, sim.processed());
        assert_eq!(1, sim.cache().resident());
    }
    #[test]
    fn test_rejected_miss_keeps_full_set() {
        // 0x0, 0x200 and 0x1000 share set 0; 0x1000 lies past the end of memory
        let mut sim = Simulator::new(&SimConfig::new(1, 2, 16).with_memory_bytes(0x1000)).unwrap();
        sim.access(&AccessRecord::store(Addr::new(0), vec![0xaa])).unwrap();
        sim.access(&AccessRecord::store(Addr::new(0x200), vec![0xbb])).unwrap();
        assert!(matches!(
            sim.access(&AccessRecord::load(Addr::new(0x1000), 1)),
            Err(AccessError::Memory(_))
        ));
        let set = sim.cache().set(0).unwrap();
        assert!(set.is_full());
        assert_eq!(Some(0), set.oldest().map(Frame::tag));
        assert!(set.frames().all(Frame::is_dirty));
        // no write-back happened
        assert_eq!(&[0u8][..], sim.memory().peek(Addr::new(0), 1).unwrap());
        assert_eq!(2, sim.processed());
    }
    #[test]
    fn test_run_stops_on_unknown_operation() {
        let mut sim = reference();
        let mut log = EventLog::new();
        let r = sim.run(
            TraceReader::new("load 0x0 1\nprefetch 0x10 1\nload 0x10 1\n".as_bytes()),
            &mut log,
        );
        let e = r.unwrap_err();
        assert!(matches!(
            e.downcast_ref::<TraceError>(),
            Some(TraceError::UnknownOperation { line: 2, .. })
        ));
        assert_eq!(vec!["load 0x0 miss 00"], log.lines());
    }
    #[test]
    fn test_zero_size_load() {
        let mut sim = reference();
        assert_eq!(vec!["load 0x4 miss "], replay(&mut sim, "load 0x4 0\n"));
    }
    #[cfg(feature = "stat")]
    #[test]
    fn test_stat() {
        let mut sim = reference();
        replay(
            &mut sim,
            "store 0x0 4 aabbccdd\nload 0x0 4\nload 0x200 1\nload 0x400 1\n",
        );
        let s = sim.cache().stat();
        assert_eq!(1, s.load_hits);
        assert_eq!(2, s.load_misses);
        assert_eq!(1, s.store_misses);
        assert_eq!(1, s.dirty_replacements);
        assert_eq!(25.0, s.hit_rate());
        assert_eq!(3, sim.collect_stat().len());
    }
}
