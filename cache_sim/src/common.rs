use std::fmt;

use bitmask_enum::bitmask;

use crate::{geometry::Geometry, memory::Addr, trace::AccessRecord};

#[derive(Default)]
pub struct RunStep {
    step: Option<usize>,
}

impl RunStep {
    pub fn new(step: Option<usize>) -> Self {
        Self { step }
    }

    pub fn get_step(&self) -> usize {
        self.step.unwrap_or(1)
    }
}

#[derive(Default)]
pub enum ExecuteMode {
    #[default]
    Run,
    RunStep(RunStep),
}

impl fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteMode::Run => write!(f, "running until a watch fires"),
            ExecuteMode::RunStep(r) => {
                write!(f, "step execution by {}", r.get_step())
            }
        }
    }
}

#[bitmask(u8)]
pub enum WatchKind {
    Load,
    Store,
}

impl WatchKind {
    pub fn of(access: &AccessRecord) -> Self {
        if access.is_store() {
            Self::Store
        } else {
            Self::Load
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::Load) {
            write!(f, "load")?;
            if self.contains(Self::Store) {
                write!(f, "/store")?;
            }
        } else if self.contains(Self::Store) {
            write!(f, "store")?;
        }
        Ok(())
    }
}

/// Stops a run after an access of `kind` touches the block holding `addr`.
#[derive(Clone, Copy, Debug)]
pub struct Watch {
    pub kind: WatchKind,
    pub addr: Addr,
}

impl Watch {
    pub fn is_triggered_by(&self, geometry: &Geometry, access: &AccessRecord) -> bool {
        self.kind.contains(WatchKind::of(access))
            && geometry.block_of(self.addr) == geometry.block_of(access.addr)
    }
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.kind, self.addr)
    }
}

#[derive(Default)]
pub struct Watchings {
    watches: Vec<Watch>,
}

impl Watchings {
    /// add `w`, merging its kind into an existing watch on the same address.
    pub fn add(&mut self, w: Watch) {
        match self.watches.iter_mut().find(|x| x.addr == w.addr) {
            Some(x) => x.kind |= w.kind,
            None => self.watches.push(w),
        }
    }
    pub fn remove(&mut self, addr: Addr) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w.addr != addr);
        before != self.watches.len()
    }
    pub fn triggered(&self, geometry: &Geometry, access: &AccessRecord) -> Option<&Watch> {
        self.watches
            .iter()
            .find(|w| w.is_triggered_by(geometry, access))
    }
    pub fn iter(&self) -> impl Iterator<Item = &Watch> {
        self.watches.iter()
    }
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}

#[derive(Default)]
pub struct SimulationOption {
    pub mode: ExecuteMode,
    pub watchings: Watchings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_block_granularity() {
        let g = Geometry::new(1, 2, 16).unwrap();
        let w = Watch {
            kind: WatchKind::Store,
            addr: Addr::new(0x104),
        };
        assert!(w.is_triggered_by(&g, &AccessRecord::store(Addr::new(0x10f), vec![0])));
        assert!(!w.is_triggered_by(&g, &AccessRecord::store(Addr::new(0x110), vec![0])));
        assert!(!w.is_triggered_by(&g, &AccessRecord::load(Addr::new(0x100), 1)));
    }
    #[test]
    fn test_watchings() {
        let g = Geometry::new(1, 2, 16).unwrap();
        let mut ws = Watchings::default();
        ws.add(Watch {
            kind: WatchKind::Load,
            addr: Addr::new(0x20),
        });
        ws.add(Watch {
            kind: WatchKind::Store,
            addr: Addr::new(0x20),
        });
        assert_eq!(1, ws.iter().count());
        assert_eq!("load/store of 0x20", ws.iter().next().unwrap().to_string());
        assert!(ws
            .triggered(&g, &AccessRecord::store(Addr::new(0x21), vec![1]))
            .is_some());
        assert!(ws.remove(Addr::new(0x20)));
        assert!(!ws.remove(Addr::new(0x20)));
        assert!(ws.is_empty());
    }
    #[test]
    fn test_run_step() {
        assert_eq!(1, RunStep::new(None).get_step());
        assert_eq!(
            "step execution by 4",
            ExecuteMode::RunStep(RunStep::new(Some(4))).to_string()
        );
    }
}
