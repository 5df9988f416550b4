//! Observable results of replaying one access.

use std::fmt;

use crate::memory::Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
}

impl Lookup {
    pub fn is_hit(self) -> bool {
        self == Lookup::Hit
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Hit => write!(f, "hit"),
            Lookup::Miss => write!(f, "miss"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// a frame left its set; `addr` is its block-aligned address.
    Replacement { addr: Addr, dirty: bool },
    Store { addr: Addr, lookup: Lookup },
    Load {
        addr: Addr,
        lookup: Lookup,
        data: Vec<u8>,
    },
}

impl Event {
    /// hit or miss of an access outcome; `None` for replacements.
    pub fn lookup(&self) -> Option<Lookup> {
        match self {
            Event::Store { lookup, .. } | Event::Load { lookup, .. } => Some(*lookup),
            Event::Replacement { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Replacement { addr, dirty } => {
                let state = if *dirty { "dirty" } else { "clean" };
                write!(f, "replacement {addr} {state}")
            }
            Event::Store { addr, lookup } => write!(f, "store {addr} {lookup}"),
            Event::Load { addr, lookup, data } => {
                write!(f, "load {addr} {lookup} {}", HexBytes(data))
            }
        }
    }
}

/// lower-case hex, two digits per byte, in address order.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Events caused by a single access: at most one replacement, then the
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReport {
    pub replacement: Option<Event>,
    pub outcome: Event,
}

impl AccessReport {
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.replacement.iter().chain(std::iter::once(&self.outcome))
    }
}
