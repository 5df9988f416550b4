mod bin;
pub mod cache;
pub mod common;
pub mod config;
pub mod event;
pub mod geometry;
pub mod io;
pub mod memory;
pub mod sim;
pub mod trace;

#[cfg(feature = "stat")]
pub mod stat;
