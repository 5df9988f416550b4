use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    geometry::{Geometry, GeometryError},
    memory::RAM_BYTE_SIZE,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid cache geometry")]
    Geometry(#[from] GeometryError),
    #[error("memory of {memory_bytes} bytes is not a non-zero multiple of the {block_size}-byte block size")]
    Memory {
        memory_bytes: usize,
        block_size: usize,
    },
    #[error("{0} is neither given on the command line nor in the config file")]
    Missing(&'static str),
}

/// Fully specified simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub cache_size_kb: usize,
    pub associativity: usize,
    pub block_size: usize,
    pub memory_bytes: usize,
}

impl SimConfig {
    pub fn new(cache_size_kb: usize, associativity: usize, block_size: usize) -> Self {
        Self {
            cache_size_kb,
            associativity,
            block_size,
            memory_bytes: RAM_BYTE_SIZE,
        }
    }
    pub fn with_memory_bytes(self, memory_bytes: usize) -> Self {
        Self {
            memory_bytes,
            ..self
        }
    }
    /// validated geometry; also checks that memory holds whole blocks.
    pub fn geometry(&self) -> std::result::Result<Geometry, ConfigError> {
        let geometry = Geometry::new(self.cache_size_kb, self.associativity, self.block_size)?;
        if self.memory_bytes == 0 || self.memory_bytes % self.block_size != 0 {
            return Err(ConfigError::Memory {
                memory_bytes: self.memory_bytes,
                block_size: self.block_size,
            });
        }
        Ok(geometry)
    }
}

/// Parameters as read from a JSON config file or the command line, any of
/// which may be absent.
///
/// ```json
/// { "cache_size_kb": 1, "associativity": 2, "block_size": 16 }
/// ```
#[derive(Default, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub cache_size_kb: Option<usize>,
    pub associativity: Option<usize>,
    pub block_size: Option<usize>,
    pub memory_bytes: Option<usize>,
}

impl PartialConfig {
    pub fn deser(file: impl std::io::Read) -> Result<Self> {
        Ok(serde_json::from_reader(file)?)
    }
    /// values of `self`, falling back to `other` where `self` has none.
    pub fn or(self, other: Self) -> Self {
        Self {
            cache_size_kb: self.cache_size_kb.or(other.cache_size_kb),
            associativity: self.associativity.or(other.associativity),
            block_size: self.block_size.or(other.block_size),
            memory_bytes: self.memory_bytes.or(other.memory_bytes),
        }
    }
    pub fn resolve(self) -> std::result::Result<SimConfig, ConfigError> {
        let config = SimConfig::new(
            self.cache_size_kb
                .ok_or(ConfigError::Missing("cache size"))?,
            self.associativity
                .ok_or(ConfigError::Missing("associativity"))?,
            self.block_size.ok_or(ConfigError::Missing("block size"))?,
        );
        Ok(match self.memory_bytes {
            Some(m) => config.with_memory_bytes(m),
            None => config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deser() {
        let json = r#"{ "cache_size_kb": 4, "associativity": 2, "block_size": 32 }"#;
        let p = PartialConfig::deser(json.as_bytes()).unwrap();
        let c = p.resolve().unwrap();
        assert_eq!(SimConfig::new(4, 2, 32), c);
        assert_eq!(RAM_BYTE_SIZE, c.memory_bytes);
        assert!(PartialConfig::deser(r#"{ "ways": 2 }"#.as_bytes()).is_err());
    }
    #[test]
    fn test_override() {
        let file = PartialConfig {
            cache_size_kb: Some(4),
            associativity: Some(2),
            block_size: Some(32),
            memory_bytes: Some(4096),
        };
        let cli = PartialConfig {
            associativity: Some(8),
            ..Default::default()
        };
        let c = cli.or(file).resolve().unwrap();
        assert_eq!(SimConfig::new(4, 8, 32).with_memory_bytes(4096), c);
    }
    #[test]
    fn test_missing() {
        let p = PartialConfig {
            cache_size_kb: Some(1),
            block_size: Some(16),
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::Missing("associativity")), p.resolve());
    }
    #[test]
    fn test_memory_check() {
        let c = SimConfig::new(1, 2, 16).with_memory_bytes(1000);
        assert!(matches!(c.geometry(), Err(ConfigError::Memory { .. })));
        let c = SimConfig::new(1, 2, 16).with_memory_bytes(0);
        assert!(matches!(c.geometry(), Err(ConfigError::Memory { .. })));
        assert!(SimConfig::new(1, 2, 16).geometry().is_ok());
        assert!(matches!(
            SimConfig::new(1, 2, 12).geometry(),
            Err(ConfigError::Geometry(_))
        ));
    }
}
