#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use super::block::InobtGeometry;
use super::record::INODES_PER_CHUNK;
use crate::types::{InobtError, Result};

/// Smallest fan-out override accepted; keeps `MINRECS` at two or more.
pub const MIN_MAXRECS: u16 = 4;

/// Configuration knobs for an inode btree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InobtOptions {
    /// Block size in bytes
    pub block_size: u32,
    /// Leaf fan-out override; defaults to what fits in a block
    pub leaf_max_recs: Option<u16>,
    /// Interior fan-out override; defaults to what fits in a block
    pub node_max_recs: Option<u16>,
    /// Width of an AG-relative inode number
    pub agino_bits: u8,
}

impl Default for InobtOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            leaf_max_recs: None,
            node_max_recs: None,
            agino_bits: 32,
        }
    }
}

impl InobtOptions {
    /// Parses options from TOML text, missing keys taking their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: InobtOptions = toml::from_str(text)?;
        options.geometry()?;
        Ok(options)
    }

    /// Validates the options and derives the block geometry.
    pub fn geometry(&self) -> Result<InobtGeometry> {
        let block_size = self.block_size as usize;
        if !(64..=65536).contains(&block_size) || !block_size.is_power_of_two() {
            return Err(InobtError::Invalid("block size must be a power of two in 64..=65536"));
        }
        if !(6..=32).contains(&self.agino_bits) {
            return Err(InobtError::Invalid("agino_bits must be in 6..=32"));
        }
        let leaf_maxrecs = resolve_maxrecs(
            self.leaf_max_recs,
            InobtGeometry::leaf_capacity(block_size),
        )?;
        let node_maxrecs = resolve_maxrecs(
            self.node_max_recs,
            InobtGeometry::node_capacity(block_size),
        )?;
        Ok(InobtGeometry {
            block_size,
            leaf_maxrecs,
            node_maxrecs,
            max_levels: max_levels(self.agino_bits, leaf_maxrecs / 2, node_maxrecs / 2),
        })
    }
}

fn resolve_maxrecs(requested: Option<u16>, capacity: usize) -> Result<u16> {
    let capacity = u16::try_from(capacity).unwrap_or(u16::MAX);
    if capacity < MIN_MAXRECS {
        return Err(InobtError::Invalid("block too small for a btree node"));
    }
    match requested {
        None => Ok(capacity),
        Some(n) if n < MIN_MAXRECS => Err(InobtError::Invalid("max records below 4")),
        Some(n) if n > capacity => Err(InobtError::Invalid("max records exceed block capacity")),
        Some(n) => Ok(n),
    }
}

/// Height needed to index every chunk of the inode space with minimally
/// filled blocks.
fn max_levels(agino_bits: u8, leaf_minrecs: u16, node_minrecs: u16) -> u16 {
    let max_chunks = (1u64 << agino_bits) / u64::from(INODES_PER_CHUNK);
    let mut blocks = max_chunks.div_ceil(u64::from(leaf_minrecs));
    let mut levels = 1;
    while blocks > 1 {
        blocks = blocks.div_ceil(u64::from(node_minrecs));
        levels += 1;
    }
    levels
}
