//! DMX addressing, universe buffers, and the output transport seam.
use std::fmt::Display;
use std::ops::Add;

use anyhow::{Result, ensure};
use log::debug;
use serde::{Deserialize, Serialize};

/// A DMX address, indexed from 1.
///
/// Range is not checked at parse time so that deserialization failures stay
/// legible; call [`DmxAddr::validate`] downstream.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Debug)]
pub struct DmxAddr(usize);

impl DmxAddr {
    pub fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// The buffer index of this address (indexed from 0).
    pub fn index(&self) -> usize {
        self.0 - 1
    }

    /// Ensure this address is in range for a 512-channel universe.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=UNIVERSE_SIZE).contains(&self.0),
            "invalid DMX address {}",
            self.0
        );
        Ok(())
    }
}

impl Display for DmxAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<usize> for DmxAddr {
    type Output = DmxAddr;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Channels per DMX universe.
pub const UNIVERSE_SIZE: usize = 512;

/// A data buffer for one DMX universe.
pub type DmxBuffer = [u8; UNIVERSE_SIZE];

/// Index identifying one DMX universe within the show.
pub type UniverseId = usize;

/// Destination for rendered universe frames.
///
/// Exactly one frame per universe is handed over per render tick. The
/// renderer retains ownership of its buffers; implementations must copy
/// anything they need to keep.
pub trait DmxTransport: Send {
    fn write(&mut self, universe: UniverseId, frame: &DmxBuffer) -> Result<()>;
}

/// A transport that discards frames.
///
/// Useful for tests and for running a show with no hardware attached.
#[derive(Default)]
pub struct OfflineTransport {
    frames: u64,
}

impl DmxTransport for OfflineTransport {
    fn write(&mut self, universe: UniverseId, frame: &DmxBuffer) -> Result<()> {
        self.frames += 1;
        if self.frames % 512 == 0 {
            let lit = frame.iter().filter(|v| **v > 0).count();
            debug!("offline universe {universe}: {lit} non-zero channel(s)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_validation() {
        assert!(DmxAddr::new(0).validate().is_err());
        assert!(DmxAddr::new(1).validate().is_ok());
        assert!(DmxAddr::new(512).validate().is_ok());
        assert!(DmxAddr::new(513).validate().is_err());
    }

    #[test]
    fn test_addr_offset() {
        let base = DmxAddr::new(10);
        assert_eq!(9, base.index());
        assert_eq!(12, (base + 3).index());
    }
}
