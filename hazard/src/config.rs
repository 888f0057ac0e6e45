use crate::error::Error;

/// Tuning knobs of a [`crate::Domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Hazard pointers a thread may hold at once.
    pub slots_per_thread: usize,
    /// Retirements between two flushes of a thread's private list into the shared one.
    pub flush_threshold: usize,
    /// Retired-object count at which a flushing thread starts a reclamation pass.
    pub reclaim_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slots_per_thread: 2,
            flush_threshold: 64,
            reclaim_threshold: 128,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.slots_per_thread == 0 || self.slots_per_thread >= usize::BITS as usize {
            return Err(Error::InvalidConfig(
                "slots per thread must be positive and less than the word size.",
            ));
        }
        if self.flush_threshold == 0 {
            return Err(Error::InvalidConfig("flush threshold must be positive."));
        }
        if self.reclaim_threshold == 0 {
            return Err(Error::InvalidConfig("reclaim threshold must be positive."));
        }
        Ok(())
    }
}
