//! Generation-tagged identities for computers and timers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one computer instance.
///
/// Computer ids are reused (a computer can be shut down and started again
/// with the same id), so every construction also draws a fresh generation.
/// Two handles are equal only if they name the same construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ComputerHandle {
    id: u32,
    generation: u64,
}

impl ComputerHandle {
    /// Allocate a handle for a new instance of computer `id`
    pub fn new(id: u32) -> Self {
        Self {
            id,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The user-visible computer id
    pub fn id(self) -> u32 {
        self.id
    }

    /// The construction generation
    pub fn generation(self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ComputerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.generation)
    }
}

/// Identity of a scheduled host timer
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Generate a new unique TimerId
    pub fn new() -> Self {
        TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reused_id_gets_new_generation() {
        let first = ComputerHandle::new(0);
        let second = ComputerHandle::new(0);
        assert_eq!(first.id(), second.id());
        assert_ne!(first, second);
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn test_timer_id_uniqueness() {
        let id1 = TimerId::new();
        let id2 = TimerId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }
}
