use std::time::Duration;

use crate::error::Error;
use crate::events::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRunState {
    Stopped,
    Running,
    Paused,
}

/// Read-back check for a persisted index; the collection may have shrunk.
pub(crate) fn resolve_index(index: usize, count: usize) -> Result<usize, Error> {
    if index < count {
        Ok(index)
    } else {
        Err(Error::InvalidIndex { index, count })
    }
}

/// Move `steps` positions with wrap-around at both ends.
pub(crate) fn step(index: usize, count: usize, direction: Direction, steps: u64) -> usize {
    if count == 0 {
        return 0;
    }
    let count = count as u64;
    let index = if (index as u64) < count { index as u64 } else { 0 };
    let steps = steps % count;
    let next = match direction {
        Direction::Next => (index + steps) % count,
        Direction::Previous => (index + count - steps) % count,
    };
    next as usize
}

pub(crate) fn interval_duration(interval_seconds: u32) -> Duration {
    Duration::from_secs(u64::from(interval_seconds.max(1)))
}
