use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::domain::UtcDateTime;
use crate::InvalidRangeError;

/// Closed interval `[start, end]` of bar timestamps, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CachedRange {
    start: UtcDateTime,
    end: UtcDateTime,
}

impl CachedRange {
    pub fn new(start: UtcDateTime, end: UtcDateTime) -> Result<Self, InvalidRangeError> {
        if start > end {
            return Err(InvalidRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> UtcDateTime {
        self.start
    }

    pub fn end(&self) -> UtcDateTime {
        self.end
    }

    pub fn contains(&self, ts: UtcDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub(crate) fn extend_to(&mut self, end: UtcDateTime) {
        if end > self.end {
            self.end = end;
        }
    }
}

impl Display for CachedRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
