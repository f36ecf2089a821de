//! Analysis windows

use serde::{Deserialize, Serialize};

/// GPS time in whole seconds
pub type GpsTime = u64;

/// Half-open interval `[start, end)` analyzed in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleWindow {
    /// Zero-based cycle number
    pub cycle: u64,
    pub start: GpsTime,
    pub end: GpsTime,
}

impl CycleWindow {
    /// First window of a run beginning at `start`
    pub fn first(start: GpsTime, length: u64) -> Self {
        Self {
            cycle: 0,
            start,
            end: start + length,
        }
    }

    /// The window immediately following this one
    pub fn next(&self) -> Self {
        let length = self.length();
        Self {
            cycle: self.cycle + 1,
            start: self.end,
            end: self.end + length,
        }
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }
}

impl std::fmt::Display for CycleWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} [{}, {})", self.cycle, self.start, self.end)
    }
}

/// Iterates the windows of a run in order
///
/// A window is produced while the end of the previously analyzed data is
/// still below `stop`; the final window may therefore extend past `stop`.
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    next: CycleWindow,
    stop: GpsTime,
}

impl WindowSchedule {
    pub fn new(start: GpsTime, stop: GpsTime, length: u64) -> Self {
        Self {
            next: CycleWindow::first(start, length),
            stop,
        }
    }
}

impl Iterator for WindowSchedule {
    type Item = CycleWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.start >= self.stop || self.next.length() == 0 {
            return None;
        }
        let current = self.next;
        self.next = current.next();
        Some(current)
    }
}
