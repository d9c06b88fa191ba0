//! One-shot actions keyed by playback time.
//!
//! Actions must be supplied sorted by time. A single cursor walks them in
//! order; it never moves backwards, so a rewound clock does not re-fire
//! anything.

use std::fmt;

/// Action to run once playback reaches `time` (seconds)
pub struct TimelineAction {
    time: f64,
    action: Option<Box<dyn FnOnce()>>,
}

impl TimelineAction {
    pub fn new(time: f64, action: impl FnOnce() + 'static) -> Self {
        Self {
            time,
            action: Some(Box::new(action)),
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }
}

impl fmt::Debug for TimelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelineAction")
            .field("time", &self.time)
            .field("fired", &self.action.is_none())
            .finish()
    }
}

/// Ordered action list with a monotonic cursor
#[derive(Debug, Default)]
pub struct Timeline {
    actions: Vec<TimelineAction>,
    cursor: usize,
}

impl Timeline {
    pub fn new(actions: Vec<TimelineAction>) -> Self {
        if actions.windows(2).any(|w| w[0].time > w[1].time) {
            tracing::warn!("timeline actions are not sorted by time; later actions may wait");
        }
        Self { actions, cursor: 0 }
    }

    /// Fire the action under the cursor if it is due.
    ///
    /// At most one action runs per call, and only while `playing`.
    /// Returns whether an action ran.
    pub fn advance(&mut self, now: f64, playing: bool) -> bool {
        if !playing {
            return false;
        }
        let Some(next) = self.actions.get_mut(self.cursor) else {
            return false;
        };
        // NaN times are never due
        if next.time.is_nan() || now < next.time {
            return false;
        }

        tracing::debug!(index = self.cursor, time = next.time, now, "timeline action");
        if let Some(action) = next.action.take() {
            action();
        }
        self.cursor += 1;
        true
    }

    /// Index of the next action to fire
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All actions have fired
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.actions.len()
    }
}

impl FromIterator<TimelineAction> for Timeline {
    fn from_iter<I: IntoIterator<Item = TimelineAction>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
