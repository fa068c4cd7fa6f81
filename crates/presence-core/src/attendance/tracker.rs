use super::DaySnapshot;
use crate::matcher::Identity;
use chrono::{NaiveDate, NaiveDateTime};

/// In-memory attendance for the current day.
///
/// The tracker only ever holds one day and only moves forward. When an update
/// arrives for a later date the old day is handed back to the caller to be
/// persisted one last time. Updates dated before the tracked day are refused,
/// so a finished day is never reopened.
#[derive(Debug, Clone)]
pub struct Tracker {
    current: DaySnapshot,
}

/// What one update changed.
#[derive(Debug, Default)]
pub struct Update {
    /// The previous day, if this update crossed midnight.
    pub retired: Option<DaySnapshot>,
    /// Identities seen for the first time today.
    pub arrivals: Vec<String>,
    /// The update was dated before the tracked day and nothing changed.
    pub stale: bool,
}

impl Tracker {
    /// Start from a snapshot loaded from the store.
    pub fn new(seed: DaySnapshot) -> Self {
        Self { current: seed }
    }

    pub fn snapshot(&self) -> &DaySnapshot {
        &self.current
    }

    /// Start a fresh day at `today` if it is later than the tracked date.
    ///
    /// Returns the retired snapshot.
    pub fn advance(&mut self, today: NaiveDate) -> Option<DaySnapshot> {
        self.rollover(DaySnapshot::new(today))
    }

    /// Replace the tracked day with `next` if `next` is for a later date.
    ///
    /// `next` may already hold rows, e.g. ones loaded from the store for that
    /// date. Returns the retired snapshot.
    pub fn rollover(&mut self, next: DaySnapshot) -> Option<DaySnapshot> {
        if next.date() <= self.current.date() {
            return None;
        }
        Some(std::mem::replace(&mut self.current, next))
    }

    /// Apply one frame's recognitions at instant `now`. Unknown faces are ignored.
    pub fn update<'a, I>(&mut self, identities: I, now: NaiveDateTime) -> Update
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        if now.date() < self.current.date() {
            return Update {
                stale: true,
                ..Update::default()
            };
        }
        let retired = self.advance(now.date());
        let mut arrivals = Vec::new();

        for name in identities.into_iter().filter_map(Identity::label) {
            if self.current.observe(name, now) {
                arrivals.push(name.to_string());
            }
        }

        Update {
            retired,
            arrivals,
            stale: false,
        }
    }
}
