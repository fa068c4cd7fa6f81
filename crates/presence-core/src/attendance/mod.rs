//! Daily attendance: per-identity first/last sighting for one calendar day,
//! and its CSV persistence.

mod store;
mod tracker;

pub use store::{AttendanceStore, StoreError};
pub use tracker::{Tracker, Update};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CSV column order.
pub const HEADER: [&str; 4] = ["date", "name", "first_seen", "last_seen"];
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Second-resolution ISO-8601 local time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Accepted when reading: optional fractional seconds are dropped.
const LENIENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// First and last sighting of one identity on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
}

/// Everything known about one calendar day, keyed by identity label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySnapshot {
    date: NaiveDate,
    entries: BTreeMap<String, Presence>,
    /// Rows for this day whose timestamps could not be read, kept field for
    /// field until their name is seen again.
    unreadable: BTreeMap<String, Vec<Vec<u8>>>,
}

impl DaySnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            entries: BTreeMap::new(),
            unreadable: BTreeMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn get(&self, name: &str) -> Option<&Presence> {
        self.entries.get(name)
    }

    /// Number of people present, including rows kept verbatim.
    pub fn len(&self) -> usize {
        self.entries.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.unreadable.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Presence)> {
        self.entries.iter().map(|(name, p)| (name.as_str(), p))
    }

    /// Names whose rows are carried through unparsed, in name order.
    pub fn unreadable_names(&self) -> impl Iterator<Item = &str> {
        self.unreadable.keys().map(String::as_str)
    }

    /// Record a sighting of `name` at `at`.
    ///
    /// The first sighting fixes `first_seen`; later ones only move `last_seen`
    /// forward. A sighting replaces an unreadable row for the same name, with
    /// `first_seen` restarting at `at`. Returns `true` if nothing was recorded
    /// for `name` today before.
    pub(crate) fn observe(&mut self, name: &str, at: NaiveDateTime) -> bool {
        if let Some(presence) = self.entries.get_mut(name) {
            presence.last_seen = presence.last_seen.max(at);
            return false;
        }
        let carried = self.unreadable.remove(name).is_some();
        self.entries.insert(
            name.to_string(),
            Presence {
                first_seen: at,
                last_seen: at,
            },
        );
        !carried
    }

    pub(crate) fn insert(&mut self, name: String, presence: Presence) {
        self.unreadable.remove(&name);
        self.entries.insert(name, presence);
    }

    /// Keep a row verbatim. Refused if `name` already has a row today.
    pub(crate) fn keep_unreadable(&mut self, name: String, fields: Vec<Vec<u8>>) -> bool {
        if self.entries.contains_key(&name) || self.unreadable.contains_key(&name) {
            return false;
        }
        self.unreadable.insert(name, fields);
        true
    }

    /// Raw fields of the rows kept verbatim, in name order.
    pub(crate) fn unreadable_rows(&self) -> impl Iterator<Item = &[Vec<u8>]> {
        self.unreadable.values().map(Vec::as_slice)
    }

    /// Persisted form of this snapshot, one record per identity.
    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.iter()
            .map(|(name, p)| AttendanceRecord {
                date: self.date.format(DATE_FORMAT).to_string(),
                name: name.to_string(),
                first_seen: p.first_seen.format(TIMESTAMP_FORMAT).to_string(),
                last_seen: p.last_seen.format(TIMESTAMP_FORMAT).to_string(),
            })
            .collect()
    }
}

/// One attendance row exactly as stored. Fields are not validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub date: String,
    pub name: String,
    pub first_seen: String,
    pub last_seen: String,
}

impl AttendanceRecord {
    /// Parse the timestamps, `None` if either is malformed.
    ///
    /// Fractional seconds are accepted and truncated.
    pub fn presence(&self) -> Option<Presence> {
        let parse = |s: &str| {
            NaiveDateTime::parse_from_str(s.trim(), LENIENT_TIMESTAMP_FORMAT)
                .ok()
                .and_then(|t| t.with_nanosecond(0))
        };
        Some(Presence {
            first_seen: parse(&self.first_seen)?,
            last_seen: parse(&self.last_seen)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_first_then_last_seen() {
        let mut snap = DaySnapshot::new(day());
        assert!(snap.observe("alice", at(10, 0, 0)));
        assert!(!snap.observe("alice", at(10, 5, 0)));
        let p = snap.get("alice").unwrap();
        assert_eq!(p.first_seen, at(10, 0, 0));
        assert_eq!(p.last_seen, at(10, 5, 0));
    }

    #[test]
    fn test_last_seen_never_moves_back() {
        let mut snap = DaySnapshot::new(day());
        snap.observe("alice", at(10, 0, 0));
        snap.observe("alice", at(11, 0, 0));
        snap.observe("alice", at(10, 30, 0));
        let p = snap.get("alice").unwrap();
        assert_eq!(p.first_seen, at(10, 0, 0));
        assert_eq!(p.last_seen, at(11, 0, 0));
    }

    #[test]
    fn test_records_are_formatted_and_sorted() {
        let mut snap = DaySnapshot::new(day());
        snap.observe("zoe", at(9, 1, 2));
        snap.observe("alice", at(8, 0, 0));
        let records = snap.records();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            AttendanceRecord {
                date: "2023-01-02".into(),
                name: "alice".into(),
                first_seen: "2023-01-02T08:00:00".into(),
                last_seen: "2023-01-02T08:00:00".into(),
            }
        );
        assert_eq!(records[1].name, "zoe");
        assert_eq!(records[1].last_seen, "2023-01-02T09:01:02");
    }

    #[test]
    fn test_record_presence_parsing() {
        let mut record = AttendanceRecord {
            date: "2023-01-02".into(),
            name: "bob".into(),
            first_seen: "2023-01-02T08:00:00".into(),
            last_seen: "2023-01-02T17:30:05".into(),
        };
        let p = record.presence().unwrap();
        assert_eq!(p.last_seen, at(17, 30, 5));

        record.last_seen = "late".into();
        assert!(record.presence().is_none());
    }

    #[test]
    fn test_record_presence_drops_fraction() {
        let record = AttendanceRecord {
            date: "2023-01-02".into(),
            name: "carol".into(),
            first_seen: "2023-01-02T08:00:00.5".into(),
            last_seen: "2023-01-02T09:00:00".into(),
        };
        let p = record.presence().unwrap();
        assert_eq!(p.first_seen, at(8, 0, 0));
        assert_eq!(p.last_seen, at(9, 0, 0));
    }

    #[test]
    fn test_sighting_replaces_unreadable_row() {
        let mut snap = DaySnapshot::new(day());
        let fields = vec![b"2023-01-02".to_vec(), b"erin".to_vec(), b"soon".to_vec()];
        assert!(snap.keep_unreadable("erin".into(), fields.clone()));
        assert!(!snap.keep_unreadable("erin".into(), fields));
        assert_eq!(snap.len(), 1);
        assert!(snap.get("erin").is_none());

        // Already present today, so not an arrival.
        assert!(!snap.observe("erin", at(12, 0, 0)));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.unreadable_rows().count(), 0);
        assert_eq!(snap.get("erin").unwrap().first_seen, at(12, 0, 0));
    }
}
