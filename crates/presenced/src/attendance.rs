use chrono::NaiveDate;
use presence_core::attendance::StoreError;
use presence_core::{AttendanceStore, Clock, DaySnapshot, Identity, Tracker};

/// Tracker plus its backing file: the read-modify-persist half of each frame.
pub struct Attendance<C> {
    store: AttendanceStore,
    tracker: Tracker,
    clock: C,
}

impl<C: Clock> Attendance<C> {
    /// Create the file if needed and seed the tracker with today's rows, so a
    /// restart keeps same-day first sightings.
    pub fn open(store: AttendanceStore, clock: C) -> Result<Self, StoreError> {
        store.ensure_header()?;
        let seed = store.load_today(clock.today())?;
        tracing::info!(
            path = %store.path().display(),
            date = %seed.date(),
            present = seed.len(),
            "attendance loaded"
        );
        Ok(Self {
            store,
            tracker: Tracker::new(seed),
            clock,
        })
    }

    pub fn snapshot(&self) -> &DaySnapshot {
        self.tracker.snapshot()
    }

    /// Record one frame's identities at the current instant and rewrite today's rows.
    ///
    /// Write failures are logged; the next frame rewrites the whole day again.
    /// A frame stamped before the tracked day leaves the file alone.
    pub fn record(&mut self, identities: &[Identity]) {
        let now = self.clock.now();
        if now.date() > self.tracker.snapshot().date() {
            self.roll_over(now.date());
        }

        let update = self.tracker.update(identities, now);
        if update.stale {
            tracing::warn!(
                at = %now,
                tracked = %self.tracker.snapshot().date(),
                "clock is behind the tracked day, frame not recorded"
            );
            return;
        }
        for name in &update.arrivals {
            tracing::info!(name = %name, at = %now, "first sighting today");
        }

        self.persist(self.tracker.snapshot());
    }

    /// Persist the finished day once more and continue with whatever the file
    /// already holds for `today`.
    fn roll_over(&mut self, today: NaiveDate) {
        let next = match self.store.load_today(today) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    path = %self.store.path().display(),
                    error = %e,
                    "failed to read attendance for the new day"
                );
                DaySnapshot::new(today)
            }
        };
        if let Some(retired) = self.tracker.rollover(next) {
            tracing::info!(
                date = %retired.date(),
                present = retired.len(),
                "day rolled over"
            );
            self.persist(&retired);
        }
    }

    fn persist(&self, snapshot: &DaySnapshot) {
        if let Err(e) = self.store.write_snapshot(snapshot) {
            tracing::error!(
                path = %self.store.path().display(),
                date = %snapshot.date(),
                error = %e,
                "failed to write attendance"
            );
        }
    }
}
