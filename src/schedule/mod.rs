//! Trigger scheduling
//!
//! Computes and fires the two recurring triggers (daily check-in,
//! weekly recap) in the configured timezone. Fire instants are always
//! re-derived from the wall clock each iteration — never accumulated
//! from a fixed duration — so NTP corrections and DST shifts cannot
//! make a job drift, double-fire, or skip a logical day.
//!
//! DST policy: a wall-clock fire time that falls inside a
//! spring-forward gap moves to the first valid wall-clock minute of
//! that day; a time repeated by a fall-back fold fires at the earliest
//! of the two occurrences. Either way the job fires exactly once per
//! calendar day (or week), deterministically.

use crate::config::ScheduleConfig;
use crate::errors::EngineError;
use crate::orchestrator::Event;
use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Which of the two recurring jobs a trigger or session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JobKind {
    Daily,
    Weekly,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Daily => write!(f, "daily"),
            JobKind::Weekly => write!(f, "weekly"),
        }
    }
}

/// Immutable description of one recurring fire time.
///
/// Built once at startup from validated configuration; the fire time
/// is always interpreted as wall-clock time in `tz`.
#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    pub kind: JobKind,
    pub hour: u32,
    pub minute: u32,
    /// Weekly jobs fire only on this weekday; `None` means every day.
    pub weekday: Option<Weekday>,
    pub tz: Tz,
}

impl JobSpec {
    /// Build the (daily, weekly) spec pair from the schedule config,
    /// validating every field. Errors here abort startup.
    pub fn pair_from_schedule(schedule: &ScheduleConfig) -> Result<(JobSpec, JobSpec), EngineError> {
        let tz: Tz = schedule.timezone.parse().map_err(|_| {
            EngineError::Config(format!("Invalid timezone '{}'", schedule.timezone))
        })?;

        let weekday: Weekday = schedule.weekly_weekday.parse().map_err(|_| {
            EngineError::Config(format!("Invalid weekday '{}'", schedule.weekly_weekday))
        })?;

        let check_time = |label: &str, hour: u32, minute: u32| {
            if hour > 23 || minute > 59 {
                Err(EngineError::Config(format!(
                    "Invalid {} fire time {:02}:{:02}",
                    label, hour, minute
                )))
            } else {
                Ok(())
            }
        };
        check_time("daily", schedule.daily_hour, schedule.daily_minute)?;
        check_time("weekly", schedule.weekly_hour, schedule.weekly_minute)?;

        let daily = JobSpec {
            kind: JobKind::Daily,
            hour: schedule.daily_hour,
            minute: schedule.daily_minute,
            weekday: None,
            tz,
        };
        let weekly = JobSpec {
            kind: JobKind::Weekly,
            hour: schedule.weekly_hour,
            minute: schedule.weekly_minute,
            weekday: Some(weekday),
            tz,
        };
        Ok((daily, weekly))
    }

    fn matches_weekday(&self, day: NaiveDate) -> bool {
        match self.weekday {
            Some(weekday) => day.weekday() == weekday,
            None => true,
        }
    }

    /// The fire instant on `day`, or `None` if the whole remainder of
    /// the day is swallowed by a DST gap (cannot happen for real
    /// zones, but the scan stays total).
    ///
    /// Gap minutes advance forward to the first valid wall-clock time;
    /// a fold resolves to its earliest occurrence.
    fn fire_instant_on(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        let mut minute_of_day = self.hour * 60 + self.minute;
        while minute_of_day < 24 * 60 {
            let naive = day.and_hms_opt(minute_of_day / 60, minute_of_day % 60, 0)?;
            match self.tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
                LocalResult::None => minute_of_day += 1,
            }
        }
        None
    }

    /// The next fire instant strictly after `after`, deterministic and
    /// honoring the weekday rule and DST policy.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let mut day = after.with_timezone(&self.tz).date_naive();
        // A matching weekday occurs in any 7-day window; 14 also covers
        // today's instant already being past.
        for _ in 0..14 {
            if self.matches_weekday(day) {
                if let Some(instant) = self.fire_instant_on(day) {
                    if instant > after {
                        return instant;
                    }
                }
            }
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        // Unreachable for any spec that passed validation; keep the
        // scheduler alive rather than panic.
        error!(kind = %self.kind, "next_fire scan exhausted, deferring a week");
        after + chrono::Duration::days(7)
    }

    /// The most recent fire instant strictly before `before`, if one
    /// exists in the trailing two weeks.
    pub fn previous_fire(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut day = before.with_timezone(&self.tz).date_naive();
        for _ in 0..14 {
            if self.matches_weekday(day) {
                if let Some(instant) = self.fire_instant_on(day) {
                    if instant < before {
                        return Some(instant);
                    }
                }
            }
            day = day.checked_sub_days(Days::new(1))?;
        }
        None
    }

    /// Catch-up decision for startup: true when the most recent past
    /// fire has no completed session recorded on or after its local
    /// date. At most one catch-up per job per restart.
    pub fn needs_catch_up(&self, now: DateTime<Utc>, last_completed: Option<NaiveDate>) -> bool {
        let Some(previous) = self.previous_fire(now) else {
            return false;
        };
        let previous_date = previous.with_timezone(&self.tz).date_naive();
        match last_completed {
            Some(done) => done < previous_date,
            None => true,
        }
    }
}

/// One scheduler task per job: waits for the next fire instant and
/// delivers a trigger event to the orchestrator mailbox.
///
/// The task never does session work itself; a slow summarization call
/// can therefore never delay detection of the next fire time.
pub struct Scheduler {
    spec: JobSpec,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(spec: JobSpec, events: mpsc::Sender<Event>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            spec,
            events,
            shutdown,
        }
    }

    /// Run the scheduling loop until shutdown.
    ///
    /// When `catch_up` is set, one trigger is delivered immediately
    /// before entering the normal cadence (missed fire recovered after
    /// downtime).
    pub async fn run(mut self, catch_up: bool) {
        if catch_up {
            info!(kind = %self.spec.kind, "delivering catch-up trigger for missed fire");
            if self.events.send(Event::Fire(self.spec.kind)).await.is_err() {
                return;
            }
        }

        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            // Re-derive from the wall clock; a backwards clock step can
            // never re-select an instant we already fired.
            let now = Utc::now();
            let after = match last_fired {
                Some(t) if t > now => t,
                _ => now,
            };
            let target = self.spec.next_fire(after);
            let wait = (target - now).to_std().unwrap_or(Duration::ZERO);
            info!(kind = %self.spec.kind, fire_at = %target, "scheduler waiting for next fire");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(target);
                    info!(kind = %self.spec.kind, "trigger fired");
                    if self.events.send(Event::Fire(self.spec.kind)).await.is_err() {
                        warn!(kind = %self.spec.kind, "orchestrator mailbox closed, scheduler stopping");
                        return;
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!(kind = %self.spec.kind, "scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }
}
