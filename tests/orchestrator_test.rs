//! End-to-end orchestrator tests over in-memory collaborators.
//!
//! The chat transport, summarizer, and document store are replaced
//! with test doubles; the state store runs against a real temp file
//! so durability can be asserted by reopening it.

use async_trait::async_trait;
use checkin::bot::ChatTransport;
use checkin::docs::DocumentStore;
use checkin::errors::{CallError, EngineError};
use checkin::gateway::{Gateway, RetryPolicy};
use checkin::orchestrator::{Command, Event, Orchestrator};
use checkin::schedule::{JobKind, JobSpec};
use checkin::store::{Goal, StateStore};
use checkin::summarizer::{DailySummary, Summarizer, WeeklyRecap};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TZ: Tz = chrono_tz::Europe::London;

#[derive(Clone)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, text: &str) -> Result<(), EngineError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Summarizer double: either succeeds with canned output or fails
/// with a transient error on every call.
struct FakeSummarizer {
    always_transient: bool,
    next_goal: String,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize_daily(
        &self,
        date: NaiveDate,
        _answers: &str,
        _prior_goal: Option<&Goal>,
    ) -> Result<DailySummary, CallError> {
        if self.always_transient {
            return Err(CallError::Transient("service unavailable".into()));
        }
        Ok(DailySummary {
            date,
            workout: "ran 5k".into(),
            nutrition: "ate well".into(),
            next_goal: self.next_goal.clone(),
        })
    }

    async fn summarize_weekly(
        &self,
        week_ending: NaiveDate,
        summaries: &[DailySummary],
        reflection: &str,
    ) -> Result<WeeklyRecap, CallError> {
        if self.always_transient {
            return Err(CallError::Transient("service unavailable".into()));
        }
        Ok(WeeklyRecap {
            week_ending,
            workouts_logged: summaries.len() as u32,
            days_skipped: 7u32.saturating_sub(summaries.len() as u32),
            reflection: "Solid week.".into(),
            next_week_goals: reflection.to_string(),
        })
    }
}

#[derive(Clone, Default)]
struct FakeDocs {
    daily_feed: Arc<Mutex<Vec<DailySummary>>>,
    appended_daily: Arc<Mutex<Vec<DailySummary>>>,
    appended_weekly: Arc<Mutex<Vec<WeeklyRecap>>>,
}

#[async_trait]
impl DocumentStore for FakeDocs {
    async fn append_daily(
        &self,
        summary: &DailySummary,
        _raw_reply: &str,
    ) -> Result<(), CallError> {
        self.appended_daily.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn append_weekly(
        &self,
        recap: &WeeklyRecap,
        _reflection: &str,
    ) -> Result<(), CallError> {
        self.appended_weekly.lock().unwrap().push(recap.clone());
        Ok(())
    }

    async fn recent_daily(&self, since: NaiveDate) -> Result<Vec<DailySummary>, CallError> {
        Ok(self
            .daily_feed
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.date >= since)
            .cloned()
            .collect())
    }
}

struct Harness {
    tx: mpsc::Sender<Event>,
    sent: Arc<Mutex<Vec<String>>>,
    docs: FakeDocs,
    state_path: PathBuf,
    handle: JoinHandle<()>,
    _dir: TempDir,
}

impl Harness {
    fn specs() -> (JobSpec, JobSpec) {
        let daily = JobSpec {
            kind: JobKind::Daily,
            hour: 20,
            minute: 30,
            weekday: None,
            tz: TZ,
        };
        let weekly = JobSpec {
            kind: JobKind::Weekly,
            hour: 20,
            minute: 0,
            weekday: Some(Weekday::Sun),
            tz: TZ,
        };
        (daily, weekly)
    }

    fn start(
        summarizer: FakeSummarizer,
        docs: FakeDocs,
        reply_timeout: Duration,
        seed: impl FnOnce(&mut StateStore),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");

        let mut store = StateStore::open(&state_path).unwrap();
        seed(&mut store);

        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport { sent: sent.clone() };

        let gateway = Gateway::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        });

        let (daily, weekly) = Self::specs();
        let (tx, rx) = mpsc::channel(16);

        let orchestrator = Orchestrator::new(
            transport,
            summarizer,
            docs.clone(),
            store,
            gateway,
            daily,
            weekly,
            reply_timeout,
            tx.clone(),
        );
        let handle = tokio::spawn(orchestrator.run(rx));

        Self {
            tx,
            sent,
            docs,
            state_path,
            handle,
            _dir: dir,
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Poll until the transport has delivered at least `n` messages.
    async fn wait_for_messages(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.sent.lock().unwrap().len() >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {} messages, got {:?}",
                n,
                self.sent.lock().unwrap()
            )
        });
    }

    /// Stop the orchestrator and reopen the state file it was using.
    async fn shutdown_and_reopen_store(self) -> StateStore {
        self.tx.send(Event::Shutdown).await.unwrap();
        self.handle.await.unwrap();
        StateStore::open(self.state_path).unwrap()
    }
}

fn today_local() -> NaiveDate {
    Utc::now().with_timezone(&TZ).date_naive()
}

fn ok_summarizer(next_goal: &str) -> FakeSummarizer {
    FakeSummarizer {
        always_transient: false,
        next_goal: next_goal.to_string(),
    }
}

#[tokio::test]
async fn test_daily_happy_path_stores_goal_and_confirms() {
    let harness = Harness::start(
        ok_summarizer("sleep 8h"),
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;
    assert!(harness.sent()[0].contains("daily check-in"));

    harness
        .tx
        .send(Event::Inbound("ran 5k, ate well, tomorrow sleep 8h".into()))
        .await
        .unwrap();
    harness.wait_for_messages(2).await;

    let confirmation = harness.sent()[1].clone();
    assert!(confirmation.contains("ran 5k"));
    assert!(confirmation.contains("sleep 8h"));

    let appended = harness.docs.appended_daily.lock().unwrap().clone();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].date, today_local());

    let store = harness.shutdown_and_reopen_store().await;
    let goal = store
        .goal_for(today_local() + ChronoDuration::days(1))
        .expect("goal stored for tomorrow");
    assert_eq!(goal.text, "sleep 8h");
    assert_eq!(store.last_completed(JobKind::Daily), Some(today_local()));
}

#[tokio::test]
async fn test_prompt_surfaces_goal_stored_for_today() {
    let harness = Harness::start(
        ok_summarizer(""),
        FakeDocs::default(),
        Duration::from_secs(60),
        |store| {
            store
                .set_goal(Goal {
                    for_date: today_local(),
                    text: "stretch 10 min".into(),
                })
                .unwrap();
        },
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;
    assert!(harness.sent()[0].contains("Yesterday you planned: stretch 10 min"));
}

#[tokio::test]
async fn test_empty_extracted_goal_leaves_store_goal_untouched() {
    let harness = Harness::start(
        ok_summarizer(""),
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;
    harness.tx.send(Event::Inbound("rest day".into())).await.unwrap();
    harness.wait_for_messages(2).await;

    let store = harness.shutdown_and_reopen_store().await;
    assert!(store.current_goal().is_none());
    assert_eq!(store.last_completed(JobKind::Daily), Some(today_local()));
}

#[tokio::test]
async fn test_summarizer_exhaustion_preserves_raw_answers() {
    let harness = Harness::start(
        FakeSummarizer {
            always_transient: true,
            next_goal: String::new(),
        },
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;
    harness
        .tx
        .send(Event::Inbound("lifted weights and ate greens".into()))
        .await
        .unwrap();
    harness.wait_for_messages(2).await;

    let notice = harness.sent()[1].clone();
    assert!(notice.contains("lifted weights and ate greens"));

    assert!(harness.docs.appended_daily.lock().unwrap().is_empty());
    let store = harness.shutdown_and_reopen_store().await;
    assert!(store.current_goal().is_none());
    assert!(store.last_completed(JobKind::Daily).is_none());
}

#[tokio::test]
async fn test_timeout_closes_session_without_side_effects() {
    let harness = Harness::start(
        ok_summarizer("x"),
        FakeDocs::default(),
        Duration::from_millis(50),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(2).await;

    assert!(harness.sent()[1].contains("No reply received"));
    assert!(harness.docs.appended_daily.lock().unwrap().is_empty());

    // A reply after expiry is out-of-band text, not a session reply.
    harness.tx.send(Event::Inbound("too late".into())).await.unwrap();
    harness.wait_for_messages(3).await;
    assert!(harness.sent()[2].contains("not currently expecting"));

    let store = harness.shutdown_and_reopen_store().await;
    assert!(store.last_completed(JobKind::Daily).is_none());
}

#[tokio::test]
async fn test_manual_trigger_while_busy_is_rejected() {
    let harness = Harness::start(
        ok_summarizer("x"),
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;
    harness.tx.send(Event::Command(Command::Daily)).await.unwrap();
    harness.wait_for_messages(2).await;

    assert!(harness.sent()[1].contains("already in progress"));
    harness.shutdown_and_reopen_store().await;
}

#[tokio::test]
async fn test_scheduled_fire_while_busy_is_parked_then_replayed() {
    let harness = Harness::start(
        ok_summarizer(""),
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Fire(JobKind::Daily)).await.unwrap();
    harness.wait_for_messages(1).await;

    // Weekly fires mid-session; no reply to it yet, just the park.
    harness.tx.send(Event::Fire(JobKind::Weekly)).await.unwrap();
    harness.tx.send(Event::Inbound("rest day".into())).await.unwrap();

    // daily prompt, daily confirmation, weekly prompt
    harness.wait_for_messages(3).await;
    assert!(harness.sent()[2].contains("weekly recap"));
    harness.shutdown_and_reopen_store().await;
}

#[tokio::test]
async fn test_weekly_reports_skipped_days() {
    let docs = FakeDocs::default();
    let week_start = today_local() - ChronoDuration::days(6);
    {
        let mut feed = docs.daily_feed.lock().unwrap();
        for i in 0..5 {
            feed.push(DailySummary {
                date: week_start + ChronoDuration::days(i),
                workout: "ran".into(),
                nutrition: "fine".into(),
                next_goal: String::new(),
            });
        }
    }

    let harness = Harness::start(ok_summarizer(""), docs, Duration::from_secs(60), |_| {});

    harness.tx.send(Event::Fire(JobKind::Weekly)).await.unwrap();
    harness.wait_for_messages(1).await;
    harness
        .tx
        .send(Event::Inbound("good week, want more rest next week".into()))
        .await
        .unwrap();
    harness.wait_for_messages(2).await;

    let confirmation = harness.sent()[1].clone();
    assert!(confirmation.contains("Days skipped: 2"));

    let appended = harness.docs.appended_weekly.lock().unwrap().clone();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].days_skipped, 2);

    let store = harness.shutdown_and_reopen_store().await;
    assert_eq!(store.last_completed(JobKind::Weekly), Some(today_local()));
}

#[tokio::test]
async fn test_status_and_help_commands() {
    let harness = Harness::start(
        ok_summarizer(""),
        FakeDocs::default(),
        Duration::from_secs(60),
        |_| {},
    );

    harness.tx.send(Event::Command(Command::Status)).await.unwrap();
    harness.wait_for_messages(1).await;
    assert!(harness.sent()[0].contains("Next daily check-in"));

    harness.tx.send(Event::Command(Command::Help)).await.unwrap();
    harness.wait_for_messages(2).await;
    assert!(harness.sent()[1].contains("/daily"));
    harness.shutdown_and_reopen_store().await;
}
