//! Engine orchestrator
//!
//! The single coordination point of the engine. Every stimulus —
//! scheduler fires, inbound messages, chat commands, session expiry —
//! arrives as an [`Event`] on one mailbox and is processed strictly
//! in arrival order, so the orchestrator never sees two things at
//! once and the rest of the engine needs no locking.
//!
//! At most one conversation session is active at a time. A scheduled
//! fire that lands while a session is open is parked in a one-slot
//! pending queue and replayed once the session closes; a manual
//! trigger in the same situation is rejected with a busy reply.

use crate::bot::ChatTransport;
use crate::docs::DocumentStore;
use crate::errors::GatewayError;
use crate::gateway::Gateway;
use crate::schedule::{JobKind, JobSpec};
use crate::session::{self, Session};
use crate::store::{Goal, StateStore};
use crate::summarizer::Summarizer;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Chat commands recognized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Daily,
    Weekly,
    Status,
}

/// Everything that can happen to the engine, in one ordered stream.
#[derive(Debug)]
pub enum Event {
    /// A schedule fired (or is being caught up at startup).
    Fire(JobKind),
    /// Free text from the authorized chat.
    Inbound(String),
    /// A recognized command from the authorized chat.
    Command(Command),
    /// The reply window of the identified session closed.
    SessionExpired(Uuid),
    Shutdown,
}

pub struct Orchestrator<C, S, D> {
    transport: C,
    summarizer: S,
    docs: D,
    store: StateStore,
    gateway: Gateway,
    daily: JobSpec,
    weekly: JobSpec,
    reply_timeout: Duration,
    /// Sender half of the mailbox, handed to expiry timers.
    events: mpsc::Sender<Event>,
    active: Option<Session>,
    /// One parked scheduled fire, replayed when the session closes.
    pending: Option<JobKind>,
}

impl<C, S, D> Orchestrator<C, S, D>
where
    C: ChatTransport,
    S: Summarizer,
    D: DocumentStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: C,
        summarizer: S,
        docs: D,
        store: StateStore,
        gateway: Gateway,
        daily: JobSpec,
        weekly: JobSpec,
        reply_timeout: Duration,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            summarizer,
            docs,
            store,
            gateway,
            daily,
            weekly,
            reply_timeout,
            events,
            active: None,
            pending: None,
        }
    }

    /// Drain the mailbox until shutdown. This is the only task that
    /// touches the store or the active session.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        info!("orchestrator started");

        while let Some(event) = rx.recv().await {
            debug!(event = ?event, "processing event");
            match event {
                Event::Fire(kind) => self.on_fire(kind).await,
                Event::Inbound(text) => self.on_inbound(text).await,
                Event::Command(command) => self.on_command(command).await,
                Event::SessionExpired(id) => self.on_expired(id).await,
                Event::Shutdown => break,
            }
        }

        info!("orchestrator stopped");
    }

    async fn on_fire(&mut self, kind: JobKind) {
        if self.active.is_some() {
            if let Some(parked) = self.pending {
                warn!(kind = %kind, parked = %parked, "pending slot occupied, dropping fire");
            } else {
                info!(kind = %kind, "session active, parking scheduled fire");
                self.pending = Some(kind);
            }
            return;
        }
        self.open_session(kind).await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.send(&session::welcome_notice()).await,
            Command::Help => self.send(&session::help_notice()).await,
            Command::Daily | Command::Weekly => {
                // Manual triggers are rejected while busy, never queued.
                if self.active.is_some() {
                    self.send(&session::busy_notice()).await;
                    return;
                }
                let kind = if command == Command::Daily {
                    JobKind::Daily
                } else {
                    JobKind::Weekly
                };
                self.open_session(kind).await;
            }
            Command::Status => {
                let text = self.status_text();
                self.send(&text).await;
            }
        }
    }

    /// Open a session for `kind`: snapshot today's goal, emit the
    /// prompt, and arm the expiry timer.
    async fn open_session(&mut self, kind: JobKind) {
        let now = Utc::now();
        let today = now.with_timezone(&self.daily.tz).date_naive();

        let prior_goal = match kind {
            JobKind::Daily => self.store.goal_for(today).cloned(),
            JobKind::Weekly => None,
        };

        let mut session = Session::open(kind, now, self.reply_timeout, prior_goal);
        info!(kind = %kind, session = %session.id, "opening session");

        if !self.send_checked(&session.prompt()).await {
            // Without a delivered prompt there is no conversation.
            session.cancel();
            return;
        }
        session.await_reply();

        let id = session.id;
        let delay = (session.expires_at - now).to_std().unwrap_or_default();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::SessionExpired(id)).await;
        });

        self.active = Some(session);
    }

    async fn on_inbound(&mut self, text: String) {
        let awaiting = self
            .active
            .as_ref()
            .map(Session::is_awaiting)
            .unwrap_or(false);
        if !awaiting {
            self.send(&session::not_expecting_notice()).await;
            return;
        }

        // Session leaves the active slot here; whatever happens next
        // it ends in a terminal state.
        let mut session = match self.active.take() {
            Some(session) => session,
            None => return,
        };
        session.record_reply(text);

        match session.kind {
            JobKind::Daily => self.finish_daily(session).await,
            JobKind::Weekly => self.finish_weekly(session).await,
        }

        self.drain_pending().await;
    }

    /// Drive a daily session from Processing to a terminal state.
    async fn finish_daily(&mut self, mut session: Session) {
        let date = session.started_at.with_timezone(&self.daily.tz).date_naive();
        let raw = session.raw_log();
        let prior = session.prior_goal.clone();

        let summarizer = &self.summarizer;
        let summary = match self
            .gateway
            .call("summarize_daily", || {
                summarizer.summarize_daily(date, &raw, prior.as_ref())
            })
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                self.fail_session(&mut session, &raw, &err).await;
                return;
            }
        };

        session.begin_persisting();
        let docs = &self.docs;
        if let Err(err) = self
            .gateway
            .call("append_daily", || docs.append_daily(&summary, &raw))
            .await
        {
            self.fail_session(&mut session, &raw, &err).await;
            return;
        }

        // The goal slot only changes when the model extracted one.
        if !summary.next_goal.is_empty() {
            let goal = Goal {
                for_date: date + ChronoDuration::days(1),
                text: summary.next_goal.clone(),
            };
            if let Err(err) = self.store.set_goal(goal) {
                error!(error = %err, "failed to persist next goal");
            }
        }
        if let Err(err) = self.store.mark_completed(JobKind::Daily, date) {
            error!(error = %err, "failed to persist completion mark");
        }

        session.complete();
        info!(session = %session.id, "daily session completed");
        self.send(&session::daily_confirmation(&summary)).await;
    }

    /// Drive a weekly session from Processing to a terminal state.
    async fn finish_weekly(&mut self, mut session: Session) {
        let week_ending = session.started_at.with_timezone(&self.weekly.tz).date_naive();
        let since = week_ending - ChronoDuration::days(6);
        let reflection = session.raw_log();

        let docs = &self.docs;
        let summaries = match self
            .gateway
            .call("recent_daily", || docs.recent_daily(since))
            .await
        {
            Ok(summaries) => summaries,
            Err(err) => {
                self.fail_session(&mut session, &reflection, &err).await;
                return;
            }
        };

        let summarizer = &self.summarizer;
        let recap = match self
            .gateway
            .call("summarize_weekly", || {
                summarizer.summarize_weekly(week_ending, &summaries, &reflection)
            })
            .await
        {
            Ok(recap) => recap,
            Err(err) => {
                self.fail_session(&mut session, &reflection, &err).await;
                return;
            }
        };

        session.begin_persisting();
        if let Err(err) = self
            .gateway
            .call("append_weekly", || docs.append_weekly(&recap, &reflection))
            .await
        {
            self.fail_session(&mut session, &reflection, &err).await;
            return;
        }

        if let Err(err) = self.store.mark_completed(JobKind::Weekly, week_ending) {
            error!(error = %err, "failed to persist completion mark");
        }

        session.complete();
        info!(session = %session.id, "weekly session completed");
        self.send(&session::weekly_confirmation(&recap)).await;
    }

    /// Terminal failure path: the raw reply is surfaced back to the
    /// user and the store is left untouched.
    async fn fail_session(&mut self, session: &mut Session, raw: &str, err: &GatewayError) {
        session.fail();
        error!(session = %session.id, kind = %session.kind, error = %err, "session failed");
        self.send(&session::failure_notice(raw, &err.to_string()))
            .await;
    }

    async fn on_expired(&mut self, id: Uuid) {
        let matches = self
            .active
            .as_ref()
            .map(|session| session.id == id && session.is_awaiting())
            .unwrap_or(false);
        if !matches {
            // Stale timer for a session that already closed.
            return;
        }

        let mut session = match self.active.take() {
            Some(session) => session,
            None => return,
        };
        session.time_out();
        info!(session = %session.id, kind = %session.kind, "session timed out");
        self.send(&session::timeout_notice(session.kind)).await;

        self.drain_pending().await;
    }

    async fn drain_pending(&mut self) {
        if let Some(kind) = self.pending.take() {
            info!(kind = %kind, "replaying parked fire");
            self.open_session(kind).await;
        }
    }

    fn status_text(&self) -> String {
        let now = Utc::now();
        let tz = self.daily.tz;
        let local = now.with_timezone(&tz);

        let session_line = match &self.active {
            Some(session) => format!("{} check-in in progress, awaiting your reply", session.kind),
            None => "idle".to_string(),
        };
        let goal_line = match self.store.current_goal() {
            Some(goal) => format!("{} (for {})", goal.text, goal.for_date),
            None => "none set".to_string(),
        };

        format!(
            "Status at {}:\n\
             Session: {}\n\
             Current goal: {}\n\
             Next daily check-in: {}\n\
             Next weekly recap: {}",
            local.format("%Y-%m-%d %H:%M %Z"),
            session_line,
            goal_line,
            self.daily.next_fire(now).with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
            self.weekly.next_fire(now).with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
        )
    }

    async fn send(&self, text: &str) {
        self.send_checked(text).await;
    }

    async fn send_checked(&self, text: &str) -> bool {
        match self.transport.send(text).await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "outbound send failed");
                false
            }
        }
    }
}
