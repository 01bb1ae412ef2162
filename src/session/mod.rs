//! Conversation session state machine
//!
//! One session drives a single check-in or recap dialogue from prompt
//! to completion. The machine itself is pure state — the orchestrator
//! owns the only active session, feeds it events in arrival order,
//! and performs the external calls between its transitions.
//!
//! States: Prompting -> AwaitingReply -> Processing -> Persisting ->
//! Completed, with TimedOut, Cancelled, and Failed as terminal exits.
//! A timeout is a normal outcome (no reply by `expires_at`, nothing
//! summarized or persisted); Failed means an external call was
//! permanently unavailable, in which case the raw answers are
//! preserved and surfaced — never silently dropped.

use crate::schedule::JobKind;
use crate::store::Goal;
use crate::summarizer::{DailySummary, WeeklyRecap};
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of one conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The opening prompt is being emitted.
    Prompting,
    /// Waiting for the user's reply, until `expires_at`.
    AwaitingReply,
    /// Reply received; the summarizer is being invoked.
    Processing,
    /// Summary produced; the document store is being invoked.
    Persisting,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::TimedOut
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }
}

/// One captured answer, ordered by question index.
#[derive(Debug, Clone)]
pub struct Answer {
    pub question: usize,
    pub text: String,
}

/// One daily check-in or weekly recap dialogue instance.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub answers: Vec<Answer>,
    /// Goal snapshot taken at session start; never re-read mid-session.
    pub prior_goal: Option<Goal>,
}

impl Session {
    /// Open a session at `now`. The reply window is fixed here and
    /// never extended.
    pub fn open(
        kind: JobKind,
        now: DateTime<Utc>,
        reply_timeout: Duration,
        prior_goal: Option<Goal>,
    ) -> Self {
        let window = chrono::Duration::from_std(reply_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(4));
        Self {
            id: Uuid::new_v4(),
            kind,
            state: SessionState::Prompting,
            started_at: now,
            expires_at: now + window,
            answers: Vec::new(),
            prior_goal,
        }
    }

    /// The opening prompt for this session.
    ///
    /// The daily flow asks its three questions as one combined prompt;
    /// a single reply captures all three fields and the summarizer
    /// does the extraction.
    pub fn prompt(&self) -> String {
        match self.kind {
            JobKind::Daily => {
                let mut text = String::from("Good evening! Time for your daily check-in.\n\n");
                if let Some(goal) = &self.prior_goal {
                    text.push_str(&format!(
                        "Yesterday you planned: {}. How did it go?\n\n",
                        goal.text
                    ));
                }
                text.push_str(
                    "Please tell me about your day:\n\
                     - How was your workout today?\n\
                     - How did you feel about what you ate?\n\
                     - Any goals for tomorrow?",
                );
                text
            }
            JobKind::Weekly => String::from(
                "Time for your weekly recap. Looking back over the past week: \
                 how would you rate it, and what are your goals for next week?",
            ),
        }
    }

    /// Prompt emitted; start waiting for the reply.
    pub fn await_reply(&mut self) {
        debug_assert_eq!(self.state, SessionState::Prompting);
        self.state = SessionState::AwaitingReply;
    }

    pub fn is_awaiting(&self) -> bool {
        self.state == SessionState::AwaitingReply
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Capture the user's reply and move to Processing.
    pub fn record_reply(&mut self, text: impl Into<String>) {
        debug_assert!(self.is_awaiting());
        self.answers.push(Answer {
            question: self.answers.len(),
            text: text.into(),
        });
        self.state = SessionState::Processing;
    }

    pub fn begin_persisting(&mut self) {
        debug_assert_eq!(self.state, SessionState::Processing);
        self.state = SessionState::Persisting;
    }

    pub fn complete(&mut self) {
        debug_assert_eq!(self.state, SessionState::Persisting);
        self.state = SessionState::Completed;
    }

    pub fn time_out(&mut self) {
        debug_assert!(self.is_awaiting());
        self.state = SessionState::TimedOut;
    }

    pub fn cancel(&mut self) {
        debug_assert!(!self.state.is_terminal());
        self.state = SessionState::Cancelled;
    }

    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    /// The collected answers joined into one raw log, used both as
    /// summarizer input and as the preserved payload of a failure
    /// notice.
    pub fn raw_log(&self) -> String {
        self.answers
            .iter()
            .map(|answer| answer.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Confirmation sent after a daily session completes.
pub fn daily_confirmation(summary: &DailySummary) -> String {
    let goal = if summary.next_goal.is_empty() {
        "none set"
    } else {
        &summary.next_goal
    };
    format!(
        "Got it! Here's your summary:\n\n\
         Workout: {}\n\
         Eating: {}\n\
         Goal for tomorrow: {}\n\n\
         Everything has been saved to your log. Keep it up!",
        summary.workout, summary.nutrition, goal
    )
}

/// Confirmation sent after a weekly session completes.
pub fn weekly_confirmation(recap: &WeeklyRecap) -> String {
    format!(
        "Weekly recap for the week ending {}:\n\n\
         Workouts logged: {}\n\
         Days skipped: {}\n\
         Reflection: {}\n\
         Goals for next week: {}\n\n\
         Saved to your log. See you tomorrow evening!",
        recap.week_ending,
        recap.workouts_logged,
        recap.days_skipped,
        recap.reflection,
        recap.next_week_goals
    )
}

/// Failure notice: the external calls ran out of retries, but the
/// user's words are preserved verbatim.
pub fn failure_notice(raw_log: &str, reason: &str) -> String {
    format!(
        "I couldn't generate or save your summary ({}). \
         Here is your raw log so nothing is lost:\n\n{}",
        reason, raw_log
    )
}

/// Informational notice for a reply window that closed with no reply.
pub fn timeout_notice(kind: JobKind) -> String {
    format!(
        "No reply received in time, so I've closed tonight's {} check-in. \
         Nothing was recorded — see you at the next one!",
        kind
    )
}

/// Rejection for a manual trigger while a session is active.
pub fn busy_notice() -> String {
    "A check-in is already in progress. Finish it (or let it time out) first.".to_string()
}

/// Reply to out-of-band text when no session is awaiting one.
pub fn not_expecting_notice() -> String {
    "I'm not currently expecting a response. Use /daily to start a daily \
     check-in or /weekly for a weekly recap."
        .to_string()
}

/// Reply to /start.
pub fn welcome_notice() -> String {
    "Welcome! I'll check in with you every evening to ask about your \
     workout, eating, and goals, and send a weekly recap on Sundays.\n\n\
     Use /help to see available commands."
        .to_string()
}

/// Reply to /help.
pub fn help_notice() -> String {
    "Available commands:\n\
     /start - Initialize the bot\n\
     /help - Show this help message\n\
     /daily - Trigger the daily check-in manually\n\
     /weekly - Trigger the weekly recap manually\n\
     /status - Show current status"
        .to_string()
}
