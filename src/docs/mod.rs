//! Document store collaborator
//!
//! Appends structured check-in records to the persistent log and
//! reads recent daily records back for the weekly recap. The
//! [`DocumentStore`] trait is the seam; [`GoogleDocsClient`] is the
//! production implementation over the Google Docs REST v1 API.
//!
//! Each daily append carries one machine-readable `summary-json:`
//! line alongside the human-readable block; `recent_daily` recovers
//! summaries by scanning the document text for those lines. The
//! document stays pleasant to read while remaining a usable source
//! for the recap.

use crate::errors::CallError;
use crate::summarizer::{DailySummary, WeeklyRecap};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::debug;

/// Marker prefix for the machine-readable line in each daily entry.
const SUMMARY_MARKER: &str = "summary-json: ";

/// Black-box append/read interface to the persistent log.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append one daily record, keeping the raw reply alongside the
    /// structured summary.
    async fn append_daily(&self, summary: &DailySummary, raw_reply: &str)
        -> Result<(), CallError>;

    /// Append one weekly recap record.
    async fn append_weekly(&self, recap: &WeeklyRecap, reflection: &str)
        -> Result<(), CallError>;

    /// Daily summaries recorded on or after `since`, oldest first.
    async fn recent_daily(&self, since: NaiveDate) -> Result<Vec<DailySummary>, CallError>;
}

/// Google Docs REST v1 client.
pub struct GoogleDocsClient {
    base_url: String,
    document_id: String,
    token: String,
    client: reqwest::Client,
}

impl GoogleDocsClient {
    pub fn new(config: crate::config::DocsConfig, token: String) -> Self {
        Self {
            base_url: config.base_url,
            document_id: config.document_id,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Append `text` at the end of the document body via batchUpdate.
    async fn append_text(&self, text: &str) -> Result<(), CallError> {
        let url = format!(
            "{}/documents/{}:batchUpdate",
            self.base_url, self.document_id
        );

        let payload = json!({
            "requests": [{
                "insertText": {
                    "endOfSegmentLocation": {},
                    "text": text,
                }
            }]
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), &body));
        }

        debug!(document_id = %self.document_id, bytes = text.len(), "appended to document");
        Ok(())
    }

    /// Fetch the full document text, concatenated across paragraphs.
    async fn document_text(&self) -> Result<String, CallError> {
        let url = format!("{}/documents/{}", self.base_url, self.document_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CallError::Transient(format!("response read failed: {}", e)))?;

        Ok(extract_text(&data))
    }
}

#[async_trait]
impl DocumentStore for GoogleDocsClient {
    async fn append_daily(
        &self,
        summary: &DailySummary,
        raw_reply: &str,
    ) -> Result<(), CallError> {
        let record = serde_json::to_string(summary)
            .map_err(|e| CallError::Permanent(format!("summary not serializable: {}", e)))?;

        let block = format!(
            "\nDaily Check-in: {date}\n\
             Raw response:\n{raw}\n\
             Workout: {workout}\n\
             Eating: {nutrition}\n\
             Goal for tomorrow: {goal}\n\
             {marker}{record}\n\
             ---\n",
            date = summary.date,
            raw = raw_reply,
            workout = summary.workout,
            nutrition = summary.nutrition,
            goal = if summary.next_goal.is_empty() {
                "none"
            } else {
                &summary.next_goal
            },
            marker = SUMMARY_MARKER,
        );

        self.append_text(&block).await
    }

    async fn append_weekly(&self, recap: &WeeklyRecap, reflection: &str) -> Result<(), CallError> {
        let block = format!(
            "\nWeekly Recap: week ending {date}\n\
             Workouts logged: {workouts}\n\
             Days skipped: {skipped}\n\
             Reflection: {recap_reflection}\n\
             User's own reflection:\n{reflection}\n\
             Goals for next week: {goals}\n\
             ---\n",
            date = recap.week_ending,
            workouts = recap.workouts_logged,
            skipped = recap.days_skipped,
            recap_reflection = recap.reflection,
            goals = recap.next_week_goals,
        );

        self.append_text(&block).await
    }

    async fn recent_daily(&self, since: NaiveDate) -> Result<Vec<DailySummary>, CallError> {
        let text = self.document_text().await?;

        // One record per day; a rerun appends a fresh record later in
        // the document, and the later record wins.
        let mut by_date = std::collections::BTreeMap::new();
        for summary in text
            .lines()
            .filter_map(|line| line.trim().strip_prefix(SUMMARY_MARKER))
            .filter_map(|record| serde_json::from_str::<DailySummary>(record).ok())
            .filter(|summary| summary.date >= since)
        {
            by_date.insert(summary.date, summary);
        }

        Ok(by_date.into_values().collect())
    }
}

/// Flatten a Docs API document body into plain text.
///
/// Only `paragraph.elements[].textRun.content` carries text we ever
/// write; tables and other structural elements are ignored.
fn extract_text(document: &serde_json::Value) -> String {
    let mut text = String::new();
    let content = document
        .pointer("/body/content")
        .and_then(|c| c.as_array());

    if let Some(elements) = content {
        for element in elements {
            let runs = element
                .pointer("/paragraph/elements")
                .and_then(|e| e.as_array());
            if let Some(runs) = runs {
                for run in runs {
                    if let Some(chunk) = run.pointer("/textRun/content").and_then(|t| t.as_str()) {
                        text.push_str(chunk);
                    }
                }
            }
        }
    }

    text
}
