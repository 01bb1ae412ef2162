//! AI summarization collaborator
//!
//! Turns the user's free-text answers into structured records. All
//! text understanding is delegated to the model; the engine validates
//! only the shape of what comes back (every required field present)
//! and never re-interprets the content.
//!
//! The [`Summarizer`] trait is the seam the orchestrator tests
//! against; [`AnthropicSummarizer`] is the production implementation
//! speaking the Anthropic messages API.

use crate::config::AnthropicConfig;
use crate::errors::CallError;
use crate::store::Goal;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Structured output of a daily session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    /// Brief summary of the workout (or lack thereof).
    pub workout: String,
    /// Brief summary of how the user felt about their eating.
    pub nutrition: String,
    /// The goal carried into the next day. Empty when none was given.
    pub next_goal: String,
}

/// Structured output of a weekly session, aggregated over the prior
/// week's daily summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRecap {
    pub week_ending: NaiveDate,
    /// Days with a meaningful workout among the available summaries.
    pub workouts_logged: u32,
    /// Days of the week with no daily summary. Recorded explicitly,
    /// never silently ignored.
    pub days_skipped: u32,
    pub reflection: String,
    pub next_week_goals: String,
}

/// Black-box summarization interface.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize one day's combined answers, with yesterday's goal as
    /// context when one exists.
    async fn summarize_daily(
        &self,
        date: NaiveDate,
        answers: &str,
        prior_goal: Option<&Goal>,
    ) -> Result<DailySummary, CallError>;

    /// Build the weekly recap from the available daily summaries plus
    /// the user's reflection reply.
    async fn summarize_weekly(
        &self,
        week_ending: NaiveDate,
        summaries: &[DailySummary],
        reflection: &str,
    ) -> Result<WeeklyRecap, CallError>;
}

/// Anthropic messages-API implementation.
pub struct AnthropicSummarizer {
    config: AnthropicConfig,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicSummarizer {
    pub fn new(config: AnthropicConfig, api_key: String) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// One messages-API round trip returning the concatenated text
    /// content. Failures are classified for the retrying gateway.
    async fn request(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/messages", self.config.base_url);

        let payload = json!({
            "model": self.config.model,
            "max_tokens": 1000,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| CallError::Transient(format!("network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), &text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CallError::Transient(format!("response read failed: {}", e)))?;

        let content = data
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                CallError::Transient("no content array in model response".to_string())
            })?;

        let mut full = String::new();
        for item in content {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                full.push_str(text);
            }
        }

        Ok(full)
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    async fn summarize_daily(
        &self,
        date: NaiveDate,
        answers: &str,
        prior_goal: Option<&Goal>,
    ) -> Result<DailySummary, CallError> {
        let goal_context = match prior_goal {
            Some(goal) => format!("Yesterday's stated goal was: {}", goal.text),
            None => "No goal was recorded for yesterday.".to_string(),
        };

        let prompt = format!(
            "You are an accountability coach assistant. Analyze the user's daily \
             check-in and extract key information.\n\n\
             {goal_context}\n\n\
             User's check-in today:\n{answers}\n\n\
             Respond with ONLY a JSON object of this exact shape, no other text:\n\
             {{\"workout\": \"1-2 sentence summary of their workout (or lack thereof)\", \
             \"nutrition\": \"1-2 sentence summary of how they felt about their eating\", \
             \"next_goal\": \"the concrete goal they stated for tomorrow, or an empty string if none\"}}\n\n\
             Be kind and encouraging. Use their actual words; if something was not \
             mentioned, write \"Not specified\" rather than guessing."
        );

        let raw = self.request(&prompt).await?;
        let fields: DailyFields = parse_model_json(&raw)?;

        Ok(DailySummary {
            date,
            workout: fields.workout,
            nutrition: fields.nutrition,
            next_goal: fields.next_goal,
        })
    }

    async fn summarize_weekly(
        &self,
        week_ending: NaiveDate,
        summaries: &[DailySummary],
        reflection: &str,
    ) -> Result<WeeklyRecap, CallError> {
        let mut summaries_text = String::new();
        for summary in summaries {
            summaries_text.push_str(&format!(
                "{}: workout: {}; eating: {}; goal: {}\n",
                summary.date, summary.workout, summary.nutrition, summary.next_goal
            ));
        }

        // Skipped days are a fact about the data, not something to ask
        // the model for.
        let days_skipped = 7u32.saturating_sub(summaries.len() as u32);

        let prompt = format!(
            "You are an accountability coach. Analyze the past week and write a recap.\n\n\
             Daily summaries ({available} of 7 days logged, {days_skipped} skipped):\n\
             {summaries_text}\n\
             The user's own reflection on the week:\n{reflection}\n\n\
             Respond with ONLY a JSON object of this exact shape, no other text:\n\
             {{\"workouts_logged\": <number of days with a meaningful workout>, \
             \"reflection\": \"one encouraging sentence about their week\", \
             \"next_week_goals\": \"their goals for next week, drawn from the reflection\"}}\n\n\
             Be supportive; count a workout only when one actually happened.",
            available = summaries.len(),
        );

        let raw = self.request(&prompt).await?;
        let fields: WeeklyFields = parse_model_json(&raw)?;

        Ok(WeeklyRecap {
            week_ending,
            workouts_logged: fields.workouts_logged,
            days_skipped,
            reflection: fields.reflection,
            next_week_goals: fields.next_week_goals,
        })
    }
}

#[derive(Deserialize)]
struct DailyFields {
    workout: String,
    nutrition: String,
    next_goal: String,
}

#[derive(Deserialize)]
struct WeeklyFields {
    workouts_logged: u32,
    reflection: String,
    next_week_goals: String,
}

/// Parse the model's JSON output, tolerating markdown code fences.
///
/// Unparseable output is transient (the same prompt usually yields
/// valid JSON on retry); output that parses but is missing a required
/// field is permanent — shape validation, not re-prompting.
fn parse_model_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, CallError> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| CallError::Transient(format!("model output was not valid JSON: {}", e)))?;
    serde_json::from_value(value)
        .map_err(|e| CallError::Permanent(format!("model output missing required field: {}", e)))
}

/// Remove a surrounding markdown code fence, if present.
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
