use crate::client::{MattermostApi, NewReaction, UpstreamResponse};
use crate::error::{Error, Result};
use crate::tokens::clean_emoji_name;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phrases the server (in English or Korean locales) uses when a reaction is already there.
/// This is a heuristic over free text, not an API contract.
static DUPLICATE_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(already\s*exists|duplicate|exists|이미|중복|존재)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionOutcome {
    pub emoji: String,
    /// Upstream status; 0 when no response was received.
    pub status: u16,
    pub ok: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReactionOutcome {
    fn success(emoji: &str, status: u16) -> Self {
        Self {
            emoji: emoji.to_string(),
            status,
            ok: true,
            skipped: false,
            message: None,
        }
    }

    fn duplicate(emoji: &str, status: u16) -> Self {
        Self {
            emoji: emoji.to_string(),
            status,
            ok: true,
            skipped: true,
            message: Some("duplicate".to_string()),
        }
    }

    fn failed(emoji: &str, status: u16, message: impl Into<String>) -> Self {
        Self {
            emoji: emoji.to_string(),
            status,
            ok: false,
            skipped: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<ReactionOutcome>,
}

impl DispatchReport {
    fn record(&mut self, outcome: ReactionOutcome) {
        self.total += 1;
        match (outcome.ok, outcome.skipped) {
            (true, false) => self.success += 1,
            (true, true) => self.skipped += 1,
            (false, _) => self.failed += 1,
        }
        self.results.push(outcome);
    }
}

/// The error text a reply carries: the JSON `message` field when present, else the body.
pub fn error_text(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("message") {
            Some(serde_json::Value::String(message)) if !message.is_empty() => message.clone(),
            _ => body.to_string(),
        },
        _ => body.to_string(),
    }
}

pub fn is_duplicate(reply: &UpstreamResponse) -> bool {
    matches!(reply.status, 400 | 409) && DUPLICATE_MESSAGE.is_match(&error_text(&reply.body))
}

pub fn classify(emoji: &str, reply: &UpstreamResponse) -> ReactionOutcome {
    if reply.is_success() {
        ReactionOutcome::success(emoji, reply.status)
    } else if is_duplicate(reply) {
        ReactionOutcome::duplicate(emoji, reply.status)
    } else {
        ReactionOutcome::failed(emoji, reply.status, reply.body.clone())
    }
}

pub async fn dispatch(
    api: &dyn MattermostApi,
    post_id: &str,
    names: &[String],
    delay: Duration,
) -> Result<DispatchReport> {
    dispatch_with(api, post_id, names, delay, |_| {}).await
}

/// Adds each reaction in order, one request at a time, pausing `delay` between requests.
/// The acting user is looked up once up front and a failure there aborts the batch; a
/// failure on any single reaction is recorded and the batch moves on.
pub async fn dispatch_with<F>(
    api: &dyn MattermostApi,
    post_id: &str,
    names: &[String],
    delay: Duration,
    mut observe: F,
) -> Result<DispatchReport>
where
    F: FnMut(&ReactionOutcome) + Send,
{
    let post_id = post_id.trim();
    if post_id.is_empty() {
        return Err(Error::config("a target post id is required"));
    }
    let user_id = api.current_user_id().await?;
    info!(post = post_id, user = %user_id, count = names.len(), "dispatching reactions");

    let mut report = DispatchReport::default();
    for (idx, raw) in names.iter().enumerate() {
        if idx > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let emoji = clean_emoji_name(raw);
        let outcome = if emoji.is_empty() {
            ReactionOutcome::failed(raw, 0, "empty emoji name")
        } else {
            let reaction = NewReaction {
                user_id: &user_id,
                post_id,
                emoji_name: &emoji,
            };
            match api.add_reaction(&reaction).await {
                Ok(reply) => classify(&emoji, &reply),
                Err(err) => ReactionOutcome::failed(&emoji, 0, err.to_string()),
            }
        };
        match (outcome.ok, outcome.skipped) {
            (true, false) => {
                debug!(emoji = %outcome.emoji, status = outcome.status, "reaction added")
            }
            (true, true) => warn!(emoji = %outcome.emoji, "reaction already present, skipped"),
            (false, _) => warn!(
                emoji = %outcome.emoji,
                status = outcome.status,
                message = outcome.message.as_deref().unwrap_or_default(),
                "reaction failed"
            ),
        }
        observe(&outcome);
        report.record(outcome);
    }
    info!(
        total = report.total,
        success = report.success,
        skipped = report.skipped,
        failed = report.failed,
        "dispatch finished"
    );
    Ok(report)
}
