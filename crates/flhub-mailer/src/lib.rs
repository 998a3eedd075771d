//! Transactional email collaborator: digest formatting + HTTP delivery.
//!
//! Delivery is best-effort per recipient. Every failure path collapses into
//! `DeliveryOutcome::Failed` so one bad recipient can never abort a
//! notification run; there is no retry and no dead-letter queue.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use flhub_core::Opportunity;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

pub const CRATE_NAME: &str = "flhub-mailer";

/// Fixed character budget for the description teaser under each title.
/// Cuts mid-word; no word-boundary awareness.
pub const DESCRIPTION_BUDGET: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent { id: String },
    Failed { reason: String },
}

/// One digest message per invocation: subject counts the opportunities, the
/// body links each title to its source URL.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_digest(&self, email: &str, opportunities: &[Opportunity]) -> DeliveryOutcome;
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_key: String,
    pub from: String,
    pub endpoint: String,
    pub http_timeout: Duration,
}

impl MailerConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            from: std::env::var("FLHUB_EMAIL_FROM")
                .unwrap_or_else(|_| "Freelancer Hub <onboarding@resend.dev>".to_string()),
            endpoint: std::env::var("FLHUB_EMAIL_ENDPOINT")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            http_timeout: Duration::from_secs(
                std::env::var("FLHUB_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20),
            ),
        }
    }
}

pub fn digest_subject(count: usize) -> String {
    if count == 1 {
        "1 new opportunity matches your keywords".to_string()
    } else {
        format!("{count} new opportunities match your keywords")
    }
}

/// Cut at the character budget, appending an ellipsis only when something was
/// actually dropped. Character-based so a multibyte title never splits a
/// code point.
pub fn truncate_description(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let cut: String = text.chars().take(budget).collect();
    format!("{cut}...")
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn digest_html(opportunities: &[Opportunity]) -> String {
    let items = opportunities
        .iter()
        .map(|opportunity| {
            let teaser = truncate_description(
                opportunity.description.as_deref().unwrap_or_default(),
                DESCRIPTION_BUDGET,
            );
            format!(
                concat!(
                    "<div style=\"margin-bottom: 15px; padding-bottom: 15px; border-bottom: 1px solid #eee;\">",
                    "<h3 style=\"margin: 0 0 8px 0; font-size: 18px;\">",
                    "<a href=\"{url}\" target=\"_blank\" style=\"color: #1a73e8; text-decoration: none; font-weight: bold;\">{title}</a>",
                    "</h3>",
                    "<p style=\"margin: 0; color: #555; font-size: 14px; line-height: 1.5;\">{teaser}</p>",
                    "</div>"
                ),
                url = html_escape(&opportunity.source_url),
                title = html_escape(&opportunity.title),
                teaser = html_escape(&teaser),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        concat!(
            "<div style=\"font-family: Arial, sans-serif; line-height: 1.6;\">",
            "<h2>Hello!</h2>",
            "<p>Your Freelancer Hub assistant found new opportunities matching your keywords:</p>",
            "<hr>",
            "{items}",
            "<p>Good luck with your search!</p>",
            "<p style=\"font-size: 12px; color: #888;\">You received this email because you are tracking opportunities on Freelancer Hub.</p>",
            "</div>"
        ),
        items = items,
    )
}

#[derive(Debug, Error)]
enum SendFailure {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {detail}")]
    Status { status: u16, detail: String },
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    html: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Mailer over the Resend-style transactional email API.
#[derive(Debug, Clone)]
pub struct ResendMailer {
    client: reqwest::Client,
    config: MailerConfig,
}

impl ResendMailer {
    pub fn new(config: MailerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("building mailer http client")?;
        Ok(Self { client, config })
    }

    async fn try_send(
        &self,
        email: &str,
        opportunities: &[Opportunity],
    ) -> Result<String, SendFailure> {
        let payload = SendRequest {
            from: &self.config.from,
            to: [email],
            subject: digest_subject(opportunities.len()),
            html: digest_html(opportunities),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SendFailure::Status {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(response.json::<SendResponse>().await?.id)
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_digest(&self, email: &str, opportunities: &[Opportunity]) -> DeliveryOutcome {
        match self.try_send(email, opportunities).await {
            Ok(id) => {
                info!(recipient = %email, delivery_id = %id, "digest delivered");
                DeliveryOutcome::Sent { id }
            }
            Err(failure) => {
                error!(recipient = %email, %failure, "digest delivery failed");
                DeliveryOutcome::Failed {
                    reason: failure.to_string(),
                }
            }
        }
    }
}
