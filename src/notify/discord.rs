use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notification, Notifier};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, n: &Notification) -> Result<()> {
        let payload = DiscordWebhookPayload::embed(n);
        self.client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("discord webhook request")?
            .error_for_status()
            .context("discord webhook non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(n: &Notification) -> Self {
        // Discord caps embed descriptions at 4096 chars.
        let description: String = n.body.chars().take(4096).collect();
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: n.title.chars().take(256).collect(),
                description,
                timestamp: n.timestamp.to_rfc3339(),
            }],
        }
    }
}
