//! Slack Web API client.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, instrument};

use super::error::SlackError;
use super::types::{Block, PostMessageResponse, SlackMessage};

/// Slack Web API base URL.
const SLACK_API_BASE: &str = "https://slack.com/api";

/// Slack API client for posting messages.
#[derive(Clone)]
pub struct SlackClient {
    client: Client,
    bot_token: SecretString,
    /// Channel that receives return notifications.
    channel: String,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("bot_token", &"[REDACTED]")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl SlackClient {
    /// Create a new Slack client.
    #[must_use]
    pub fn new(bot_token: SecretString, channel: String) -> Self {
        Self {
            client: Client::new(),
            bot_token,
            channel,
        }
    }

    /// The notification channel ID.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Post a message to the notification channel.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or Slack returns an error.
    #[instrument(skip(self, blocks), fields(channel = %self.channel))]
    pub async fn post_message(
        &self,
        blocks: Vec<Block>,
        fallback_text: Option<&str>,
    ) -> Result<PostMessageResponse, SlackError> {
        let message = SlackMessage {
            channel: self.channel.clone(),
            blocks,
            text: fallback_text.map(String::from),
        };

        let response = self
            .client
            .post(format!("{SLACK_API_BASE}/chat.postMessage"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&message)
            .send()
            .await
            .map_err(|e| SlackError::Request(e.to_string()))?;

        let result: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| SlackError::Response(e.to_string()))?;

        if !result.ok {
            error!(error = ?result.error, "Slack API error posting message");
            return Err(SlackError::Api(
                result.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        debug!(ts = ?result.ts, "Message posted to Slack");

        Ok(result)
    }
}
