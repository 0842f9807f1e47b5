use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::TransportError;

/// HTTP request timeout in seconds for the email API
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Message handed to the email API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub html: String,
}

/// Delivers an email and reports the upstream HTTP status.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, api_key: &str, email: &OutboundEmail) -> Result<u16, TransportError>;
}

/// Resend-compatible JSON API with bearer-token auth.
#[derive(Clone)]
pub struct ResendTransport {
    client: Client,
    endpoint: String,
}

impl ResendTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    async fn send(&self, api_key: &str, email: &OutboundEmail) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(email)
            .send()
            .await?;
        let status = response.status().as_u16();
        debug!(status = status, "Email API responded");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_email_wire_format() {
        let email = OutboundEmail {
            from: "LinkedCV Contact <contact@example.dev>".into(),
            to: "me@example.dev".into(),
            reply_to: "ana@example.com".into(),
            subject: "[LinkedCV] Hello".into(),
            html: "<p>Hi</p>".into(),
        };
        let json = serde_json::to_value(&email).unwrap();
        assert_eq!(json["reply_to"], "ana@example.com");
        assert_eq!(json["subject"], "[LinkedCV] Hello");
        assert_eq!(json.as_object().unwrap().len(), 5);
    }
}
