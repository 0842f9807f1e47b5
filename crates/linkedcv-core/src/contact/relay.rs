use std::sync::{Arc, OnceLock};

use regex::Regex;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::transport::{EmailTransport, OutboundEmail};
use crate::utils::{escape_html, nl2br};

const DEFAULT_ALLOWED_ORIGIN: &str = "https://linkedcv.codebylucio.dev";
const DEFAULT_ENDPOINT: &str = "https://api.resend.com/emails";
const DEFAULT_TO_EMAIL: &str = "contacto@codebylucio.dev";
const DEFAULT_FROM_EMAIL: &str = "LinkedCV Contact <contact@linkedcv.codebylucio.dev>";
const DEFAULT_API_KEY_VAR: &str = "RESEND_API_KEY";

const SUBJECT_PREFIX: &str = "[LinkedCV] ";

fn email_pattern() -> &'static Regex {
    static RE_EMAIL: OnceLock<Regex> = OnceLock::new();
    RE_EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// The only origin allowed to call the relay from a browser
    pub allowed_origin: String,
    pub endpoint: String,
    pub to_email: String,
    pub from_email: String,
    /// Environment variable holding the email API key
    pub api_key_var: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            to_email: DEFAULT_TO_EMAIL.to_string(),
            from_email: DEFAULT_FROM_EMAIL.to_string(),
            api_key_var: DEFAULT_API_KEY_VAR.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(&self.api_key_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn cors_headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Access-Control-Allow-Origin".to_string(),
                self.allowed_origin.clone(),
            ),
            (
                "Access-Control-Allow-Methods".to_string(),
                "POST, OPTIONS".to_string(),
            ),
            (
                "Access-Control-Allow-Headers".to_string(),
                "Content-Type".to_string(),
            ),
        ]
    }
}

/// A contact form submission, fields exactly as submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactMessage {
    /// Extract the four required fields. Missing, non-string and blank
    /// fields are all treated as absent. Values are kept untrimmed, so an
    /// email with surrounding whitespace fails the address check.
    fn from_json(body: &Value) -> Option<Self> {
        let field = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        };
        Some(Self {
            name: field("name")?,
            email: field("email")?,
            subject: field("subject")?,
            message: field("message")?,
        })
    }

    fn has_valid_email(&self) -> bool {
        email_pattern().is_match(&self.email)
    }

    fn html_body(&self) -> String {
        let email = escape_html(&self.email);
        format!(
            "<h2>New contact message from LinkedCV</h2>\n\
             <table>\n\
             <tr><td><strong>Name:</strong></td><td>{}</td></tr>\n\
             <tr><td><strong>Email:</strong></td><td><a href=\"mailto:{}\">{}</a></td></tr>\n\
             <tr><td><strong>Subject:</strong></td><td>{}</td></tr>\n\
             </table>\n\
             <hr>\n\
             <p>{}</p>\n",
            escape_html(&self.name),
            email,
            email,
            escape_html(&self.subject),
            nl2br(&escape_html(&self.message)),
        )
    }
}

/// JSON body of every relay reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<RelayReply>,
}

impl RelayResponse {
    pub fn body_json(&self) -> Option<String> {
        self.body
            .as_ref()
            .and_then(|reply| serde_json::to_string(reply).ok())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Contact endpoint: `POST` relays a message, `OPTIONS` answers CORS preflight.
pub struct ContactRelay {
    config: RelayConfig,
    api_key: Option<String>,
    transport: Arc<dyn EmailTransport>,
}

impl ContactRelay {
    pub fn new(
        config: RelayConfig,
        api_key: Option<String>,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        Self {
            config,
            api_key,
            transport,
        }
    }

    pub async fn handle(&self, method: &Method, body: &[u8]) -> RelayResponse {
        if *method == Method::OPTIONS {
            RelayResponse {
                status: 204,
                headers: self.config.cors_headers(),
                body: None,
            }
        } else if *method == Method::POST {
            self.relay(body).await
        } else {
            let mut headers = self.config.cors_headers();
            headers.push(("Allow".to_string(), "POST, OPTIONS".to_string()));
            RelayResponse {
                status: 405,
                headers,
                body: None,
            }
        }
    }

    async fn relay(&self, body: &[u8]) -> RelayResponse {
        let json: Value = match serde_json::from_slice(body) {
            Ok(json) => json,
            Err(_) => return self.failure(400, "Invalid JSON"),
        };

        let message = match ContactMessage::from_json(&json) {
            Some(message) => message,
            None => return self.failure(400, "All fields are required"),
        };

        if !message.has_valid_email() {
            return self.failure(400, "Invalid email address");
        }

        let api_key = match self.api_key.as_deref() {
            Some(key) => key,
            None => {
                warn!("Email API key is not configured");
                return self.failure(500, "Server configuration error");
            }
        };

        let email = OutboundEmail {
            from: self.config.from_email.clone(),
            to: self.config.to_email.clone(),
            reply_to: message.email.clone(),
            subject: format!("{}{}", SUBJECT_PREFIX, message.subject),
            html: message.html_body(),
        };

        match self.transport.send(api_key, &email).await {
            Ok(status) if (200..300).contains(&status) => {
                info!("Contact message relayed");
                self.reply(
                    200,
                    RelayReply {
                        success: true,
                        error: None,
                    },
                )
            }
            Ok(status) => {
                warn!(status = status, "Email service rejected message");
                self.failure(502, "Email service error")
            }
            Err(e) => {
                warn!(error = %e, "Email service unreachable");
                self.failure(502, "Failed to reach email service")
            }
        }
    }

    fn failure(&self, status: u16, error: &str) -> RelayResponse {
        self.reply(
            status,
            RelayReply {
                success: false,
                error: Some(error.to_string()),
            },
        )
    }

    fn reply(&self, status: u16, reply: RelayReply) -> RelayResponse {
        let mut headers = self.config.cors_headers();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        RelayResponse {
            status,
            headers,
            body: Some(reply),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Upstream {
        Status(u16),
        Down,
    }

    struct RecordingTransport {
        upstream: Upstream,
        sent: Mutex<Vec<(String, OutboundEmail)>>,
    }

    impl RecordingTransport {
        fn new(upstream: Upstream) -> Arc<Self> {
            Arc::new(Self {
                upstream,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, OutboundEmail)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(&self, api_key: &str, email: &OutboundEmail) -> Result<u16, TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((api_key.to_string(), email.clone()));
            match self.upstream {
                Upstream::Status(status) => Ok(status),
                Upstream::Down => {
                    // A request to an unroutable URL yields a genuine reqwest::Error
                    let err = reqwest::Client::new()
                        .get("http://127.0.0.1:0/")
                        .send()
                        .await
                        .unwrap_err();
                    Err(TransportError::Unreachable(err))
                }
            }
        }
    }

    const VALID: &str = r#"{"name":"Ana","email":"ana@example.com","subject":"Hola","message":"Line 1\nLine 2"}"#;

    fn relay(transport: Arc<RecordingTransport>, api_key: Option<&str>) -> ContactRelay {
        ContactRelay::new(
            RelayConfig::default(),
            api_key.map(str::to_string),
            transport,
        )
    }

    fn error_of(response: &RelayResponse) -> Option<&str> {
        response.body.as_ref().and_then(|b| b.error.as_deref())
    }

    #[tokio::test]
    async fn test_preflight_returns_cors_headers() {
        let relay = relay(RecordingTransport::new(Upstream::Status(200)), Some("key"));
        let response = relay.handle(&Method::OPTIONS, b"").await;
        assert_eq!(response.status, 204);
        assert!(response.body.is_none());
        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("https://linkedcv.codebylucio.dev")
        );
        assert_eq!(response.header("Access-Control-Allow-Methods"), Some("POST, OPTIONS"));
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let relay = relay(RecordingTransport::new(Upstream::Status(200)), Some("key"));
        let response = relay.handle(&Method::GET, b"").await;
        assert_eq!(response.status, 405);
        assert_eq!(response.header("Allow"), Some("POST, OPTIONS"));
    }

    #[tokio::test]
    async fn test_valid_message_is_forwarded() {
        let transport = RecordingTransport::new(Upstream::Status(200));
        let relay = relay(transport.clone(), Some("re_secret"));

        let response = relay.handle(&Method::POST, VALID.as_bytes()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_json().as_deref(), Some(r#"{"success":true}"#));
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let (key, email) = &sent[0];
        assert_eq!(key, "re_secret");
        assert_eq!(email.reply_to, "ana@example.com");
        assert_eq!(email.subject, "[LinkedCV] Hola");
        assert_eq!(email.to, "contacto@codebylucio.dev");
        assert!(email.html.contains("<p>Line 1<br>Line 2</p>"));
    }

    #[tokio::test]
    async fn test_html_fields_are_escaped() {
        let transport = RecordingTransport::new(Upstream::Status(200));
        let relay = relay(transport.clone(), Some("key"));
        let body = r#"{"name":"<script>x</script>","email":"a@b.co","subject":"s","message":"m"}"#;

        relay.handle(&Method::POST, body.as_bytes()).await;
        let html = &transport.sent()[0].1.html;
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let transport = RecordingTransport::new(Upstream::Status(200));
        let relay = relay(transport.clone(), Some("key"));
        let response = relay.handle(&Method::POST, b"{not json").await;
        assert_eq!(response.status, 400);
        assert_eq!(error_of(&response), Some("Invalid JSON"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_blank_fields() {
        let relay = relay(RecordingTransport::new(Upstream::Status(200)), Some("key"));
        let bodies = [
            r#"{"name":"Ana","email":"ana@example.com","subject":"Hola"}"#,
            r#"{"name":"   ","email":"ana@example.com","subject":"Hola","message":"x"}"#,
            r#"{"name":"Ana","email":42,"subject":"Hola","message":"x"}"#,
            "null",
        ];
        for body in bodies {
            let response = relay.handle(&Method::POST, body.as_bytes()).await;
            assert_eq!(response.status, 400, "body: {}", body);
            assert_eq!(error_of(&response), Some("All fields are required"));
        }
    }

    #[tokio::test]
    async fn test_invalid_email() {
        let relay = relay(RecordingTransport::new(Upstream::Status(200)), Some("key"));
        for email in [
            "ana",
            "ana@example",
            "ana @example.com",
            "@example.com",
            " ana@example.com ",
            "ana@example.com\n",
        ] {
            let body = serde_json::json!({
                "name": "Ana", "email": email, "subject": "s", "message": "m"
            })
            .to_string();
            let response = relay.handle(&Method::POST, body.as_bytes()).await;
            assert_eq!(response.status, 400, "email: {}", email);
            assert_eq!(error_of(&response), Some("Invalid email address"));
        }
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let transport = RecordingTransport::new(Upstream::Status(200));
        let relay = relay(transport.clone(), None);
        let response = relay.handle(&Method::POST, VALID.as_bytes()).await;
        assert_eq!(response.status, 500);
        assert_eq!(error_of(&response), Some("Server configuration error"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let relay = relay(RecordingTransport::new(Upstream::Status(422)), Some("key"));
        let response = relay.handle(&Method::POST, VALID.as_bytes()).await;
        assert_eq!(response.status, 502);
        assert_eq!(error_of(&response), Some("Email service error"));
    }

    #[tokio::test]
    async fn test_upstream_unreachable() {
        let relay = relay(RecordingTransport::new(Upstream::Down), Some("key"));
        let response = relay.handle(&Method::POST, VALID.as_bytes()).await;
        assert_eq!(response.status, 502);
        assert_eq!(error_of(&response), Some("Failed to reach email service"));
        assert!(response.header("Access-Control-Allow-Origin").is_some());
    }
}
