//! Contact form relay.
//!
//! Validates the site's contact form submissions and forwards them to a
//! transactional email API. The handler is transport-agnostic: the hosting
//! function passes the method and raw body in and writes the returned
//! `RelayResponse` out.

pub mod relay;
pub mod transport;

pub use relay::{ContactMessage, ContactRelay, RelayConfig, RelayReply, RelayResponse};
pub use transport::{EmailTransport, OutboundEmail, ResendTransport};
