//! CMS Gateway command protocol.
//!
//! Decoding of gateway commands, encoding of client error notifications and
//! the reconnect policy that governs the command channel.
//!
//! # Message Flow
//!
//! ```text
//! Client                                Gateway
//!    |                                     |
//!    |======= WebSocket connect ==========>|  ?key=..&projectId=..
//!    |<------ authenticationSuccess -------|  (or authenticationError)
//!    |                                     |
//!    |<------ getHtml {rid, uri} ----------|  Request content
//!    |------- HTTP POST /upload?rid=.. --->|  Deliver it (upload channel)
//!    |                                     |
//!    |<------ getResource {rid, uri} ------|
//!    |------- {state:"error", rid, ..} --->|  Or report failure
//!    |                                     |
//!    |<------ disconnect {message} --------|  Gateway ends the session
//! ```
//!
//! ## Commands
//!
//! | `cmd`                   | Fields         | Client reaction                          |
//! |-------------------------|----------------|------------------------------------------|
//! | `authenticationSuccess` |                | `on_connect`                             |
//! | `authenticationError`   |                | close (normal), `on_error`, no reconnect |
//! | `disconnect`            | `message`?     | close (normal), `on_error`, no reconnect |
//! | `getHtml`               | `rid`, `uri`   | `on_command`                             |
//! | `getResource`           | `rid`, `uri`   | `on_command`                             |
//!
//! Command names are matched case-insensitively.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cms_gateway::protocol::{codec, Command, ErrorResponse};
//!
//! match codec::parse(r#"{"cmd":"getHtml","rid":"42","uri":"/index.html"}"#)? {
//!     Command::GetHtml(request) => {
//!         let error = ErrorResponse::new(&request).with_http_code(404);
//!         println!("{}", error.to_json());
//!     }
//!     _ => {}
//! }
//! ```

pub mod codec;
mod command;
mod error_response;
mod reconnect;

pub use command::{Command, ResourceRequest};
pub use error_response::ErrorResponse;
pub use reconnect::ReconnectPolicy;

/// Close code for a normal, intentional closure (RFC 6455).
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a connection drops without a close frame (RFC 6455).
pub const ABNORMAL_CLOSURE: u16 = 1006;
