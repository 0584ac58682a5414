//! Reconnecting command channel.
//!
//! A [`CommandChannel`] keeps one connection to the gateway open through a
//! [`CommandTransport`](crate::transport::CommandTransport), decodes inbound
//! messages and hands them to a [`CommandHandler`].
//!
//! # Lifecycle
//!
//! ```text
//!                connect()
//! Disconnected ───────────> Connecting ──────> Connected
//!      ^                                        │    ^
//!      │ normal closure (1000),                 │    │ reconnected
//!      │ auth error, disconnect cmd             │    │
//!      ├────────────────────────────────────────┘    │
//!      │                      abnormal closure       │
//!      │                    Connected ──────> Reconnecting
//!      └─────────────── policy gave up ───────────┘
//!
//! close() from any state ──> Closed (terminal)
//! ```
//!
//! # Handler events
//!
//! | Situation                         | Events                               |
//! |-----------------------------------|--------------------------------------|
//! | `authenticationSuccess`           | `on_connect`                         |
//! | `getHtml` / `getResource`         | `on_command`                         |
//! | undecodable message               | `on_error(Decode)`                   |
//! | `authenticationError`             | `on_error(Authentication)`, `on_disconnect` |
//! | `disconnect`                      | `on_error(Disconnected)`, `on_disconnect`   |
//! | normal closure or `close()`       | `on_disconnect`                      |
//! | reconnect gave up                 | `on_error(ConnectFailed)`, `on_disconnect`  |

mod handler;
mod manager;

pub use handler::{ChannelEvent, CommandHandler};
pub use manager::{ChannelState, CommandChannel};
