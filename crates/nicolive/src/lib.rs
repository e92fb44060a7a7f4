//! Nicolive: client for the niconico live comment server protocol.
//!
//! The comment server speaks NUL-delimited XML records over a plain TCP
//! connection. A client joins a thread with a handshake, then receives chat
//! records as they are posted and may post its own.
//!
//! ## Session
//!
//! - [`CommentSession`] - One connection to a comment thread
//! - [`CommentEvents`] - Ordered stream of [`CommentEvent`]s from a session
//! - [`SessionConfig`] - Timeouts and buffer sizes
//! - [`SessionState`] - Lifecycle of a session
//!
//! ## Wire format
//!
//! - [`codec::NulDelimitedCodec`] - Framing
//! - [`record`] - Inbound records and outbound requests
//! - [`Mail`] - Comment decoration (`mail` attribute)
//! - [`vpos`] - Playback position of comments
//!
//! ## Control plane
//!
//! - [`PostKeyProvider`] - Source of one-time post keys
//! - [`NicoliveApi`] - HTTP player status and post key lookups
//!
//! ```no_run
//! use nicolive::{CommentEvent, CommentSession, ConnectionParams, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ConnectionParams::new("msg.live.nicovideo.jp", 2805, 1234567890);
//! let token = CancellationToken::new();
//! let mut session = CommentSession::open(params, -100, SessionConfig::default(), &token).await?;
//!
//! let mut events = session.take_events().expect("events are taken once");
//! while let Some(event) = events.recv().await {
//!     if let CommentEvent::Chat(chat) = event {
//!         println!("{}: {}", chat.no, chat.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod mail;
pub mod record;
pub mod session;
pub mod vpos;

pub use api::{
    ApiConfig, CommentServer, NicoliveApi, PlayerStatus, PostKeyProvider, find_live_id,
};
pub use config::SessionConfig;
pub use error::{ApiError, ConnectError, DecodeError, EncodeError, PostError};
pub use event::CommentEvent;
pub use lifecycle::SessionState;
pub use mail::{CommentColor, CommentPosition, CommentSize, Mail};
pub use record::{Chat, HandshakeAck, PostAck, Record};
pub use session::{CommentEvents, CommentSession, ConnectionParams, Poster};
pub use vpos::{vpos_between, vpos_now};
