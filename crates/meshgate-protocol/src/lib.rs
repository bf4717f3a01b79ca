//! meshgate serial command protocol
//!
//! This crate provides the wire layer of the commissioning gateway: the types
//! and utilities used by the co-processor (host) and the gateway firmware to
//! exchange commands over a serial link.
//!
//! # Protocol Overview
//!
//! The protocol is a simple line-based text interface:
//!
//! - **Commands** (host → gateway): ASCII text terminated with `\n`. A `\r`
//!   anywhere in the stream is ignored and trailing spaces are stripped.
//! - **Responses** (gateway → host): a single upper-case line such as
//!   `JOINER_ADDED 0011223344556677` or `ERROR SIG_INVALID`.
//!
//! # Command Types
//!
//! - **Unsigned commands**: `commissioner_start`, `commissioner_stop` and
//!   `FORM_NET <name>`. These are accepted from anything that can write to
//!   the serial port.
//! - **Signed commands**: `<verb> <args...>|<sig>` where `<sig>` is the
//!   lowercase hex HMAC-SHA256 of the text before the last `|`, keyed by a
//!   secret shared with the host. `add <eui64-or-*> <pskd>` and
//!   `factory_reset` are signed.
//!
//! # Example
//!
//! ```rust
//! use meshgate_protocol::{CommandAuthenticator, Command, Response};
//!
//! let auth = CommandAuthenticator::new(b"shared-secret")?;
//! let line = auth.sign_line("add * J01NME");
//!
//! let body = auth.verify(&line)?;
//! let cmd = Command::parse_signed(body)?;
//! assert!(matches!(cmd, Some(Command::AddJoiner { .. })));
//!
//! assert_eq!(Response::parse("ERROR SIG_INVALID"), Some(Response::SignatureInvalid));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod auth;
mod codec;
mod commands;
mod error;
mod responses;

pub use auth::*;
pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
