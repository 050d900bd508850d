//! # mailhop
//!
//! The SMTP front end of a small personal mail server.
//!
//! Each connection is driven by a [`Session`] through the RFC 5321 command
//! sequence. Mail from outside is delivered to the local domains, and mail
//! from an authenticated local user is relayed onwards. Local users must
//! upgrade with STARTTLS and then pass AUTH PLAIN before they can send as
//! one of the served domains. A `[sendas:name]` tag in the Subject rewrites
//! the sender's local part.
//!
//! Policy and storage live behind the [`Server`] trait. [`Gateway`] is the
//! standalone implementation used by the `mailhop` binary.

pub mod address;
pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod ratelimiter;
pub mod reply;
pub mod sendas;
pub mod server;
pub mod session;
pub mod state;
pub mod tls;
pub mod trace;
pub mod transport;
pub mod utils;

pub use address::Address;
pub use config::{Opt, SessionConfig};
pub use envelope::Envelope;
pub use error::SessionError;
pub use gateway::Gateway;
pub use reply::ReplyLine;
pub use server::Server;
pub use session::{Flow, Session};
pub use state::{Delivery, State};
pub use transport::Transport;
