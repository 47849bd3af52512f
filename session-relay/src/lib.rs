//! Session-oriented message relay.
//!
//! One server process accepts TCP clients, authenticates them against a
//! plain-text account file, groups them into named sessions, and routes
//! broadcast, private, and control messages between them. Each module
//! focuses on a concrete responsibility:
//!
//! - [`message`] is the `type:size:source:data` envelope codec and the
//!   nested private-message payload.
//! - [`frame`] wraps envelopes in versioned, length-prefixed frames and
//!   reassembles them from a byte stream.
//! - [`credentials`] is the file-backed account store.
//! - [`directory`] and [`registry`] track connected clients and sessions;
//!   [`state`] ties them together.
//! - [`dispatch`] is the protocol state machine that turns one envelope into
//!   outbound actions.
//! - [`relay`] accepts connections, reads frames, runs dispatch steps, and
//!   delivers the results.
//! - [`cli`], [`config`], and [`client`] cover the command line, runtime
//!   settings, and the interactive terminal client.

pub mod cli;
pub mod client;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;
pub mod relay;
pub mod state;
