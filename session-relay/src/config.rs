use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::ValueEnum;

use crate::frame::DEFAULT_MAX_FRAME_LEN;

/// What NEW_SESS does when a session with the requested name already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DuplicateSessions {
    /// Refuse the request and tell the caller the name is taken.
    #[default]
    Reject,
    /// Create a second session under the same name; JOIN picks the newest.
    Allow,
}

/// Runtime settings for a relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub accounts_path: PathBuf,
    pub duplicate_sessions: DuplicateSessions,
    pub max_frame_len: usize,
    /// Envelopes queued per connection before new ones are dropped.
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000),
            accounts_path: PathBuf::from("accounts.txt"),
            duplicate_sessions: DuplicateSessions::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbox_capacity: 128,
        }
    }
}
