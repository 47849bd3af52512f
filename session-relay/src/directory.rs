//! Live clients, keyed by the id handed out when their connection is accepted.

use std::{collections::BTreeMap, fmt};

use tokio::sync::mpsc;

use crate::{message::Envelope, registry::SessionId};

/// Identity shown for a client that has not logged in yet.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Sending side of a connection's write queue.
pub type Outbox = mpsc::Sender<Envelope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Client {
    username: Option<String>,
    session: Option<SessionId>,
    outbox: Outbox,
}

impl Client {
    /// The authenticated username, or [`UNKNOWN_IDENTITY`].
    pub fn identity(&self) -> &str {
        self.username.as_deref().unwrap_or(UNKNOWN_IDENTITY)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: BTreeMap<ClientId, Client>,
    next_id: u64,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection: unknown identity, no session.
    pub fn register_connection(&mut self, outbox: Outbox) -> ClientId {
        self.next_id += 1;
        let id = ClientId(self.next_id);
        self.clients.insert(
            id,
            Client {
                username: None,
                session: None,
                outbox,
            },
        );
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Returns `false` if the client is gone.
    pub fn set_identity(&mut self, id: ClientId, username: impl Into<String>) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.username = Some(username.into());
                true
            }
            None => false,
        }
    }

    pub fn set_session(&mut self, id: ClientId, session: Option<SessionId>) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.session = session;
                true
            }
            None => false,
        }
    }

    /// Drops the client. Session membership is cleaned up by the caller,
    /// see `RelayState::remove_client`.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// First client logged in under `username`, lowest id first.
    ///
    /// Nothing stops two connections from logging in as the same account;
    /// the older connection wins.
    pub fn find_by_identity(&self, username: &str) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.username() == Some(username))
            .map(|(id, _)| *id)
    }

    /// Usernames of every authenticated client, in connection order.
    pub fn usernames(&self) -> Vec<&str> {
        self.clients
            .values()
            .filter_map(Client::username)
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }
}
