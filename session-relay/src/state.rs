//! The relay's mutable world: who is connected and which sessions exist.
//!
//! `RelayState` is owned by the relay behind a single mutex. Every mutation
//! happens inside one dispatch step, so the directory and the registry never
//! disagree about who sits where.

use tracing::info;

use crate::{
    config::DuplicateSessions,
    credentials::CredentialStore,
    directory::{Client, ClientDirectory, ClientId, Outbox},
    registry::{LeaveOutcome, SessionRegistry},
};

#[derive(Debug)]
pub struct RelayState {
    pub(crate) directory: ClientDirectory,
    pub(crate) registry: SessionRegistry,
    pub(crate) credentials: CredentialStore,
}

impl RelayState {
    pub fn new(credentials: CredentialStore, duplicates: DuplicateSessions) -> Self {
        Self {
            directory: ClientDirectory::new(),
            registry: SessionRegistry::new(duplicates),
            credentials,
        }
    }

    pub fn directory(&self) -> &ClientDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connect(&mut self, outbox: Outbox) -> ClientId {
        self.directory.register_connection(outbox)
    }

    /// Removes a client and its session membership.
    ///
    /// A session the client occupied alone is deleted with it. Returns `None`
    /// if the client was already gone, which makes this safe to call after
    /// EXIT has been dispatched.
    pub fn remove_client(&mut self, client: ClientId) -> Option<Client> {
        self.leave_current_session(client);
        self.directory.remove(client)
    }

    /// Takes `client` out of the session it currently occupies, if any.
    pub(crate) fn leave_current_session(&mut self, client: ClientId) -> Option<LeaveOutcome> {
        let session = self.directory.get(client)?.session()?;
        self.directory.set_session(client, None);

        let outcome = self.registry.leave(session, client);
        if let LeaveOutcome::Closed { name } = &outcome {
            info!(session = %name, "session closed after its last member left");
        }
        Some(outcome)
    }
}
