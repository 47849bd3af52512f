//! Protocol state machine.
//!
//! Each client moves through `Unauthenticated → Authenticated → InSession`.
//! [`RelayState::dispatch`] applies one decoded envelope to the shared state
//! and returns the [`Action`]s the relay must carry out; it performs no I/O
//! on connections itself.

use tracing::{debug, info, warn};

use crate::{
    directory::ClientId,
    error::{CredentialError, RegistryError},
    message::{Envelope, MAX_DATA_LEN, MAX_SOURCE_LEN, MessageType, PrivatePayload},
    registry::Broadcast,
    state::RelayState,
};

/// An outbound effect of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send { to: ClientId, envelope: Envelope },
    /// Close the client's connection once queued envelopes are flushed.
    Disconnect { client: ClientId },
}

fn reply(to: ClientId, kind: MessageType, data: impl Into<String>) -> Vec<Action> {
    vec![Action::Send {
        to,
        envelope: Envelope::from_server(kind, data),
    }]
}

fn notice(to: ClientId, text: impl Into<String>) -> Vec<Action> {
    vec![Action::Send {
        to,
        envelope: Envelope::notice(text),
    }]
}

impl RelayState {
    pub async fn dispatch(&mut self, client: ClientId, envelope: Envelope) -> Vec<Action> {
        if !self.directory.contains(client) {
            warn!(%client, kind = %envelope.kind, "dropping envelope from unregistered client");
            return Vec::new();
        }
        debug!(%client, kind = %envelope.kind, size = envelope.size, "dispatching");

        match envelope.kind {
            MessageType::Register => self.handle_register(client, &envelope).await,
            MessageType::Login => self.handle_login(client, &envelope).await,
            MessageType::NewSess => self.handle_new_session(client, &envelope.data),
            MessageType::Join => self.handle_join(client, &envelope.data),
            MessageType::LeaveSess => self.handle_leave(client),
            MessageType::Query => self.handle_query(client),
            MessageType::Message => self.handle_message(client, envelope.data),
            MessageType::PrivateMessage => self.handle_private_message(client, &envelope.data),
            MessageType::Exit => self.handle_exit(client),
            MessageType::LoAck
            | MessageType::LoNak
            | MessageType::JnAck
            | MessageType::JnNak
            | MessageType::NsAck
            | MessageType::QuAck
            | MessageType::RegAck
            | MessageType::RegNak => {
                debug!(%client, kind = %envelope.kind, "ignoring server-only message type");
                Vec::new()
            }
        }
    }

    async fn handle_register(&mut self, client: ClientId, envelope: &Envelope) -> Vec<Action> {
        match self
            .credentials
            .register(&envelope.source, &envelope.data)
            .await
        {
            Ok(()) => reply(client, MessageType::RegAck, "Registration successful"),
            Err(CredentialError::Io(err)) => {
                warn!(%client, error = ?err, "account store unavailable");
                reply(
                    client,
                    MessageType::RegNak,
                    "Registration failed: account store unavailable",
                )
            }
            Err(err) => reply(
                client,
                MessageType::RegNak,
                format!("Registration failed: {err}"),
            ),
        }
    }

    async fn handle_login(&mut self, client: ClientId, envelope: &Envelope) -> Vec<Action> {
        let already_authenticated = self
            .directory
            .get(client)
            .is_some_and(|record| record.is_authenticated());
        if already_authenticated {
            return reply(client, MessageType::LoNak, "Already logged in");
        }

        let username = envelope.source.as_str();
        if !self
            .credentials
            .exists_and_matches(username, &envelope.data)
            .await
        {
            info!(%client, username, "login failed");
            return reply(client, MessageType::LoNak, "User or password incorrect");
        }

        self.directory.set_identity(client, username);
        info!(%client, username, "login successful");
        reply(client, MessageType::LoAck, "Login successful")
    }

    fn handle_new_session(&mut self, client: ClientId, name: &str) -> Vec<Action> {
        if !self.is_authenticated(client) {
            return notice(client, "Log in before creating a session");
        }
        if name.len() > MAX_SOURCE_LEN {
            return notice(client, "Session name too long");
        }

        let session = match self.registry.create(name, client) {
            Ok(session) => session,
            Err(RegistryError::AlreadyExists(_)) => {
                return notice(client, "Session already exists");
            }
            Err(RegistryError::EmptyName) => return notice(client, "Session name required"),
            Err(err) => {
                warn!(%client, error = %err, "session creation failed");
                return Vec::new();
            }
        };

        self.leave_current_session(client);
        self.directory.set_session(client, Some(session));
        info!(%client, session = name, "session created");
        reply(client, MessageType::NsAck, name)
    }

    fn handle_join(&mut self, client: ClientId, name: &str) -> Vec<Action> {
        if !self.is_authenticated(client) {
            return reply(client, MessageType::JnNak, "Not logged in");
        }
        let Some(session) = self.registry.find(name) else {
            return reply(client, MessageType::JnNak, "Session does not exist");
        };

        let current = self.directory.get(client).and_then(|record| record.session());
        if current != Some(session) {
            // A client sits in at most one session at a time.
            self.leave_current_session(client);
            if let Err(err) = self.registry.join(session, client) {
                warn!(%client, error = %err, "join failed");
                return reply(client, MessageType::JnNak, "Session does not exist");
            }
            self.directory.set_session(client, Some(session));
            info!(%client, session = name, "joined session");
        }
        reply(client, MessageType::JnAck, name)
    }

    fn handle_leave(&mut self, client: ClientId) -> Vec<Action> {
        if self.leave_current_session(client).is_none() {
            debug!(%client, "LEAVE_SESS outside of a session ignored");
        }
        Vec::new()
    }

    fn handle_query(&self, client: ClientId) -> Vec<Action> {
        let report = query_report(&self.directory.usernames(), &self.registry.names());
        reply(client, MessageType::QuAck, report)
    }

    fn handle_message(&mut self, client: ClientId, text: String) -> Vec<Action> {
        let Some(sender) = self.directory.get(client) else {
            return Vec::new();
        };
        let Some(session) = sender.session() else {
            debug!(%client, "MESSAGE outside of a session dropped");
            return Vec::new();
        };
        let source = sender.identity().to_string();

        match self.registry.broadcast(session, client) {
            Ok(Broadcast::Recipients(recipients)) => {
                let envelope = Envelope::new(MessageType::Message, source, text);
                recipients
                    .into_iter()
                    .map(|to| Action::Send {
                        to,
                        envelope: envelope.clone(),
                    })
                    .collect()
            }
            Ok(Broadcast::NoOtherMembers) => {
                debug!(%client, "no other members to receive message");
                Vec::new()
            }
            Err(err) => {
                warn!(%client, error = %err, "client referenced a missing session");
                self.directory.set_session(client, None);
                Vec::new()
            }
        }
    }

    fn handle_private_message(&mut self, client: ClientId, data: &str) -> Vec<Action> {
        let Some(sender) = self.directory.get(client).and_then(|record| record.username()) else {
            return notice(client, "Log in before sending private messages");
        };
        let sender = sender.to_string();

        let payload = match PrivatePayload::from_data(data) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(%client, error = %err, "bad private message payload");
                return notice(client, "Invalid PM format");
            }
        };

        match self.directory.find_by_identity(&payload.target) {
            Some(target) if target != client => {
                debug!(%client, %target, "forwarding private message");
                vec![Action::Send {
                    to: target,
                    envelope: Envelope::new(MessageType::PrivateMessage, sender, payload.body),
                }]
            }
            _ => {
                debug!(%client, target = %payload.target, "private message target not found");
                notice(client, "Target not found")
            }
        }
    }

    fn handle_exit(&mut self, client: ClientId) -> Vec<Action> {
        if let Some(record) = self.remove_client(client) {
            info!(%client, identity = record.identity(), "client exited");
        }
        vec![Action::Disconnect { client }]
    }

    fn is_authenticated(&self, client: ClientId) -> bool {
        self.directory
            .get(client)
            .is_some_and(|record| record.is_authenticated())
    }
}

/// Lists users and sessions, skipping entries that would overflow one envelope.
fn query_report(users: &[&str], sessions: &[&str]) -> String {
    const SESSIONS_HEADER: &str = "\nSessions: ";

    let mut report = String::from("Users: ");
    append_list(&mut report, users, MAX_DATA_LEN - SESSIONS_HEADER.len());
    report.push_str(SESSIONS_HEADER);
    append_list(&mut report, sessions, MAX_DATA_LEN);
    report
}

fn append_list(report: &mut String, items: &[&str], limit: usize) {
    let mut first = true;
    for item in items {
        let separator = if first { "" } else { ", " };
        if report.len() + separator.len() + item.len() > limit {
            continue;
        }
        report.push_str(separator);
        report.push_str(item);
        first = false;
    }
}
