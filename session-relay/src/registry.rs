//! Named sessions and their members.
//!
//! Sessions are keyed by [`SessionId`] rather than by name because the
//! `allow` duplicate policy lets two sessions share a name. A session never
//! outlives its last member: it is born with its founder and removed the
//! moment `leave` empties it.

use std::collections::{BTreeMap, VecDeque};

use crate::{config::DuplicateSessions, directory::ClientId, error::RegistryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

#[derive(Debug)]
pub struct Session {
    name: String,
    // Newest member first.
    members: VecDeque<ClientId>,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.members.contains(&client)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// The leaving client was the last member; the session is gone.
    Closed { name: String },
    NotMember,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Broadcast {
    Recipients(Vec<ClientId>),
    /// The sender is alone in the session.
    NoOtherMembers,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    next_id: u64,
    duplicates: DuplicateSessions,
}

impl SessionRegistry {
    pub fn new(duplicates: DuplicateSessions) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: 0,
            duplicates,
        }
    }

    /// Newest session carrying `name`.
    pub fn find(&self, name: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .rev()
            .find(|(_, session)| session.name == name)
            .map(|(id, _)| *id)
    }

    /// Creates a session with `founder` as its only member.
    pub fn create(&mut self, name: &str, founder: ClientId) -> Result<SessionId, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.duplicates == DuplicateSessions::Reject && self.find(name).is_some() {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }

        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(
            id,
            Session {
                name: name.to_string(),
                members: VecDeque::from([founder]),
            },
        );
        Ok(id)
    }

    /// Adds `client` to the front of the member list.
    ///
    /// Membership of any other session is left alone.
    pub fn join(&mut self, session: SessionId, client: ClientId) -> Result<(), RegistryError> {
        let session = self
            .sessions
            .get_mut(&session)
            .ok_or(RegistryError::UnknownSession)?;
        if !session.contains(client) {
            session.members.push_front(client);
        }
        Ok(())
    }

    pub fn leave(&mut self, session_id: SessionId, client: ClientId) -> LeaveOutcome {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return LeaveOutcome::NotMember;
        };
        let Some(position) = session.members.iter().position(|member| *member == client) else {
            return LeaveOutcome::NotMember;
        };

        session.members.remove(position);
        if !session.is_empty() {
            return LeaveOutcome::Left;
        }

        match self.sessions.remove(&session_id) {
            Some(session) => LeaveOutcome::Closed { name: session.name },
            None => LeaveOutcome::Left,
        }
    }

    /// Everyone in `session` except `sender`.
    pub fn broadcast(
        &self,
        session: SessionId,
        sender: ClientId,
    ) -> Result<Broadcast, RegistryError> {
        let session = self
            .sessions
            .get(&session)
            .ok_or(RegistryError::UnknownSession)?;
        let recipients: Vec<ClientId> = session
            .members()
            .filter(|member| *member != sender)
            .collect();

        if recipients.is_empty() {
            Ok(Broadcast::NoOtherMembers)
        } else {
            Ok(Broadcast::Recipients(recipients))
        }
    }

    pub fn get(&self, session: SessionId) -> Option<&Session> {
        self.sessions.get(&session)
    }

    /// Session names, newest first.
    pub fn names(&self) -> Vec<&str> {
        self.sessions
            .values()
            .rev()
            .map(|session| session.name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.sessions.iter().map(|(id, session)| (*id, session))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::directory::ClientDirectory;

    fn clients(count: usize) -> Vec<ClientId> {
        let mut directory = ClientDirectory::new();
        (0..count)
            .map(|_| directory.register_connection(mpsc::channel(1).0))
            .collect()
    }

    #[test]
    fn create_seats_the_founder() {
        let ids = clients(1);
        let mut registry = SessionRegistry::default();
        let room = registry.create("room1", ids[0]).expect("create");

        assert_eq!(registry.find("room1"), Some(room));
        let session = registry.get(room).expect("session");
        assert_eq!(session.name(), "room1");
        assert_eq!(session.members().collect::<Vec<_>>(), vec![ids[0]]);
    }

    #[test]
    fn duplicate_names_follow_policy() {
        let ids = clients(2);

        let mut strict = SessionRegistry::new(DuplicateSessions::Reject);
        strict.create("room1", ids[0]).expect("create");
        assert_eq!(
            strict.create("room1", ids[1]),
            Err(RegistryError::AlreadyExists("room1".into()))
        );
        assert_eq!(strict.create("", ids[1]), Err(RegistryError::EmptyName));

        let mut lenient = SessionRegistry::new(DuplicateSessions::Allow);
        let first = lenient.create("room1", ids[0]).expect("create");
        let second = lenient.create("room1", ids[1]).expect("duplicate allowed");
        assert_ne!(first, second);
        assert_eq!(lenient.find("room1"), Some(second));
        assert_eq!(lenient.names(), vec!["room1", "room1"]);
    }

    #[test]
    fn join_prepends_and_ignores_repeats() {
        let ids = clients(3);
        let mut registry = SessionRegistry::default();
        let room = registry.create("room1", ids[0]).expect("create");
        registry.join(room, ids[1]).expect("join");
        registry.join(room, ids[2]).expect("join");
        registry.join(room, ids[1]).expect("join again");

        let members: Vec<_> = registry.get(room).expect("session").members().collect();
        assert_eq!(members, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn last_leave_closes_session() {
        let ids = clients(2);
        let mut registry = SessionRegistry::default();
        let room = registry.create("room1", ids[0]).expect("create");
        registry.join(room, ids[1]).expect("join");

        assert_eq!(registry.leave(room, ids[1]), LeaveOutcome::Left);
        assert_eq!(registry.leave(room, ids[1]), LeaveOutcome::NotMember);
        assert_eq!(
            registry.leave(room, ids[0]),
            LeaveOutcome::Closed {
                name: "room1".into()
            }
        );
        assert!(registry.is_empty());
        assert_eq!(registry.find("room1"), None);
        assert_eq!(registry.join(room, ids[0]), Err(RegistryError::UnknownSession));
    }

    #[test]
    fn broadcast_skips_sender() {
        let ids = clients(3);
        let mut registry = SessionRegistry::default();
        let room = registry.create("room1", ids[0]).expect("create");
        assert_eq!(registry.broadcast(room, ids[0]), Ok(Broadcast::NoOtherMembers));

        registry.join(room, ids[1]).expect("join");
        registry.join(room, ids[2]).expect("join");
        assert_eq!(
            registry.broadcast(room, ids[0]),
            Ok(Broadcast::Recipients(vec![ids[2], ids[1]]))
        );
    }
}
