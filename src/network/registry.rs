use std::collections::hash_map::Drain;
use std::collections::HashMap;

use mio::Token;

use crate::network::Connection;

/// Stable identity of one accepted socket, valid for the connection's
/// lifetime. Tokens count upward and are never reused by the reactor, so an
/// id held by an external collaborator cannot alias a later connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    pub fn token(self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for ConnectionId {
    fn from(token: Token) -> ConnectionId {
        ConnectionId(token.0)
    }
}

/// The set of live connections, keyed by the readiness token the
/// multiplexer reports events with.
///
/// The registry exclusively owns every `Connection`; removal releases the
/// socket, buffers and queued envelopes in one place, and removing an
/// already-gone entry is a no-op so duplicate teardown triggers within one
/// readiness cycle are harmless.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Token, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            connections: HashMap::new(),
        }
    }

    pub fn insert(&mut self, token: Token, connection: Connection) {
        let displaced = self.connections.insert(token, connection);
        debug_assert!(displaced.is_none(), "token {:?} registered twice", token);
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.connections.get_mut(&token)
    }

    pub fn remove(&mut self, token: Token) -> Option<Connection> {
        self.connections.remove(&token)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn drain(&mut self) -> Drain<'_, Token, Connection> {
        self.connections.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::test_support::connection_pair;

    #[test]
    fn test_insert_lookup_remove() {
        let mut registry = ConnectionRegistry::new();
        let (connection, _peer) = connection_pair();
        let token = connection.token();

        registry.insert(token, connection);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_mut(token).is_some());

        let removed = registry.remove(token);
        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_remove_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let (connection, _peer) = connection_pair();
        let token = connection.token();
        registry.insert(token, connection);

        assert!(registry.remove(token).is_some());
        // a second trigger in the same readiness cycle finds nothing
        assert!(registry.remove(token).is_none());
        assert!(registry.remove(token).is_none());
    }

    #[test]
    fn test_connection_id_round_trip() {
        let id = ConnectionId::from(Token(7));
        assert_eq!(id, ConnectionId(7));
        assert_eq!(id.token(), Token(7));
    }
}
