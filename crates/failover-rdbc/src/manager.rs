//! Connection manager for failover-rdbc
//!
//! Owns at most one live session. [`ConnectionManager::ensure_connected`]
//! walks the server pool in order and keeps the first session that opens;
//! per-server failures are logged and skipped, and only exhaustion of the
//! whole pool is reported (as `false`).

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectOptions, Connection, ConnectionFactory};
use crate::server::{ServerDescriptor, ServerPool};

/// The live session and the server it belongs to
struct Session {
    index: usize,
    server: ServerDescriptor,
    conn: Box<dyn Connection>,
}

/// Failover connection manager
pub struct ConnectionManager {
    pool: ServerPool,
    factory: Arc<dyn ConnectionFactory>,
    options: ConnectOptions,
    session: Option<Session>,
}

impl ConnectionManager {
    /// Create a manager; nothing connects until first use
    pub fn new(
        pool: ServerPool,
        factory: Arc<dyn ConnectionFactory>,
        options: ConnectOptions,
    ) -> Self {
        Self {
            pool,
            factory,
            options,
            session: None,
        }
    }

    /// Make sure a session exists, trying servers in pool order.
    ///
    /// Returns `true` immediately when already connected, and `false` only
    /// after every server has refused.
    pub fn ensure_connected(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }

        for (index, server) in self.pool.iter().enumerate() {
            match self.factory.connect(server, &self.options) {
                Ok(conn) => {
                    info!(
                        index,
                        host = %server.host(),
                        database = %server.database(),
                        persistent = self.options.persistent,
                        "Database session established"
                    );
                    self.session = Some(Session {
                        index,
                        server: server.clone(),
                        conn,
                    });
                    return true;
                }
                Err(e) => {
                    debug!(
                        index,
                        server = %server.label(),
                        error = %e,
                        "Connection attempt failed, trying next server"
                    );
                }
            }
        }

        warn!(
            servers = self.pool.len(),
            "No server in the pool accepted a connection"
        );
        false
    }

    /// Release the session. The pool is left untouched.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.conn.close() {
                debug!(server = %session.server.label(), error = %e, "Error closing session");
            }
            debug!(server = %session.server.label(), "Database session closed");
        }
    }

    /// Drop the current session and connect again from the top of the pool
    pub fn reconnect(&mut self) -> bool {
        self.close();
        self.ensure_connected()
    }

    /// Change session persistence; reconnects only when the flag changes.
    ///
    /// Returns whether the flag changed.
    pub fn set_persistent(&mut self, persistent: bool) -> bool {
        if self.options.persistent == persistent {
            return false;
        }
        self.options.persistent = persistent;
        self.reconnect();
        true
    }

    /// Current persistence flag
    pub fn is_persistent(&self) -> bool {
        self.options.persistent
    }

    /// Shuffle the pool; the live session (if any) is kept
    pub fn randomize(&mut self) {
        self.pool.randomize();
        if let Some(session) = self.session.as_mut() {
            let label = session.server.label();
            if let Some(index) = self.pool.iter().position(|s| s.label() == label) {
                session.index = index;
            }
        }
    }

    /// Check if a session exists
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Pool position of the active server
    pub fn active_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    /// The active server
    pub fn active_server(&self) -> Option<&ServerDescriptor> {
        self.session.as_ref().map(|s| &s.server)
    }

    /// Host of the active server
    pub fn host(&self) -> Option<&str> {
        self.active_server().map(ServerDescriptor::host)
    }

    /// The live session
    pub fn connection(&mut self) -> Option<&mut dyn Connection> {
        match self.session.as_mut() {
            Some(session) => Some(session.conn.as_mut()),
            None => None,
        }
    }

    /// The live session, shared
    pub fn connection_ref(&self) -> Option<&dyn Connection> {
        match self.session.as_ref() {
            Some(session) => Some(session.conn.as_ref()),
            None => None,
        }
    }

    /// The server pool in its current order
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Options applied to new sessions
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("servers", &self.pool.len())
            .field("database_type", &self.factory.database_type())
            .field("options", &self.options)
            .field("active", &self.session.as_ref().map(|s| s.server.label()))
            .finish()
    }
}
