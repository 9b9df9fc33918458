//! Caller-held transaction context.
//!
//! A [`TxContext`] is the handle for one unit of work: it owns at most one
//! connection, knows whether that connection carries an open transaction,
//! counts nested `begin` calls and carries the deadline applied to every
//! round trip made through it. It is passed by `&mut`, so a single caller
//! chain owns it at a time.

use std::time::Duration;
use tokio::time::Instant;

/// What the context currently holds.
pub(crate) enum Handle<C> {
    Detached,
    Connection(C),
    Transaction(C),
}

pub struct TxContext<C> {
    id: String,
    pub(crate) handle: Handle<C>,
    pub(crate) nesting_level: u32,
    deadline: Option<Instant>,
}

impl<C> TxContext<C> {
    /// An empty context: no connection, no transaction, no deadline.
    pub fn new() -> Self {
        Self {
            id: generate_context_id(),
            handle: Handle::Detached,
            nesting_level: 0,
            deadline: None,
        }
    }

    pub(crate) fn with_connection(connection: C) -> Self {
        let mut ctx = Self::new();
        ctx.attach(connection);
        ctx
    }

    /// Bound every round trip made through this context by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Identifier used in logs and errors.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of unmatched `begin` calls.
    pub fn nesting_level(&self) -> u32 {
        self.nesting_level
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.handle, Handle::Transaction(_))
    }

    /// Whether a connection is held, with or without a transaction.
    pub fn has_connection(&self) -> bool {
        !self.is_detached()
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.handle, Handle::Detached)
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut C> {
        match &mut self.handle {
            Handle::Connection(conn) | Handle::Transaction(conn) => Some(conn),
            Handle::Detached => None,
        }
    }

    /// Hold `connection` without a transaction.
    pub(crate) fn attach(&mut self, connection: C) {
        self.handle = Handle::Connection(connection);
    }

    /// Remove the held connection, leaving the context detached.
    pub(crate) fn take_connection(&mut self) -> Option<C> {
        match std::mem::replace(&mut self.handle, Handle::Detached) {
            Handle::Connection(conn) | Handle::Transaction(conn) => Some(conn),
            Handle::Detached => None,
        }
    }

    /// Flag the held connection as carrying an open transaction.
    pub(crate) fn mark_transaction(&mut self) {
        self.handle = match std::mem::replace(&mut self.handle, Handle::Detached) {
            Handle::Connection(conn) | Handle::Transaction(conn) => Handle::Transaction(conn),
            Handle::Detached => Handle::Detached,
        };
    }
}

impl<C> Default for TxContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for TxContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handle = match self.handle {
            Handle::Detached => "detached",
            Handle::Connection(_) => "connection",
            Handle::Transaction(_) => "transaction",
        };
        f.debug_struct("TxContext")
            .field("id", &self.id)
            .field("handle", &handle)
            .field("nesting_level", &self.nesting_level)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Generate a unique context ID.
fn generate_context_id() -> String {
    format!("ctx_{}", uuid::Uuid::new_v4().simple())
}
