//! Transaction sessions.
//!
//! A session binds a resource-credit budget and an event/log capture window
//! to one transaction. Sub-calls share the transaction's session; there are
//! no nested sessions. Dropping the session without collecting it discards
//! the captured events and logs, which is exactly the abort path.

use crate::{ChainError, Result};
use kestrel_types::EventData;
use parking_lot::RwLock;
use std::sync::Arc;

/// A per-transaction resource and capture scope.
pub struct Session {
    begin_rc: u64,
    remaining_rc: RwLock<u64>,
    events: RwLock<Vec<EventData>>,
    logs: RwLock<Vec<String>>,
}

impl Session {
    /// Opens a session with `rc` resource credits.
    pub fn new(rc: u64) -> Arc<Self> {
        Arc::new(Self {
            begin_rc: rc,
            remaining_rc: RwLock::new(rc),
            events: RwLock::new(Vec::new()),
            logs: RwLock::new(Vec::new()),
        })
    }

    /// Debits resource credits.
    ///
    /// Overdraw drains the budget before failing, mirroring the meter.
    pub fn use_rc(&self, rc: u64) -> Result<()> {
        let mut remaining = self.remaining_rc.write();
        if rc > *remaining {
            *remaining = 0;
            return Err(ChainError::ResourceExhausted);
        }
        *remaining -= rc;
        Ok(())
    }

    /// Credits still available.
    pub fn remaining_rc(&self) -> u64 {
        *self.remaining_rc.read()
    }

    /// Credits consumed so far.
    pub fn used_rc(&self) -> u64 {
        self.begin_rc - self.remaining_rc()
    }

    /// Credits the session opened with.
    pub fn begin_rc(&self) -> u64 {
        self.begin_rc
    }

    /// Appends an event to the session's capture window.
    pub fn push_event(&self, event: EventData) {
        self.events.write().push(event);
    }

    /// Appends a log line to the session's capture window.
    pub fn push_log(&self, log: String) {
        self.logs.write().push(log);
    }

    /// The captured events, in emission order.
    pub fn events(&self) -> Vec<EventData> {
        self.events.read().clone()
    }

    /// The captured logs, in emission order.
    pub fn logs(&self) -> Vec<String> {
        self.logs.read().clone()
    }
}
