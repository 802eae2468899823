//! Block-scoped event and log recording.
//!
//! The chronicler assigns every event a block-wide sequence number and tags
//! it with whether a transaction session captured it. Session-tagged entries
//! belong to their transaction's receipt (and die with an aborted session);
//! untagged entries are block-level and always survive.

use crate::session::Session;
use bytes::Bytes;
use kestrel_types::EventData;
use std::sync::Weak;

/// Records ordered event and log streams for one block application.
#[derive(Default)]
pub struct Chronicler {
    session: Weak<Session>,
    events: Vec<(bool, EventData)>,
    logs: Vec<(bool, String)>,
    sequence: u32,
}

impl Chronicler {
    /// Creates an empty chronicler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the session subsequent entries are captured into.
    pub fn set_session(&mut self, session: Weak<Session>) {
        self.session = session;
    }

    /// Detaches the current session.
    pub fn clear_session(&mut self) {
        self.session = Weak::new();
    }

    /// Records an event, assigning it the next sequence number.
    pub fn push_event(
        &mut self,
        source: Bytes,
        name: String,
        data: Bytes,
        impacted: Vec<Bytes>,
    ) {
        let event = EventData {
            sequence: self.sequence,
            source,
            name,
            data,
            impacted,
        };
        self.sequence += 1;

        let in_session = match self.session.upgrade() {
            Some(session) => {
                session.push_event(event.clone());
                true
            }
            None => false,
        };
        self.events.push((in_session, event));
    }

    /// Records a log line.
    pub fn push_log(&mut self, log: String) {
        let in_session = match self.session.upgrade() {
            Some(session) => {
                session.push_log(log.clone());
                true
            }
            None => false,
        };
        self.logs.push((in_session, log));
    }

    /// Events recorded outside any session, in order.
    pub fn block_events(&self) -> Vec<EventData> {
        self.events
            .iter()
            .filter(|(in_session, _)| !in_session)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Logs recorded outside any session, in order.
    pub fn block_logs(&self) -> Vec<String> {
        self.logs
            .iter()
            .filter(|(in_session, _)| !in_session)
            .map(|(_, log)| log.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequence_is_block_wide() {
        let mut chronicler = Chronicler::new();
        let session = Session::new(0);

        chronicler.push_event(Bytes::new(), "block".into(), Bytes::new(), Vec::new());
        chronicler.set_session(Arc::downgrade(&session));
        chronicler.push_event(Bytes::new(), "tx".into(), Bytes::new(), Vec::new());
        chronicler.clear_session();
        chronicler.push_event(Bytes::new(), "block2".into(), Bytes::new(), Vec::new());

        let block_events = chronicler.block_events();
        assert_eq!(block_events.len(), 2);
        assert_eq!(block_events[0].sequence, 0);
        assert_eq!(block_events[1].sequence, 2);

        let session_events = session.events();
        assert_eq!(session_events.len(), 1);
        assert_eq!(session_events[0].sequence, 1);
    }

    #[test]
    fn test_aborted_session_entries_do_not_leak() {
        let mut chronicler = Chronicler::new();
        {
            let session = Session::new(0);
            chronicler.set_session(Arc::downgrade(&session));
            chronicler.push_log("doomed".into());
            // Session dropped without being collected: the abort path.
        }
        chronicler.clear_session();
        assert!(chronicler.block_logs().is_empty());
    }
}
