use crate::frame::{Reason, StreamId};

/// Tracks GOAWAY progress in both directions.
///
/// Once a GOAWAY has been sent the connection opens no new streams and tears
/// down when the remaining ones finish; once one has been received the same
/// holds for the peer's view.
#[derive(Debug, Default)]
pub struct GoAway {
    /// The GOAWAY we sent, if any.
    sent: Option<(StreamId, Reason)>,

    /// The GOAWAY the peer sent, if any.
    received: Option<(StreamId, Reason)>,
}

impl GoAway {
    pub fn new() -> GoAway {
        GoAway::default()
    }

    pub fn is_going_away(&self) -> bool {
        self.sent.is_some() || self.received.is_some()
    }

    pub fn sent(&self) -> Option<(StreamId, Reason)> {
        self.sent
    }

    pub fn received(&self) -> Option<(StreamId, Reason)> {
        self.received
    }

    /// Record a sent GOAWAY. The first one wins; retries keep the original
    /// last-stream id so the promise to the peer never widens.
    pub fn record_sent(&mut self, last_stream_id: StreamId, reason: Reason) -> bool {
        if self.sent.is_some() {
            return false;
        }
        self.sent = Some((last_stream_id, reason));
        true
    }

    pub fn record_received(&mut self, last_stream_id: StreamId, reason: Reason) {
        if self.received.is_none() {
            self.received = Some((last_stream_id, reason));
        }
    }

    /// Whether a peer-initiated stream with this id may still be accepted.
    ///
    /// Once GOAWAY has passed in either direction the connection is winding
    /// down; existing streams finish but new ones are ignored.
    pub fn accepting_stream(&self, id: StreamId) -> bool {
        if self.received.is_some() {
            return false;
        }
        match self.sent {
            Some((last, _)) => id <= last,
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_goaway_wins() {
        let mut go_away = GoAway::new();
        assert!(go_away.record_sent(StreamId::from(5), Reason::NO_ERROR));
        assert!(!go_away.record_sent(StreamId::from(7), Reason::PROTOCOL_ERROR));
        assert_eq!(go_away.sent(), Some((StreamId::from(5), Reason::NO_ERROR)));
    }

    #[test]
    fn streams_above_last_id_are_refused() {
        let mut go_away = GoAway::new();
        go_away.record_sent(StreamId::from(5), Reason::NO_ERROR);
        assert!(go_away.accepting_stream(StreamId::from(3)));
        assert!(go_away.accepting_stream(StreamId::from(5)));
        assert!(!go_away.accepting_stream(StreamId::from(7)));
    }
}
