use crate::codec::RecvError;
use crate::frame::{self, Reason};

/// Tracks the SETTINGS exchange.
///
/// Our settings take effect only once the peer ACKs them; the peer's take
/// effect as soon as they arrive, at which point we owe an ACK.
#[derive(Debug)]
pub struct Settings {
    /// Our settings, sent at connection establishment.
    local: frame::Settings,

    /// True while our SETTINGS frame awaits the peer's ACK.
    local_pending_ack: bool,

    /// The most recent settings received from the peer.
    remote: frame::Settings,
}

impl Settings {
    pub fn new(local: frame::Settings) -> Settings {
        Settings {
            local,
            local_pending_ack: false,
            remote: frame::Settings::default(),
        }
    }

    pub fn local(&self) -> &frame::Settings {
        &self.local
    }

    pub fn remote(&self) -> &frame::Settings {
        &self.remote
    }

    /// Returns our SETTINGS frame for transmission, marking it pending.
    pub fn send_local(&mut self) -> frame::Settings {
        self.local_pending_ack = true;
        self.local.clone()
    }

    /// The peer ACKed our settings; they are now in force.
    pub fn recv_ack(&mut self) -> Result<frame::Settings, RecvError> {
        if !self.local_pending_ack {
            // We haven't sent anything that warrants an ACK.
            tracing::debug!("connection error PROTOCOL_ERROR -- received unsolicited SETTINGS ACK");
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        self.local_pending_ack = false;
        Ok(self.local.clone())
    }

    /// Store settings received from the peer. The caller applies them and
    /// queues the ACK.
    pub fn recv_settings(&mut self, frame: frame::Settings) {
        debug_assert!(!frame.is_ack());
        self.remote = frame;
    }
}
