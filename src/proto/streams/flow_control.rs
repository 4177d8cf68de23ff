use crate::frame::Reason;
use crate::proto::{WindowSize, MAX_WINDOW_SIZE};

/// A flow control window: the number of DATA payload octets the peer (or we)
/// may still put in flight.
///
/// The window can go negative after the peer shrinks INITIAL_WINDOW_SIZE
/// while data is in flight, which is why it is held as a signed value.
#[derive(Copy, Clone, Debug)]
pub struct FlowControl {
    window_size: i32,
}

impl FlowControl {
    pub fn new(initial: WindowSize) -> FlowControl {
        FlowControl {
            window_size: initial as i32,
        }
    }

    /// Returns the window size, clamped at zero.
    pub fn available(&self) -> WindowSize {
        if self.window_size < 0 {
            0
        } else {
            self.window_size as WindowSize
        }
    }

    /// Returns the raw, possibly negative, window size.
    pub fn window_size(&self) -> i32 {
        self.window_size
    }

    /// Update the window size.
    ///
    /// This is called after receiving a WINDOW_UPDATE frame. The increment
    /// must not push the window past the protocol maximum.
    pub fn inc_window(&mut self, sz: WindowSize) -> Result<(), Reason> {
        let (val, overflow) = self.window_size.overflowing_add(sz as i32);

        if overflow || val > MAX_WINDOW_SIZE as i32 {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        tracing::trace!("inc_window; sz={}; old={}; new={}", sz, self.window_size, val);

        self.window_size = val;
        Ok(())
    }

    /// Adjust the window by a settings-initiated delta.
    ///
    /// A change to INITIAL_WINDOW_SIZE applies retroactively to every open
    /// stream and may legitimately drive the window negative.
    pub fn apply_delta(&mut self, delta: i32) {
        self.window_size += delta;
    }

    /// Decrement the window to reflect data actually sent. The caller must
    /// ensure the window has capacity.
    pub fn send_data(&mut self, sz: WindowSize) {
        debug_assert!(sz <= self.available());
        self.window_size -= sz as i32;
    }

    /// Decrement the window to reflect data received.
    ///
    /// The peer consuming more credit than it was given is a flow control
    /// violation.
    pub fn recv_data(&mut self, sz: WindowSize) -> Result<(), Reason> {
        if (sz as i32) > self.window_size {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        self.window_size -= sz as i32;
        Ok(())
    }

    /// Restore the window to `target`, returning the increment to advertise
    /// in a WINDOW_UPDATE frame.
    pub fn refill_to(&mut self, target: WindowSize) -> WindowSize {
        debug_assert!((target as i32) >= self.window_size);
        let inc = target as i32 - self.window_size;
        self.window_size = target as i32;
        inc as WindowSize
    }
}
