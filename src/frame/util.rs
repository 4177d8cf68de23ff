use std::fmt;

use bytes::Bytes;

use crate::frame::Error;

/// Strip padding from the given payload.
///
/// It is assumed that the frame had the padded flag set. This means that the
/// first byte is the length of the padding with that many 0 bytes expected to
/// follow the actual payload.
///
/// # Returns
///
/// The length of the stripped padding. If the padded payload is invalid
/// (e.g. the length of the padding is equal to the total length), an error
/// is returned.
pub fn strip_padding(payload: &mut Bytes) -> Result<u8, Error> {
    let payload_len = payload.len();
    if payload_len == 0 {
        // If this is the case, the frame is invalid as no padding length can be
        // extracted, even though the frame should be padded.
        return Err(Error::TooMuchPadding);
    }

    let pad_len = payload[0] as usize;

    if pad_len >= payload_len {
        // This is invalid: the padding length MUST be less than the
        // total frame size.
        return Err(Error::TooMuchPadding);
    }

    // Discard the padding length byte and the trailing padding.
    let _ = payload.split_to(1);
    let _ = payload.split_off(payload_len - 1 - pad_len);

    Ok(pad_len as u8)
}

pub(super) fn debug_flags<'a, 'f>(fmt: &'a mut fmt::Formatter<'f>, bits: u8) -> DebugFlags<'a, 'f> {
    let result = write!(fmt, "({:#x}", bits);
    DebugFlags {
        fmt,
        result,
        started: false,
    }
}

pub(super) struct DebugFlags<'a, 'f> {
    fmt: &'a mut fmt::Formatter<'f>,
    result: fmt::Result,
    started: bool,
}

impl<'a, 'f> DebugFlags<'a, 'f> {
    pub(super) fn flag_if(&mut self, enabled: bool, name: &str) -> &mut Self {
        if enabled {
            self.result = self.result.and_then(|()| {
                let prefix = if self.started { " | " } else { ": " };

                write!(self.fmt, "{}{}", prefix, name)
            });

            self.started = true;
        }

        self
    }

    pub(super) fn finish(&mut self) -> fmt::Result {
        self.result.and_then(|()| write!(self.fmt, ")"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_trailing_padding() {
        let mut payload = Bytes::from_static(&[2, b'h', b'i', 0, 0]);
        let pad_len = strip_padding(&mut payload).unwrap();
        assert_eq!(pad_len, 2);
        assert_eq!(&payload[..], b"hi");
    }

    #[test]
    fn rejects_padding_covering_whole_frame() {
        let mut payload = Bytes::from_static(&[4, 0, 0, 0]);
        assert!(strip_padding(&mut payload).is_err());
    }
}
