//! Frame extraction for the streaming channels.
//!
//! TCP gives no message boundaries, so one read is never assumed to be one
//! message. Bytes accumulate here and complete CRLF-terminated frames come
//! out only once the terminator has been observed; a bare `\n` is tolerated.
//! NUL padding from the terminal's fixed send buffers is stripped.

use crate::error::ProtocolError;

/// A frame with no terminator within this many bytes is discarded and the
/// buffer resynchronized at the next terminator.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    discarding: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete frame, if one is buffered.
    ///
    /// Empty frames are skipped. An oversized frame yields one
    /// `ParseFailure` and the bytes up to the next terminator are dropped.
    pub fn next_frame(&mut self) -> Option<Result<String, ProtocolError>> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
                    frame.pop(); // '\n'
                    if frame.last() == Some(&b'\r') {
                        frame.pop();
                    }
                    frame.retain(|&b| b != 0);

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if frame.is_empty() {
                        continue;
                    }

                    return Some(String::from_utf8(frame).map_err(|e| {
                        ProtocolError::ParseFailure(format!("frame is not UTF-8: {e}"))
                    }));
                }
                None => {
                    if !self.discarding && self.buf.len() > MAX_FRAME_BYTES {
                        self.buf.clear();
                        self.discarding = true;
                        return Some(Err(ProtocolError::ParseFailure(format!(
                            "frame exceeded {MAX_FRAME_BYTES} bytes without a terminator"
                        ))));
                    }
                    return None;
                }
            }
        }
    }

    /// Bytes still waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_split_frames() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"F020^7^17000");
        assert!(buf.next_frame().is_none());
        buf.extend(b"00000\r\n");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "F020^7^1700000000");
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn splits_multiple_frames_from_one_read() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"one\r\ntwo\r\nthr");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "one");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "two");
        assert!(buf.next_frame().is_none());
        assert_eq!(buf.pending(), 3);
    }

    #[test]
    fn strips_nul_padding_and_bare_newlines() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"F000^1^\0\0\0\n\n");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "F000^1^");
        assert!(buf.next_frame().is_none());
    }

    #[test]
    fn oversized_frame_resyncs_at_next_terminator() {
        let mut buf = FrameBuffer::new();
        buf.extend(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert!(matches!(
            buf.next_frame(),
            Some(Err(ProtocolError::ParseFailure(_)))
        ));
        // The tail of the runaway frame arrives, then a clean one.
        buf.extend(b"tail-of-runaway\r\nclean\r\n");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "clean");
    }

    #[test]
    fn non_utf8_frame_is_an_error_not_a_panic() {
        let mut buf = FrameBuffer::new();
        buf.extend(&[0xFF, 0xFE, b'\r', b'\n']);
        assert!(matches!(
            buf.next_frame(),
            Some(Err(ProtocolError::ParseFailure(_)))
        ));
        buf.extend(b"next\r\n");
        assert_eq!(buf.next_frame().unwrap().unwrap(), "next");
    }
}
