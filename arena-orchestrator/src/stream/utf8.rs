//! Stateful UTF-8 decoding across chunk boundaries

use encoding_rs::{CoderResult, Decoder, UTF_8};

/// Decodes a byte stream as UTF-8, holding back an incomplete trailing
/// sequence until the rest of it arrives.
///
/// Invalid sequences are replaced with U+FFFD rather than failing.
pub struct Utf8Decoder {
    inner: Decoder,
}

impl Default for Utf8Decoder {
    fn default() -> Self {
        Self {
            inner: UTF_8.new_decoder_without_bom_handling(),
        }
    }
}

impl std::fmt::Debug for Utf8Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Utf8Decoder").finish_non_exhaustive()
    }
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, returning all text that is complete so far
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.run(chunk, false)
    }

    /// Flush at end of stream; a dangling partial sequence becomes U+FFFD.
    ///
    /// The decoder is ready for a new stream afterwards.
    pub fn finish(&mut self) -> String {
        let tail = self.run(&[], true);
        *self = Self::default();
        tail
    }

    fn run(&mut self, mut src: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            // Accounts for bytes held over from the previous chunk
            let needed = self
                .inner
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 4);
            out.reserve(needed);

            let (result, read, _replaced) = self.inner.decode_to_string(src, &mut out, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_character_split_across_chunks() {
        // "你" is E4 BD A0
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xE4]), "a");
        assert_eq!(decoder.decode(&[0xBD]), "");
        assert_eq!(decoder.decode(&[0xA0, b'b']), "你b");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xFF, b'y']), "x\u{FFFD}y");
    }

    #[test]
    fn test_leading_bom_is_kept() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xEF, 0xBB, 0xBF, b'a']), "\u{FEFF}a");
    }

    #[test]
    fn test_finish_flushes_truncated_sequence() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xF0, 0x9F]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
        assert_eq!(decoder.decode(b"ok"), "ok");
    }
}
