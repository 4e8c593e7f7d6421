//! Newline-delimited framing on top of [`Utf8Decoder`]

use super::Utf8Decoder;

/// Reassembles complete lines from arbitrarily split chunks.
///
/// Used for NDJSON bodies (Ollama, the relay server) and SSE bodies (VLLM).
#[derive(Debug, Default)]
pub struct LineDecoder {
    utf8: Utf8Decoder,
    partial: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, without the
    /// terminator. A trailing `\r` is stripped as well.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.partial.push_str(&text);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// The unterminated remainder at end of stream, if any
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.utf8.finish();
        self.partial.push_str(&tail);
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_reassembled_across_chunks() {
        let mut lines = LineDecoder::new();
        assert!(lines.feed(b"{\"a\":").is_empty());
        assert_eq!(lines.feed(b"1}\n{\"b\":2}\n{\"c\""), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(lines.finish(), Some("{\"c\"".to_string()));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut lines = LineDecoder::new();
        assert_eq!(lines.feed(b"data: x\r\n\r\n"), vec!["data: x", ""]);
    }
}
