//! Incremental `text/event-stream` decoder.
//!
//! Only `data:` fields matter to the relay protocol; comments (`:` lines)
//! and other fields are skipped. Chunks may split lines anywhere, including
//! inside a multi-byte character, so bytes are buffered until a full line
//! is available.

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the data of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (&*line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_stream() {
        let mut d = SseDecoder::new();
        let out = d.push(b": Welcome to 5EDM\n\ndata: abc.def\n\ndata: x:y.z:w\n\n");
        assert_eq!(out, vec!["abc.def".to_string(), "x:y.z:w".to_string()]);
    }

    #[test]
    fn split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"da").is_empty());
        assert!(d.push(b"ta: hel").is_empty());
        assert!(d.push(b"lo\r\n").is_empty());
        assert_eq!(d.push(b"\r\n"), vec!["hello".to_string()]);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data: a\ndata: b\n\n"), vec!["a\nb".to_string()]);
    }

    #[test]
    fn split_utf8_character() {
        let mut d = SseDecoder::new();
        let bytes = "data: 👽\n\n".as_bytes();
        assert!(d.push(&bytes[..8]).is_empty());
        assert_eq!(d.push(&bytes[8..]), vec!["👽".to_string()]);
    }

    #[test]
    fn other_fields_ignored() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"event: ping\nid: 3\ndata: v\n\n"), vec!["v".to_string()]);
        assert!(d.push(b"event: only\n\n").is_empty());
    }
}
