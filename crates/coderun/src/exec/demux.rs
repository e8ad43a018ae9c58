//! Separates input-request markers from ordinary program output.
//!
//! The interpreter prelude announces a blocking `input()` by writing
//! `ESC ] coderun;input; <prompt> BEL` to stdout. Markers share the stream
//! with output, so their relative order is exact, but a marker may be split
//! across any number of reads.

/// Start of an input-request marker.
pub const MARKER_OPEN: &[u8] = b"\x1b]coderun;input;";

/// End of an input-request marker.
pub const MARKER_CLOSE: u8 = 0x07;

/// Longest prompt accepted before an unterminated marker is treated as output.
pub const MAX_PROMPT_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Output(Vec<u8>),
    Prompt(Vec<u8>),
}

/// Incremental stdout splitter.
#[derive(Debug, Default)]
pub struct MarkerDemux {
    pending: Vec<u8>,
    in_marker: bool,
}

impl MarkerDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<Chunk> {
        self.pending.extend_from_slice(data);
        let mut chunks = Vec::new();

        loop {
            if self.in_marker {
                if let Some(end) = self.pending.iter().position(|&b| b == MARKER_CLOSE) {
                    let prompt: Vec<u8> = self.pending.drain(..=end).take(end).collect();
                    chunks.push(Chunk::Prompt(prompt));
                    self.in_marker = false;
                    continue;
                }
                if self.pending.len() > MAX_PROMPT_BYTES {
                    let mut raw = MARKER_OPEN.to_vec();
                    raw.append(&mut self.pending);
                    chunks.push(Chunk::Output(raw));
                    self.in_marker = false;
                }
                break;
            }

            if let Some(start) = find(&self.pending, MARKER_OPEN) {
                if start > 0 {
                    chunks.push(Chunk::Output(self.pending[..start].to_vec()));
                }
                self.pending.drain(..start + MARKER_OPEN.len());
                self.in_marker = true;
                continue;
            }

            let hold = partial_marker_suffix(&self.pending);
            let emit = self.pending.len() - hold;
            if emit > 0 {
                chunks.push(Chunk::Output(self.pending.drain(..emit).collect()));
            }
            break;
        }

        chunks
    }

    /// Release anything held back at end of stream as output.
    pub fn finish(&mut self) -> Option<Chunk> {
        let mut raw = Vec::new();
        if self.in_marker {
            raw.extend_from_slice(MARKER_OPEN);
            self.in_marker = false;
        }
        raw.append(&mut self.pending);
        (!raw.is_empty()).then_some(Chunk::Output(raw))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest suffix of `buf` that is a proper prefix of the marker.
fn partial_marker_suffix(buf: &[u8]) -> usize {
    let max = buf.len().min(MARKER_OPEN.len() - 1);
    (1..=max)
        .rev()
        .find(|&n| buf[buf.len() - n..] == MARKER_OPEN[..n])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(prompt: &str) -> Vec<u8> {
        let mut bytes = MARKER_OPEN.to_vec();
        bytes.extend_from_slice(prompt.as_bytes());
        bytes.push(MARKER_CLOSE);
        bytes
    }

    fn out(s: &str) -> Chunk {
        Chunk::Output(s.as_bytes().to_vec())
    }

    fn prompt(s: &str) -> Chunk {
        Chunk::Prompt(s.as_bytes().to_vec())
    }

    #[test]
    fn test_plain_output() {
        let mut demux = MarkerDemux::new();
        assert_eq!(demux.feed(b"hello\n"), vec![out("hello\n")]);
        assert_eq!(demux.finish(), None);
    }

    #[test]
    fn test_marker_between_output() {
        let mut data = b"before ".to_vec();
        data.extend(marker("Name: "));
        data.extend_from_slice(b"after");
        let mut demux = MarkerDemux::new();
        assert_eq!(
            demux.feed(&data),
            vec![out("before "), prompt("Name: "), out("after")]
        );
    }

    #[test]
    fn test_marker_split_byte_by_byte() {
        let mut data = b"x".to_vec();
        data.extend(marker("Age?"));
        let mut demux = MarkerDemux::new();
        let mut chunks = Vec::new();
        for byte in data {
            chunks.extend(demux.feed(&[byte]));
        }
        assert_eq!(chunks, vec![out("x"), prompt("Age?")]);
        assert_eq!(demux.finish(), None);
    }

    #[test]
    fn test_lone_escape_is_output_once_disambiguated() {
        let mut demux = MarkerDemux::new();
        assert_eq!(demux.feed(b"red \x1b"), vec![out("red ")]);
        assert_eq!(demux.feed(b"[31m"), vec![out("\x1b[31m")]);
    }

    #[test]
    fn test_unterminated_marker_flushed_at_end() {
        let mut demux = MarkerDemux::new();
        let mut data = MARKER_OPEN.to_vec();
        data.extend_from_slice(b"dangling");
        assert!(demux.feed(&data).is_empty());
        assert_eq!(demux.finish(), Some(Chunk::Output(data)));
    }

    #[test]
    fn test_oversized_prompt_becomes_output() {
        let mut demux = MarkerDemux::new();
        demux.feed(MARKER_OPEN);
        let filler = vec![b'a'; MAX_PROMPT_BYTES + 1];
        let chunks = demux.feed(&filler);
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Chunk::Output(bytes) => {
                assert!(bytes.starts_with(MARKER_OPEN));
                assert_eq!(bytes.len(), MARKER_OPEN.len() + MAX_PROMPT_BYTES + 1);
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_prompt() {
        let mut demux = MarkerDemux::new();
        assert_eq!(demux.feed(&marker("")), vec![prompt("")]);
    }
}
