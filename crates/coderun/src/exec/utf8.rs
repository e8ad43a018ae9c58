//! Turns arbitrarily split byte chunks into UTF-8 text fragments.

/// Decodes a byte stream chunk by chunk, holding back a multi-byte sequence
/// split across chunk boundaries until the rest arrives. Invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    carry: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (after any carried prefix) as is complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut text = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        text
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(b"hello"), "hello");
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_split_multibyte_is_held_back() {
        let snowman = "☃".as_bytes();
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&[b'a', snowman[0]]), "a");
        assert!(asm.has_pending());
        assert_eq!(asm.push(&snowman[1..2]), "");
        assert_eq!(asm.push(&[snowman[2], b'b']), "☃b");
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_sequence_flushed_lossily() {
        let mut asm = Utf8Assembler::new();
        assert_eq!(asm.push(&"é".as_bytes()[..1]), "");
        assert_eq!(asm.finish(), "\u{FFFD}");
        assert_eq!(asm.finish(), "");
    }
}
