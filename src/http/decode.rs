//! Incremental UTF-8 decoding of response bytes.
//!
//! Network chunks can end in the middle of a multi-byte character. The
//! decoder holds those trailing bytes back and prepends them to the next
//! chunk, so a split sequence never turns into a replacement character.

/// Stateful UTF-8 decoder. Owned by exactly one in-flight request.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Trailing bytes that do not yet form a complete character.
    tail: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, prepending any held-back bytes from the
    /// previous call. Sequences that are merely truncated at the end of the
    /// input are buffered; sequences that are provably malformed decode to
    /// U+FFFD and decoding continues after them.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.tail);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        // Invalid bytes in the middle of the payload: emit a
                        // replacement character and resume after them.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Truncated sequence at the end: hold it for the
                        // next chunk.
                        None => {
                            self.tail = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush at end of stream. Any held-back bytes that still do not form a
    /// complete character are discarded; the valid prefix is returned.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.tail);
        match std::str::from_utf8(&tail) {
            Ok(s) => s.to_string(),
            Err(e) => String::from_utf8_lossy(&tail[..e.valid_up_to()]).into_owned(),
        }
    }

    /// Whether bytes are currently held back.
    pub fn has_pending(&self) -> bool {
        !self.tail.is_empty()
    }
}
