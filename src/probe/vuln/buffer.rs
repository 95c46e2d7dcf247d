//! Bounded accumulator that splits streamed bytes into lines

/// Holds bytes not yet terminated by a newline.
///
/// The buffer never exceeds `max_size` after a push: when it would, the older
/// half is discarded and the most recent bytes are kept.
#[derive(Debug)]
pub struct LineBuffer {
    data: Vec<u8>,
    max_size: usize,
    overflows: usize,
}

impl LineBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: Vec::new(),
            max_size: max_size.max(1),
            overflows: 0,
        }
    }

    /// Append a chunk. Returns true if older data had to be discarded.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.data.extend_from_slice(chunk);
        let mut discarded = false;
        while self.data.len() > self.max_size {
            let drop_len = self.data.len() / 2;
            self.data.drain(..drop_len);
            self.overflows += 1;
            discarded = true;
        }
        discarded
    }

    /// Remove and return every complete line, without terminators
    pub fn drain_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.data.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.data.drain(..last_newline).collect();
        // Final terminator
        self.data.drain(..1);
        complete
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Take whatever is left once the stream has ended
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.data);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of times data was discarded to stay within bounds
    pub fn overflows(&self) -> usize {
        self.overflows
    }
}
