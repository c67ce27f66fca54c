// Incremental decoder for line-delimited "data: <payload>" event frames
//
// Chunks arrive at arbitrary boundaries: a chunk may end mid-record or carry
// several records. A trailing partial line is buffered until the next chunk
// (or finish) completes it, so no record is ever lost to a boundary split.

const DATA_PREFIX: &str = "data: ";

/// Stateful frame decoder, one instance per run
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Trailing partial line carried across chunk boundaries
    pending: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    /// Feed one chunk of stream text, returning the payloads of every
    /// complete `data: `-framed record it finishes
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut payloads = Vec::new();
        self.pending.push_str(chunk);

        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(payload) = Self::extract_payload(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a final unterminated line at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Self::extract_payload(&line)
    }

    /// Extract the payload of a `data: ` line; other lines (keep-alive
    /// comments, blank separators) carry no semantic weight and are skipped
    fn extract_payload(line: &str) -> Option<String> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) => Some(payload.to_string()),
            None => {
                if !line.is_empty() {
                    log::debug!("Skipping non-payload stream line: {}", line);
                }
                None
            }
        }
    }
}
