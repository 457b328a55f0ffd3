/// How a provider's byte stream is sliced into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-delimited text where only `data:`-prefixed lines carry
    /// payloads; the marker is stripped before the frame is surfaced.
    SseData,
    /// A stream of top-level JSON objects, one per increment, separated by
    /// whatever punctuation the provider emits between them.
    JsonObjects,
}

/// Incremental frame slicer for one streaming response.
///
/// Bytes arrive in arbitrary read sizes, so the slicer keeps two carry-over
/// buffers: undecoded bytes (a UTF-8 sequence may split across reads) and
/// decoded-but-unframed text (a line or object may split across reads).
#[derive(Debug)]
pub struct FrameSlicer {
    mode: Framing,
    bytes: Vec<u8>,
    text: String,
}

impl FrameSlicer {
    pub fn new(mode: Framing) -> Self {
        Self {
            mode,
            bytes: Vec::new(),
            text: String::new(),
        }
    }

    /// Feeds raw bytes and drains every frame completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(bytes);
        self.decode_available();
        match self.mode {
            Framing::SseData => self.drain_data_lines(),
            Framing::JsonObjects => self.drain_json_objects(),
        }
    }

    /// True when nothing unframed remains buffered.
    pub fn is_drained(&self) -> bool {
        self.bytes.is_empty() && self.text.trim().is_empty()
    }

    /// Moves the longest valid UTF-8 prefix of the byte buffer into the text
    /// buffer, keeping any trailing partial sequence for the next read.
    fn decode_available(&mut self) {
        let valid_len = match std::str::from_utf8(&self.bytes) {
            Ok(s) => {
                self.text.push_str(s);
                self.bytes.len()
            }
            Err(e) => {
                let valid = e.valid_up_to();
                // Safe split: everything up to valid is checked UTF-8.
                self.text
                    .push_str(std::str::from_utf8(&self.bytes[..valid]).unwrap_or_default());
                valid
            }
        };
        self.bytes.drain(0..valid_len);
    }

    fn drain_data_lines(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(newline) = self.text.find('\n') {
            let line: String = self.text.drain(0..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim();
                if !payload.is_empty() {
                    frames.push(payload.to_string());
                }
            }
        }
        frames
    }

    fn drain_json_objects(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut object_start: Option<usize> = None;
        // End of the region safe to discard: completed objects plus the
        // separators between them. Never advances into a partial object.
        let mut consumed = 0usize;

        for (i, ch) in self.text.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' if depth > 0 => in_string = true,
                '{' => {
                    if depth == 0 {
                        object_start = Some(i);
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = object_start.take() {
                            frames.push(self.text[start..=i].to_string());
                        }
                        consumed = i + 1;
                    }
                }
                _ if depth == 0 => consumed = i + ch.len_utf8(),
                _ => {}
            }
        }

        self.text.drain(0..consumed);
        frames
    }
}
