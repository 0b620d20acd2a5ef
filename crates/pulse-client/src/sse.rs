/// Incremental decoder for SSE frames (`data: <payload>\n\n`).
///
/// Chunks arrive at arbitrary boundaries; the decoder buffers until a blank
/// line completes a frame and returns the joined `data:` payloads. Comment
/// lines (proxy keep-alives) and fields other than `data` are ignored.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every frame payload it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);

            if let Some(payload) = Self::data_of(&frame) {
                payloads.push(payload);
            }
        }
        payloads
    }

    fn data_of(frame: &str) -> Option<String> {
        let mut data = String::new();
        for line in frame.lines() {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    }
}
