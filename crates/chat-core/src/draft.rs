use crate::types::MAX_MESSAGE_CHARS;

/// Trim `raw` and keep at most [`MAX_MESSAGE_CHARS`] characters.
pub fn clamp_message_content(raw: &str) -> String {
    raw.trim().chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Content ready to send, or `None` when nothing but whitespace was typed.
pub fn compose_message_content(raw: &str) -> Option<String> {
    let content = clamp_message_content(raw);
    (!content.is_empty()).then_some(content)
}

/// Composer text with the length limit applied while typing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    text: String,
}

impl MessageDraft {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the draft text. Returns `true` when input had to be cut.
    pub fn set_text(&mut self, raw: &str) -> bool {
        let body = raw.trim_start();
        let leading = &raw[..raw.len() - body.len()];
        let truncated = body.trim_end().chars().count() > MAX_MESSAGE_CHARS;

        self.text = if truncated {
            let mut text = leading.to_owned();
            text.extend(body.chars().take(MAX_MESSAGE_CHARS));
            text
        } else {
            raw.to_owned()
        };
        truncated
    }

    pub fn remaining_chars(&self) -> usize {
        MAX_MESSAGE_CHARS.saturating_sub(self.text.trim().chars().count())
    }

    pub fn can_send(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Take the composed content and reset the draft.
    pub fn compose(&mut self) -> Option<String> {
        let content = compose_message_content(&self.text)?;
        self.text.clear();
        Some(content)
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}
