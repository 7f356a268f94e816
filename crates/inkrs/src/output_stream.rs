//! The flat output stream text, glue, and tag markers are pushed onto during
//! evaluation, applying ink's whitespace-normalization and glue-absorption
//! rules.
//!
//! Grounded on `inkpy/runtime/flow.py`'s `output_stream` handling and
//! `inkpy/runtime/glue.py`/`tag.py`.

#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    Text(String),
    Glue,
    BeginTag,
    EndTag,
}

#[derive(Debug, Clone, Default)]
pub struct OutputStream {
    items: Vec<OutputItem>,
    glue_active: bool,
}

impl OutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.glue_active = false;
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[OutputItem] {
        &self.items
    }

    /// Remove and return every item from `mark` onward, used by `BeginString`
    /// / `EndString` to capture a run of narrative steps as a string value
    /// instead of visible output.
    pub fn drain_since(&mut self, mark: usize) -> Vec<OutputItem> {
        self.items.split_off(mark.min(self.items.len()))
    }

    /// Render a slice of items the same way [`Self::current_text`] renders
    /// the live stream, for use on a drained capture.
    pub fn render_text(items: &[OutputItem]) -> String {
        let mut out = String::new();
        let mut depth = 0i32;
        for item in items {
            match item {
                OutputItem::BeginTag => depth += 1,
                OutputItem::EndTag => depth -= 1,
                OutputItem::Text(t) if depth == 0 => out.push_str(t),
                OutputItem::Text(_) | OutputItem::Glue => {}
            }
        }
        out
    }

    /// The text produced since the last newline boundary, used to extract a
    /// choice's display label from content accumulated just before its
    /// `ChoicePoint`.
    pub fn take_trailing_since_newline(&mut self) -> String {
        let full = self.current_text();
        let (keep, tail) = match full.rfind('\n') {
            Some(pos) => (full[..=pos].to_string(), full[pos + 1..].to_string()),
            None => (String::new(), full),
        };
        self.items.clear();
        self.glue_active = false;
        if !keep.is_empty() {
            self.items.push(OutputItem::Text(keep));
        }
        tail.trim().to_string()
    }

    /// Whether the last non-glue text item emitted ends with a newline,
    /// meaning the stream is sitting at a line boundary. `true` when the
    /// stream is empty, so the very first push isn't treated as a
    /// continuation of a prior line.
    pub fn ends_with_newline(&self) -> bool {
        self.last_text_ends_with_newline()
    }

    fn last_text_ends_with_newline(&self) -> bool {
        for item in self.items.iter().rev() {
            match item {
                OutputItem::Text(t) => return t.ends_with('\n'),
                OutputItem::Glue => continue,
                _ => return false,
            }
        }
        true
    }

    /// Append text, suppressing a newline-only chunk when the stream is
    /// already at a line boundary or glue is bridging across it.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let is_newline_only = text.chars().all(|c| c == '\n');
        if is_newline_only {
            if self.glue_active || self.items.is_empty() || self.last_text_ends_with_newline() {
                return;
            }
        } else {
            self.glue_active = false;
        }
        self.items.push(OutputItem::Text(text.to_string()));
    }

    /// `<>` glue: joins the text on either side of it, absorbing whichever
    /// whitespace/newline would otherwise separate them. A newline already
    /// sitting at the end of the stream is removed immediately; a following
    /// one is suppressed by `glue_active` when it's pushed.
    pub fn push_glue(&mut self) {
        while matches!(self.items.last(), Some(OutputItem::Text(t)) if t.chars().all(|c| c == '\n')) {
            self.items.pop();
        }
        self.glue_active = true;
        self.items.push(OutputItem::Glue);
    }

    pub fn push_begin_tag(&mut self) {
        self.items.push(OutputItem::BeginTag);
    }

    pub fn push_end_tag(&mut self) {
        self.items.push(OutputItem::EndTag);
    }

    /// Whether a `BeginTag` with no matching `EndTag` is open, meaning
    /// subsequent text belongs to a tag rather than the line's narrative
    /// text.
    pub fn in_tag(&self) -> bool {
        let mut depth = 0i32;
        for item in &self.items {
            match item {
                OutputItem::BeginTag => depth += 1,
                OutputItem::EndTag => depth -= 1,
                _ => {}
            }
        }
        depth > 0
    }

    /// The narrative text accumulated so far, excluding tag segments, exactly
    /// as pushed with no trimming. Used to detect whether a trailing newline
    /// survives across further steps, since trimming would hide that.
    pub fn raw_text(&self) -> String {
        let mut out = String::new();
        let mut depth = 0i32;
        for item in &self.items {
            match item {
                OutputItem::BeginTag => depth += 1,
                OutputItem::EndTag => depth -= 1,
                OutputItem::Text(t) if depth == 0 => out.push_str(t),
                OutputItem::Text(_) | OutputItem::Glue => {}
            }
        }
        out
    }

    /// The narrative text accumulated so far, excluding tag segments, with
    /// leading/trailing blank lines trimmed the way ink presents a line.
    pub fn current_text(&self) -> String {
        self.raw_text().trim_matches('\n').to_string()
    }

    /// Every completed `# tag` segment, in stream order.
    pub fn current_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        let mut current = String::new();
        let mut depth = 0i32;
        for item in &self.items {
            match item {
                OutputItem::BeginTag => depth += 1,
                OutputItem::EndTag => {
                    depth -= 1;
                    if depth == 0 {
                        tags.push(current.trim().to_string());
                        current.clear();
                    }
                }
                OutputItem::Text(t) if depth > 0 => current.push_str(t),
                _ => {}
            }
        }
        tags
    }

    /// Whether any non-tag text has been produced since the stream was
    /// last cleared.
    pub fn has_content(&self) -> bool {
        !self.current_text().trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glue_suppresses_newline() {
        let mut out = OutputStream::new();
        out.push_text("Hello");
        out.push_glue();
        out.push_text("\n");
        out.push_text("world");
        assert_eq!(out.current_text(), "Helloworld");
    }

    #[test]
    fn repeated_newlines_collapse() {
        let mut out = OutputStream::new();
        out.push_text("a");
        out.push_text("\n");
        out.push_text("\n");
        out.push_text("b");
        assert_eq!(out.current_text(), "a\nb");
    }

    #[test]
    fn glue_strips_a_newline_that_already_landed() {
        let mut out = OutputStream::new();
        out.push_text("I have ");
        out.push_text("\n");
        out.push_glue();
        out.push_text("five eggs.");
        assert_eq!(out.current_text(), "I have five eggs.");
    }

    #[test]
    fn tag_segments_excluded_from_text() {
        let mut out = OutputStream::new();
        out.push_text("Hi");
        out.push_begin_tag();
        out.push_text("mood: happy");
        out.push_end_tag();
        assert_eq!(out.current_text(), "Hi");
        assert_eq!(out.current_tags(), vec!["mood: happy".to_string()]);
    }
}
