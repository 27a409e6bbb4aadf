//! Incremental tag parser
//!
//! Turns an unbounded, chunk-delimited text stream into ordered
//! [`ParserEvent`]s without ever seeing the whole document.
//!
//! ## States
//!
//! ```text
//!            '<'                 write / thinking / add-dependency
//!   TEXT ──────────► TAG ───────────────────────────────► CONTENT
//!    ▲                │ code, unknown, closing,                │
//!    │                │ delete / rename (emit)                 │ closing tag found
//!    └────────────────┴────────────────────────────────────────┘
//! ```
//!
//! Raw input accumulates in one buffer. A transition consumes a prefix of
//! the buffer only once its delimiter (`>` or the exact closing tag) is
//! present, so a tag or attribute split across chunks is never emitted
//! half-read. Feeding a document in any split produces the same events as
//! feeding it whole.
//!
//! The parser never fails: unknown tags are ignored, malformed attributes
//! drop just that operation, and an unterminated body is discarded.

use super::grammar::{self, Tag, TagName};

/// One discrete result of parsing, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    Narrative(String),
    Thinking(String),
    DependencyRequest(String),
    FileWrite { path: String, content: String },
    FileDelete { path: String },
    FileRename { old_path: String, new_path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Scanning for the start of a tag
    Text,
    /// Inside `<...>`, scanning for `>`
    Tag,
    /// Inside a paired tag's body, scanning for its closing sequence
    Content {
        tag: TagName,
        /// Target of a `write`; `None` drops the body when it closes
        file_path: Option<String>,
    },
}

/// Byte/char-stream state machine over the tag grammar.
///
/// One instance per stream; instances share nothing.
#[derive(Debug)]
pub struct TagStreamParser {
    buffer: String,
    state: State,
    /// Buffer offset already searched without finding the current delimiter
    scanned: usize,
}

impl Default for TagStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: State::Text,
            scanned: 0,
        }
    }

    /// Bytes held back waiting for a delimiter
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while self.step(&mut events) {}
        events
    }

    /// End of stream: flush trailing narrative, discard any open tag or body.
    pub fn finish(mut self) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        match &self.state {
            State::Text => emit_narrative(&self.buffer, &mut events),
            State::Tag => {
                tracing::debug!(buffered = self.buffer.len(), "Discarding unterminated tag");
            }
            State::Content { tag, .. } => {
                tracing::debug!(
                    tag = %tag,
                    buffered = self.buffer.len(),
                    "Discarding unterminated tag body"
                );
            }
        }
        self.buffer.clear();
        events
    }

    /// Stop without flushing anything still buffered.
    pub fn cancel(self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len(),
                "Parser cancelled, dropping buffered input"
            );
        }
    }

    /// Run one transition. Returns `false` when more input is needed.
    fn step(&mut self, events: &mut Vec<ParserEvent>) -> bool {
        match self.state.clone() {
            State::Text => self.scan_text(events),
            State::Tag => self.scan_tag(events),
            State::Content { tag, file_path } => self.scan_content(tag, file_path, events),
        }
    }

    fn scan_text(&mut self, events: &mut Vec<ParserEvent>) -> bool {
        let bytes = self.buffer.as_bytes();
        let mut from = self.scanned;

        loop {
            let Some(offset) = self.buffer[from..].find('<') else {
                self.scanned = self.buffer.len();
                return false;
            };
            let start = from + offset;

            // A lone '<' at the end can't be classified yet.
            let Some(&next) = bytes.get(start + 1) else {
                self.scanned = start;
                return false;
            };

            if next.is_ascii_alphabetic() || next == b'/' {
                emit_narrative(&self.buffer[..start], events);
                self.consume(start + 1);
                self.state = State::Tag;
                return true;
            }

            // Literal '<' in prose, e.g. "a < b".
            from = start + 1;
        }
    }

    fn scan_tag(&mut self, events: &mut Vec<ParserEvent>) -> bool {
        let Some(offset) = self.buffer[self.scanned..].find('>') else {
            self.scanned = self.buffer.len();
            return false;
        };
        let end = self.scanned + offset;
        let inner = self.buffer[..end].to_string();
        self.consume(end + 1);
        self.state = self.on_tag(&inner, events);
        true
    }

    fn scan_content(
        &mut self,
        tag: TagName,
        file_path: Option<String>,
        events: &mut Vec<ParserEvent>,
    ) -> bool {
        let closing = tag.closing_tag();
        let Some(offset) = self.buffer[self.scanned..].find(closing) else {
            // Keep enough tail to catch a closing tag split across chunks.
            let mut resume = self.buffer.len().saturating_sub(closing.len() - 1);
            while !self.buffer.is_char_boundary(resume) {
                resume -= 1;
            }
            self.scanned = resume.max(self.scanned);
            return false;
        };
        let end = self.scanned + offset;
        let body = self.buffer[..end].to_string();
        self.consume(end + closing.len());
        self.state = State::Text;
        emit_body(tag, file_path, &body, events);
        true
    }

    /// Decide the next state for a complete `<...>`; emit self-closing ops.
    fn on_tag(&self, inner: &str, events: &mut Vec<ParserEvent>) -> State {
        let name = grammar::tag_name(inner);
        let Some(known) = TagName::from_name(name) else {
            tracing::trace!(tag = %name, "Ignoring unrecognized tag");
            return State::Text;
        };

        // Closing tags outside a body (`</code>`, stray `</write>`) carry nothing.
        if inner.trim_start().starts_with('/') {
            return State::Text;
        }

        let parsed = Tag::parse(inner);
        match known {
            TagName::Code => State::Text,
            TagName::Delete | TagName::Rename => {
                match parsed {
                    Ok(tag) => emit_self_closing(known, &tag, events),
                    Err(e) => {
                        tracing::warn!(tag = %known, error = %e, "Dropping operation");
                    }
                }
                State::Text
            }
            TagName::Thinking | TagName::Write | TagName::AddDependency => {
                let (file_path, self_closing) = match parsed {
                    Ok(tag) => (
                        tag.attr(grammar::FILE_PATH).map(str::to_string),
                        tag.self_closing,
                    ),
                    Err(e) => {
                        if known == TagName::Write {
                            tracing::warn!(tag = %known, error = %e, "Dropping operation");
                        }
                        (None, false)
                    }
                };

                if known == TagName::Write && file_path.is_none() {
                    tracing::warn!("write tag without file_path, body will be dropped");
                }

                if self_closing {
                    emit_body(known, file_path, "", events);
                    State::Text
                } else {
                    State::Content {
                        tag: known,
                        file_path,
                    }
                }
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.buffer.drain(..len);
        self.scanned = 0;
    }
}

/// Parse a complete document in one go.
pub fn parse_document(text: &str) -> Vec<ParserEvent> {
    let mut parser = TagStreamParser::new();
    let mut events = parser.feed(text);
    events.extend(parser.finish());
    events
}

fn emit_narrative(text: &str, events: &mut Vec<ParserEvent>) {
    let text = text.trim();
    if !text.is_empty() {
        events.push(ParserEvent::Narrative(text.to_string()));
    }
}

fn emit_body(tag: TagName, file_path: Option<String>, body: &str, events: &mut Vec<ParserEvent>) {
    let body = body.trim();
    match tag {
        TagName::Thinking => {
            if !body.is_empty() {
                events.push(ParserEvent::Thinking(body.to_string()));
            }
        }
        TagName::Write => {
            if let Some(path) = file_path {
                events.push(ParserEvent::FileWrite {
                    path,
                    content: grammar::strip_code_fence(body).to_string(),
                });
            }
        }
        TagName::AddDependency => {
            if !body.is_empty() {
                events.push(ParserEvent::DependencyRequest(body.to_string()));
            }
        }
        TagName::Delete | TagName::Rename | TagName::Code => {}
    }
}

fn emit_self_closing(known: TagName, tag: &Tag, events: &mut Vec<ParserEvent>) {
    let present = |key: &str| tag.attr(key).filter(|v| !v.trim().is_empty());

    match known {
        TagName::Delete => match present(grammar::FILE_PATH) {
            Some(path) => events.push(ParserEvent::FileDelete {
                path: path.to_string(),
            }),
            None => tracing::warn!("delete tag without file_path"),
        },
        TagName::Rename => match (
            present(grammar::ORIGINAL_FILE_PATH),
            present(grammar::NEW_FILE_PATH),
        ) {
            (Some(old_path), Some(new_path)) => events.push(ParserEvent::FileRename {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            }),
            _ => tracing::warn!("rename tag missing original_file_path or new_file_path"),
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &str, content: &str) -> ParserEvent {
        ParserEvent::FileWrite {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn narrative(text: &str) -> ParserEvent {
        ParserEvent::Narrative(text.to_string())
    }

    fn feed_chunks(chunks: &[&str]) -> Vec<ParserEvent> {
        let mut parser = TagStreamParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk));
        }
        events.extend(parser.finish());
        events
    }

    const DOCUMENT: &str = concat!(
        "Setting up the project. ",
        "<thinking>Need a config and an entry point.</thinking>",
        "<code>",
        r#"<write file_path="src/index.ts">"#,
        "```ts\nconsole.log(\"héllo\");\n```",
        "</write>",
        r#"<write file_path="package.json">{"name": "demo"}</write>"#,
        "<add-dependency> left-pad </add-dependency>",
        r#"<rename original_file_path="a.ts" new_file_path="b.ts" />"#,
        r#"<delete file_path="old.txt" />"#,
        "</code>",
        " All done, if x < 3 it works.",
    );

    fn document_events() -> Vec<ParserEvent> {
        vec![
            narrative("Setting up the project."),
            ParserEvent::Thinking("Need a config and an entry point.".to_string()),
            write("src/index.ts", "console.log(\"héllo\");"),
            write("package.json", r#"{"name": "demo"}"#),
            ParserEvent::DependencyRequest("left-pad".to_string()),
            ParserEvent::FileRename {
                old_path: "a.ts".to_string(),
                new_path: "b.ts".to_string(),
            },
            ParserEvent::FileDelete {
                path: "old.txt".to_string(),
            },
            narrative("All done, if x < 3 it works."),
        ]
    }

    #[test]
    fn test_whole_document() {
        assert_eq!(parse_document(DOCUMENT), document_events());
    }

    #[test]
    fn test_every_two_way_split_matches_whole_document() {
        let expected = parse_document(DOCUMENT);
        for (split, _) in DOCUMENT.char_indices().skip(1) {
            let (head, tail) = DOCUMENT.split_at(split);
            assert_eq!(feed_chunks(&[head, tail]), expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_char_by_char_matches_whole_document() {
        let chars: Vec<String> = DOCUMENT.chars().map(String::from).collect();
        let chunks: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(feed_chunks(&chunks), document_events());
    }

    #[test]
    fn test_unknown_tag_resilience() {
        let events = parse_document(r#"hello <foo bar="1"> world <write file_path="a.txt">X</write>"#);
        assert_eq!(
            events,
            vec![narrative("hello"), narrative("world"), write("a.txt", "X")]
        );
    }

    #[test]
    fn test_repeated_delete_yields_two_events() {
        let events =
            parse_document(r#"<delete file_path="a.txt" /><delete file_path="a.txt" />"#);
        let delete = ParserEvent::FileDelete {
            path: "a.txt".to_string(),
        };
        assert_eq!(events, vec![delete.clone(), delete]);
    }

    #[test]
    fn test_fence_is_stripped_from_write_body() {
        let events = parse_document("<write file_path=\"x.ts\">\n```ts\nconst x=1;\n```\n</write>");
        assert_eq!(events, vec![write("x.ts", "const x=1;")]);
    }

    #[test]
    fn test_malformed_write_attributes_drop_only_that_write() {
        let events = parse_document(concat!(
            "<write file_path=a.txt>lost body</write>",
            r#"<write file_path="b.txt">kept</write>"#,
        ));
        assert_eq!(events, vec![write("b.txt", "kept")]);
    }

    #[test]
    fn test_rename_missing_attribute_is_dropped() {
        let events = parse_document(r#"<rename original_file_path="a" /> after"#);
        assert_eq!(events, vec![narrative("after")]);
    }

    #[test]
    fn test_unterminated_body_is_discarded() {
        let events = feed_chunks(&["intro <write file_path=\"a.txt\">partial con", "tent"]);
        assert_eq!(events, vec![narrative("intro")]);
    }

    #[test]
    fn test_unterminated_tag_is_discarded() {
        let events = feed_chunks(&["intro <write file_pa"]);
        assert_eq!(events, vec![narrative("intro")]);
    }

    #[test]
    fn test_no_event_before_delimiter_arrives() {
        let mut parser = TagStreamParser::new();
        assert!(parser.feed("<write file_path=\"a.txt\">abc</wri").is_empty());
        assert!(parser.buffered() > 0);
        assert_eq!(parser.feed("te>"), vec![write("a.txt", "abc")]);
    }

    #[test]
    fn test_narrative_waits_for_tag_or_end() {
        let mut parser = TagStreamParser::new();
        assert!(parser.feed("just some ").is_empty());
        assert!(parser.feed("prose").is_empty());
        assert_eq!(parser.finish(), vec![narrative("just some prose")]);
    }

    #[test]
    fn test_whitespace_only_narration_is_suppressed() {
        let events = parse_document("  \n <thinking>  </thinking>\n  ");
        assert!(events.is_empty());
    }

    #[test]
    fn test_tags_inside_write_body_are_content() {
        let events = parse_document(r#"<write file_path="index.html"><div><b>hi</b></div></write>"#);
        assert_eq!(events, vec![write("index.html", "<div><b>hi</b></div>")]);
    }

    #[test]
    fn test_trailing_angle_bracket_waits_then_flushes() {
        let mut parser = TagStreamParser::new();
        assert!(parser.feed("a <").is_empty());
        assert_eq!(parser.finish(), vec![narrative("a <")]);
    }

    #[test]
    fn test_cancel_emits_nothing() {
        let mut parser = TagStreamParser::new();
        assert_eq!(parser.feed("done. <thinking>half"), vec![narrative("done.")]);
        parser.cancel();
    }

    #[test]
    fn test_stray_closing_tags_are_ignored() {
        let events = parse_document("a </write> b </code> c");
        assert_eq!(events, vec![narrative("a"), narrative("b"), narrative("c")]);
    }
}
