//! Downstream interface for parser events
//!
//! Consumers receive their sink at construction time; there is no global
//! store behind the parser.

use super::parser::ParserEvent;
use crate::error::Result;

/// Receives parser events in document order.
pub trait EventSink {
    fn on_narrative(&mut self, text: &str) -> Result<()>;

    fn on_thinking(&mut self, text: &str) -> Result<()>;

    fn on_write(&mut self, path: &str, content: &str) -> Result<()>;

    fn on_delete(&mut self, path: &str) -> Result<()>;

    fn on_rename(&mut self, old_path: &str, new_path: &str) -> Result<()>;

    fn on_dependency(&mut self, package: &str) -> Result<()>;
}

/// Route one event to the matching sink method.
pub fn dispatch<S: EventSink + ?Sized>(sink: &mut S, event: &ParserEvent) -> Result<()> {
    match event {
        ParserEvent::Narrative(text) => sink.on_narrative(text),
        ParserEvent::Thinking(text) => sink.on_thinking(text),
        ParserEvent::DependencyRequest(package) => sink.on_dependency(package),
        ParserEvent::FileWrite { path, content } => sink.on_write(path, content),
        ParserEvent::FileDelete { path } => sink.on_delete(path),
        ParserEvent::FileRename { old_path, new_path } => sink.on_rename(old_path, new_path),
    }
}

/// Collects events as-is.
impl EventSink for Vec<ParserEvent> {
    fn on_narrative(&mut self, text: &str) -> Result<()> {
        self.push(ParserEvent::Narrative(text.to_string()));
        Ok(())
    }

    fn on_thinking(&mut self, text: &str) -> Result<()> {
        self.push(ParserEvent::Thinking(text.to_string()));
        Ok(())
    }

    fn on_write(&mut self, path: &str, content: &str) -> Result<()> {
        self.push(ParserEvent::FileWrite {
            path: path.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    fn on_delete(&mut self, path: &str) -> Result<()> {
        self.push(ParserEvent::FileDelete {
            path: path.to_string(),
        });
        Ok(())
    }

    fn on_rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        self.push(ParserEvent::FileRename {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        });
        Ok(())
    }

    fn on_dependency(&mut self, package: &str) -> Result<()> {
        self.push(ParserEvent::DependencyRequest(package.to_string()));
        Ok(())
    }
}
