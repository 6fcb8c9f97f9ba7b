pub(crate) mod command;
pub(crate) mod topology;

use crate::bson::{Bson, Document};

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongomux::command";
pub(crate) const CONNECTION_TRACING_EVENT_TARGET: &str = "mongomux::connection";
pub(crate) const SERVER_SELECTION_TRACING_EVENT_TARGET: &str = "mongomux::server_selection";
pub(crate) const TOPOLOGY_TRACING_EVENT_TARGET: &str = "mongomux::topology";

pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        let mut json = Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string();
        truncate_on_char_boundary(&mut json, DEFAULT_MAX_DOCUMENT_LENGTH_BYTES);
        json
    }
}

impl TracingRepresentation for crate::error::Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

/// Truncates `s` to at most `new_len` bytes (rounding down to a char boundary) and appends an
/// ellipsis if anything was cut.
pub(crate) fn truncate_on_char_boundary(s: &mut String, new_len: usize) {
    if s.len() <= new_len {
        return;
    }
    let mut boundary = new_len;
    while !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    s.truncate(boundary);
    s.push_str("...");
}

#[cfg(test)]
mod test {
    use super::truncate_on_char_boundary;

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "héllo".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "h...");

        let mut short = "abc".to_string();
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "abc");
    }
}
