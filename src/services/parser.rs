//! Content parsers: raw bytes in, key/value/label metadata out.
//!
//! Parsers are registered against a kind prefix. A kind is served by the
//! parser registered for the longest prefix it equals or descends from
//! (`workflow` serves `Workflow/standard`), falling back to
//! [`DefaultParser`].

use crate::models::metadata::Metadata;
use std::sync::Arc;

/// Extracts metadata from the raw content of one kind of object.
///
/// Implementations must be deterministic and free of side effects.
pub trait ContentParser: Send + Sync {
    fn parse(&self, content: &[u8]) -> Vec<Metadata>;
}

/// Parser for kinds nobody registered: contributes no metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultParser;

impl ContentParser for DefaultParser {
    fn parse(&self, _content: &[u8]) -> Vec<Metadata> {
        Vec::new()
    }
}

/// Kind-prefix to parser table.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Vec<(String, Arc<dyn ContentParser>)>,
    fallback: Arc<dyn ContentParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: Vec::new(),
            fallback: Arc::new(DefaultParser),
        }
    }
}

fn kind_matches(kind: &str, prefix: &str) -> bool {
    kind == prefix
        || kind
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `parser` for `kind_prefix`, replacing an earlier entry for
    /// the same prefix.
    pub fn register(mut self, kind_prefix: &str, parser: Arc<dyn ContentParser>) -> Self {
        let prefix = kind_prefix.trim().trim_end_matches('/').to_lowercase();
        self.parsers.retain(|(p, _)| *p != prefix);
        self.parsers.push((prefix, parser));
        self
    }

    pub fn parser_for(&self, kind: &str) -> &dyn ContentParser {
        let kind = kind.to_lowercase();
        self.parsers
            .iter()
            .filter(|(prefix, _)| kind_matches(&kind, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.fallback.as_ref(), |(_, parser)| parser.as_ref())
    }

    pub fn parse(&self, kind: &str, content: &[u8]) -> Vec<Metadata> {
        self.parser_for(kind).parse(content)
    }
}
