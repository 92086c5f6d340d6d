use serde::Deserialize;
use std::ffi::CStr;
use std::fmt;
use std::str::FromStr;

/// What an adapter saw. A crash is not an outcome: it never returns.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed,
    Rejected,
}

impl ParseOutcome {
    /// Drops whatever the parser produced and keeps only the verdict.
    fn settle<T, E>(result: Result<T, E>) -> Self {
        match result {
            Ok(_document) => ParseOutcome::Parsed,
            Err(_rejection) => ParseOutcome::Rejected,
        }
    }
}

/// Uniform entry point to one parsing library.
///
/// Everything allocated by `parse` must be released before it returns, on
/// the rejected path as much as on the parsed one. In this crate that holds by
/// construction: parse results are locals dropped at the end of the call, and
/// the only state an adapter keeps is reusable scratch space.
///
/// Rejections are expected fuzzing signal and must not be logged.
pub trait ParserAdapter {
    fn name(&self) -> &'static str;
    fn parse(&mut self, input: &[u8]) -> ParseOutcome;
}

/// Builds a full JSON document tree from the whole buffer.
#[derive(Debug, Default)]
pub struct JsonTreeAdapter;

impl ParserAdapter for JsonTreeAdapter {
    fn name(&self) -> &'static str {
        ParserKind::JsonTree.name()
    }

    fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        ParseOutcome::settle(serde_json::from_slice::<serde_json::Value>(input))
    }
}

/// Drives a JSON tokenizer over the buffer and takes the first complete value.
/// Bytes after that value are ignored, as with an incremental tokenizer that
/// stops once it has produced an object.
#[derive(Debug, Default)]
pub struct JsonStreamAdapter;

impl ParserAdapter for JsonStreamAdapter {
    fn name(&self) -> &'static str {
        ParserKind::JsonStream.name()
    }

    fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        let mut tokenizer =
            serde_json::Deserializer::from_slice(input).into_iter::<serde_json::Value>();
        match tokenizer.next() {
            Some(first) => ParseOutcome::settle(first),
            None => ParseOutcome::Rejected,
        }
    }
}

/// In-situ JSON parse: string unescaping rewrites the buffer it is given.
///
/// Works on a private copy so the arena is never modified. The copy is
/// length-annotated (a slice), which is what the parser requires; no
/// terminator is appended.
#[derive(Debug, Default)]
pub struct JsonInsituAdapter {
    scratch: Vec<u8>,
}

impl JsonInsituAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParserAdapter for JsonInsituAdapter {
    fn name(&self) -> &'static str {
        ParserKind::JsonInsitu.name()
    }

    fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        self.scratch.clear();
        self.scratch.extend_from_slice(input);
        ParseOutcome::settle(simd_json::to_borrowed_value(self.scratch.as_mut_slice()))
    }
}

/// JSON through a NUL-terminated text entry point.
///
/// The private copy is terminated here, so an input that fills the whole
/// arena still gets its terminator. As with any C-string API, the text ends at
/// the first NUL byte.
#[derive(Debug, Default)]
pub struct JsonCStrAdapter {
    scratch: Vec<u8>,
}

impl JsonCStrAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParserAdapter for JsonCStrAdapter {
    fn name(&self) -> &'static str {
        ParserKind::JsonCstr.name()
    }

    fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        self.scratch.clear();
        self.scratch.reserve(input.len() + 1);
        self.scratch.extend_from_slice(input);
        self.scratch.push(0);
        match CStr::from_bytes_until_nul(&self.scratch) {
            Ok(text) => {
                ParseOutcome::settle(serde_json::from_slice::<serde_json::Value>(text.to_bytes()))
            }
            Err(_) => ParseOutcome::Rejected,
        }
    }
}

/// Loads the first YAML document of the stream into a node tree.
#[derive(Debug, Default)]
pub struct YamlAdapter;

impl ParserAdapter for YamlAdapter {
    fn name(&self) -> &'static str {
        ParserKind::Yaml.name()
    }

    fn parse(&mut self, input: &[u8]) -> ParseOutcome {
        match serde_yaml::Deserializer::from_slice(input).next() {
            Some(document) => ParseOutcome::settle(serde_yaml::Value::deserialize(document)),
            None => ParseOutcome::Rejected,
        }
    }
}

/// Names the adapter a harness instance is built around.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    #[default]
    JsonTree,
    JsonStream,
    JsonInsitu,
    JsonCstr,
    Yaml,
}

impl ParserKind {
    pub const ALL: [ParserKind; 5] = [
        ParserKind::JsonTree,
        ParserKind::JsonStream,
        ParserKind::JsonInsitu,
        ParserKind::JsonCstr,
        ParserKind::Yaml,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::JsonTree => "json-tree",
            ParserKind::JsonStream => "json-stream",
            ParserKind::JsonInsitu => "json-insitu",
            ParserKind::JsonCstr => "json-cstr",
            ParserKind::Yaml => "yaml",
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParserKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ParserKind::ALL.iter().map(|k| k.name()).collect();
                format!("unknown parser '{s}', expected one of: {}", known.join(", "))
            })
    }
}
