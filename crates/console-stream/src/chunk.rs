use std::fmt;

use serde_json::Value;

/// Field carrying the reserved control-chunk discriminant on the wire.
pub const DISCRIMINANT_FIELD: &str = "javaClass";

const MULTI_SUFFIX: &str = "MultipleChunks";
const SHUTDOWN_SUFFIX: &str = "ShutdownNotice";

/// One unit of console output or control signal received from the stream.
///
/// Chunks are decoded once at the transport boundary with [`Chunk::from_wire`];
/// downstream code matches on the variant and never re-inspects raw fields to
/// decide whether something is a control chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Nothing new this cycle.
    Empty,
    /// Opaque text shown verbatim.
    Text(String),
    /// Any other payload; handed to the configured converter.
    Structured(Value),
    /// Several chunks coalesced into one response, in order.
    Multi(Vec<Chunk>),
    /// Terminal control chunk ending the stream.
    Shutdown { clean: bool },
}

/// Coarse classification used in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    Empty,
    Text,
    Structured,
    Multi,
    Shutdown,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkKind::Empty => "empty",
            ChunkKind::Text => "text",
            ChunkKind::Structured => "structured",
            ChunkKind::Multi => "multi",
            ChunkKind::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

enum Reserved {
    Multi,
    Shutdown,
}

impl Chunk {
    /// Decodes a `requestNextChunk` result.
    ///
    /// Returns `None` for `null`, which the server uses to signal that the
    /// console was closed.
    pub fn from_wire(value: Value) -> Option<Chunk> {
        match value {
            Value::Null => None,
            other => Some(Self::decode(other)),
        }
    }

    fn decode(value: Value) -> Chunk {
        match value {
            // A null nested inside an envelope carries no content.
            Value::Null => Chunk::Empty,
            Value::String(text) if text.is_empty() => Chunk::Empty,
            Value::String(text) => Chunk::Text(text),
            Value::Object(mut map) => match reserved_kind(map.get(DISCRIMINANT_FIELD)) {
                Some(Reserved::Multi) => {
                    let items = match map.remove("chunks") {
                        Some(Value::Array(items)) => items,
                        // Array containers may be wrapped as `{ "list": [...] }`.
                        Some(Value::Object(mut wrapped)) => match wrapped.remove("list") {
                            Some(Value::Array(items)) => items,
                            _ => Vec::new(),
                        },
                        _ => Vec::new(),
                    };
                    Chunk::Multi(items.into_iter().map(Self::decode).collect())
                }
                Some(Reserved::Shutdown) => Chunk::Shutdown {
                    clean: map.get("clean").and_then(Value::as_bool).unwrap_or(false),
                },
                None => Chunk::Structured(Value::Object(map)),
            },
            other => Chunk::Structured(other),
        }
    }

    pub fn kind(&self) -> ChunkKind {
        match self {
            Chunk::Empty => ChunkKind::Empty,
            Chunk::Text(_) => ChunkKind::Text,
            Chunk::Structured(_) => ChunkKind::Structured,
            Chunk::Multi(_) => ChunkKind::Multi,
            Chunk::Shutdown { .. } => ChunkKind::Shutdown,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Chunk::Empty)
    }

    /// The `clean` flag of the first shutdown notice in this chunk, searching
    /// envelopes depth-first.
    pub fn shutdown_notice(&self) -> Option<bool> {
        match self {
            Chunk::Shutdown { clean } => Some(*clean),
            Chunk::Multi(chunks) => chunks.iter().find_map(Chunk::shutdown_notice),
            _ => None,
        }
    }
}

impl From<&str> for Chunk {
    fn from(value: &str) -> Self {
        Chunk::decode(Value::String(value.to_string()))
    }
}

fn reserved_kind(discriminant: Option<&Value>) -> Option<Reserved> {
    let class = discriminant?.as_str()?;
    // Nested classes are reported as `Outer$Inner`, top-level ones as `pkg.Name`.
    let simple = class.rsplit(['.', '$']).next().unwrap_or(class);
    match simple {
        MULTI_SUFFIX => Some(Reserved::Multi),
        SHUTDOWN_SUFFIX => Some(Reserved::Shutdown),
        _ => None,
    }
}
