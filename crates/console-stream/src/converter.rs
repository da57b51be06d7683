//! Pluggable conversion of content chunks into [`Renderable`]s.
//!
//! Control chunks (empty, multi, shutdown) never reach a converter; it only
//! sees `Text` and `Structured` chunks.

use serde_json::Value;

use crate::chunk::{Chunk, DISCRIMINANT_FIELD};
use crate::errors::ConvertError;
use crate::render::Renderable;

/// Marker value of the `_` field on a clear-console control record.
pub const CLEAR_CONSOLE: &str = "ClearConsole";

/// Turns a content chunk into something displayable.
///
/// `Ok(None)` means "nothing to show". An `Err` or a panic is logged by the
/// processor and the stream continues without that chunk.
pub trait ChunkConverter: Send + Sync {
    fn convert(&self, chunk: &Chunk) -> Result<Option<Renderable>, ConvertError>;
}

impl<F> ChunkConverter for F
where
    F: Fn(&Chunk) -> Result<Option<Renderable>, ConvertError> + Send + Sync,
{
    fn convert(&self, chunk: &Chunk) -> Result<Option<Renderable>, ConvertError> {
        (self)(chunk)
    }
}

/// Remote exception recognized in a structured chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub class: String,
    pub message: Option<String>,
}

impl ExceptionInfo {
    /// Recognizes a serialized exception: it carries `cause`, the class
    /// discriminant, `message` and `stackTrace` all at once.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let shaped = ["cause", DISCRIMINANT_FIELD, "message", "stackTrace"]
            .iter()
            .all(|key| map.contains_key(*key));
        if !shaped {
            return None;
        }
        let class = match map.get(DISCRIMINANT_FIELD) {
            Some(Value::String(class)) => class.clone(),
            Some(other) => other.to_string(),
            None => return None,
        };
        Some(Self {
            class,
            message: map
                .get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        })
    }
}

/// Built-in classification: text, exception, clear-console, or a JSON dump.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConverter;

impl ChunkConverter for DefaultConverter {
    fn convert(&self, chunk: &Chunk) -> Result<Option<Renderable>, ConvertError> {
        match chunk {
            Chunk::Text(text) => Ok(Some(Renderable::Text(text.clone()))),
            Chunk::Structured(value) => {
                if let Some(exception) = ExceptionInfo::from_value(value) {
                    return Ok(Some(Renderable::Exception {
                        class: exception.class,
                        message: exception.message,
                    }));
                }
                if value.get("_").and_then(Value::as_str) == Some(CLEAR_CONSOLE) {
                    return Ok(Some(Renderable::Clear));
                }
                serde_json::to_string_pretty(value)
                    .map(|json| Some(Renderable::Dump(json)))
                    .map_err(|e| ConvertError::new(format!("failed to dump record: {e}")))
            }
            Chunk::Empty | Chunk::Multi(_) | Chunk::Shutdown { .. } => Ok(None),
        }
    }
}
