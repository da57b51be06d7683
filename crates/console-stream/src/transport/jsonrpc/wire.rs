use serde::Serialize;
use serde_json::Value;

use crate::errors::{CODE_TRANSPORT, StreamError};

pub(crate) const NEXT_CHUNK_METHOD: &str = "ConsoleService.requestNextChunk";
pub(crate) const APP_UNLOAD_METHOD: &str = "AppControlService.notifyAppUnload";
/// Query parameter carrying the session on every call.
pub(crate) const SESSION_PARAM: &str = "pageId";

#[derive(Debug, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Vec<Value>,
}

/// Interprets one HTTP response of a JSON-RPC call.
///
/// Non-success statuses map to `StreamError { code: status }`; an unreadable
/// body is a parse error; an `error` member maps to its `code`/`msg`. A
/// missing `result` reads as `null`.
pub(crate) fn parse_response(status: u16, body: &str) -> Result<Value, StreamError> {
    if !(200..300).contains(&status) {
        let detail = body.trim();
        let message = if detail.is_empty() {
            format!("HTTP status {status}")
        } else {
            format!("HTTP status {status}: {}", truncate(detail, 200))
        };
        return Err(StreamError::new(i32::from(status), message));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| StreamError::parse(format!("invalid JSON-RPC response: {e}")))?;
    let Value::Object(mut map) = value else {
        return Err(StreamError::parse("JSON-RPC response is not an object"));
    };

    match map.remove("error") {
        None | Some(Value::Null) => Ok(map.remove("result").unwrap_or(Value::Null)),
        Some(error) => Err(rpc_error(&error)),
    }
}

fn rpc_error(error: &Value) -> StreamError {
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(CODE_TRANSPORT);
    let message = error
        .get("msg")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    StreamError { code, message }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
