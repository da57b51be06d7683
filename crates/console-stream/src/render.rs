//! Render targets: where converted chunks end up.
//!
//! [`BufferTarget`] records items in memory, [`WriterTarget`] prints them.
//! Any `Fn(Renderable)` closure is a target as well.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Converted form of a chunk, ready for a display.
#[derive(Clone, Debug, PartialEq)]
pub enum Renderable {
    /// Plain text line(s).
    Text(String),
    /// Remote exception summary.
    Exception {
        class: String,
        message: Option<String>,
    },
    /// Pretty-printed dump of a record nobody recognized.
    Dump(String),
    /// Request to wipe everything rendered so far.
    Clear,
}

/// Display that receives converted chunks.
///
/// Only the client driver writes to a target, one item at a time, in stream
/// order; implementations do not need to handle concurrent writers.
pub trait RenderTarget: Send + Sync {
    fn render(&self, item: Renderable);
}

impl<F> RenderTarget for F
where
    F: Fn(Renderable) + Send + Sync,
{
    fn render(&self, item: Renderable) {
        (self)(item)
    }
}

/// In-memory target that keeps every rendered item.
#[derive(Clone, Default)]
pub struct BufferTarget {
    items: Arc<Mutex<Vec<Renderable>>>,
}

impl BufferTarget {
    /// Creates an empty buffer; clones share the same items.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the items rendered since the last clear.
    pub fn items(&self) -> Vec<Renderable> {
        match self.items.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Text of rendered `Text` items, in order.
    pub fn texts(&self) -> Vec<String> {
        self.items()
            .into_iter()
            .filter_map(|item| match item {
                Renderable::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl RenderTarget for BufferTarget {
    fn render(&self, item: Renderable) {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        if item == Renderable::Clear {
            items.clear();
        } else {
            items.push(item);
        }
    }
}

/// Target that prints items to a writer such as stdout.
pub struct WriterTarget<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterTarget<W> {
    /// Wraps `out`; every item is written and flushed as it arrives.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl WriterTarget<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> RenderTarget for WriterTarget<W> {
    fn render(&self, item: Renderable) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let written = match item {
            Renderable::Text(text) => write!(out, "{text}"),
            Renderable::Exception { class, message } => match message {
                Some(message) => writeln!(out, "{class}: {message}"),
                None => writeln!(out, "{class}"),
            },
            Renderable::Dump(json) => writeln!(out, "{json}"),
            Renderable::Clear => Ok(()),
        };
        if let Err(err) = written.and_then(|_| out.flush()) {
            tracing::warn!(error = %err, "failed to write console output");
        }
    }
}
