//! Chunk classification and dispatch.
//!
//! The processor decides what a poll result means for the stream: content is
//! converted and rendered, `Multi` is unpacked in order, a shutdown notice or
//! an absent chunk runs the close path. User-supplied converters and render
//! targets are isolated, so a failing one only costs the chunk it failed on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::chunk::Chunk;
use crate::converter::{ChunkConverter, ExceptionInfo};
use crate::health::ConnectionHealthMonitor;
use crate::render::{RenderTarget, Renderable};
use crate::rpc::{AppControl, ConsoleHooks};
use crate::session::SessionId;

/// Tracing target used when no render target is attached.
pub const SINK_TARGET: &str = "console_stream::sink";

/// Whether the poll loop should keep going after a chunk was processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The close path ran; no further fetches.
    Stop,
}

/// Interprets chunks and dispatches them to the display and UI hooks.
pub struct ChunkProcessor {
    session: SessionId,
    converter: Arc<dyn ChunkConverter>,
    target: Option<Arc<dyn RenderTarget>>,
    hooks: Arc<dyn ConsoleHooks>,
    app_control: Arc<dyn AppControl>,
    closed: bool,
}

impl ChunkProcessor {
    pub fn new(
        session: SessionId,
        converter: Arc<dyn ChunkConverter>,
        target: Option<Arc<dyn RenderTarget>>,
        hooks: Arc<dyn ConsoleHooks>,
        app_control: Arc<dyn AppControl>,
    ) -> Self {
        Self {
            session,
            converter,
            target,
            hooks,
            app_control,
            closed: false,
        }
    }

    /// Whether the close hooks have already run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Processes one poll result. `None` means the stream was closed.
    pub fn process(&mut self, chunk: Option<Chunk>, health: &mut ConnectionHealthMonitor) -> Flow {
        match chunk {
            None => {
                self.close();
                Flow::Stop
            }
            Some(chunk) => self.process_chunk(chunk, health),
        }
    }

    fn process_chunk(&mut self, chunk: Chunk, health: &mut ConnectionHealthMonitor) -> Flow {
        match chunk {
            Chunk::Empty => Flow::Continue,
            Chunk::Multi(chunks) => {
                let total = chunks.len();
                for (idx, nested) in chunks.into_iter().enumerate() {
                    if self.process_chunk(nested, health) == Flow::Stop {
                        let skipped = total - idx - 1;
                        if skipped > 0 {
                            debug!(session = %self.session, skipped, "dropping chunks after shutdown notice");
                        }
                        return Flow::Stop;
                    }
                }
                Flow::Continue
            }
            Chunk::Shutdown { clean } => {
                debug!(session = %self.session, clean, "shutdown notice received");
                health.disable();
                if clean {
                    self.hooks.suppress_stale_session_notice();
                }
                self.app_control.notify_app_unload(&self.session);
                self.close();
                Flow::Stop
            }
            content => {
                self.dispatch(content);
                Flow::Continue
            }
        }
    }

    fn dispatch(&self, chunk: Chunk) {
        if let Chunk::Structured(value) = &chunk
            && let Some(exception) = ExceptionInfo::from_value(value)
        {
            error!(
                session = %self.session,
                class = %exception.class,
                message = exception.message.as_deref().unwrap_or(""),
                "remote exception"
            );
        }

        let converted = panic::catch_unwind(AssertUnwindSafe(|| self.converter.convert(&chunk)));
        match converted {
            Ok(Ok(Some(item))) => self.deliver(item),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                warn!(session = %self.session, kind = %chunk.kind(), error = %err, "chunk converter failed; skipping chunk");
            }
            Err(payload) => {
                warn!(
                    session = %self.session,
                    kind = %chunk.kind(),
                    panic = panic_message(payload.as_ref()),
                    "chunk converter panicked; skipping chunk"
                );
            }
        }
    }

    fn deliver(&self, item: Renderable) {
        if let Some(target) = &self.target {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| target.render(item))) {
                warn!(
                    session = %self.session,
                    panic = panic_message(payload.as_ref()),
                    "render target panicked; item dropped"
                );
            }
            return;
        }
        match item {
            Renderable::Text(text) => info!(target: SINK_TARGET, session = %self.session, "{}", text.trim_end()),
            Renderable::Dump(json) => debug!(target: SINK_TARGET, session = %self.session, "{json}"),
            // Exceptions were already reported at error level; clearing has no meaning here.
            Renderable::Exception { .. } | Renderable::Clear => {}
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(session = %self.session, "console closed");
        self.hooks.on_close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::DefaultConverter;
    use crate::errors::ConvertError;
    use crate::render::BufferTarget;
    use crate::testing::{Journal, RecordingAppControl, RecordingHooks};
    use serde_json::json;
    use tokio::time::Instant;

    struct Fixture {
        processor: ChunkProcessor,
        health: ConnectionHealthMonitor,
        target: BufferTarget,
        hooks: RecordingHooks,
        app: RecordingAppControl,
    }

    fn fixture_with(converter: Arc<dyn ChunkConverter>, with_target: bool) -> Fixture {
        let target = BufferTarget::new();
        let hooks = RecordingHooks::new(Journal::default());
        let app = RecordingAppControl::default();
        let processor = ChunkProcessor::new(
            SessionId::new("app-1"),
            converter,
            with_target.then(|| Arc::new(target.clone()) as Arc<dyn RenderTarget>),
            Arc::new(hooks.clone()),
            Arc::new(app.clone()),
        );
        Fixture {
            processor,
            health: ConnectionHealthMonitor::default(),
            target,
            hooks,
            app,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(DefaultConverter), true)
    }

    #[test]
    fn absent_chunk_closes_once() {
        let mut f = fixture();
        assert_eq!(f.processor.process(None, &mut f.health), Flow::Stop);
        assert_eq!(f.processor.process(None, &mut f.health), Flow::Stop);
        assert_eq!(f.hooks.closes(), 1);
        assert!(f.processor.is_closed());
        assert!(f.app.unloads().is_empty());
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut f = fixture();
        assert_eq!(
            f.processor.process(Some(Chunk::Empty), &mut f.health),
            Flow::Continue
        );
        assert!(f.target.items().is_empty());
    }

    #[test]
    fn multi_chunk_renders_in_order() {
        let mut f = fixture();
        let flow = f.processor.process(
            Some(Chunk::Multi(vec![
                Chunk::Text("a".into()),
                Chunk::Empty,
                Chunk::Multi(vec![Chunk::Text("b".into())]),
                Chunk::Text("c".into()),
            ])),
            &mut f.health,
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(f.target.texts(), vec!["a", "b", "c"]);
    }

    #[test]
    fn clean_shutdown_mid_multi_stops_and_suppresses_notice() {
        let mut f = fixture();
        f.health.mark_attempt_pending(Instant::now());
        let flow = f.processor.process(
            Some(Chunk::Multi(vec![
                Chunk::Text("a".into()),
                Chunk::Shutdown { clean: true },
                Chunk::Text("late".into()),
            ])),
            &mut f.health,
        );
        assert_eq!(flow, Flow::Stop);
        assert_eq!(f.target.texts(), vec!["a"]);
        assert_eq!(f.hooks.suppressed(), 1);
        assert_eq!(f.hooks.closes(), 1);
        assert_eq!(f.app.unloads(), vec![SessionId::new("app-1")]);
        assert!(!f.health.is_enabled());
        assert_eq!(f.health.pending_deadline(), None);
    }

    #[test]
    fn unclean_shutdown_leaves_notice_to_ui() {
        let mut f = fixture();
        let flow = f
            .processor
            .process(Some(Chunk::Shutdown { clean: false }), &mut f.health);
        assert_eq!(flow, Flow::Stop);
        assert_eq!(f.hooks.suppressed(), 0);
        assert_eq!(f.hooks.closes(), 1);
        assert_eq!(f.app.unloads().len(), 1);
    }

    #[test]
    fn unclean_shutdown_mid_multi_stops_without_suppressing_notice() {
        let mut f = fixture();
        let flow = f.processor.process(
            Some(Chunk::Multi(vec![
                Chunk::Text("a".into()),
                Chunk::Shutdown { clean: false },
                Chunk::Text("late".into()),
            ])),
            &mut f.health,
        );
        assert_eq!(flow, Flow::Stop);
        assert_eq!(f.target.texts(), vec!["a"]);
        assert_eq!(f.hooks.suppressed(), 0);
        assert_eq!(f.hooks.closes(), 1);
        assert_eq!(f.app.unloads(), vec![SessionId::new("app-1")]);
        assert!(!f.health.is_enabled());
    }

    #[test]
    fn panicking_converter_only_costs_its_chunk() {
        let converter = |chunk: &Chunk| -> Result<Option<Renderable>, ConvertError> {
            match chunk {
                Chunk::Text(t) if t == "boom" => panic!("converter cannot handle boom"),
                Chunk::Text(t) => Ok(Some(Renderable::Text(t.clone()))),
                _ => Ok(None),
            }
        };
        let mut f = fixture_with(Arc::new(converter), true);
        let flow = f.processor.process(
            Some(Chunk::Multi(vec![
                Chunk::Text("boom".into()),
                Chunk::Text("ok".into()),
            ])),
            &mut f.health,
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(f.target.texts(), vec!["ok"]);
        assert!(!f.processor.is_closed());
    }

    #[test]
    fn panicking_render_target_only_costs_its_item() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let target = move |item: Renderable| {
            if item == Renderable::Text("boom".into()) {
                panic!("display gone");
            }
            recorded.lock().unwrap().push(item);
        };
        let mut processor = ChunkProcessor::new(
            SessionId::new("app-1"),
            Arc::new(DefaultConverter),
            Some(Arc::new(target) as Arc<dyn RenderTarget>),
            Arc::new(RecordingHooks::new(Journal::default())),
            Arc::new(RecordingAppControl::default()),
        );
        let mut health = ConnectionHealthMonitor::default();
        for text in ["boom", "ok"] {
            assert_eq!(
                processor.process(Some(Chunk::Text(text.into())), &mut health),
                Flow::Continue
            );
        }
        assert_eq!(*seen.lock().unwrap(), vec![Renderable::Text("ok".into())]);
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn converter_failure_does_not_stop_the_stream() {
        let converter = |chunk: &Chunk| match chunk {
            Chunk::Text(t) if t == "boom" => Err(ConvertError::new("cannot render boom")),
            Chunk::Text(t) => Ok(Some(Renderable::Text(t.to_uppercase()))),
            _ => Ok(None),
        };
        let mut f = fixture_with(Arc::new(converter), true);
        let flow = f.processor.process(
            Some(Chunk::Multi(vec![
                Chunk::Text("boom".into()),
                Chunk::Text("ok".into()),
            ])),
            &mut f.health,
        );
        assert_eq!(flow, Flow::Continue);
        assert_eq!(f.target.texts(), vec!["OK"]);
    }

    #[test]
    fn exceptions_without_target_are_not_rendered_but_stream_continues() {
        let mut f = fixture_with(Arc::new(DefaultConverter), false);
        let exception = json!({
            "javaClass": "java.lang.RuntimeException",
            "message": "oops",
            "cause": null,
            "stackTrace": []
        });
        let flow = f
            .processor
            .process(Some(Chunk::Structured(exception)), &mut f.health);
        assert_eq!(flow, Flow::Continue);
        assert!(f.target.items().is_empty());
    }

    #[test]
    fn clear_console_wipes_target() {
        let mut f = fixture();
        f.processor
            .process(Some(Chunk::Text("old".into())), &mut f.health);
        f.processor.process(
            Some(Chunk::Structured(json!({"_": "ClearConsole"}))),
            &mut f.health,
        );
        f.processor
            .process(Some(Chunk::Text("new".into())), &mut f.health);
        assert_eq!(f.target.texts(), vec!["new"]);
    }
}
