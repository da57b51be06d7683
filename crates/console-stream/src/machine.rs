//! Poll-loop state machine.
//!
//! `StreamMachine` holds every decision the client makes between fetches and
//! none of the I/O: it is fed poll outcomes and processing verdicts and
//! answers with the next [`Command`]. The async driver in `client` executes
//! those commands; tests drive the machine directly with synthetic outcomes.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backoff::BackoffController;
use crate::chunk::Chunk;
use crate::config::{HealthArming, StreamOptions};
use crate::errors::StreamError;
use crate::health::ConnectionHealthMonitor;
use crate::processor::Flow;
use crate::rpc::PollOutcome;
use crate::stream::{CloseReason, StreamEvent, StreamState};

/// What the driver must do next.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Issue one fetch after waiting `delay`.
    Fetch { delay: Duration },
    /// Hand a result to the chunk processor; `None` runs the close path.
    Deliver(Option<Chunk>),
    /// The stream is closed; tear down and stop.
    Close(CloseReason),
    /// Nothing new to do: the step already in progress has not finished.
    Wait,
}

pub struct StreamMachine {
    state: StreamState,
    backoff: BackoffController,
    failures: u32,
    health: ConnectionHealthMonitor,
    arming: HealthArming,
    close_reason: Option<CloseReason>,
    events: Vec<StreamEvent>,
    state_tx: watch::Sender<StreamState>,
}

impl StreamMachine {
    pub fn new(options: &StreamOptions) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Idle);
        Self {
            state: StreamState::Idle,
            backoff: BackoffController::new(options.backoff.clone()),
            failures: 0,
            health: ConnectionHealthMonitor::new(options.health.debounce()),
            arming: options.health.arming,
            close_reason: None,
            events: Vec::new(),
            state_tx,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<bool> {
        self.health.subscribe()
    }

    pub fn health_mut(&mut self) -> &mut ConnectionHealthMonitor {
        &mut self.health
    }

    /// Exponent the next retry delay is computed from.
    pub fn backoff_step(&self) -> u32 {
        self.backoff.step()
    }

    /// Transient failures since the last successful poll.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Events produced since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.events)
    }

    /// Leaves `Idle` and requests the first fetch.
    pub fn start(&mut self, now: Instant) -> Command {
        if self.state != StreamState::Idle {
            warn!(state = %self.state, "stream already started");
            return self.current_command();
        }
        self.enter_polling(now);
        Command::Fetch {
            delay: Duration::ZERO,
        }
    }

    /// Classifies the result of the outstanding fetch.
    pub fn on_outcome(&mut self, outcome: PollOutcome, now: Instant) -> Command {
        if self.state != StreamState::Polling {
            debug!(state = %self.state, "ignoring poll outcome outside of polling");
            return self.current_command();
        }
        match outcome {
            Ok(chunk) => {
                self.transition(StreamState::Delivering);
                let step = self.backoff.reset();
                self.failures = 0;
                self.clear_health();
                match &chunk {
                    None => self.close_reason = Some(CloseReason::ServerClosed),
                    Some(chunk) => {
                        if let Some(clean) = chunk.shutdown_notice() {
                            self.close_reason = Some(CloseReason::Shutdown { clean });
                        }
                    }
                }
                debug!(kind = ?chunk.as_ref().map(Chunk::kind), step, "poll succeeded");
                Command::Deliver(chunk)
            }
            Err(err) => self.on_failure(err, now),
        }
    }

    fn on_failure(&mut self, err: StreamError, now: Instant) -> Command {
        self.transition(StreamState::Backoff);
        if err.is_terminal() {
            warn!(code = err.code, error = %err, "session no longer valid; closing console");
            self.close_reason = Some(CloseReason::SessionInvalid(err));
            return Command::Deliver(None);
        }
        self.failures += 1;
        if self.backoff.policy().exhausted(self.failures) {
            warn!(code = err.code, failures = self.failures, error = %err, "retry ceiling reached; closing console");
            self.close_reason = Some(CloseReason::RetriesExhausted(err));
            return Command::Deliver(None);
        }

        self.health.mark_attempt_pending(now);
        let step = self.backoff.step();
        let delay = self.backoff.next_delay();
        debug!(
            code = err.code,
            step,
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "poll failed; retrying"
        );
        self.events.push(StreamEvent::RetryScheduled {
            delay,
            step,
            code: err.code,
        });
        self.enter_polling(now);
        Command::Fetch { delay }
    }

    /// Applies the chunk processor's verdict for the last delivery.
    pub fn on_delivered(&mut self, flow: Flow, now: Instant) -> Command {
        match (self.state, flow) {
            (StreamState::Delivering, Flow::Continue) => {
                self.enter_polling(now);
                Command::Fetch {
                    delay: Duration::ZERO,
                }
            }
            (StreamState::Delivering | StreamState::Backoff | StreamState::Polling, Flow::Stop) => {
                self.close()
            }
            _ => self.current_command(),
        }
    }

    /// Caller-requested close; the returned delivery runs the regular close path.
    pub fn request_close(&mut self) -> Command {
        match self.state {
            StreamState::Closed => self.current_command(),
            _ => {
                self.close_reason.get_or_insert(CloseReason::Requested);
                Command::Deliver(None)
            }
        }
    }

    /// Resolves when the debounced unhealthy transition fires.
    pub async fn health_expired(&mut self) {
        self.health.expired().await;
        self.events.push(StreamEvent::HealthChanged { unhealthy: true });
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    fn close(&mut self) -> Command {
        let was_unhealthy = self.health.is_unhealthy();
        self.health.disable();
        if was_unhealthy {
            self.events.push(StreamEvent::HealthChanged { unhealthy: false });
        }
        let reason = self
            .close_reason
            .get_or_insert(CloseReason::ServerClosed)
            .clone();
        self.transition(StreamState::Closed);
        self.events.push(StreamEvent::Closed {
            reason: reason.clone(),
        });
        Command::Close(reason)
    }

    fn enter_polling(&mut self, now: Instant) {
        self.transition(StreamState::Polling);
        if self.arming == HealthArming::OnEveryPoll {
            self.health.mark_attempt_pending(now);
        }
    }

    fn clear_health(&mut self) {
        let was_unhealthy = self.health.is_unhealthy();
        self.health.mark_healthy();
        if was_unhealthy {
            self.events.push(StreamEvent::HealthChanged { unhealthy: false });
        }
    }

    fn current_command(&self) -> Command {
        match &self.close_reason {
            Some(reason) if self.state == StreamState::Closed => Command::Close(reason.clone()),
            _ => Command::Wait,
        }
    }

    fn transition(&mut self, to: StreamState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_tx.send_replace(to);
        self.events.push(StreamEvent::StateChanged { from, to });
    }
}
