//! Race-safe request/response controller.
//!
//! Every controller is a single tokio task that owns the [`ActionState`], the
//! active [`RequestToken`], the queue slot and the render hooks. Handles talk to
//! it over a command channel, and each external call reports back over a
//! settlement channel tagged with the token it was started under. A settlement
//! whose token is no longer active is dropped without a transition or a hook.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::AbortHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    action::{Action, RenderHooks},
    config::{ConcurrencyPolicy, ControllerConfig},
    error::{ActionError, ErrorKind},
    state::{ActionPhase, ActionState, ControllerEvent, RequestToken, Settlement},
};

pub type Outcome<R> = Result<R, ActionError>;
type InspectFn<R> = Box<dyn FnOnce(Snapshot<'_, R>) + Send>;

enum Command<I, R> {
    Trigger {
        input: I,
        reply: oneshot::Sender<Result<Ticket, ActionError>>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Acknowledge {
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    Inspect(InspectFn<R>),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Read-only view of a controller's state, handed to [`ActionController::inspect`].
pub struct Snapshot<'a, R> {
    pub state: &'a ActionState<R>,
    /// Outcome of the last settled request once auto-reset has moved the
    /// controller back to idle; cleared by the next trigger.
    pub last_outcome: Option<&'a Outcome<R>>,
}

impl<R> Snapshot<'_, R> {
    pub fn phase(&self) -> ActionPhase {
        self.state.phase()
    }

    pub fn result(&self) -> Option<&R> {
        self.state
            .result()
            .or_else(|| self.last_outcome.and_then(|outcome| outcome.as_ref().ok()))
    }

    pub fn error(&self) -> Option<&ActionError> {
        self.state
            .error()
            .or_else(|| self.last_outcome.and_then(|outcome| outcome.as_ref().err()))
    }
}

/// Receipt for an accepted trigger.
#[derive(Debug)]
pub struct Ticket {
    token: Option<RequestToken>,
    settled: oneshot::Receiver<Settlement>,
}

impl Ticket {
    /// Token minted for the request; `None` while the trigger sits in the queue.
    pub fn token(&self) -> Option<RequestToken> {
        self.token
    }

    pub fn is_queued(&self) -> bool {
        self.token.is_none()
    }

    pub async fn settled(self) -> Result<Settlement, ActionError> {
        self.settled.await.map_err(|_| ActionError::Closed)
    }
}

pub struct ActionController<A: Action> {
    name: &'static str,
    commands: mpsc::UnboundedSender<Command<A::Input, A::Output>>,
    phase: watch::Receiver<ActionPhase>,
    events: broadcast::Sender<ControllerEvent>,
}

impl<A: Action> Clone for ActionController<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            commands: self.commands.clone(),
            phase: self.phase.clone(),
            events: self.events.clone(),
        }
    }
}

impl<A: Action> ActionController<A> {
    /// Starts the controller task on the current tokio runtime.
    pub fn spawn<H>(action: A, hooks: H, config: ControllerConfig) -> Self
    where
        H: RenderHooks<A::Output>,
    {
        let name = action.name();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(ActionPhase::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let worker = Worker {
            name,
            action: Arc::new(action),
            hooks,
            config,
            state: ActionState::Idle,
            last_outcome: None,
            next_token: RequestToken::first(),
            in_flight: None,
            queued: None,
            settle_tx,
            phase_tx,
            events: events.clone(),
        };
        tokio::spawn(worker.run(command_rx, settle_rx));
        debug!(action = name, "action controller started");

        Self {
            name,
            commands,
            phase,
            events,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> ActionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Submits `input`. `Busy` comes back here, never through the render hooks.
    pub async fn trigger(&self, input: A::Input) -> Result<Ticket, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger { input, reply })?;
        rx.await.map_err(|_| ActionError::Closed)?
    }

    /// Triggers and waits for this trigger's own settlement.
    pub async fn trigger_and_wait(&self, input: A::Input) -> Result<Settlement, ActionError> {
        self.trigger(input).await?.settled().await
    }

    /// Returns `false` when nothing was outstanding.
    pub async fn cancel(&self) -> Result<bool, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply })?;
        rx.await.map_err(|_| ActionError::Closed)
    }

    pub async fn acknowledge(&self) -> Result<(), ActionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Acknowledge { reply })?;
        rx.await.map_err(|_| ActionError::Closed)?
    }

    pub async fn inspect<T, F>(&self, f: F) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(Snapshot<'_, A::Output>) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Inspect(Box::new(move |snapshot: Snapshot<'_, A::Output>| {
            let _ = reply.send(f(snapshot));
        })))?;
        rx.await.map_err(|_| ActionError::Closed)
    }

    /// Stops the controller. Outstanding tickets resolve as cancelled.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command<A::Input, A::Output>) -> Result<(), ActionError> {
        self.commands.send(command).map_err(|_| ActionError::Closed)
    }
}

impl<A> ActionController<A>
where
    A: Action,
    A::Output: Clone,
{
    pub async fn last_result(&self) -> Result<Option<A::Output>, ActionError> {
        self.inspect(|snapshot| snapshot.result().cloned()).await
    }
}

struct InFlight {
    token: RequestToken,
    deadline: Option<Instant>,
    abort: AbortHandle,
    waiter: oneshot::Sender<Settlement>,
}

struct Queued<I> {
    input: I,
    waiter: oneshot::Sender<Settlement>,
}

struct Worker<A: Action, H> {
    name: &'static str,
    action: Arc<A>,
    hooks: H,
    config: ControllerConfig,
    state: ActionState<A::Output>,
    last_outcome: Option<Outcome<A::Output>>,
    next_token: RequestToken,
    in_flight: Option<InFlight>,
    queued: Option<Queued<A::Input>>,
    settle_tx: mpsc::UnboundedSender<(RequestToken, Outcome<A::Output>)>,
    phase_tx: watch::Sender<ActionPhase>,
    events: broadcast::Sender<ControllerEvent>,
}

impl<A, H> Worker<A, H>
where
    A: Action,
    H: RenderHooks<A::Output>,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<A::Input, A::Output>>,
        mut settlements: mpsc::UnboundedReceiver<(RequestToken, Outcome<A::Output>)>,
    ) {
        let mut shutdown_ack = None;
        loop {
            let deadline = self.in_flight.as_ref().and_then(|flight| flight.deadline);
            tokio::select! {
                biased;
                Some((token, outcome)) = settlements.recv() => self.settle(token, outcome),
                _ = wait_for_deadline(deadline) => self.expire(),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        shutdown_ack = Some(done);
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.abandon();
        drop(commands);
        debug!(action = self.name, "action controller stopped");
        drop(shutdown_ack);
    }

    fn handle(&mut self, command: Command<A::Input, A::Output>) {
        match command {
            Command::Trigger { input, reply } => {
                let _ = reply.send(self.trigger(input));
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            Command::Acknowledge { reply } => {
                let _ = reply.send(self.acknowledge());
            }
            Command::Inspect(f) => f(Snapshot {
                state: &self.state,
                last_outcome: self.last_outcome.as_ref(),
            }),
            Command::Shutdown { .. } => {}
        }
    }

    fn trigger(&mut self, input: A::Input) -> Result<Ticket, ActionError> {
        match self.state.phase() {
            ActionPhase::Idle => Ok(self.begin(input)),
            ActionPhase::Succeeded | ActionPhase::Failed => {
                self.reset_to_idle();
                Ok(self.begin(input))
            }
            ActionPhase::Pending => match self.config.concurrency {
                ConcurrencyPolicy::RejectWhilePending => {
                    warn!(action = self.name, "trigger rejected while a request is pending");
                    self.emit(ControllerEvent::Rejected {
                        phase: ActionPhase::Pending,
                    });
                    Err(ActionError::Busy)
                }
                ConcurrencyPolicy::QueueLatest => {
                    let (waiter, settled) = oneshot::channel();
                    if let Some(replaced) = self.queued.replace(Queued { input, waiter }) {
                        let _ = replaced.waiter.send(Settlement::Replaced);
                    }
                    debug!(action = self.name, "trigger queued behind pending request");
                    self.emit(ControllerEvent::Queued);
                    Ok(Ticket {
                        token: None,
                        settled,
                    })
                }
                ConcurrencyPolicy::CancelAndRestart => {
                    if let Some(flight) = self.in_flight.take() {
                        info!(
                            action = self.name,
                            token = %flight.token,
                            "restarting; pending request superseded"
                        );
                        self.retire(flight, Settlement::Superseded);
                    }
                    Ok(self.begin(input))
                }
            },
        }
    }

    /// Mints a token, enters `Pending` and starts the external call.
    fn begin(&mut self, input: A::Input) -> Ticket {
        let token = self.next_token;
        self.next_token = token.next();
        self.last_outcome = None;

        self.set_state(
            ActionState::Pending {
                token,
                started_at: Utc::now(),
            },
            Some(token),
        );
        self.hooks.on_pending();

        let action = Arc::clone(&self.action);
        let settle_tx = self.settle_tx.clone();
        let task = tokio::spawn(async move {
            let outcome = action.perform(input, token).await;
            let _ = settle_tx.send((token, outcome));
        });

        let (waiter, settled) = oneshot::channel();
        self.in_flight = Some(InFlight {
            token,
            deadline: self.config.timeout().map(|timeout| Instant::now() + timeout),
            abort: task.abort_handle(),
            waiter,
        });
        debug!(action = self.name, token = %token, "request started");

        Ticket {
            token: Some(token),
            settled,
        }
    }

    fn settle(&mut self, token: RequestToken, outcome: Outcome<A::Output>) {
        let flight = match self.in_flight.take() {
            Some(flight) if flight.token == token => flight,
            other => {
                self.in_flight = other;
                debug!(action = self.name, token = %token, "discarding stale settlement");
                self.emit(ControllerEvent::StaleDiscarded { token });
                return;
            }
        };

        let settlement = match outcome {
            Ok(result) => {
                info!(action = self.name, token = %token, "request succeeded");
                self.set_state(
                    ActionState::Succeeded {
                        result,
                        finished_at: Utc::now(),
                    },
                    Some(token),
                );
                if let ActionState::Succeeded { result, .. } = &self.state {
                    self.hooks.on_success(result);
                }
                Settlement::Succeeded(token)
            }
            Err(error) => self.fail(token, normalize_failure(error)),
        };

        self.finish(flight.waiter, settlement);
    }

    fn expire(&mut self) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let after = self.config.timeout().unwrap_or(Duration::ZERO);
        warn!(
            action = self.name,
            token = %flight.token,
            timeout_ms = after.as_millis() as u64,
            "request timed out"
        );
        if self.config.abort_in_flight {
            flight.abort.abort();
        }
        self.emit(ControllerEvent::Superseded {
            token: flight.token,
        });
        let settlement = self.fail(flight.token, ActionError::Timeout { after });
        self.finish(flight.waiter, settlement);
    }

    fn fail(&mut self, token: RequestToken, error: ActionError) -> Settlement {
        info!(action = self.name, token = %token, error = %error, "request failed");
        let kind = error.kind();
        self.set_state(
            ActionState::Failed {
                error,
                finished_at: Utc::now(),
            },
            Some(token),
        );
        if let ActionState::Failed { error, .. } = &self.state {
            self.hooks.on_failure(error);
        }
        Settlement::Failed(token, kind)
    }

    /// Applies auto-reset, notifies the trigger's ticket, then runs the queued trigger.
    fn finish(&mut self, waiter: oneshot::Sender<Settlement>, settlement: Settlement) {
        if self.config.auto_reset {
            self.reset_to_idle();
        }
        let _ = waiter.send(settlement);

        if let Some(queued) = self.queued.take() {
            if self.state.phase().is_terminal() {
                self.reset_to_idle();
            }
            let ticket = self.begin(queued.input);
            forward_settlement(ticket, queued.waiter);
        }
    }

    fn cancel(&mut self) -> bool {
        if let Some(queued) = self.queued.take() {
            let _ = queued.waiter.send(Settlement::Cancelled(None));
        }
        let Some(flight) = self.in_flight.take() else {
            return false;
        };

        info!(action = self.name, token = %flight.token, "pending request cancelled");
        self.retire(flight, |token| Settlement::Cancelled(Some(token)));
        self.set_state(ActionState::Idle, None);
        true
    }

    fn acknowledge(&mut self) -> Result<(), ActionError> {
        let phase = self.state.phase();
        if !phase.is_terminal() {
            return Err(ActionError::InvalidTransition {
                operation: "acknowledge",
                phase,
            });
        }
        self.reset_to_idle();
        Ok(())
    }

    /// Stales a request that will never settle through this controller.
    fn retire(&mut self, flight: InFlight, settlement: impl FnOnce(RequestToken) -> Settlement) {
        if self.config.abort_in_flight {
            flight.abort.abort();
        }
        self.emit(ControllerEvent::Superseded {
            token: flight.token,
        });
        let _ = flight.waiter.send(settlement(flight.token));
    }

    fn abandon(&mut self) {
        if let Some(queued) = self.queued.take() {
            let _ = queued.waiter.send(Settlement::Cancelled(None));
        }
        if let Some(flight) = self.in_flight.take() {
            self.retire(flight, |token| Settlement::Cancelled(Some(token)));
        }
    }

    fn reset_to_idle(&mut self) {
        let previous = std::mem::replace(&mut self.state, ActionState::Idle);
        let from = previous.phase();
        match previous {
            ActionState::Succeeded { result, .. } => self.last_outcome = Some(Ok(result)),
            ActionState::Failed { error, .. } => self.last_outcome = Some(Err(error)),
            _ => {}
        }
        self.publish(from, ActionPhase::Idle, None);
    }

    fn set_state(&mut self, next: ActionState<A::Output>, token: Option<RequestToken>) {
        let from = self.state.phase();
        let to = next.phase();
        self.state = next;
        self.publish(from, to, token);
    }

    fn publish(&mut self, from: ActionPhase, to: ActionPhase, token: Option<RequestToken>) {
        self.phase_tx.send_replace(to);
        if from != to {
            debug!(action = self.name, %from, %to, "phase changed");
            self.emit(ControllerEvent::PhaseChanged { from, to, token });
        }
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

/// A request that reports a caller-side kind is still an operation outcome.
fn normalize_failure(error: ActionError) -> ActionError {
    if error.is_outcome() {
        return error;
    }
    match error.kind() {
        ErrorKind::Closed => ActionError::transport(error.to_string()),
        _ => ActionError::application(error.to_string()),
    }
}

/// Bridges the ticket minted when a queued trigger starts to the waiter handed
/// out when it was queued.
fn forward_settlement(ticket: Ticket, waiter: oneshot::Sender<Settlement>) {
    tokio::spawn(async move {
        if let Ok(settlement) = ticket.settled.await {
            let _ = waiter.send(settlement);
        }
    });
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
