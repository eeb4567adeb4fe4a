use super::*;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::{sync::broadcast::error::TryRecvError, time::sleep};

#[derive(Debug, Clone, PartialEq)]
struct Count {
    count: u32,
}

struct Step {
    label: &'static str,
    delay: Duration,
    outcome: Result<Count, ActionError>,
}

impl Step {
    fn ok(label: &'static str, delay_ms: u64, count: u32) -> Self {
        Self {
            label,
            delay: Duration::from_millis(delay_ms),
            outcome: Ok(Count { count }),
        }
    }

    fn err(label: &'static str, delay_ms: u64, error: ActionError) -> Self {
        Self {
            label,
            delay: Duration::from_millis(delay_ms),
            outcome: Err(error),
        }
    }
}

#[derive(Clone, Default)]
struct ScriptedAction {
    calls: Arc<StdMutex<Vec<(&'static str, RequestToken)>>>,
}

impl ScriptedAction {
    fn labels(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(label, _)| *label)
            .collect()
    }
}

#[async_trait]
impl Action for ScriptedAction {
    type Input = Step;
    type Output = Count;

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn perform(&self, step: Step, token: RequestToken) -> Result<Count, ActionError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((step.label, token));
        sleep(step.delay).await;
        step.outcome
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HookCall {
    Pending,
    Success(Count),
    Failure(ErrorKind),
}

#[derive(Clone, Default)]
struct RecordingHooks {
    calls: Arc<StdMutex<Vec<HookCall>>>,
}

impl RecordingHooks {
    fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().expect("hooks lock").clone()
    }
}

impl RenderHooks<Count> for RecordingHooks {
    fn on_pending(&mut self) {
        self.calls.lock().expect("hooks lock").push(HookCall::Pending);
    }

    fn on_success(&mut self, result: &Count) {
        self.calls
            .lock()
            .expect("hooks lock")
            .push(HookCall::Success(result.clone()));
    }

    fn on_failure(&mut self, error: &ActionError) {
        self.calls
            .lock()
            .expect("hooks lock")
            .push(HookCall::Failure(error.kind()));
    }
}

struct Harness {
    controller: ActionController<ScriptedAction>,
    action: ScriptedAction,
    hooks: RecordingHooks,
    events: broadcast::Receiver<ControllerEvent>,
}

fn harness(config: ControllerConfig) -> Harness {
    let action = ScriptedAction::default();
    let hooks = RecordingHooks::default();
    let controller = ActionController::spawn(action.clone(), hooks.clone(), config);
    let events = controller.subscribe_events();
    Harness {
        controller,
        action,
        hooks,
        events,
    }
}

fn drain(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(skipped)) => panic!("event receiver lagged by {skipped}"),
        }
    }
    drained
}

fn phase_changes(events: &[ControllerEvent]) -> Vec<(ActionPhase, ActionPhase)> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::PhaseChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

use ActionPhase::{Failed, Idle, Pending, Succeeded};

#[tokio::test(start_paused = true)]
async fn success_walks_idle_pending_succeeded_idle() {
    let mut h = harness(ControllerConfig::default());
    let started = Instant::now();

    let ticket = h
        .controller
        .trigger(Step::ok("x", 10, 5))
        .await
        .expect("trigger");
    assert_eq!(h.controller.phase(), Pending);
    let token = ticket.token().expect("started immediately");

    let settlement = ticket.settled().await.expect("settled");
    assert_eq!(settlement, Settlement::Succeeded(token));
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert_eq!(h.controller.phase(), Idle);

    let events = drain(&mut h.events);
    assert_eq!(
        phase_changes(&events),
        vec![(Idle, Pending), (Pending, Succeeded), (Succeeded, Idle)]
    );
    assert_eq!(
        h.hooks.calls(),
        vec![HookCall::Pending, HookCall::Success(Count { count: 5 })]
    );
    assert_eq!(
        h.controller.last_result().await.expect("inspect"),
        Some(Count { count: 5 })
    );
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_rendered_once_and_retained() {
    let mut h = harness(ControllerConfig::default().with_auto_reset(false));

    let settlement = h
        .controller
        .trigger_and_wait(Step::err(
            "y",
            5,
            ActionError::transport("connection refused"),
        ))
        .await
        .expect("settled");

    assert!(matches!(
        settlement,
        Settlement::Failed(_, ErrorKind::Transport)
    ));
    assert_eq!(h.controller.phase(), Failed);
    assert_eq!(
        h.hooks.calls(),
        vec![HookCall::Pending, HookCall::Failure(ErrorKind::Transport)]
    );
    assert_eq!(
        phase_changes(&drain(&mut h.events)),
        vec![(Idle, Pending), (Pending, Failed)]
    );

    let retained = h
        .controller
        .inspect(|snapshot| snapshot.error().map(ActionError::kind))
        .await
        .expect("inspect");
    assert_eq!(retained, Some(ErrorKind::Transport));
}

#[tokio::test(start_paused = true)]
async fn reject_while_pending_reports_busy_without_second_call() {
    let mut h = harness(ControllerConfig::default());

    let first = h
        .controller
        .trigger(Step::ok("a", 100, 1))
        .await
        .expect("first trigger");
    let second = h.controller.trigger(Step::ok("b", 1, 2)).await;
    assert_eq!(second.unwrap_err(), ActionError::Busy);

    assert!(first.settled().await.expect("settled").is_success());
    assert_eq!(h.action.labels(), vec!["a"]);
    assert_eq!(
        h.hooks.calls(),
        vec![HookCall::Pending, HookCall::Success(Count { count: 1 })]
    );
    assert!(drain(&mut h.events).contains(&ControllerEvent::Rejected { phase: Pending }));
}

#[tokio::test(start_paused = true)]
async fn cancel_and_restart_discards_the_superseded_settlement() {
    let mut h = harness(
        ControllerConfig::default()
            .with_concurrency(ConcurrencyPolicy::CancelAndRestart)
            .with_abort_in_flight(false),
    );

    let first = h
        .controller
        .trigger(Step::err("a", 100, ActionError::application("slow failure")))
        .await
        .expect("trigger a");
    let first_token = first.token().expect("token a");

    sleep(Duration::from_millis(10)).await;
    let second = h
        .controller
        .trigger(Step::ok("b", 20, 2))
        .await
        .expect("trigger b");
    let second_token = second.token().expect("token b");
    assert_ne!(first_token, second_token);

    assert_eq!(
        first.settled().await.expect("a settled"),
        Settlement::Superseded(first_token)
    );
    assert_eq!(
        second.settled().await.expect("b settled"),
        Settlement::Succeeded(second_token)
    );

    // Let the superseded request finish in the background.
    sleep(Duration::from_millis(200)).await;

    assert_eq!(h.action.labels(), vec!["a", "b"]);
    assert_eq!(
        h.hooks.calls(),
        vec![
            HookCall::Pending,
            HookCall::Pending,
            HookCall::Success(Count { count: 2 })
        ]
    );
    let events = drain(&mut h.events);
    assert_eq!(
        phase_changes(&events),
        vec![(Idle, Pending), (Pending, Succeeded), (Succeeded, Idle)]
    );
    assert!(events.contains(&ControllerEvent::Superseded { token: first_token }));
    assert!(events.contains(&ControllerEvent::StaleDiscarded { token: first_token }));
    assert_eq!(h.controller.phase(), Idle);
}

#[tokio::test(start_paused = true)]
async fn restart_aborts_the_superseded_request_when_configured() {
    let mut h = harness(
        ControllerConfig::default().with_concurrency(ConcurrencyPolicy::CancelAndRestart),
    );

    let first = h
        .controller
        .trigger(Step::ok("a", 100, 1))
        .await
        .expect("trigger a");
    let second = h
        .controller
        .trigger(Step::ok("b", 10, 2))
        .await
        .expect("trigger b");

    assert!(second.settled().await.expect("b settled").is_success());
    assert!(matches!(
        first.settled().await.expect("a settled"),
        Settlement::Superseded(_)
    ));
    sleep(Duration::from_millis(200)).await;

    let events = drain(&mut h.events);
    assert!(!events
        .iter()
        .any(|event| matches!(event, ControllerEvent::StaleDiscarded { .. })));
    assert_eq!(
        h.hooks.calls(),
        vec![
            HookCall::Pending,
            HookCall::Pending,
            HookCall::Success(Count { count: 2 })
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_the_request_and_drops_the_late_response() {
    let mut h = harness(
        ControllerConfig::default()
            .with_timeout(Duration::from_millis(50))
            .with_auto_reset(false)
            .with_abort_in_flight(false),
    );
    let started = Instant::now();

    let ticket = h
        .controller
        .trigger(Step::ok("slow", 100, 9))
        .await
        .expect("trigger");
    let token = ticket.token().expect("token");

    assert_eq!(
        ticket.settled().await.expect("settled"),
        Settlement::Failed(token, ErrorKind::Timeout)
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(h.controller.phase(), Failed);

    sleep(Duration::from_millis(100)).await;

    assert_eq!(h.controller.phase(), Failed);
    assert_eq!(
        h.hooks.calls(),
        vec![HookCall::Pending, HookCall::Failure(ErrorKind::Timeout)]
    );
    let events = drain(&mut h.events);
    assert_eq!(phase_changes(&events), vec![(Idle, Pending), (Pending, Failed)]);
    assert!(events.contains(&ControllerEvent::StaleDiscarded { token }));

    let timeout = h
        .controller
        .inspect(|snapshot| snapshot.error().cloned())
        .await
        .expect("inspect");
    assert_eq!(
        timeout,
        Some(ActionError::Timeout {
            after: Duration::from_millis(50)
        })
    );
}

#[tokio::test(start_paused = true)]
async fn acknowledge_is_only_valid_from_terminal_states() {
    let h = harness(ControllerConfig::default().with_auto_reset(false));

    let idle_ack = h.controller.acknowledge().await.unwrap_err();
    assert_eq!(idle_ack.kind(), ErrorKind::InvalidTransition);

    let ticket = h
        .controller
        .trigger(Step::ok("a", 10, 1))
        .await
        .expect("trigger");
    assert_eq!(
        h.controller.acknowledge().await.unwrap_err(),
        ActionError::InvalidTransition {
            operation: "acknowledge",
            phase: Pending
        }
    );

    ticket.settled().await.expect("settled");
    assert_eq!(h.controller.phase(), Succeeded);

    h.controller.acknowledge().await.expect("first acknowledge");
    assert_eq!(h.controller.phase(), Idle);
    assert_eq!(
        h.controller.acknowledge().await.unwrap_err(),
        ActionError::InvalidTransition {
            operation: "acknowledge",
            phase: Idle
        }
    );
    assert_eq!(
        h.controller.last_result().await.expect("inspect"),
        Some(Count { count: 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_from_terminal_state_acknowledges_implicitly() {
    let mut h = harness(ControllerConfig::default().with_auto_reset(false));

    h.controller
        .trigger_and_wait(Step::ok("a", 5, 1))
        .await
        .expect("a settled");
    assert_eq!(h.controller.phase(), Succeeded);

    let settlement = h
        .controller
        .trigger_and_wait(Step::err("b", 5, ActionError::application("bad file")))
        .await
        .expect("b settled");
    assert!(matches!(
        settlement,
        Settlement::Failed(_, ErrorKind::Application)
    ));

    assert_eq!(
        phase_changes(&drain(&mut h.events)),
        vec![
            (Idle, Pending),
            (Pending, Succeeded),
            (Succeeded, Idle),
            (Idle, Pending),
            (Pending, Failed)
        ]
    );
    assert_eq!(
        h.controller.last_result().await.expect("inspect"),
        None,
        "the failed trigger overwrote the retained result"
    );
}

#[tokio::test(start_paused = true)]
async fn queue_latest_runs_only_the_newest_queued_trigger() {
    let mut h = harness(
        ControllerConfig::default().with_concurrency(ConcurrencyPolicy::QueueLatest),
    );

    let a = h
        .controller
        .trigger(Step::ok("a", 50, 1))
        .await
        .expect("a");
    let b = h
        .controller
        .trigger(Step::ok("b", 10, 2))
        .await
        .expect("b");
    let c = h
        .controller
        .trigger(Step::ok("c", 10, 3))
        .await
        .expect("c");
    assert!(b.is_queued());
    assert!(c.is_queued());

    assert_eq!(b.settled().await.expect("b"), Settlement::Replaced);
    assert!(a.settled().await.expect("a").is_success());
    let c_settlement = c.settled().await.expect("c");
    assert!(c_settlement.is_success());
    assert_eq!(c_settlement.token().map(RequestToken::value), Some(2));

    assert_eq!(h.action.labels(), vec!["a", "c"]);
    assert_eq!(
        h.hooks.calls(),
        vec![
            HookCall::Pending,
            HookCall::Success(Count { count: 1 }),
            HookCall::Pending,
            HookCall::Success(Count { count: 3 })
        ]
    );
    let events = drain(&mut h.events);
    assert_eq!(
        phase_changes(&events),
        vec![
            (Idle, Pending),
            (Pending, Succeeded),
            (Succeeded, Idle),
            (Idle, Pending),
            (Pending, Succeeded),
            (Succeeded, Idle)
        ]
    );
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == ControllerEvent::Queued)
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_returns_to_idle_without_rendering() {
    let mut h = harness(
        ControllerConfig::default()
            .with_auto_reset(false)
            .with_abort_in_flight(false),
    );

    assert!(!h.controller.cancel().await.expect("idle cancel"));

    let ticket = h
        .controller
        .trigger(Step::ok("a", 100, 1))
        .await
        .expect("trigger");
    let token = ticket.token().expect("token");

    assert!(h.controller.cancel().await.expect("cancel"));
    assert_eq!(h.controller.phase(), Idle);
    assert_eq!(
        ticket.settled().await.expect("settled"),
        Settlement::Cancelled(Some(token))
    );

    sleep(Duration::from_millis(150)).await;

    assert_eq!(h.controller.phase(), Idle);
    assert_eq!(h.hooks.calls(), vec![HookCall::Pending]);
    let events = drain(&mut h.events);
    assert_eq!(phase_changes(&events), vec![(Idle, Pending), (Pending, Idle)]);
    assert!(events.contains(&ControllerEvent::StaleDiscarded { token }));
    assert!(!h.controller.cancel().await.expect("second cancel"));
}

#[tokio::test(start_paused = true)]
async fn cancel_drops_the_queued_trigger_along_with_the_running_one() {
    let mut h = harness(
        ControllerConfig::default().with_concurrency(ConcurrencyPolicy::QueueLatest),
    );

    let running = h
        .controller
        .trigger(Step::ok("a", 100, 1))
        .await
        .expect("trigger a");
    let running_token = running.token().expect("token a");
    sleep(Duration::from_millis(10)).await;
    let queued = h
        .controller
        .trigger(Step::ok("b", 10, 2))
        .await
        .expect("trigger b");
    assert!(queued.is_queued());

    assert!(h.controller.cancel().await.expect("cancel"));
    assert_eq!(
        queued.settled().await.expect("b settled"),
        Settlement::Cancelled(None)
    );
    assert_eq!(
        running.settled().await.expect("a settled"),
        Settlement::Cancelled(Some(running_token))
    );

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.action.labels(), vec!["a"]);
    assert_eq!(h.hooks.calls(), vec![HookCall::Pending]);
    assert_eq!(h.controller.phase(), Idle);
    assert_eq!(
        phase_changes(&drain(&mut h.events)),
        vec![(Idle, Pending), (Pending, Idle)]
    );
    assert!(!h.controller.cancel().await.expect("second cancel"));
}

#[tokio::test(start_paused = true)]
async fn timeout_under_queue_latest_starts_the_queued_trigger() {
    let mut h = harness(
        ControllerConfig::default()
            .with_concurrency(ConcurrencyPolicy::QueueLatest)
            .with_timeout(Duration::from_millis(50)),
    );

    let slow = h
        .controller
        .trigger(Step::ok("slow", 500, 1))
        .await
        .expect("trigger slow");
    let slow_token = slow.token().expect("token slow");
    let queued = h
        .controller
        .trigger(Step::ok("next", 10, 2))
        .await
        .expect("trigger next");
    assert_eq!(queued.token(), None);

    assert_eq!(
        slow.settled().await.expect("slow settled"),
        Settlement::Failed(slow_token, ErrorKind::Timeout)
    );
    assert_eq!(h.controller.phase(), Pending);
    let started = h
        .controller
        .inspect(|snapshot| snapshot.state.active_token())
        .await
        .expect("inspect")
        .expect("queued trigger started");
    assert_ne!(started, slow_token);

    assert_eq!(
        queued.settled().await.expect("next settled"),
        Settlement::Succeeded(started)
    );
    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.action.labels(), vec!["slow", "next"]);
    assert_eq!(
        h.hooks.calls(),
        vec![
            HookCall::Pending,
            HookCall::Failure(ErrorKind::Timeout),
            HookCall::Pending,
            HookCall::Success(Count { count: 2 })
        ]
    );
    let events = drain(&mut h.events);
    assert_eq!(
        phase_changes(&events),
        vec![
            (Idle, Pending),
            (Pending, Failed),
            (Failed, Idle),
            (Idle, Pending),
            (Pending, Succeeded),
            (Succeeded, Idle)
        ]
    );
    assert!(!events
        .iter()
        .any(|event| matches!(event, ControllerEvent::StaleDiscarded { .. })));
}

#[tokio::test(start_paused = true)]
async fn caller_side_kinds_from_perform_are_reported_as_application_failures() {
    let h = harness(ControllerConfig::default());

    let settlement = h
        .controller
        .trigger_and_wait(Step::err("odd", 1, ActionError::Busy))
        .await
        .expect("settled");

    assert!(matches!(
        settlement,
        Settlement::Failed(_, ErrorKind::Application)
    ));
    assert_eq!(
        h.hooks.calls(),
        vec![HookCall::Pending, HookCall::Failure(ErrorKind::Application)]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_outstanding_work_and_closes_the_handle() {
    let h = harness(ControllerConfig::default());

    let ticket = h
        .controller
        .trigger(Step::ok("a", 100, 1))
        .await
        .expect("trigger");
    h.controller.shutdown().await;

    assert!(matches!(
        ticket.settled().await.expect("settled"),
        Settlement::Cancelled(Some(_))
    ));
    assert!(h.controller.is_closed());
    assert_eq!(
        h.controller
            .trigger(Step::ok("b", 1, 2))
            .await
            .unwrap_err(),
        ActionError::Closed
    );
    assert_eq!(h.hooks.calls(), vec![HookCall::Pending]);
}

#[tokio::test(start_paused = true)]
async fn mixed_trigger_sequences_never_skip_pending() {
    let allowed = [
        (Idle, Pending),
        (Pending, Succeeded),
        (Pending, Failed),
        (Succeeded, Idle),
        (Failed, Idle),
    ];

    for policy in [
        ConcurrencyPolicy::RejectWhilePending,
        ConcurrencyPolicy::QueueLatest,
        ConcurrencyPolicy::CancelAndRestart,
    ] {
        for auto_reset in [true, false] {
            let mut config = ControllerConfig::default()
                .with_concurrency(policy)
                .with_auto_reset(auto_reset)
                .with_timeout(Duration::from_millis(40))
                .with_abort_in_flight(false);
            config.event_capacity = 1024;
            let mut h = harness(config);

            let mut seed: u64 = 0x9e37_79b9;
            let mut tickets = Vec::new();
            for _ in 0..24 {
                seed = seed
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let delay = (seed >> 33) % 60;
                let step = if (seed >> 20) % 3 == 0 {
                    Step::err("e", delay, ActionError::transport("reset by peer"))
                } else {
                    Step::ok("o", delay, (seed % 100) as u32)
                };
                if let Ok(ticket) = h.controller.trigger(step).await {
                    tickets.push(ticket);
                }
                sleep(Duration::from_millis((seed >> 40) % 30)).await;
            }
            for ticket in tickets {
                ticket.settled().await.expect("settled");
            }
            sleep(Duration::from_millis(100)).await;

            let changes = phase_changes(&drain(&mut h.events));
            assert!(!changes.is_empty());
            for change in &changes {
                assert!(
                    allowed.contains(change),
                    "{policy}: unexpected transition {change:?}"
                );
            }
            let terminal_transitions = changes
                .iter()
                .filter(|(from, to)| *from == Pending && to.is_terminal())
                .count();
            let rendered = h
                .hooks
                .calls()
                .iter()
                .filter(|call| !matches!(call, HookCall::Pending))
                .count();
            assert_eq!(terminal_transitions, rendered, "{policy}: one render per settlement");
        }
    }
}
