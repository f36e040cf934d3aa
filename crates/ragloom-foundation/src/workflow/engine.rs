//! 事件驱动工作流调度器
//! Event-driven workflow dispatcher
//!
//! A [`Workflow`] maps event tags to handlers. One run owns a FIFO queue
//! seeded with the start event; every dequeued event is sealed with a
//! sequence number, published on the run's stream and handed to each handler
//! registered for its tag. Handlers run concurrently, bounded by the
//! workflow's worker count, and their output is queued in completion order.
//!
//! ```rust,ignore
//! let mut wf = Workflow::new("echo");
//! wf.handle(&[START_EVENT], handler_fn(|_ctx, event| async move {
//!     let input = StartEvent::factory().extract(&event).map(|s| s.input).unwrap_or_default();
//!     Ok(vec![StopEvent::new(input).into_event()])
//! }), StepOptions::named("echo"));
//! let stop = wf.run(StartEvent::new("hi")).await?;
//! ```

use super::context::Context;
use super::handler::{BoxedHandler, StepOptions};
use super::middleware::panic_message;
use crate::callbacks::CallbackManager;
use futures::FutureExt;
use ragloom_kernel::callbacks::{CBEventType, EventPayload, EventPayloadKey};
use ragloom_kernel::error::{KernelError, KernelResult};
use ragloom_kernel::settings::WorkflowSettings;
use ragloom_kernel::workflow::{
    ERROR_EVENT, ErrorEvent, Event, HUMAN_RESPONSE_EVENT, INPUT_REQUIRED_EVENT, RetryPolicy,
    START_EVENT, STOP_EVENT, StartEvent, StopEvent,
};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Events of one run in dispatch order, ending with the stop event (or an
/// error event when the run fails).
pub type EventStream = UnboundedReceiverStream<Event>;

const DISPATCHER_STEP: &str = "dispatcher";

struct Registration {
    types: Vec<String>,
    handler: BoxedHandler,
    name: String,
    options: StepOptions,
}

impl Registration {
    fn accepts(&self, tag: &str) -> bool {
        self.types.iter().any(|t| t == tag)
    }
}

fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// 工作流定义
/// Workflow definition
#[derive(Clone)]
pub struct Workflow {
    name: String,
    registrations: Vec<Arc<Registration>>,
    num_workers: usize,
    timeout: Option<Duration>,
    default_retry: RetryPolicy,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.registrations.iter().map(|r| r.name.as_str()).collect();
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &steps)
            .field("num_workers", &self.num_workers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registrations: Vec::new(),
            num_workers: default_num_workers(),
            timeout: None,
            default_retry: RetryPolicy::none(),
            callback_manager: CallbackManager::new(),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &WorkflowSettings) -> Self {
        let mut workflow = Self::new(name);
        if let Some(n) = settings.num_workers {
            workflow = workflow.with_num_workers(n);
        }
        if let Some(ms) = settings.timeout_ms {
            workflow = workflow.with_timeout(Duration::from_millis(ms));
        }
        if let Some(retry) = &settings.retry {
            workflow = workflow.with_default_retry(RetryPolicy::from_settings(retry));
        }
        workflow
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Wall-clock deadline per run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry policy for steps registered without one.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn with_callback_manager(mut self, manager: CallbackManager) -> Self {
        self.callback_manager = manager;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Register `handler` for every tag in `types`. Several handlers may
    /// share a tag; each receives every matching event.
    pub fn handle(&mut self, types: &[&str], handler: BoxedHandler, options: StepOptions) -> &mut Self {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("on_{}", types.join("_")));
        self.registrations.push(Arc::new(Registration {
            types: types.iter().map(|t| t.to_string()).collect(),
            handler,
            name,
            options,
        }));
        self
    }

    /// Check that the graph can start.
    pub fn validate(&self) -> KernelResult<()> {
        if let Some(empty) = self.registrations.iter().find(|r| r.types.is_empty()) {
            return Err(KernelError::ConfigInvalid(format!(
                "step '{}' is registered for no event types",
                empty.name
            )));
        }
        if !self.registrations.iter().any(|r| r.accepts(START_EVENT)) {
            return Err(KernelError::ConfigInvalid(format!(
                "workflow '{}' has no handler for '{START_EVENT}'",
                self.name
            )));
        }
        Ok(())
    }

    /// Start a run in the background.
    pub fn spawn(&self, start: StartEvent) -> KernelResult<RunHandle> {
        self.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let manager = self.callback_manager.for_run();
        let context = Context::new(run_id.clone(), cancel.clone(), manager.clone());
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            registrations: self.registrations.clone(),
            context: context.clone(),
            semaphore: Arc::new(Semaphore::new(self.num_workers)),
            default_retry: self.default_retry.clone(),
            timeout: self.timeout,
            stream: stream_tx,
            injector: inject_rx,
        };

        let span = info_span!("workflow.run", workflow = %self.name, run_id = %run_id);
        let trace_id = run_id.clone();
        let task = tokio::spawn(
            async move {
                manager
                    .with_trace(&trace_id, || dispatcher.run(start.into_event()))
                    .await
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            context,
            injector: inject_tx,
            cancel,
            stream: Some(UnboundedReceiverStream::new(stream_rx)),
            task,
        })
    }

    /// Run to completion and return the stop event.
    ///
    /// On failure the context of the run is gone; use [`Workflow::spawn`] to
    /// keep it for inspecting partial state.
    pub async fn run(&self, start: StartEvent) -> KernelResult<StopEvent> {
        self.spawn(start)?.result().await
    }

    /// Run in the background and stream the dispatched events.
    pub fn run_stream(&self, start: StartEvent) -> KernelResult<EventStream> {
        let mut handle = self.spawn(start)?;
        handle
            .take_stream()
            .ok_or_else(|| KernelError::handler_failed(DISPATCHER_STEP, "event stream already taken"))
    }
}

/// Handle to a running workflow.
pub struct RunHandle {
    run_id: String,
    context: Context,
    injector: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
    stream: Option<EventStream>,
    task: JoinHandle<KernelResult<StopEvent>>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run's context; it stays readable after the run ends.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Queue an event from outside, typically a human response.
    pub fn send_event(&self, event: Event) -> KernelResult<()> {
        self.injector
            .send(event)
            .map_err(|_| KernelError::handler_failed(DISPATCHER_STEP, "run has already finished"))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The event stream. Available once.
    pub fn take_stream(&mut self) -> Option<EventStream> {
        self.stream.take()
    }

    /// Wait for the run to finish.
    ///
    /// Consuming the handle closes the injection channel, so a run that
    /// later suspends for input fails instead of waiting forever.
    pub async fn result(self) -> KernelResult<StopEvent> {
        let RunHandle { task, .. } = self;
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(KernelError::Panic(panic_message(err.into_panic().as_ref()))),
            Err(_) => Err(KernelError::Cancelled),
        }
    }
}

struct Dispatcher {
    registrations: Vec<Arc<Registration>>,
    context: Context,
    semaphore: Arc<Semaphore>,
    default_retry: RetryPolicy,
    timeout: Option<Duration>,
    stream: mpsc::UnboundedSender<Event>,
    injector: mpsc::UnboundedReceiver<Event>,
}

/// Output of one handler invocation: the parent's seq and the events to queue.
type Completion = (u64, Vec<Event>);

impl Dispatcher {
    async fn run(mut self, start: Event) -> KernelResult<StopEvent> {
        let cancel = self.context.cancellation_token().clone();
        let timeout = self.timeout;
        let timer = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        let mut queue: VecDeque<(Event, Option<u64>)> = VecDeque::from([(start, None)]);
        let mut in_flight: JoinSet<Completion> = JoinSet::new();
        let mut next_seq: u64 = 0;
        let mut suspended = false;
        let mut injector_open = true;
        let mut start_event: Option<Event> = None;
        let mut last_was_error = false;
        info!("workflow run started");

        let outcome = 'run: loop {
            while let Some((event, parent)) = queue.pop_front() {
                if cancel.is_cancelled() {
                    break 'run Err(KernelError::Cancelled);
                }
                let seq = next_seq;
                next_seq += 1;
                let event = event.sealed(seq, parent);
                if start_event.is_none() {
                    start_event = Some(event.clone());
                }
                // A dropped receiver only means nobody is listening.
                let _ = self.stream.send(event.clone());
                last_was_error = event.is(ERROR_EVENT);

                if event.is(STOP_EVENT) {
                    let stop = event.payload::<StopEvent>().cloned().ok_or_else(|| {
                        KernelError::handler_failed(DISPATCHER_STEP, "stop event without a StopEvent payload")
                    });
                    break 'run stop;
                }
                if event.is(INPUT_REQUIRED_EVENT) {
                    suspended = true;
                } else if event.is(HUMAN_RESPONSE_EVENT) {
                    suspended = false;
                }

                let matching: Vec<Arc<Registration>> = self
                    .registrations
                    .iter()
                    .filter(|r| r.accepts(event.type_tag()))
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    if let Some(error) = event.payload::<ErrorEvent>() {
                        warn!(step = %error.step, error = %error.cause, "unhandled error event");
                        break 'run Err(error.cause.clone());
                    }
                    if !event.is(INPUT_REQUIRED_EVENT) {
                        debug!(event_type = event.type_tag(), seq, "no handler for event; dropped");
                    }
                    continue;
                }
                for registration in matching {
                    in_flight.spawn(invoke(
                        registration,
                        self.context.clone(),
                        event.clone(),
                        self.semaphore.clone(),
                        self.default_retry.clone(),
                    ));
                }
            }

            if in_flight.is_empty() {
                if !suspended {
                    break 'run Err(KernelError::handler_failed(
                        DISPATCHER_STEP,
                        "no events left to dispatch and no stop event was produced",
                    ));
                }
                if !injector_open {
                    break 'run Err(KernelError::handler_failed(
                        DISPATCHER_STEP,
                        "run is waiting for input but the injection channel is closed",
                    ));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break 'run Err(KernelError::Cancelled),
                _ = &mut timer => {
                    cancel.cancel();
                    let ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                    break 'run Err(KernelError::timeout(ms));
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                    Ok((parent, events)) => {
                        queue.extend(events.into_iter().map(|e| (e, Some(parent))));
                    }
                    Err(err) => {
                        let message = if err.is_panic() {
                            panic_message(err.into_panic().as_ref())
                        } else {
                            err.to_string()
                        };
                        break 'run Err(KernelError::Panic(message));
                    }
                },
                injected = self.injector.recv(), if injector_open => match injected {
                    Some(event) => queue.push_back((event, None)),
                    None => injector_open = false,
                },
            }
        };

        // Steps still running finish on their own; anything they emit is discarded.
        in_flight.detach_all();
        match &outcome {
            Ok(stop) => info!(reason = %stop.reason, events = next_seq, "workflow run finished"),
            Err(err) => {
                cancel.cancel();
                warn!(error = %err, events = next_seq, "workflow run failed");
                if !last_was_error {
                    self.publish_failure(start_event, next_seq, err);
                }
            }
        }
        outcome
    }

    /// Close a failed stream with an error event unless one was just published.
    fn publish_failure(&self, start: Option<Event>, seq: u64, err: &KernelError) {
        let Some(start) = start else {
            return;
        };
        let event = ErrorEvent::new(start, DISPATCHER_STEP, err.clone())
            .into_event()
            .sealed(seq, None);
        let _ = self.stream.send(event);
    }
}

/// One handler invocation with retries, inside its callback event and span.
async fn invoke(
    registration: Arc<Registration>,
    ctx: Context,
    event: Event,
    semaphore: Arc<Semaphore>,
    default_retry: RetryPolicy,
) -> Completion {
    let parent = event.seq().unwrap_or_default();
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return (parent, Vec::new());
    };

    let step = registration.name.clone();
    let policy = registration.options.retry.clone().unwrap_or(default_retry);
    // Each invocation gets its own parent stack so concurrent steps never
    // adopt each other's events.
    let manager = ctx.callback_manager();
    let step_manager = manager.child_scope(manager.root_event_id());
    let payload = EventPayload::new()
        .with(EventPayloadKey::Step, step.as_str())
        .with(EventPayloadKey::EventTag, event.type_tag())
        .with(EventPayloadKey::RunId, ctx.run_id());
    let span = info_span!(
        "workflow.step",
        run_id = %ctx.run_id(),
        step = %step,
        event_type = %event.type_tag(),
        attempt = tracing::field::Empty,
    );

    let result = step_manager
        .with_event(CBEventType::WorkflowStep, payload, |scope| {
            let handler = registration.handler.clone();
            let ctx = ctx.with_callback_manager(scope.manager().clone());
            let event = event.clone();
            async move {
                let mut attempt: u32 = 0;
                loop {
                    attempt += 1;
                    tracing::Span::current().record("attempt", attempt);
                    let outcome = AssertUnwindSafe(handler.handle(ctx.clone(), event.clone()))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(KernelError::Panic(panic_message(payload.as_ref()))));
                    match outcome {
                        Ok(events) => {
                            scope.set_end_payload_custom("attempts", attempt);
                            scope.set_end_payload_custom("emitted", events.len());
                            return Ok(events);
                        }
                        Err(err) if !ctx.is_cancelled() && policy.should_retry(attempt, &err) => {
                            let delay = policy.delay_for(attempt - 1);
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "step failed; retrying"
                            );
                            tokio::select! {
                                _ = ctx.cancellation_token().cancelled() => return Err(KernelError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        Err(err) => {
                            scope.set_end_payload_custom("attempts", attempt);
                            return Err(err);
                        }
                    }
                }
            }
        })
        .instrument(span)
        .await;

    match result {
        Ok(events) => (parent, events),
        Err(err) if registration.options.suppress_errors => {
            warn!(step = %step, error = %err, "step failed; error suppressed");
            (parent, Vec::new())
        }
        Err(err) => (parent, vec![ErrorEvent::new(event, step, err).into_event()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{DebugCallbackHandler, ROOT_EVENT_ID};
    use crate::workflow::handler::handler_fn;
    use futures::StreamExt;
    use ragloom_kernel::error::ErrorKind;
    use ragloom_kernel::workflow::{EventFactory, HumanResponseEvent, InputRequiredEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn branch() -> EventFactory<String> {
        EventFactory::new("branch")
    }

    fn input_of(event: &Event) -> String {
        StartEvent::factory()
            .extract(event)
            .and_then(|s| s.input.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn echo() -> Workflow {
        let mut wf = Workflow::new("echo");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, event: Event| async move {
                Ok(vec![StopEvent::new(input_of(&event).to_uppercase()).into_event()])
            }),
            StepOptions::named("shout"),
        );
        wf
    }

    #[tokio::test]
    async fn linear_run_returns_stop_payload() {
        let stop = echo().run(StartEvent::new("hi")).await.unwrap();
        assert_eq!(stop.result, "HI");
        assert_eq!(stop.reason, "completed");
    }

    #[test]
    fn validate_requires_a_start_handler() {
        let mut wf = Workflow::new("empty");
        assert_eq!(wf.validate().unwrap_err().kind(), ErrorKind::ConfigInvalid);
        wf.handle(&[], handler_fn(|_ctx, _e| async move { Ok(Vec::new()) }), StepOptions::default());
        assert_eq!(wf.validate().unwrap_err().kind(), ErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn fan_out_observes_exactly_one_stop() {
        let mut wf = Workflow::new("fan-out").with_num_workers(4);
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Ok(vec![branch().with("A".into())]) }),
            StepOptions::named("a"),
        );
        for name in ["B", "C"] {
            wf.handle(
                &["branch"],
                handler_fn(move |_ctx, _e| async move { Ok(vec![StopEvent::new(name).into_event()]) }),
                StepOptions::named(name),
            );
        }

        let events: Vec<Event> = wf.run_stream(StartEvent::new("go")).unwrap().collect().await;
        let stops: Vec<&StopEvent> = events.iter().filter_map(|e| e.payload::<StopEvent>()).collect();
        assert_eq!(stops.len(), 1);
        assert!(stops[0].result == "B" || stops[0].result == "C");
        assert!(events.last().unwrap().is(STOP_EVENT));
    }

    #[tokio::test]
    async fn stream_is_sealed_in_dispatch_order() {
        let mut wf = Workflow::new("chain");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Ok(vec![branch().with("x".into())]) }),
            StepOptions::named("first"),
        );
        wf.handle(
            &["branch"],
            handler_fn(|_ctx, _e| async move { Ok(vec![StopEvent::new("done").into_event()]) }),
            StepOptions::named("second"),
        );
        let events: Vec<Event> = wf.run_stream(StartEvent::new("go")).unwrap().collect().await;
        let seqs: Vec<Option<u64>> = events.iter().map(Event::seq).collect();
        let parents: Vec<Option<u64>> = events.iter().map(Event::parent).collect();
        assert_eq!(seqs, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(parents, vec![None, Some(0), Some(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut wf = Workflow::new("retry");
        wf.handle(
            &[START_EVENT],
            handler_fn(move |_ctx, _e| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(KernelError::llm_failed("503"));
                    }
                    Ok(vec![StopEvent::new("ok").into_event()])
                }
            }),
            StepOptions::named("flaky").with_retry(RetryPolicy::new(3)),
        );
        let stop = wf.run(StartEvent::new("go")).await.unwrap();
        assert_eq!(stop.result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_as_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut wf = Workflow::new("always-fails");
        wf.handle(
            &[START_EVENT],
            handler_fn(move |_ctx, _e| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KernelError::llm_failed("down"))
                }
            }),
            StepOptions::named("broken").with_retry(RetryPolicy::new(2)),
        );
        let err = wf.run(StartEvent::new("go")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LlmFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut wf = Workflow::new("config");
        wf.handle(
            &[START_EVENT],
            handler_fn(move |_ctx, _e| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(KernelError::ConfigInvalid("bad".into()))
                }
            }),
            StepOptions::named("strict").with_retry(RetryPolicy::new(5)),
        );
        assert!(wf.run(StartEvent::new("go")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_events_reach_registered_handlers() {
        let mut wf = Workflow::new("recover");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Err(KernelError::llm_failed("down")) }),
            StepOptions::named("generate"),
        );
        wf.handle(
            &[ERROR_EVENT],
            handler_fn(|_ctx, event: Event| async move {
                let step = event.payload::<ErrorEvent>().map(|e| e.step.clone()).unwrap_or_default();
                Ok(vec![StopEvent::new(step).with_reason("recovered").into_event()])
            }),
            StepOptions::named("on_error"),
        );
        let stop = wf.run(StartEvent::new("go")).await.unwrap();
        assert_eq!(stop.result, "generate");
        assert_eq!(stop.reason, "recovered");
    }

    #[tokio::test]
    async fn suppressed_failure_stalls_the_run() {
        let mut wf = Workflow::new("stall");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Err(KernelError::llm_failed("down")) }),
            StepOptions::named("quiet").with_suppress_errors(true),
        );
        let err = wf.run(StartEvent::new("go")).await.unwrap_err();
        assert!(matches!(err, KernelError::HandlerFailed { ref step, .. } if step == "dispatcher"));
    }

    #[tokio::test]
    async fn panics_become_error_events() {
        let mut wf = Workflow::new("panic");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move {
                if true {
                    panic!("exploded");
                }
                Ok(Vec::new())
            }),
            StepOptions::named("fragile"),
        );
        let err = wf.run(StartEvent::new("go")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panic);
        assert!(err.to_string().contains("exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_the_run() {
        let mut wf = Workflow::new("slow").with_timeout(Duration::from_millis(50));
        wf.handle(
            &[START_EVENT],
            handler_fn(|ctx: Context, _e| async move {
                tokio::select! {
                    _ = ctx.cancellation_token().cancelled() => Err(KernelError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(vec![StopEvent::new("late").into_event()]),
                }
            }),
            StepOptions::named("sleepy"),
        );
        let handle = wf.spawn(StartEvent::new("go")).unwrap();
        let ctx = handle.context().clone();
        let err = handle.result().await.unwrap_err();
        assert!(matches!(err, KernelError::Timeout { duration_ms: 50 }));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_resolves_with_cancelled() {
        let mut wf = Workflow::new("wait");
        wf.handle(
            &[START_EVENT],
            handler_fn(|ctx: Context, _e| async move {
                ctx.set("entered", true)?;
                ctx.cancellation_token().cancelled().await;
                Err(KernelError::Cancelled)
            }),
            StepOptions::named("blocker"),
        );
        let handle = wf.spawn(StartEvent::new("go")).unwrap();
        handle.cancel();
        let err = handle.result().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn human_response_resumes_a_suspended_run() {
        let mut wf = Workflow::new("approval");
        wf.handle(
            &[START_EVENT],
            handler_fn(|ctx: Context, event: Event| async move {
                ctx.set("draft", input_of(&event))?;
                Ok(vec![InputRequiredEvent::new("approve?").into_event()])
            }),
            StepOptions::named("ask"),
        );
        wf.handle(
            &[HUMAN_RESPONSE_EVENT],
            handler_fn(|ctx: Context, event: Event| async move {
                let answer = HumanResponseEvent::factory()
                    .extract(&event)
                    .map(|h| h.response)
                    .unwrap_or_default();
                let draft = ctx.get_string("draft")?;
                Ok(vec![StopEvent::new(format!("{draft}:{answer}")).into_event()])
            }),
            StepOptions::named("resume"),
        );

        let mut handle = wf.spawn(StartEvent::new("post")).unwrap();
        let mut stream = handle.take_stream().unwrap();
        while let Some(event) = stream.next().await {
            if event.is(INPUT_REQUIRED_EVENT) {
                break;
            }
        }
        handle.send_event(HumanResponseEvent::new("yes").into_event()).unwrap();
        let stop = handle.result().await.unwrap();
        assert_eq!(stop.result, "post:yes");
    }

    #[tokio::test]
    async fn suspension_without_injector_fails() {
        let mut wf = Workflow::new("orphan");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Ok(vec![InputRequiredEvent::new("?").into_event()]) }),
            StepOptions::named("ask"),
        );
        let err = wf.run(StartEvent::new("go")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFailed);
    }

    #[tokio::test]
    async fn failed_stream_ends_with_error_event() {
        let mut wf = Workflow::new("fail");
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Err(KernelError::llm_failed("down")) }),
            StepOptions::named("generate"),
        );
        let events: Vec<Event> = wf.run_stream(StartEvent::new("go")).unwrap().collect().await;
        let last = events.last().unwrap();
        assert!(last.is(ERROR_EVENT));
        assert_eq!(last.payload::<ErrorEvent>().unwrap().step, "generate");
    }

    #[tokio::test]
    async fn steps_are_reported_under_the_trace_root() {
        let debug = Arc::new(DebugCallbackHandler::new());
        let mut wf = Workflow::new("traced")
            .with_callback_manager(CallbackManager::new().with_handler(debug.clone()));
        wf.handle(
            &[START_EVENT],
            handler_fn(|_ctx, _e| async move { Ok(vec![branch().with("x".into())]) }),
            StepOptions::named("first"),
        );
        wf.handle(
            &["branch"],
            handler_fn(|_ctx, _e| async move { Ok(vec![StopEvent::new("done").into_event()]) }),
            StepOptions::named("second"),
        );
        wf.run(StartEvent::new("go")).await.unwrap();

        let pairs = debug.event_pairs(CBEventType::WorkflowStep);
        assert_eq!(pairs.len(), 2);
        let steps: Vec<&str> = pairs
            .iter()
            .filter_map(|(start, _)| start.payload.get(EventPayloadKey::Step).and_then(|v| v.as_str()))
            .collect();
        assert_eq!(steps, vec!["first", "second"]);
        let trace = debug.last_trace_map().unwrap();
        assert_eq!(trace.get("root").map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn concurrent_steps_keep_their_own_events() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let seen: Arc<parking_lot::Mutex<Vec<(String, Option<String>)>>> = Arc::default();
        let mut wf = Workflow::new("fanout").with_num_workers(2);
        for (name, stop) in [("a", true), ("b", false)] {
            let barrier = barrier.clone();
            let seen = seen.clone();
            wf.handle(
                &[START_EVENT],
                handler_fn(move |ctx: Context, _e| {
                    let barrier = barrier.clone();
                    let seen = seen.clone();
                    async move {
                        // Both steps are open from here on.
                        barrier.wait().await;
                        let step_id = ctx.callback_manager().current_parent().unwrap_or_default();
                        let query_parent = ctx
                            .callback_manager()
                            .with_event(CBEventType::Query, EventPayload::new(), |scope| async move {
                                Ok(scope
                                    .manager()
                                    .frames()
                                    .into_iter()
                                    .find(|f| f.id == scope.event_id())
                                    .map(|f| f.parent_id))
                            })
                            .await?;
                        seen.lock().push((step_id, query_parent));
                        barrier.wait().await;
                        Ok(if stop { vec![StopEvent::new("done").into_event()] } else { Vec::new() })
                    }
                }),
                StepOptions::named(name),
            );
        }
        wf.run(StartEvent::new("go")).await.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].0, seen[1].0);
        for (step_id, query_parent) in &seen {
            assert_ne!(step_id, ROOT_EVENT_ID);
            assert_eq!(query_parent.as_deref(), Some(step_id.as_str()));
        }
    }

    #[test]
    fn settings_configure_the_workflow() {
        let settings = WorkflowSettings {
            num_workers: Some(0),
            timeout_ms: Some(250),
            retry: None,
        };
        let wf = Workflow::from_settings("cfg", &settings);
        assert_eq!(wf.num_workers(), 1);
        assert_eq!(wf.timeout, Some(Duration::from_millis(250)));
        assert_eq!(wf.default_retry.max_retries, 0);
    }
}
