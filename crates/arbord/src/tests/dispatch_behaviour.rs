//! Behavioural tests for the serialised dispatch queue.

use std::cell::RefCell;
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use crate::context::ServiceContext;
use crate::dispatch::{
    Completion, ConsumerHandle, DispatchError, Dispatcher, DispatcherSettings, Headers,
    InboundRequest,
};
use crate::process::{StopReason, StopToken};
use crate::registry::{HandlerOutcome, HandlerRegistry, HandlerResult, Reply};
use crate::tests::support::{ServiceFixture, StepResult, WAIT_TIMEOUT, wait_until};

const SLOW_HANDLER: Duration = Duration::from_millis(300);
const BLOCK_CHECK: Duration = Duration::from_millis(200);
const TRACKED_HOLD: Duration = Duration::from_millis(2);

/// Holds handlers on the `/hold` route until released.
#[derive(Clone, Default)]
struct Gate {
    inner: Arc<(Mutex<(usize, bool)>, Condvar)>,
}

impl Gate {
    fn pass(&self) {
        let (state, changed) = &*self.inner;
        let mut guard = state.lock().expect("gate mutex poisoned");
        guard.0 += 1;
        changed.notify_all();
        while !guard.1 {
            guard = changed.wait(guard).expect("gate mutex poisoned");
        }
    }

    fn entered(&self) -> usize {
        self.inner.0.lock().expect("gate mutex poisoned").0
    }

    fn open(&self) {
        let (state, changed) = &*self.inner;
        state.lock().expect("gate mutex poisoned").1 = true;
        changed.notify_all();
    }
}

/// Entry and exit instants of every `/track` invocation.
#[derive(Clone, Default)]
struct Tracker {
    windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl Tracker {
    fn record(&self, entered: Instant, left: Instant) {
        self.windows
            .lock()
            .expect("tracker mutex poisoned")
            .push((entered, left));
    }

    fn windows(&self) -> Vec<(Instant, Instant)> {
        self.windows.lock().expect("tracker mutex poisoned").clone()
    }
}

fn append(context: &mut ServiceContext, _: &Headers, args: Value) -> HandlerResult {
    let mut items = context
        .state()
        .value("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    items.push(args.get("item").cloned().unwrap_or(Value::Null));
    context.state_mut().set_serialized([("items", items)])?;
    Ok(HandlerOutcome::reply(true))
}

fn slow(context: &mut ServiceContext, _: &Headers, _: Value) -> HandlerResult {
    thread::sleep(SLOW_HANDLER);
    context.state_mut().set_serialized([("late", true)])?;
    Ok(HandlerOutcome::reply(true))
}

fn test_routes(gate: &Gate, tracker: &Tracker) -> HandlerRegistry {
    let gate = gate.clone();
    let tracker = tracker.clone();
    let mut registry = HandlerRegistry::new();
    registry
        .unary("/append", append)
        .unary("/track", move |context, headers, args| {
            let entered = Instant::now();
            thread::sleep(TRACKED_HOLD);
            let outcome = append(context, headers, args);
            tracker.record(entered, Instant::now());
            outcome
        })
        .unary("/slow", slow)
        .unary("/read", |context, _, _| {
            Ok(HandlerOutcome::reply(context.state().to_value()))
        })
        .unary("/panic", |_, _, _| panic!("handler exploded"))
        .unary("/empty", |_, _, _| Ok(HandlerOutcome::reply(Value::Null)))
        .unary("/halt", |_, _, _| Ok(HandlerOutcome::Terminate))
        .unary("/hold", move |_, _, _| {
            gate.pass();
            Ok(HandlerOutcome::reply(true))
        });
    registry
}

struct DispatchWorld {
    fixture: ServiceFixture,
    gate: Gate,
    tracker: Tracker,
    enqueued: Vec<String>,
    stop: StopToken,
    dispatcher: Option<Dispatcher>,
    consumer: Option<ConsumerHandle>,
    pending: Vec<Completion>,
    results: Vec<Result<Reply, DispatchError>>,
    background: Option<JoinHandle<Result<Completion, DispatchError>>>,
}

impl DispatchWorld {
    fn new() -> Self {
        Self {
            fixture: ServiceFixture::new(),
            gate: Gate::default(),
            tracker: Tracker::default(),
            enqueued: Vec::new(),
            stop: StopToken::new(),
            dispatcher: None,
            consumer: None,
            pending: Vec::new(),
            results: Vec::new(),
            background: None,
        }
    }

    fn start(&mut self, settings: DispatcherSettings) {
        let (dispatcher, consumer) = Dispatcher::start(
            test_routes(&self.gate, &self.tracker),
            self.fixture.context(),
            settings,
            self.stop.clone(),
        )
        .expect("start dispatcher");
        self.dispatcher = Some(dispatcher);
        self.consumer = Some(consumer);
    }

    fn dispatcher(&self) -> Result<&Dispatcher, String> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| String::from("dispatcher not started"))
    }

    fn call(&mut self, path: &str) -> StepResult {
        let result = self.dispatcher()?.call(InboundRequest::new(path));
        self.results.push(result);
        Ok(())
    }

    fn last(&self) -> Result<&Result<Reply, DispatchError>, String> {
        self.results
            .last()
            .ok_or_else(|| String::from("no call recorded"))
    }
}

impl Drop for DispatchWorld {
    fn drop(&mut self) {
        self.gate.open();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.close();
        }
    }
}

#[fixture]
fn world() -> RefCell<DispatchWorld> {
    RefCell::new(DispatchWorld::new())
}

#[given("a dispatcher with the test routes")]
fn given_dispatcher(world: &RefCell<DispatchWorld>) {
    world.borrow_mut().start(DispatcherSettings::default());
}

#[given("a dispatcher with a deadline of {millis} milliseconds")]
fn given_deadline(world: &RefCell<DispatchWorld>, millis: u64) {
    world.borrow_mut().start(DispatcherSettings {
        deadline: Duration::from_millis(millis),
        ..DispatcherSettings::default()
    });
}

#[given("a dispatcher with a queue capacity of {capacity}")]
fn given_capacity(world: &RefCell<DispatchWorld>, capacity: usize) {
    world.borrow_mut().start(DispatcherSettings {
        capacity,
        ..DispatcherSettings::default()
    });
}

#[when("{count} append requests are queued without waiting")]
fn when_appends_queued(world: &RefCell<DispatchWorld>, count: usize) -> StepResult {
    let mut world = world.borrow_mut();
    for item in 0..count {
        let request = InboundRequest::json("/append", &json!({ "item": item }));
        let completion = world.dispatcher()?.submit(request).map_err(|e| e.to_string())?;
        world.pending.push(completion);
    }
    let pending = std::mem::take(&mut world.pending);
    for completion in pending {
        world.results.push(completion.wait(WAIT_TIMEOUT));
    }
    Ok(())
}

#[when("{producers} producers each submit {count} tracked requests at once")]
fn when_producers_submit(
    world: &RefCell<DispatchWorld>,
    producers: usize,
    count: usize,
) -> StepResult {
    let mut world = world.borrow_mut();
    let dispatcher = world.dispatcher()?.clone();
    let enqueued = Arc::new(Mutex::new(Vec::new()));
    let start = Arc::new(Barrier::new(producers));
    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let enqueued = Arc::clone(&enqueued);
            let start = Arc::clone(&start);
            thread::spawn(move || -> Result<Vec<Completion>, String> {
                start.wait();
                let mut completions = Vec::with_capacity(count);
                for sequence in 0..count {
                    let item = format!("{producer}-{sequence}");
                    let request = InboundRequest::json("/track", &json!({ "item": item }));
                    // Holding the log across the send pins the queue order.
                    let mut order = enqueued
                        .lock()
                        .map_err(|_| String::from("enqueue log poisoned"))?;
                    completions.push(dispatcher.submit(request).map_err(|e| e.to_string())?);
                    order.push(item);
                }
                Ok(completions)
            })
        })
        .collect();
    for handle in handles {
        let completions = handle
            .join()
            .map_err(|_| String::from("producer panicked"))??;
        for completion in completions {
            world.results.push(completion.wait(WAIT_TIMEOUT));
        }
    }
    world.enqueued = enqueued
        .lock()
        .map_err(|_| String::from("enqueue log poisoned"))?
        .clone();
    Ok(())
}

#[when("the slow route is called")]
fn when_slow_called(world: &RefCell<DispatchWorld>) -> StepResult {
    world.borrow_mut().call("/slow")
}

#[when("the panicking route is called")]
fn when_panic_called(world: &RefCell<DispatchWorld>) -> StepResult {
    world.borrow_mut().call("/panic")
}

#[when("the empty route is called")]
fn when_empty_called(world: &RefCell<DispatchWorld>) -> StepResult {
    world.borrow_mut().call("/empty")
}

#[when("an unknown route is called")]
fn when_unknown_called(world: &RefCell<DispatchWorld>) -> StepResult {
    world.borrow_mut().call("/no/such/route")
}

#[when("the halt route is called")]
fn when_halt_called(world: &RefCell<DispatchWorld>) -> StepResult {
    world.borrow_mut().call("/halt")
}

#[when("the state is read")]
fn when_state_read(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let completion = world
        .dispatcher()?
        .submit(InboundRequest::new("/read"))
        .map_err(|e| e.to_string())?;
    world.results.push(completion.wait(WAIT_TIMEOUT));
    Ok(())
}

#[when("the hold route occupies the consumer")]
fn when_hold_occupies(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let completion = world
        .dispatcher()?
        .submit(InboundRequest::new("/hold"))
        .map_err(|e| e.to_string())?;
    world.pending.push(completion);
    let gate = world.gate.clone();
    if wait_until(|| gate.entered() == 1) {
        Ok(())
    } else {
        Err(String::from("hold handler never started"))
    }
}

#[when("one more request is queued")]
fn when_one_more_queued(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let completion = world
        .dispatcher()?
        .submit(InboundRequest::new("/read"))
        .map_err(|e| e.to_string())?;
    world.pending.push(completion);
    Ok(())
}

#[when("the halt route is queued")]
fn when_halt_queued(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let completion = world
        .dispatcher()?
        .submit(InboundRequest::new("/halt"))
        .map_err(|e| e.to_string())?;
    world.pending.push(completion);
    Ok(())
}

#[when("{count} more requests are queued")]
fn when_more_queued(world: &RefCell<DispatchWorld>, count: usize) -> StepResult {
    for _ in 0..count {
        when_one_more_queued(world)?;
    }
    Ok(())
}

#[when("another request is submitted in the background")]
fn when_background_submit(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let dispatcher = world.dispatcher()?.clone();
    world.background = Some(thread::spawn(move || {
        dispatcher.submit(InboundRequest::new("/read"))
    }));
    Ok(())
}

#[when("the hold route is released")]
fn when_hold_released(world: &RefCell<DispatchWorld>) {
    world.borrow().gate.open();
}

#[then("every queued request succeeds")]
fn then_all_succeed(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    assert!(!world.results.is_empty(), "no results recorded");
    for result in &world.results {
        assert!(
            matches!(result, Ok(Reply::Json(Value::Bool(true)))),
            "unexpected result {result:?}"
        );
    }
}

#[then("the state lists {count} items in submission order")]
fn then_items_in_order(world: &RefCell<DispatchWorld>, count: usize) -> StepResult {
    when_state_read(world)?;
    let world = world.borrow();
    let Ok(Reply::Json(state)) = world.last()? else {
        return Err(String::from("state read failed"));
    };
    let expected: Vec<Value> = (0..count).map(|item| json!(item)).collect();
    assert_eq!(state.get("items"), Some(&Value::Array(expected)));
    Ok(())
}

#[then("{count} handler runs never overlapped")]
fn then_no_overlap(world: &RefCell<DispatchWorld>, count: usize) {
    let mut windows = world.borrow().tracker.windows();
    assert_eq!(windows.len(), count);
    windows.sort_by_key(|(entered, _)| *entered);
    for pair in windows.windows(2) {
        if let [(_, earlier_exit), (later_entry, _)] = pair {
            assert!(
                earlier_exit <= later_entry,
                "handler bodies overlapped: {pair:?}"
            );
        }
    }
}

#[then("the state lists the tracked items in enqueue order")]
fn then_enqueue_order(world: &RefCell<DispatchWorld>) -> StepResult {
    when_state_read(world)?;
    let world = world.borrow();
    let Ok(Reply::Json(state)) = world.last()? else {
        return Err(String::from("state read failed"));
    };
    let expected: Vec<Value> = world.enqueued.iter().cloned().map(Value::String).collect();
    assert!(!expected.is_empty(), "nothing was enqueued");
    assert_eq!(state.get("items"), Some(&Value::Array(expected)));
    Ok(())
}

#[then("the call times out")]
fn then_times_out(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Err(DispatchError::Timeout { .. })),
        "expected a timeout, got {last:?}"
    );
    Ok(())
}

#[then("the late mutation is visible")]
fn then_late_mutation(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let Ok(Reply::Json(state)) = world.last()? else {
        return Err(String::from("state read failed"));
    };
    assert_eq!(state.get("late"), Some(&Value::Bool(true)));
    Ok(())
}

#[then("the call fails because the handler panicked")]
fn then_panicked(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Err(DispatchError::HandlerPanicked { path }) if path == "/panic"),
        "unexpected result {last:?}"
    );
    Ok(())
}

#[then("the call fails with a bad handler result")]
fn then_bad_result(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Err(DispatchError::BadHandlerResult { .. })),
        "unexpected result {last:?}"
    );
    Ok(())
}

#[then("the call fails because the route is missing")]
fn then_route_missing(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Err(DispatchError::RouteNotFound(_))),
        "unexpected result {last:?}"
    );
    Ok(())
}

#[then("the read succeeds")]
fn then_read_succeeds(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Ok(Reply::Json(Value::Object(_)))),
        "unexpected result {last:?}"
    );
    Ok(())
}

#[then("the background submission is still blocked")]
fn then_background_blocked(world: &RefCell<DispatchWorld>) -> StepResult {
    thread::sleep(BLOCK_CHECK);
    let world = world.borrow();
    let handle = world
        .background
        .as_ref()
        .ok_or_else(|| String::from("no background submission"))?;
    assert!(!handle.is_finished(), "submission should block on a full queue");
    Ok(())
}

#[then("the background submission completes")]
fn then_background_completes(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let handle = world
        .background
        .take()
        .ok_or_else(|| String::from("no background submission"))?;
    let completion = handle
        .join()
        .map_err(|_| String::from("submitter panicked"))?
        .map_err(|e| e.to_string())?;
    let reply = completion.wait(WAIT_TIMEOUT).map_err(|e| e.to_string())?;
    assert!(matches!(reply, Reply::Json(Value::Object(_))));
    for completion in std::mem::take(&mut world.pending) {
        assert!(completion.wait(WAIT_TIMEOUT).is_ok());
    }
    Ok(())
}

#[then("the call reports termination")]
fn then_terminated(world: &RefCell<DispatchWorld>) -> StepResult {
    let world = world.borrow();
    let last = world.last()?;
    assert!(
        matches!(last, Err(DispatchError::Terminated { .. })),
        "unexpected result {last:?}"
    );
    Ok(())
}

#[then("the stop token records a handler termination")]
fn then_stop_token(world: &RefCell<DispatchWorld>) {
    let stop = world.borrow().stop.clone();
    assert_eq!(
        stop.wait_timeout(WAIT_TIMEOUT),
        Some(StopReason::Terminated)
    );
}

#[then("the requests queued behind the halt are refused")]
fn then_queued_refused(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let mut outcomes = std::mem::take(&mut world.pending)
        .into_iter()
        .map(|completion| completion.wait(WAIT_TIMEOUT));
    let held = outcomes.next().ok_or_else(|| String::from("hold not queued"))?;
    assert!(matches!(held, Ok(Reply::Json(Value::Bool(true)))), "hold: {held:?}");
    let halted = outcomes.next().ok_or_else(|| String::from("halt not queued"))?;
    assert!(
        matches!(halted, Err(DispatchError::Terminated { .. })),
        "halt: {halted:?}"
    );
    let rest: Vec<_> = outcomes.collect();
    assert!(!rest.is_empty(), "nothing queued behind the halt");
    for outcome in rest {
        assert!(
            matches!(outcome, Err(DispatchError::QueueClosed)),
            "queued behind halt: {outcome:?}"
        );
    }
    Ok(())
}

#[then("no requests remain outstanding")]
fn then_none_outstanding(world: &RefCell<DispatchWorld>) -> StepResult {
    let dispatcher = world.borrow().dispatcher()?.clone();
    if wait_until(|| dispatcher.outstanding() == 0) {
        Ok(())
    } else {
        Err(format!("{} requests still outstanding", dispatcher.outstanding()))
    }
}

#[then("new requests are refused")]
fn then_refused(world: &RefCell<DispatchWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let consumer = world
        .consumer
        .take()
        .ok_or_else(|| String::from("consumer not started"))?;
    let context = consumer.join().map_err(|e| e.to_string())?;
    assert!(context.topology().children().is_empty());
    let result = world.dispatcher()?.submit(InboundRequest::new("/read"));
    assert!(matches!(result, Err(DispatchError::QueueClosed)));
    Ok(())
}

#[scenario(path = "tests/features/request_dispatch.feature", index = 0)]
fn queued_requests_run_in_order(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 1)]
fn late_handlers_still_mutate(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 2)]
fn failures_do_not_stop_the_consumer(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 3)]
fn full_queue_blocks_producers(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 4)]
fn terminate_stops_the_consumer(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 5)]
fn concurrent_producers_are_serialised(#[from(world)] _: RefCell<DispatchWorld>) {}

#[scenario(path = "tests/features/request_dispatch.feature", index = 6)]
fn terminate_discards_queued_requests(#[from(world)] _: RefCell<DispatchWorld>) {}

fn close_and_take_consumer(world: &RefCell<DispatchWorld>) -> ConsumerHandle {
    let mut world = world.borrow_mut();
    world.dispatcher().expect("dispatcher started").close();
    world.consumer.take().expect("consumer started")
}

#[rstest]
fn busy_consumer_exceeds_the_drain_budget(world: RefCell<DispatchWorld>) {
    world.borrow_mut().start(DispatcherSettings::default());
    when_hold_occupies(&world).expect("hold occupies the consumer");
    let consumer = close_and_take_consumer(&world);

    let result = consumer.join_within(Duration::from_millis(50));
    assert!(
        matches!(result, Err(DispatchError::DrainTimeout { .. })),
        "unexpected drain result {result:?}"
    );
}

#[rstest]
fn idle_consumer_drains_within_the_budget(world: RefCell<DispatchWorld>) {
    world.borrow_mut().start(DispatcherSettings::default());
    let consumer = close_and_take_consumer(&world);

    let context = consumer.join_within(WAIT_TIMEOUT).expect("consumer drained");
    assert!(context.topology().children().is_empty());
}
