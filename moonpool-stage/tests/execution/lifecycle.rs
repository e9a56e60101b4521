//! Activation failures, deactivation, stop, and hosted observers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use moonpool_stage::{
    EntryState, Invocation, InvocationError, MethodId, NodeState, RemoteReference,
};
use serde_json::Value;

use crate::common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_activation_is_retried_on_next_call() {
    let h = default_harness();
    let key = unique("flaky");
    let target = greeter(&key);

    let (invocation, first) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert!(matches!(
        within(first).await,
        Err(InvocationError::ActivationFailed(_))
    ));
    assert!(h.stage.execution().local_entry(&target).is_none());

    let (invocation, second) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(second).await, Ok(Value::from("hi")));
    assert_eq!(tally(&key).activations, 2);
    assert_eq!(h.stage.execution().objects().created_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_queued_behind_failed_activation_retry_locally() {
    let mut h = default_harness();
    let key = unique("flaky-stalled");
    let target = greeter(&key);

    let (invocation, first) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    let execution = Arc::clone(h.stage.execution());
    wait_until(|| execution.local_entry(&target).is_some()).await;

    let mut queued = Vec::new();
    for _ in 0..2 {
        let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
        h.stage.on_invocation(invocation);
        queued.push(response);
    }
    assert_eq!(execution.serializer().pending(&target), 2);

    gate(&key).add_permits(2);
    assert!(matches!(
        within(first).await,
        Err(InvocationError::ActivationFailed(_))
    ));
    for response in queued {
        assert_eq!(within(response).await, Ok(Value::from("hi")));
    }

    assert_eq!(tally(&key).activations, 2);
    assert_eq!(execution.local_entry(&target).map(|e| e.state()), Some(EntryState::Activated));
    assert!(h.outbound.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_method_fails_the_call() {
    let h = default_harness();

    let (invocation, response) = Invocation::request(greeter(&unique("a")), MethodId(404), vec![]);
    h.stage.on_invocation(invocation);

    assert_eq!(
        within(response).await,
        Err(InvocationError::UnknownMethod {
            actor_type: GREETER,
            method: MethodId(404),
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_arguments() {
    let h = default_harness();

    let (invocation, response) =
        Invocation::request(greeter(&unique("a")), RECORD, vec![Value::from("seven")]);
    h.stage.on_invocation(invocation);

    assert!(matches!(
        within(response).await,
        Err(InvocationError::InvalidArguments(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_handler_keeps_entry_usable() {
    let h = default_harness();
    let key = unique("panicky");
    let target = greeter(&key);

    let (invocation, response) = Invocation::request(target.clone(), PANIC, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(
        within(response).await,
        Err(InvocationError::Panicked("greeter exploded".into()))
    );

    let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(response).await, Ok(Value::from("hi")));
    assert_eq!(tally(&key).activations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_way_panic_is_contained() {
    let mut h = default_harness();
    let key = unique("panicky");
    let target = greeter(&key);

    h.stage.on_invocation(Invocation::one_way(target.clone(), PANIC, vec![]));

    // Same reference, so this runs after the panicking call finished.
    let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(response).await, Ok(Value::from("hi")));

    assert_eq!(tally(&key).activations, 1);
    assert_eq!(
        h.stage.execution().local_entry(&target).map(|e| e.state()),
        Some(EntryState::Activated)
    );
    assert!(h.outbound.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deactivate_then_reactivate() {
    let h = default_harness();
    let key = unique("cycle");
    let target = greeter(&key);

    let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    within(response).await.expect("greet");
    let old = h.stage.execution().local_entry(&target).expect("entry");

    assert!(h.stage.execution().deactivate(&target).await);
    assert_eq!(old.state(), EntryState::Deactivated);
    assert!(h.stage.execution().local_entry(&target).is_none());
    assert_eq!(tally(&key).deactivations, 1);

    // A second deactivate has nothing to do.
    assert!(!h.stage.execution().deactivate(&target).await);

    let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(response).await, Ok(Value::from("hi")));
    assert_eq!(tally(&key).activations, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_deactivates_every_entry() {
    let h = default_harness();
    let keys: Vec<String> = (0..3).map(|_| unique("stop")).collect();

    for key in &keys {
        let (invocation, response) = Invocation::request(greeter(key), GREET, vec![]);
        h.stage.on_invocation(invocation);
        within(response).await.expect("greet");
    }
    assert_eq!(h.stage.execution().objects().len(), 3);

    h.stage.stop().await;

    assert_eq!(h.stage.state(), NodeState::Stopped);
    assert!(h.stage.execution().objects().is_empty());
    for key in &keys {
        assert_eq!(tally(key).deactivations, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registered_observer_is_invoked_locally() {
    let mut h = default_harness();
    let pings = Arc::new(AtomicUsize::new(0));
    let observer = RemoteReference::observer(CALLBACK, unique("cb"));

    h.stage
        .register_object(
            observer.clone(),
            Callback {
                pings: Arc::clone(&pings),
            },
        )
        .expect("registered");

    let (invocation, response) = Invocation::request(observer.clone(), PING, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(response).await, Ok(Value::from("pong")));

    h.stage.on_invocation(Invocation::one_way(observer.clone(), PING, vec![]));
    wait_until(|| pings.load(Ordering::SeqCst) == 2).await;

    assert!(h.outbound.try_recv().is_err());
    assert!(h
        .stage
        .register_object(observer, Callback { pings })
        .is_err());
}
