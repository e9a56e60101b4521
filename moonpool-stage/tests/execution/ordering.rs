//! Single-flight execution, activation idempotence and arrival order.

use std::time::Duration;

use moonpool_stage::{Invocation, PendingResponse};
use serde_json::Value;

use crate::common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_invocations_create_one_entry_in_arrival_order() {
    let h = default_harness();
    let key = unique("burst");
    let target = greeter(&key);

    let responses: Vec<PendingResponse> = (0..32)
        .map(|i| {
            let (invocation, response) =
                Invocation::request(target.clone(), RECORD, vec![Value::from(i)]);
            h.stage.on_invocation(invocation);
            response
        })
        .collect();

    for (i, response) in responses.into_iter().enumerate() {
        assert_eq!(within(response).await, Ok(Value::from(i as i64)));
    }

    let counts = tally(&key);
    assert_eq!(counts.activations, 1);
    assert_eq!(counts.overlaps, 0);
    assert_eq!(counts.seen, (0..32).collect::<Vec<i64>>());
    assert_eq!(h.stage.execution().objects().created_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_overlap() {
    let h = default_harness();
    let key = unique("contended");
    let target = greeter(&key);

    let mut callers = Vec::new();
    for task in 0..8i64 {
        let stage = h.stage.clone();
        let target = target.clone();
        callers.push(tokio::spawn(async move {
            let mut responses = Vec::new();
            for i in 0..10i64 {
                let (invocation, response) =
                    Invocation::request(target.clone(), RECORD, vec![Value::from(task * 100 + i)]);
                stage.on_invocation(invocation);
                responses.push(response);
            }
            for response in responses {
                response.await.expect("record");
            }
        }));
    }
    for caller in callers {
        within(caller).await.expect("caller task");
    }

    let counts = tally(&key);
    assert_eq!(counts.activations, 1);
    assert_eq!(counts.overlaps, 0);
    assert_eq!(counts.seen.len(), 80);

    // Each caller's own calls keep their relative order.
    for task in 0..8i64 {
        let mine: Vec<i64> = counts
            .seen
            .iter()
            .copied()
            .filter(|n| n / 100 == task)
            .collect();
        assert_eq!(mine, (0..10).map(|i| task * 100 + i).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocked_reference_does_not_stall_others() {
    let h = default_harness();
    let blocked_key = unique("blocked");
    let blocked = greeter(&blocked_key);
    let free = greeter(&unique("free"));

    let (invocation, blocked_response) = Invocation::request(blocked.clone(), BLOCK, vec![]);
    h.stage.on_invocation(invocation);

    let (invocation, free_response) = Invocation::request(free, GREET, vec![]);
    h.stage.on_invocation(invocation);
    assert_eq!(within(free_response).await, Ok(Value::from("hi")));

    // Still parked behind its gate.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.stage.execution().serializer().is_running(&blocked));

    gate(&blocked_key).add_permits(1);
    assert_eq!(within(blocked_response).await, Ok(Value::from("released")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_reference_releases_its_slot() {
    let h = default_harness();
    let target = greeter(&unique("idle"));

    let (invocation, response) = Invocation::request(target.clone(), GREET, vec![]);
    h.stage.on_invocation(invocation);
    within(response).await.expect("greet");

    let serializer = h.stage.execution().serializer();
    wait_until(|| !serializer.is_running(&target)).await;
    assert_eq!(serializer.pending(&target), 0);
    // The entry itself stays registered.
    assert!(h.stage.execution().local_entry(&target).is_some());
}
