//! Response correlation under concurrency and reordering

use framerpc_client::{CallError, CorrelationError, PendingRequests, RandomIds, StandardErrorMapper};
use framerpc_core::{ErrorPayload, Id};
use futures::future::join_all;
use std::sync::Arc;

#[tokio::test]
async fn test_permuted_responses_resolve_their_own_calls() {
    let registry = PendingRequests::new();

    let (product_id, product) = registry.begin("multiply").unwrap();
    let (sum_id, sum) = registry.begin("add").unwrap();

    // The response for the second call arrives first.
    registry.complete(&sum_id, b"628").unwrap();
    registry.complete(&product_id, b"58596").unwrap();

    assert_eq!(product.await.unwrap().deserialize::<i64>().unwrap(), 58596);
    assert_eq!(sum.await.unwrap().deserialize::<i64>().unwrap(), 628);
}

#[tokio::test]
async fn test_many_concurrent_calls_reverse_order() {
    let registry = PendingRequests::with_policies(Arc::new(RandomIds), Arc::new(StandardErrorMapper));

    let mut ids = Vec::new();
    let mut calls = Vec::new();
    for i in 0..1_000i64 {
        let (id, call) = registry.begin("square").unwrap();
        ids.push((id, i));
        calls.push(call);
    }
    assert_eq!(registry.len(), 1_000);

    let completer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for (id, i) in ids.into_iter().rev() {
                registry
                    .complete(&id, (i * i).to_string().as_bytes())
                    .unwrap();
            }
        })
    };

    let results = join_all(calls).await;
    completer.await.unwrap();

    for (i, result) in results.into_iter().enumerate() {
        let i = i as i64;
        assert_eq!(result.unwrap().deserialize::<i64>().unwrap(), i * i);
    }
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_errors_and_results_interleave() {
    let registry = PendingRequests::new();
    let (a, call_a) = registry.begin("a").unwrap();
    let (b, call_b) = registry.begin("b").unwrap();
    let (c, call_c) = registry.begin("c").unwrap();

    registry.fail(Some(&c), ErrorPayload::internal_error("boom")).unwrap();
    registry.complete(&a, br#""ok""#).unwrap();
    registry.fail(Some(&b), ErrorPayload::invalid_params("wrong")).unwrap();

    assert_eq!(call_a.await.unwrap().deserialize::<String>().unwrap(), "ok");
    assert!(matches!(call_b.await, Err(CallError::InvalidParams(p)) if p.message == "wrong"));
    assert!(matches!(call_c.await, Err(CallError::ServerError(_))));
}

#[tokio::test]
async fn test_late_response_after_cancel_is_reported() {
    let registry = PendingRequests::new();
    let (id, call) = registry.begin("slow").unwrap();

    assert!(registry.cancel(&id));
    assert!(matches!(call.await, Err(CallError::Cancelled)));
    assert!(!registry.contains(&id));

    let late = registry.complete(&id, b"1");
    assert_eq!(late, Err(CorrelationError::UnknownId(id.clone())));

    let late_error = registry.fail(Some(&id), ErrorPayload::request_cancelled());
    assert_eq!(late_error, Err(CorrelationError::UnknownId(id)));
}

#[tokio::test]
async fn test_second_delivery_is_duplicate() {
    let registry = PendingRequests::new();
    let (id, call) = registry.begin("once").unwrap();

    registry.complete(&id, b"true").unwrap();
    assert!(call.await.unwrap().deserialize::<bool>().unwrap());

    assert_eq!(
        registry.fail(Some(&id), ErrorPayload::internal_error("again")),
        Err(CorrelationError::Duplicate(id))
    );
}

#[tokio::test]
async fn test_decode_mismatch() {
    let registry = PendingRequests::new();
    let (id, call) = registry.begin("text").unwrap();
    registry.complete(&id, br#""not a number""#).unwrap();

    let result = call.await.unwrap();
    assert!(matches!(result.deserialize::<u32>(), Err(CallError::Decode(_))));
}

#[test]
fn test_string_ids_from_custom_generator() {
    let counter = std::sync::atomic::AtomicU32::new(0);
    let registry = PendingRequests::with_policies(
        Arc::new(move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Id::from(format!("req-{n}"))
        }),
        Arc::new(StandardErrorMapper),
    );

    let (first, _a) = registry.begin("m").unwrap();
    let (second, _b) = registry.begin("m").unwrap();
    assert_eq!(first, Id::from("req-0"));
    assert_eq!(second, Id::from("req-1"));
}
