//! Fulfillment engine behaviour against the in-memory store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use boxoffice_core::{
    AlertKind, BoxOfficeError, FulfillmentReport, IgnoreReason, Money, NotificationKind,
    PaymentNotification, PaymentOutcome, SessionMetadata, ShowingId,
};
use boxoffice_runtime::{FulfillmentEngine, RetryPolicy};
use boxoffice_testing::{fixtures, test_clock, InMemoryStore};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn engine(store: &InMemoryStore) -> FulfillmentEngine<InMemoryStore> {
    FulfillmentEngine::new(store.clone(), fixtures::codec(), Arc::new(test_clock()))
        .with_retry_policy(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        )
}

async fn seeded(showings: &[(i64, u32)]) -> (InMemoryStore, boxoffice_core::CustomerId) {
    let store = InMemoryStore::new();
    for &(id, capacity) in showings {
        store.add_showing(fixtures::showing(id, capacity)).await;
    }
    let customer = store.add_customer("ada@example.com", "Ada Lovelace").await;
    (store, customer)
}

#[tokio::test]
async fn donation_order_is_fulfilled_then_fully_reversed() {
    let (store, customer) = seeded(&[(7, 10)]).await;
    let engine = engine(&store);
    let manifest = fixtures::manifest(customer, &[(7, 3)], Money::from_cents(2_500));

    let report = engine
        .handle(&fixtures::succeeded("pi_1", &manifest))
        .await
        .unwrap();
    let FulfillmentReport::Fulfilled {
        ticket_ids,
        donation_id,
    } = report
    else {
        panic!("expected fulfillment, got {report:?}");
    };
    assert_eq!(ticket_ids.len(), 3);
    assert!(donation_id.is_some());

    let tickets = store.tickets().await;
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t.showing_id == ShowingId::new(7)
        && t.customer_id == customer
        && t.paid
        && !t.checked_in));
    let donations = store.donations().await;
    assert_eq!(donations.len(), 1);
    assert_eq!(donations[0].amount, Money::from_cents(2_500));
    assert_eq!(donations[0].donor_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(store.available_seats(ShowingId::new(7)).await, Some(7));

    let record = store
        .payment_event(&fixtures::event_id("pi_1"))
        .await
        .unwrap();
    assert_eq!(record.outcome, PaymentOutcome::Fulfilled);
    assert_eq!(record.ticket_ids, ticket_ids);
    assert_eq!(record.order_ref.as_deref(), Some("ord_fixture"));

    let report = engine.handle(&fixtures::refunded("pi_1")).await.unwrap();
    assert_eq!(
        report,
        FulfillmentReport::Refunded {
            tickets_removed: 3,
            donation_removed: true
        }
    );
    assert!(store.tickets().await.is_empty());
    assert!(store.donations().await.is_empty());
    assert_eq!(store.available_seats(ShowingId::new(7)).await, Some(10));
    assert_eq!(
        store
            .payment_event(&fixtures::event_id("pi_1"))
            .await
            .unwrap()
            .outcome,
        PaymentOutcome::Refunded
    );
}

#[tokio::test]
async fn redelivered_success_issues_tickets_once() {
    let (store, customer) = seeded(&[(1, 10)]).await;
    let engine = engine(&store);
    let notification = fixtures::succeeded("pi_dup", &fixtures::manifest(customer, &[(1, 2)], Money::ZERO));

    let first = engine.handle(&notification).await.unwrap();
    for _ in 0..4 {
        let again = engine.handle(&notification).await.unwrap();
        assert_eq!(
            again,
            FulfillmentReport::Ignored {
                reason: IgnoreReason::AlreadyFulfilled
            }
        );
    }

    let FulfillmentReport::Fulfilled { ticket_ids, .. } = first else {
        panic!("expected fulfillment");
    };
    let issued: Vec<_> = store.tickets().await.into_iter().map(|t| t.id).collect();
    assert_eq!(issued, ticket_ids);
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(8));
    assert!(store.donations().await.is_empty());
}

#[tokio::test]
async fn repeated_refund_releases_once() {
    let (store, customer) = seeded(&[(1, 4)]).await;
    let engine = engine(&store);
    let manifest = fixtures::manifest(customer, &[(1, 2)], Money::ZERO);

    engine.handle(&fixtures::succeeded("pi_r", &manifest)).await.unwrap();
    engine.handle(&fixtures::refunded("pi_r")).await.unwrap();
    let again = engine.handle(&fixtures::refunded("pi_r")).await.unwrap();
    let late_success = engine.handle(&fixtures::succeeded("pi_r", &manifest)).await.unwrap();

    assert_eq!(
        again,
        FulfillmentReport::Ignored {
            reason: IgnoreReason::AlreadyRefunded
        }
    );
    assert_eq!(
        late_success,
        FulfillmentReport::Ignored {
            reason: IgnoreReason::AlreadyRefunded
        }
    );
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(4));
    assert!(store.tickets().await.is_empty());
}

#[tokio::test]
async fn refund_only_touches_its_own_rows() {
    let (store, customer) = seeded(&[(1, 10)]).await;
    let engine = engine(&store);

    engine
        .handle(&fixtures::succeeded("pi_a", &fixtures::manifest(customer, &[(1, 2)], Money::from_cents(500))))
        .await
        .unwrap();
    engine
        .handle(&fixtures::succeeded("pi_b", &fixtures::manifest(customer, &[(1, 3)], Money::from_cents(700))))
        .await
        .unwrap();
    engine.handle(&fixtures::refunded("pi_a")).await.unwrap();

    let remaining = store.tickets().await;
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|t| t.payment_event_id.as_str() == "pi_b"));
    let donations = store.donations().await;
    assert_eq!(donations.len(), 1);
    assert_eq!(donations[0].amount, Money::from_cents(700));
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(7));
}

#[tokio::test]
async fn refund_before_success_is_a_safe_no_op() {
    let (store, customer) = seeded(&[(1, 5)]).await;
    let engine = engine(&store);

    let early = engine.handle(&fixtures::refunded("pi_early")).await.unwrap();
    assert_eq!(
        early,
        FulfillmentReport::Ignored {
            reason: IgnoreReason::RefundBeforeFulfillment
        }
    );
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(5));
    assert!(store.payment_event(&fixtures::event_id("pi_early")).await.is_none());

    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::RefundBeforeFulfillment);

    // The success that eventually arrives is processed normally.
    let manifest = fixtures::manifest(customer, &[(1, 1)], Money::ZERO);
    let report = engine
        .handle(&fixtures::succeeded("pi_early", &manifest))
        .await
        .unwrap();
    assert!(matches!(report, FulfillmentReport::Fulfilled { .. }));
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(4));
}

#[tokio::test]
async fn partial_capacity_rolls_back_every_showing() {
    let (store, customer) = seeded(&[(1, 5), (2, 1)]).await;
    let engine = engine(&store);
    let manifest = fixtures::manifest(customer, &[(1, 2), (2, 2)], Money::from_cents(1_000));

    let report = engine
        .handle(&fixtures::succeeded("pi_short", &manifest))
        .await
        .unwrap();

    assert_eq!(
        report,
        FulfillmentReport::Failed {
            showing_id: ShowingId::new(2)
        }
    );
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(5));
    assert_eq!(store.available_seats(ShowingId::new(2)).await, Some(1));
    assert!(store.tickets().await.is_empty());
    assert!(store.donations().await.is_empty());

    let record = store
        .payment_event(&fixtures::event_id("pi_short"))
        .await
        .unwrap();
    assert_eq!(record.outcome, PaymentOutcome::FulfillmentFailed);
    assert!(record.ticket_ids.is_empty());

    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::CapacityExceeded);
    let details = alerts[0].details.clone().unwrap();
    assert_eq!(details["showing_id"], 2);
    assert_eq!(details["requested"], 2);
    assert_eq!(details["available"], 1);
}

#[tokio::test]
async fn failed_fulfillment_is_terminal_and_refund_is_flagged() {
    let (store, customer) = seeded(&[(1, 1)]).await;
    let engine = engine(&store);
    let manifest = fixtures::manifest(customer, &[(1, 2)], Money::ZERO);

    engine.handle(&fixtures::succeeded("pi_f", &manifest)).await.unwrap();
    let again = engine.handle(&fixtures::succeeded("pi_f", &manifest)).await.unwrap();
    let refund = engine.handle(&fixtures::refunded("pi_f")).await.unwrap();

    assert_eq!(
        again,
        FulfillmentReport::Ignored {
            reason: IgnoreReason::AlreadyFailed
        }
    );
    assert_eq!(
        refund,
        FulfillmentReport::Ignored {
            reason: IgnoreReason::RefundAfterFailure
        }
    );
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(1));

    let kinds: Vec<AlertKind> = store.alerts().await.into_iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![AlertKind::CapacityExceeded, AlertKind::RefundAfterFailure]
    );
}

#[tokio::test]
async fn vanished_showing_fails_with_alert() {
    let (store, customer) = seeded(&[]).await;
    let engine = engine(&store);
    let manifest = fixtures::manifest(customer, &[(42, 1)], Money::ZERO);

    let report = engine
        .handle(&fixtures::succeeded("pi_gone", &manifest))
        .await
        .unwrap();

    assert_eq!(
        report,
        FulfillmentReport::Failed {
            showing_id: ShowingId::new(42)
        }
    );
    assert_eq!(store.alerts().await[0].kind, AlertKind::UnknownShowing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_for_the_last_seats_have_one_winner() {
    let (store, customer) = seeded(&[(1, 2)]).await;
    let engine = Arc::new(engine(&store));
    let manifest = fixtures::manifest(customer, &[(1, 2)], Money::ZERO);

    let handles: Vec<_> = ["pi_x", "pi_y"]
        .into_iter()
        .map(|event| {
            let engine = Arc::clone(&engine);
            let notification = fixtures::succeeded(event, &manifest);
            tokio::spawn(async move { engine.handle(&notification).await })
        })
        .collect();

    let mut fulfilled = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            FulfillmentReport::Fulfilled { ticket_ids, .. } => {
                assert_eq!(ticket_ids.len(), 2);
                fulfilled += 1;
            }
            FulfillmentReport::Failed { showing_id } => {
                assert_eq!(showing_id, ShowingId::new(1));
                failed += 1;
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    assert_eq!((fulfilled, failed), (1, 1));
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(0));
    assert_eq!(store.tickets().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_issue_once() {
    let (store, customer) = seeded(&[(1, 10)]).await;
    let engine = Arc::new(engine(&store));
    let notification = fixtures::succeeded("pi_same", &fixtures::manifest(customer, &[(1, 3)], Money::ZERO));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let notification = notification.clone();
            tokio::spawn(async move { engine.handle(&notification).await })
        })
        .collect();

    let mut fulfilled = 0;
    for handle in handles {
        if let FulfillmentReport::Fulfilled { .. } = handle.await.unwrap().unwrap() {
            fulfilled += 1;
        }
    }

    assert_eq!(fulfilled, 1);
    assert_eq!(store.tickets().await.len(), 3);
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(7));
}

#[tokio::test]
async fn transient_commit_failures_are_retried() {
    let (store, customer) = seeded(&[(1, 5)]).await;
    let engine = engine(&store);
    store.fail_next_commits(2);

    let report = engine
        .handle(&fixtures::succeeded("pi_t", &fixtures::manifest(customer, &[(1, 2)], Money::ZERO)))
        .await
        .unwrap();

    assert!(matches!(report, FulfillmentReport::Fulfilled { .. }));
    assert_eq!(store.tickets().await.len(), 2);
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(3));
}

#[tokio::test]
async fn exhausted_retries_leave_nothing_behind() {
    let (store, customer) = seeded(&[(1, 5)]).await;
    let engine = engine(&store);
    let notification = fixtures::succeeded("pi_busy", &fixtures::manifest(customer, &[(1, 2)], Money::ZERO));
    store.fail_next_commits(100);

    let err = engine.handle(&notification).await.unwrap_err();
    assert!(matches!(err, BoxOfficeError::TransientStore(_)));
    assert!(err.is_retryable());
    assert!(store.tickets().await.is_empty());
    assert!(store.payment_event(&fixtures::event_id("pi_busy")).await.is_none());
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(5));

    // Redelivery once the store recovers behaves like a first delivery.
    store.fail_next_commits(0);
    let report = engine.handle(&notification).await.unwrap();
    assert!(matches!(report, FulfillmentReport::Fulfilled { .. }));
}

#[tokio::test]
async fn tampered_manifest_is_rejected_without_effects() {
    let (store, customer) = seeded(&[(1, 5)]).await;
    let engine = engine(&store);
    let mut notification = fixtures::succeeded("pi_evil", &fixtures::manifest(customer, &[(1, 1)], Money::ZERO));
    if let Some(metadata) = notification.metadata.as_mut() {
        metadata.manifest = metadata.manifest.replace("\"quantity\":1", "\"quantity\":5");
    }

    let err = engine.handle(&notification).await.unwrap_err();
    assert!(matches!(err, BoxOfficeError::Validation(_)));
    assert_eq!(store.available_seats(ShowingId::new(1)).await, Some(5));
    assert!(store.payment_event(&fixtures::event_id("pi_evil")).await.is_none());
}

#[tokio::test]
async fn success_without_manifest_is_rejected() {
    let (store, _) = seeded(&[(1, 5)]).await;
    let engine = engine(&store);

    let missing = PaymentNotification {
        event_id: fixtures::event_id("pi_bare"),
        kind: NotificationKind::Succeeded,
        metadata: None,
    };
    assert!(matches!(
        engine.handle(&missing).await,
        Err(BoxOfficeError::Validation(_))
    ));

    let garbage = PaymentNotification {
        metadata: Some(SessionMetadata {
            manifest: "not json".to_string(),
            manifest_sig: "00".to_string(),
        }),
        ..missing
    };
    assert!(matches!(
        engine.handle(&garbage).await,
        Err(BoxOfficeError::Validation(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tickets_never_exceed_capacity(
        capacity in 0u32..12,
        orders in proptest::collection::vec(1u32..5, 1..10),
    ) {
        let (issued, available) = tokio_test::block_on(async {
            let (store, customer) = seeded(&[(1, capacity)]).await;
            let engine = engine(&store);
            for (n, quantity) in orders.iter().enumerate() {
                let manifest = fixtures::manifest(customer, &[(1, *quantity)], Money::ZERO);
                engine
                    .handle(&fixtures::succeeded(&format!("pi_{n}"), &manifest))
                    .await
                    .unwrap();
            }
            (
                store.tickets().await.len(),
                store.available_seats(ShowingId::new(1)).await.unwrap(),
            )
        });

        prop_assert!(issued <= capacity as usize);
        prop_assert_eq!(issued + available as usize, capacity as usize);
    }
}
