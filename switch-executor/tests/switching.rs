mod common;

use std::sync::Arc;

use serde_json::json;
use switch_common::signal::{ParameterChange, ParameterChangeValue};
use switch_executor::builtin::{PASSTHROUGH, RUNNING_MEAN, RUNNING_SUM};
use switch_executor::error::SwitchError;
use switch_executor::mechanism::SwitchState;
use switch_executor::strategy::StrategyKind;

use common::*;

macro_rules! strategy_tests {
    ($($name:ident),* $(,)?) => {
        mod parallel_track {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    super::$name(super::StrategyKind::ParallelTrack).await;
                }
            )*
        }

        mod quiesce {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $name() {
                    super::$name(super::StrategyKind::Quiesce).await;
                }
            )*
        }
    };
}

strategy_tests!(
    transition_returns_to_stable,
    every_item_is_emitted_once_in_order,
    state_is_carried_into_incoming_algorithm,
    parameter_changes_apply_before_replayed_items,
    busy_and_unknown_signals_are_rejected,
    partial_state_transfer_still_completes,
);

async fn transition_returns_to_stable(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, RUNNING_SUM, listener.clone());

    for value in 0..5 {
        mechanism.execute(json!(value)).await.unwrap();
    }
    let started = mechanism
        .handle_signal(signal(RUNNING_MEAN))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(started.from, RUNNING_SUM);
    assert_eq!(started.to, RUNNING_MEAN);
    assert_eq!(started.report.is_some(), kind == StrategyKind::ParallelTrack);
    assert_eq!(mechanism.state(), SwitchState::Transitioning);
    assert_eq!(mechanism.incoming_algorithm(), Some(RUNNING_MEAN));

    for value in 5..10 {
        mechanism.execute(json!(value)).await.unwrap();
    }
    let outputs = run_until_stable(&mut mechanism).await;

    assert_eq!(outputs.len(), 10);
    assert_eq!(mechanism.state(), SwitchState::Stable);
    assert_eq!(mechanism.current_algorithm(), RUNNING_MEAN);
    assert_eq!(mechanism.incoming_algorithm(), None);
    assert_eq!(mechanism.in_flight(), 0);
    assert_eq!(
        listener.events(),
        vec![started_event(RUNNING_SUM, RUNNING_MEAN), completed(RUNNING_MEAN)]
    );
    mechanism.shutdown().await;
}

async fn every_item_is_emitted_once_in_order(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, SLOW_A, listener);

    for value in 0..10 {
        mechanism.execute(json!(value)).await.unwrap();
    }
    mechanism.handle_signal(signal(TAG_B)).await.unwrap();
    for value in 10..20 {
        mechanism.execute(json!(value)).await.unwrap();
    }
    let outputs = run_until_stable(&mut mechanism).await;

    let sequences: Vec<u64> = outputs.iter().map(|o| o.sequence).collect();
    assert_eq!(sequences, (0..20).collect::<Vec<u64>>());
    for output in &outputs {
        let expected = if output.sequence < 10 { SLOW_A } else { TAG_B };
        assert_eq!(output.payload["alg"], json!(expected), "item {}", output.sequence);
        assert_eq!(output.payload["seq"], json!(output.sequence));
        // The counter moves with the state, so no item is seen twice.
        assert_eq!(output.payload["seen"], json!(output.sequence + 1));
    }
    mechanism.shutdown().await;
}

async fn state_is_carried_into_incoming_algorithm(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, RUNNING_SUM, listener.clone());

    for value in [1, 2, 3] {
        mechanism.execute(json!(value)).await.unwrap();
    }
    mechanism.handle_signal(signal(RUNNING_MEAN)).await.unwrap();
    mechanism.execute(json!(4)).await.unwrap();
    mechanism
        .execute(json!({"key": "other", "value": 10}))
        .await
        .unwrap();
    let outputs = run_until_stable(&mut mechanism).await;

    let payloads: Vec<_> = outputs.into_iter().map(|o| o.payload).collect();
    assert_eq!(
        payloads,
        vec![
            json!({"key": "default", "total": 1.0, "count": 1}),
            json!({"key": "default", "total": 3.0, "count": 2}),
            json!({"key": "default", "total": 6.0, "count": 3}),
            json!({"key": "default", "mean": 2.5, "count": 4}),
            json!({"key": "other", "mean": 4.0, "count": 5}),
        ]
    );
    assert!(!listener
        .events()
        .iter()
        .any(|e| matches!(e, SwitchEvent::TransferFailed { .. })));
    mechanism.shutdown().await;
}

async fn parameter_changes_apply_before_replayed_items(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, RUNNING_SUM, listener);

    for value in [1, 2, 3] {
        mechanism.execute(json!(value)).await.unwrap();
    }
    let change = ParameterChange::new("window", ParameterChangeValue::Int(1));
    mechanism
        .handle_signal(signal(RUNNING_MEAN).with_changes(vec![change]))
        .await
        .unwrap();
    mechanism.execute(json!(10)).await.unwrap();
    let outputs = run_until_stable(&mut mechanism).await;

    assert_eq!(
        outputs.last().map(|o| o.payload.clone()),
        Some(json!({"key": "default", "mean": 10.0, "count": 4}))
    );
    mechanism.shutdown().await;
}

async fn busy_and_unknown_signals_are_rejected(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, RUNNING_SUM, listener.clone());

    let unknown = mechanism.handle_signal(signal("missing")).await;
    assert!(matches!(unknown, Err(SwitchError::UnknownAlgorithm(name)) if name == "missing"));
    assert_eq!(mechanism.state(), SwitchState::Stable);
    assert!(listener.events().is_empty());

    mechanism.handle_signal(signal(RUNNING_MEAN)).await.unwrap();
    for next in [PASSTHROUGH, RUNNING_SUM, RUNNING_MEAN] {
        let busy = mechanism.handle_signal(signal(next)).await;
        assert_eq!(
            busy,
            Err(SwitchError::TransitionBusy {
                from: RUNNING_SUM.to_owned(),
                to: RUNNING_MEAN.to_owned(),
            })
        );
    }
    assert_eq!(mechanism.incoming_algorithm(), Some(RUNNING_MEAN));

    mechanism.execute(json!(1)).await.unwrap();
    run_until_stable(&mut mechanism).await;

    assert_eq!(mechanism.current_algorithm(), RUNNING_MEAN);
    assert_eq!(
        listener.events(),
        vec![started_event(RUNNING_SUM, RUNNING_MEAN), completed(RUNNING_MEAN)]
    );

    // A fresh transition is accepted once the previous one has completed.
    assert!(mechanism
        .handle_signal(signal(PASSTHROUGH))
        .await
        .unwrap()
        .is_some());
    mechanism.shutdown().await;
}

async fn partial_state_transfer_still_completes(kind: StrategyKind) {
    let listener = Arc::new(RecordingListener::default());
    let mut mechanism = start_mechanism(kind, RUNNING_SUM, listener.clone());

    mechanism.execute(json!(1)).await.unwrap();
    mechanism.execute(json!(2)).await.unwrap();
    mechanism.handle_signal(signal(MAP_HISTORY)).await.unwrap();
    mechanism.execute(json!(3)).await.unwrap();
    let outputs = run_until_stable(&mut mechanism).await;

    assert_eq!(mechanism.state(), SwitchState::Stable);
    assert_eq!(mechanism.current_algorithm(), MAP_HISTORY);
    assert_eq!(
        listener.events(),
        vec![
            started_event(RUNNING_SUM, MAP_HISTORY),
            SwitchEvent::TransferFailed {
                field: "history".to_owned()
            },
            completed(MAP_HISTORY),
        ]
    );
    // `count` made it across even though `history` did not.
    assert_eq!(
        outputs.last().map(|o| o.payload.clone()),
        Some(json!({"count": 3}))
    );
    mechanism.shutdown().await;
}
