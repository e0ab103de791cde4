//! End-to-end saga scenarios: a saga is only as correct as its behavior
//! under transaction failure, retry, and crash recovery, so these drive
//! the whole coordinator through `Saga` rather than any one module.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use wyrd::{
    BackwardRecovery, Capability, CoordinatorConfig, Dag, DagBuilder, Envelope, Event,
    ForwardRecovery, ForwardRecoveryConfig, InMemoryEventStore, NodeId, Request, Saga,
};

/// The library never installs a global subscriber; tests opt in so
/// `#[tracing::instrument]` output is visible under `cargo test -- --nocapture`.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

struct Always;
#[async_trait]
impl Capability for Always {
    async fn run(&self) -> Result<(), String> {
        Ok(())
    }
}

fn ok() -> Arc<dyn Capability> {
    Arc::new(Always)
}

struct Fails(&'static str);
#[async_trait]
impl Capability for Fails {
    async fn run(&self) -> Result<(), String> {
        Err(self.0.to_string())
    }
}

/// Fails `n` times, then succeeds from then on.
struct FailsNTimes {
    remaining: AtomicU32,
}
#[async_trait]
impl Capability for FailsNTimes {
    async fn run(&self) -> Result<(), String> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err("transient".to_string())
        } else {
            Ok(())
        }
    }
}

/// root -> a -> b -> leaf
fn linear_dag(b_transaction: Arc<dyn Capability>, b_compensation: Arc<dyn Capability>) -> Arc<Dag> {
    let mut builder = DagBuilder::new();
    builder.add_node(0, Request::saga_start("root"));
    builder.add_node(1, Request::process("a", ok(), ok()));
    builder.add_node(2, Request::process("b", b_transaction, b_compensation));
    builder.add_node(3, Request::saga_end("leaf"));
    builder.add_edge(0, 1);
    builder.add_edge(1, 2);
    builder.add_edge(2, 3);
    Arc::new(builder.build().unwrap())
}

fn kind_sequence(events: &[Envelope]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e.event {
            Event::SagaStarted => "SagaStarted",
            Event::TransactionStarted { .. } => "TransactionStarted",
            Event::TransactionEnded { .. } => "TransactionEnded",
            Event::TransactionAborted { .. } => "TransactionAborted",
            Event::CompensationStarted { .. } => "CompensationStarted",
            Event::CompensationEnded { .. } => "CompensationEnded",
            Event::SagaEnded { .. } => "SagaEnded",
        })
        .collect()
}

// S1: every transaction succeeds; the log is a clean forward run with no
// compensations and a non-aborted terminal SagaEnded.
#[tokio::test]
async fn happy_path_runs_every_node_with_no_compensation() {
    init_tracing();
    let dag = linear_dag(ok(), ok());
    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));

    let outcome = saga.run().await.unwrap();
    assert!(!outcome.aborted);

    let events = store.iterate().await;
    assert_eq!(
        kind_sequence(&events),
        vec![
            "SagaStarted",
            "TransactionStarted",
            "TransactionEnded",
            "TransactionStarted",
            "TransactionEnded",
            "SagaEnded",
        ]
    );
    assert!(matches!(events.last().unwrap().event, Event::SagaEnded { aborted: false }));
}

// S2: a transaction fails under the default (backward) policy; the saga
// compensates everything that already committed, in reverse order, and
// terminates aborted.
#[tokio::test]
async fn middle_failure_compensates_predecessors_in_reverse_order() {
    let dag = linear_dag(Arc::new(Fails("business rule violated")), ok());
    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));

    let outcome = saga.run().await.unwrap();
    assert!(outcome.aborted);

    let events = store.iterate().await;
    let comp_started: Vec<NodeId> = events
        .iter()
        .filter_map(|e| match e.event {
            Event::CompensationStarted { node } => Some(node),
            _ => None,
        })
        .collect();
    // Only node 1 ("a") ever ended a transaction; node 2 ("b") aborted and
    // is never itself compensated.
    assert_eq!(comp_started, vec![1]);
    assert!(matches!(events.last().unwrap().event, Event::SagaEnded { aborted: true }));
}

// S4: a transient failure under ForwardRecovery is retried in place —
// the same node commits three times before succeeding, with no
// compensation ever triggered.
#[tokio::test]
async fn transient_failure_is_retried_by_forward_recovery_until_success() {
    let dag = linear_dag(
        Arc::new(FailsNTimes {
            remaining: AtomicU32::new(2),
        }),
        ok(),
    );
    let store = Arc::new(InMemoryEventStore::new());
    let policy = Arc::new(ForwardRecovery::new(ForwardRecoveryConfig {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_attempts: None,
    }));
    let saga = Saga::new(store.clone(), dag, policy);

    let outcome = saga.run().await.unwrap();
    assert!(!outcome.aborted);

    let events = store.iterate().await;
    let started_for_b = events
        .iter()
        .filter(|e| matches!(e.event, Event::TransactionStarted { node: 2 }))
        .count();
    let ended_for_b = events
        .iter()
        .filter(|e| matches!(e.event, Event::TransactionEnded { node: 2 }))
        .count();
    assert_eq!(started_for_b, 3);
    assert_eq!(ended_for_b, 1);
    assert!(events
        .iter()
        .all(|e| !matches!(e.event, Event::CompensationStarted { .. })));
}

// S3/S5: resuming from a replayed prefix that stopped mid-saga only
// redispatches what the log doesn't already show as done; a transaction
// left hanging (started, never ended) by a simulated crash is redone.
#[tokio::test]
async fn resuming_from_a_partial_prefix_only_redoes_what_is_incomplete() {
    let replay_probe = Arc::new(AtomicU32::new(0));

    struct CountingCapability(Arc<AtomicU32>);
    #[async_trait]
    impl Capability for CountingCapability {
        async fn run(&self) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let dag = linear_dag(
        Arc::new(CountingCapability(replay_probe.clone())),
        ok(),
    );

    // A prefix that recorded node 1 ("a") fully committed, but crashed
    // mid-transaction on node 2 ("b"): TransactionStarted with no matching
    // end.
    let prefix = vec![
        Envelope { id: 1, event: Event::SagaStarted },
        Envelope { id: 2, event: Event::TransactionStarted { node: 1 } },
        Envelope { id: 3, event: Event::TransactionEnded { node: 1 } },
        Envelope { id: 4, event: Event::TransactionStarted { node: 2 } },
    ];

    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));
    saga.play(prefix).await.unwrap();

    let outcome = saga.run().await.unwrap();
    assert!(!outcome.aborted);

    // Node 2's capability ran exactly once during the resumed run (the
    // hanging start before the crash left no trace of actually running
    // the capability itself, only of the log entry).
    assert_eq!(replay_probe.load(Ordering::SeqCst), 1);

    let events = store.iterate().await;
    // Node 1 must not have been redispatched: no second TransactionStarted
    // for it beyond the one in the replayed prefix.
    let node1_starts = events
        .iter()
        .filter(|e| matches!(e.event, Event::TransactionStarted { node: 1 }))
        .count();
    assert_eq!(node1_starts, 1);
    assert!(matches!(events.last().unwrap().event, Event::SagaEnded { aborted: false }));
}

// I5: replaying an already-terminated log and calling run() again produces
// no further events — idempotent replay.
#[tokio::test]
async fn rerunning_a_finished_saga_appends_nothing_further() {
    let dag = linear_dag(ok(), ok());
    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));
    saga.run().await.unwrap();
    let finished_log = store.iterate().await;

    let outcome = saga.run().await.unwrap();
    assert!(!outcome.aborted);
    assert_eq!(store.iterate().await, finished_log);
}

// S6: a diamond DAG compensates concurrent siblings before their shared
// ancestor, and never touches a branch that never started.
#[tokio::test]
async fn diamond_compensation_orders_descendants_before_ancestors() {
    // root -> a -> {b, c} -> leaf, where c fails.
    let mut builder = DagBuilder::new();
    builder.add_node(0, Request::saga_start("root"));
    builder.add_node(1, Request::process("a", ok(), ok()));
    builder.add_node(2, Request::process("b", ok(), ok()));
    builder.add_node(3, Request::process("c", Arc::new(Fails("c failed")), ok()));
    builder.add_node(4, Request::saga_end("leaf"));
    builder.add_edge(0, 1);
    builder.add_edge(1, 2);
    builder.add_edge(1, 3);
    builder.add_edge(2, 4);
    builder.add_edge(3, 4);
    let dag = Arc::new(builder.build().unwrap());

    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));
    let outcome = saga.run().await.unwrap();
    assert!(outcome.aborted);

    let events = store.iterate().await;
    let comp_ended: Vec<NodeId> = events
        .iter()
        .filter_map(|e| match e.event {
            Event::CompensationEnded { node } => Some(node),
            _ => None,
        })
        .collect();
    // b and a both ended their transactions (a is b/c's shared ancestor);
    // c never ended, so it is never compensated.
    assert!(comp_ended.contains(&1));
    assert!(comp_ended.contains(&2));
    assert!(!comp_ended.contains(&3));
    // a (the ancestor) must be compensated after b (its descendant).
    let a_pos = comp_ended.iter().position(|n| *n == 1).unwrap();
    let b_pos = comp_ended.iter().position(|n| *n == 2).unwrap();
    assert!(b_pos < a_pos);
}

/// Fails immediately and signals `notify` so a concurrent sibling blocked
/// on it can proceed.
struct FailsAndNotifies {
    reason: &'static str,
    notify: Arc<Notify>,
}
#[async_trait]
impl Capability for FailsAndNotifies {
    async fn run(&self) -> Result<(), String> {
        // `notify_one` stores a permit if nobody is waiting yet, so this
        // is race-free regardless of which sibling the scheduler starts
        // first.
        self.notify.notify_one();
        Err(self.reason.to_string())
    }
}

/// Stays inside `run()` until a failing sibling's failure is observed.
struct WaitsThenSucceeds {
    notify: Arc<Notify>,
}
#[async_trait]
impl Capability for WaitsThenSucceeds {
    async fn run(&self) -> Result<(), String> {
        self.notify.notified().await;
        Ok(())
    }
}

// S3: one sibling is still inside Capability::run() when another sibling's
// transaction aborts. The forward scheduler must drain the in-flight
// sibling to completion rather than cancel it — cancelling it would leave
// a TransactionStarted with no matching TransactionEnded/TransactionAborted
// for a node the log never got to finish, violating I1.
#[tokio::test]
async fn in_flight_sibling_is_drained_not_cancelled_on_abort() {
    let notify = Arc::new(Notify::new());

    // root -> {a, b} -> leaf; a fails and wakes b, b blocks until woken.
    let mut builder = DagBuilder::new();
    builder.add_node(0, Request::saga_start("root"));
    builder.add_node(
        1,
        Request::process(
            "a",
            Arc::new(FailsAndNotifies {
                reason: "a failed",
                notify: notify.clone(),
            }),
            ok(),
        ),
    );
    builder.add_node(
        2,
        Request::process(
            "b",
            Arc::new(WaitsThenSucceeds {
                notify: notify.clone(),
            }),
            ok(),
        ),
    );
    builder.add_node(3, Request::saga_end("leaf"));
    builder.add_edge(0, 1);
    builder.add_edge(0, 2);
    builder.add_edge(1, 3);
    builder.add_edge(2, 3);
    let dag = Arc::new(builder.build().unwrap());

    let store = Arc::new(InMemoryEventStore::new());
    let saga = Saga::new(store.clone(), dag, Arc::new(BackwardRecovery));
    let outcome = saga.run().await.unwrap();
    assert!(outcome.aborted);

    let events = store.iterate().await;
    let kinds = kind_sequence(&events);

    // b was still running when a aborted, but must have been drained to a
    // real TransactionEnded, not silently dropped.
    assert!(events
        .iter()
        .any(|e| matches!(e.event, Event::TransactionEnded { node: 2 })));
    assert!(events
        .iter()
        .any(|e| matches!(e.event, Event::TransactionAborted { node: 1, .. })));
    // a aborted without ever ending, so it is never itself compensated.
    assert!(!events
        .iter()
        .any(|e| matches!(e.event, Event::CompensationStarted { node: 1 })));
    // b did end, so it is compensated once the saga unwinds.
    assert!(events
        .iter()
        .any(|e| matches!(e.event, Event::CompensationEnded { node: 2 })));
    assert_eq!(kinds.last(), Some(&"SagaEnded"));
    assert!(matches!(events.last().unwrap().event, Event::SagaEnded { aborted: true }));
}

#[tokio::test]
async fn max_concurrency_of_one_still_completes_a_saga() {
    let dag = linear_dag(ok(), ok());
    let store = Arc::new(InMemoryEventStore::new());
    let config = CoordinatorConfig {
        max_concurrency: Some(1),
        ..CoordinatorConfig::default()
    };
    let saga = Saga::with_config(store.clone(), dag, Arc::new(BackwardRecovery), config);
    let outcome = saga.run().await.unwrap();
    assert!(!outcome.aborted);
}
