mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use taskchain_core::execution::TaskBatch;
use taskchain_core::orchestration::{ExecutionMode, TaskGraphOwner};
use taskchain_core::state_machine::TaskState;

type Seen<I> = Arc<Mutex<Vec<(String, Option<I>)>>>;

fn seen<I>() -> Seen<I> {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_follow_ons_receive_owner_value() {
    let harness = Harness::new(4);
    let log = HookLog::default();
    let seen = seen::<String>();

    let mut graph = TaskGraphOwner::new(ValueTask::new("extract", "rows.csv".to_string(), &log));
    graph
        .add_follow_on("index", InputRecorder::new("index", &seen, &log))
        .add_follow_on("notify", InputRecorder::new("notify", &seen, &log));

    let result = within(harness.scheduler.submit_graph(graph).join_all()).await;

    assert_eq!(result.owner.value().map(String::as_str), Some("rows.csv"));
    assert_eq!(result.follow_ons.len(), 2);
    assert!(result
        .follow_ons
        .iter()
        .all(|f| f.state == TaskState::Succeeded));

    let mut inputs = seen.lock().clone();
    inputs.sort();
    assert_eq!(
        inputs,
        vec![
            ("index".to_string(), Some("rows.csv".to_string())),
            ("notify".to_string(), Some("rows.csv".to_string())),
        ]
    );
    assert_eq!(log.hooks_for("extract"), vec![Hook::Succeeded]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_follow_ons_never_overlap() {
    let harness = Harness::new(4);
    let log = HookLog::default();
    let seen = seen::<u32>();
    let timeline = Timeline::default();

    let mut graph = TaskGraphOwner::new(ValueTask::new("owner", 5u32, &log))
        .with_execution_mode(ExecutionMode::Sequential);
    for (name, delay) in [("first", 60u64), ("second", 30), ("third", 0)] {
        graph.add_follow_on(
            name,
            InputRecorder::new(name, &seen, &log)
                .with_timeline(&timeline)
                .with_delay(Duration::from_millis(delay)),
        );
    }

    let follow_ons = within(harness.scheduler.submit_graph(graph).wait_follow_ons()).await;

    assert_eq!(
        timeline.events(),
        vec![
            "start:first",
            "end:first",
            "start:second",
            "end:second",
            "start:third",
            "end:third"
        ]
    );
    assert_eq!(
        follow_ons
            .iter()
            .map(|f| f.registration_id.as_str())
            .collect::<Vec<_>>(),
        vec!["first", "second", "third"]
    );
    // each follow-on's hook ran before the next one started
    assert_eq!(
        log.hooks_for("first")
            .into_iter()
            .chain(log.hooks_for("second"))
            .chain(log.hooks_for("third"))
            .collect::<Vec<_>>(),
        vec![Hook::Succeeded, Hook::Succeeded, Hook::Succeeded]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_owner_result_still_runs_follow_ons() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let seen = seen::<Option<String>>();

    let graph = TaskGraphOwner::new(ValueTask::new("lookup", None::<String>, &log))
        .with_follow_on("a", InputRecorder::new("a", &seen, &log))
        .with_follow_on("b", InputRecorder::new("b", &seen, &log));

    let result = within(harness.scheduler.submit_graph(graph).join_all()).await;

    assert!(result.owner.is_succeeded());
    assert!(result
        .follow_ons
        .iter()
        .all(|f| f.state == TaskState::Succeeded));
    assert!(seen.lock().iter().all(|(_, input)| input == &Some(None)));
    assert_eq!(seen.lock().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_follow_on_is_isolated() {
    let harness = Harness::new(4);
    let log = HookLog::default();
    let seen = seen::<u32>();

    let graph = TaskGraphOwner::new(ValueTask::new("owner", 1u32, &log))
        .with_execution_mode(ExecutionMode::Parallel)
        .with_follow_on("healthy", InputRecorder::new("healthy", &seen, &log))
        .with_follow_on(
            "broken",
            InputRecorder::new("broken", &seen, &log).failing(),
        );

    let handle = harness.scheduler.submit_graph(graph);
    let owner_job = handle.job();
    let result = within(handle.join_all()).await;

    assert!(result.owner.is_succeeded());
    let state_of = |id: &str| {
        result
            .follow_ons
            .iter()
            .find(|f| f.registration_id == id)
            .map(|f| f.state)
    };
    assert_eq!(state_of("healthy"), Some(TaskState::Succeeded));
    assert_eq!(state_of("broken"), Some(TaskState::Failed));
    assert_eq!(owner_job.state(), TaskState::Succeeded);
    assert_eq!(log.hooks_for("owner"), vec![Hook::Succeeded]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owner_failure_abandons_follow_ons() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let seen = seen::<String>();

    let graph = TaskGraphOwner::new(FailTask::new("owner", "source missing", &log))
        .with_follow_on("a", InputRecorder::new("a", &seen, &log))
        .with_follow_on("b", InputRecorder::new("b", &seen, &log));

    let result = within(harness.scheduler.submit_graph(graph).join_all()).await;

    assert!(result.owner.is_failed());
    assert!(result
        .follow_ons
        .iter()
        .all(|f| f.state == TaskState::Cancelled));
    assert!(seen.lock().is_empty());
    assert_eq!(log.hooks_for("a"), vec![Hook::Cancelled]);
    assert_eq!(log.hooks_for("b"), vec![Hook::Cancelled]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_owner_abandons_follow_ons() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let seen = seen::<()>();
    let owner = GatedTask::new("owner", &log);
    let started = Arc::clone(&owner.started);

    let graph = TaskGraphOwner::new(owner).with_follow_on("a", InputRecorder::new("a", &seen, &log));
    let handle = harness.scheduler.submit_graph(graph);
    within(started.notified()).await;
    assert!(handle.cancel());

    let result = within(handle.join_all()).await;
    assert!(result.owner.is_cancelled());
    assert_eq!(result.follow_ons[0].state, TaskState::Cancelled);
    assert!(seen.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_intermediate_follow_on_does_not_stop_chain() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let seen = seen::<u32>();

    let graph = TaskGraphOwner::new(ValueTask::new("owner", 3u32, &log))
        .with_execution_mode(ExecutionMode::Sequential)
        .with_follow_on(
            "slow",
            InputRecorder::new("slow", &seen, &log).with_delay(Duration::from_millis(300)),
        )
        .with_follow_on("last", InputRecorder::new("last", &seen, &log));

    let handle = harness.scheduler.submit_graph(graph);
    let scheduler = harness.scheduler.clone();
    within(async move {
        loop {
            let slow = scheduler
                .active_tasks()
                .into_iter()
                .find(|t| t.title == "slow" && t.state == TaskState::Running);
            if let Some(task) = slow {
                assert!(scheduler.cancel(task.id));
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let follow_ons = within(handle.wait_follow_ons()).await;
    assert_eq!(
        follow_ons.iter().map(|f| f.state).collect::<Vec<_>>(),
        vec![TaskState::Cancelled, TaskState::Succeeded]
    );
    assert_eq!(log.hooks_for("slow"), vec![Hook::Cancelled]);
    assert_eq!(log.hooks_for("last"), vec![Hook::Succeeded]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_graph_chains_through() {
    let harness = Harness::new(4);
    let log = HookLog::default();
    let outer_seen = seen::<String>();
    let inner_seen = seen::<usize>();

    let nested = TaskGraphOwner::new(InputRecorder::new("middle", &outer_seen, &log))
        .with_follow_on("leaf", InputRecorder::new("leaf", &inner_seen, &log));
    let mut graph = TaskGraphOwner::new(ValueTask::new("root", "payload".to_string(), &log));
    graph.add_follow_on_graph("middle", nested);

    let follow_ons = within(harness.scheduler.submit_graph(graph).wait_follow_ons()).await;
    assert_eq!(follow_ons.len(), 1);
    assert_eq!(follow_ons[0].state, TaskState::Succeeded);
    assert_eq!(
        outer_seen.lock().clone(),
        vec![("middle".to_string(), Some("payload".to_string()))]
    );

    within(async {
        while inner_seen.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    // middle returns the number of inputs it has seen
    assert_eq!(inner_seen.lock()[0], ("leaf".to_string(), Some(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graph_in_sequential_batch() {
    let harness = Harness::new(2);
    let log = HookLog::default();
    let seen = seen::<u8>();

    let batch = TaskBatch::new()
        .with_graph(
            TaskGraphOwner::new(ValueTask::new("graph owner", 9u8, &log))
                .with_follow_on("child", InputRecorder::new("child", &seen, &log)),
        )
        .with_task(ValueTask::new("after", (), &log));

    let outcomes = within(harness.scheduler.submit_sequential(batch).wait()).await;
    assert_eq!(
        outcomes.iter().map(|o| o.title.as_str()).collect::<Vec<_>>(),
        vec!["graph owner", "after"]
    );
    assert!(outcomes.iter().all(|o| o.state == TaskState::Succeeded));

    within(async {
        while seen.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(seen.lock()[0].1, Some(9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_follow_ons_of_a_finishing_owner() {
    let harness = Harness::new(4);
    let log = HookLog::default();
    let seen = seen::<()>();

    let owner = GatedTask::new("owner", &log);
    let owner_started = Arc::clone(&owner.started);
    let mut graph = TaskGraphOwner::new(owner);
    for i in 0..6 {
        let name = format!("follow-on {i}");
        graph.add_follow_on(&name, InputRecorder::new(&name, &seen, &log));
    }
    let graph_handle = harness.scheduler.submit_graph(graph);

    let head = GatedTask::new("head", &log);
    let head_started = Arc::clone(&head.started);
    let mut batch = TaskBatch::new().with_task(head);
    for i in 0..3 {
        batch.add_task(InputRecorder::<()>::new(&format!("member {i}"), &seen, &log));
    }
    let sequence = harness.scheduler.submit_sequential(batch);

    within(owner_started.notified()).await;
    within(head_started.notified()).await;

    tokio_test::assert_ok!(harness.scheduler.shutdown(Duration::from_secs(5)).await);

    // everything launched after the owner finished was resolved before shutdown returned
    assert_eq!(log.len(), 1 + 6 + 1 + 3);
    for i in 0..6 {
        assert_eq!(log.hooks_for(&format!("follow-on {i}")), vec![Hook::Cancelled]);
    }
    for i in 0..3 {
        assert_eq!(log.hooks_for(&format!("member {i}")), vec![Hook::Cancelled]);
    }
    let hook_thread = harness.scheduler.hook_thread_id();
    assert!(log.threads().iter().all(|t| *t == hook_thread));
    assert!(seen.lock().is_empty());

    let follow_ons = within(graph_handle.wait_follow_ons()).await;
    assert!(follow_ons.iter().all(|f| f.state == TaskState::Cancelled));
    let outcomes = within(sequence.wait()).await;
    assert!(outcomes.iter().all(|o| o.state == TaskState::Cancelled));
}
