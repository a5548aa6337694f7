use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use metronome::{
    ConsoleReporter, Error, MemoryTaskStore, Scheduler, Task, TaskResult, TaskState, TaskStore,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn success_task() -> Arc<Task> {
    Task::create(|| TaskResult::Success)
}

fn failure_task() -> Arc<Task> {
    Task::create(|| TaskResult::Failure)
}

#[test]
fn simple_tasks_run_to_success() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let task_a = success_task();
    let task_b = success_task();

    scheduler.enqueue(&task_a);
    scheduler.enqueue(&task_b);

    task_b.wait();
    task_a.wait();

    assert_eq!(task_a.state(), TaskState::Success);
    assert_eq!(task_b.state(), TaskState::Success);

    scheduler.shutdown(true);
    assert!(!scheduler.run_once());
}

#[test]
fn dependent_task_waits_for_its_dependency() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let log_b = order.clone();
    let task_b = Task::create(move || {
        log_b.lock().push("b");
        TaskResult::Success
    });
    let log_a = order.clone();
    let task_a = Task::create(move || {
        log_a.lock().push("a");
        TaskResult::Success
    });

    task_a.depends(&task_b);
    assert!(task_a.is_valid());
    assert!(task_a.requires(&task_b.id()));

    scheduler.enqueue(&task_a);
    scheduler.enqueue(&task_b);

    task_b.wait();
    task_a.wait();

    assert_eq!(task_a.state(), TaskState::Success);
    assert_eq!(task_b.state(), TaskState::Success);
    assert_eq!(*order.lock(), vec!["b", "a"]);

    scheduler.shutdown(true);
}

#[test]
fn chain_completes_in_submission_order() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    // Record completion and dispatch instants to check the chain
    // ordering guarantee: each child finishes before the next starts.
    let stamps: Arc<Mutex<Vec<(&'static str, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let stamped = |name: &'static str, stamps: &Arc<Mutex<Vec<(&'static str, Instant)>>>| {
        let stamps = stamps.clone();
        Task::create(move || {
            stamps.lock().push((name, Instant::now()));
            TaskResult::Success
        })
    };

    let task_a = stamped("a", &stamps);
    let task_b = stamped("b", &stamps);
    let task_c = stamped("c", &stamps);
    let chain = Task::chain_of(vec![task_a.clone(), task_b.clone(), task_c.clone()]);

    let task_d = success_task();
    task_d.depends(&chain);
    assert!(task_d.requires(&chain.id()));

    scheduler.enqueue(&task_d);
    scheduler.enqueue(&chain);

    for task in [&task_a, &task_b, &task_c, &chain, &task_d].iter() {
        task.wait();
        assert_eq!(task.state(), TaskState::Success);
    }

    let stamps = stamps.lock();
    let names: Vec<&str> = stamps.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    scheduler.shutdown(true);
}

#[test]
fn chain_with_failing_tail_fails_the_chain_and_dependents() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let task_a = success_task();
    let task_b = success_task();
    let task_c = failure_task();
    let chain = Task::chain_of(vec![task_a.clone(), task_b.clone(), task_c.clone()]);

    let task_d = success_task();
    task_d.depends(&chain);

    scheduler.enqueue(&task_d);
    scheduler.enqueue(&chain);

    task_a.wait();
    task_b.wait();
    task_c.wait();
    chain.wait();
    task_d.wait();

    assert_eq!(task_a.state(), TaskState::Success);
    assert_eq!(task_b.state(), TaskState::Success);
    assert_eq!(task_c.state(), TaskState::Failed);
    assert_eq!(chain.state(), TaskState::Failed);
    assert_eq!(task_d.state(), TaskState::Failed);

    scheduler.shutdown(true);
}

#[test]
fn chain_with_failing_head_fails_everything_downstream() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let task_a = failure_task();
    let task_b = success_task();
    let task_c = success_task();
    let chain = Task::chain_of(vec![task_a.clone(), task_b.clone(), task_c.clone()]);

    let task_d = success_task();
    task_d.depends(&chain);

    scheduler.enqueue(&task_d);
    scheduler.enqueue(&chain);

    task_a.wait();
    task_b.wait();
    task_c.wait();
    chain.wait();
    task_d.wait();

    assert_eq!(task_a.state(), TaskState::Failed);
    assert_eq!(task_b.state(), TaskState::Failed);
    assert_eq!(task_c.state(), TaskState::Failed);
    assert_eq!(chain.state(), TaskState::Failed);
    assert_eq!(task_d.state(), TaskState::Failed);

    scheduler.shutdown(true);
}

#[test]
fn group_children_run_independently_of_a_failure() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let task_a = failure_task();
    let task_b = success_task();
    let task_c = success_task();
    let group = Task::group_of(vec![task_a.clone(), task_b.clone(), task_c.clone()]);

    let task_d = success_task();
    task_d.depends(&group);

    scheduler.enqueue(&task_d);
    scheduler.enqueue(&group);

    task_a.wait();
    task_b.wait();
    task_c.wait();
    group.wait();
    task_d.wait();

    assert_eq!(task_a.state(), TaskState::Failed);
    assert_eq!(task_b.state(), TaskState::Success);
    assert_eq!(task_c.state(), TaskState::Success);
    assert_eq!(group.state(), TaskState::Failed);
    assert_eq!(task_d.state(), TaskState::Failed);

    scheduler.shutdown(true);
}

#[test]
fn retryable_task_succeeds_on_the_second_attempt() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(2).build();
    scheduler.start();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let task_a = Task::builder()
        .retry_interval(Duration::from_millis(10))
        .build(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                TaskResult::Retry
            } else {
                TaskResult::Success
            }
        });
    let task_b = success_task();
    task_b.depends(&task_a);

    scheduler.enqueue(&task_b);
    scheduler.enqueue(&task_a);

    task_a.wait();
    task_b.wait();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(task_a.state(), TaskState::Success);
    assert_eq!(task_b.state(), TaskState::Success);

    scheduler.shutdown(true);
}

#[test]
fn zero_interval_retry_reruns_on_the_next_pass() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(1).build();
    scheduler.start();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let task = Task::builder()
        .retry_interval(Duration::from_secs(0))
        .build(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                TaskResult::Retry
            } else {
                TaskResult::Success
            }
        });

    scheduler.enqueue(&task);
    task.wait();

    assert_eq!(task.state(), TaskState::Success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    scheduler.shutdown(true);
}

#[test]
fn expired_task_is_cancelled_without_running() {
    init_logging();
    let store: Arc<MemoryTaskStore> = Arc::new(MemoryTaskStore::new());
    let scheduler = Scheduler::builder()
        .concurrency(1)
        .store(store.clone())
        .build();
    scheduler.start();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let task = Task::builder()
        .before(Instant::now() - Duration::from_millis(10))
        .build(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TaskResult::Success
        });

    scheduler.enqueue(&task);
    task.wait();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(store.get(&task.id()), Err(Error::Cancelled));

    scheduler.shutdown(true);
}

#[test]
fn premature_task_waits_for_its_window() {
    init_logging();
    let scheduler = Scheduler::builder().concurrency(1).build();
    scheduler.start();

    let delay = Duration::from_millis(100);
    let not_before = Instant::now() + delay;
    let task = Task::builder().after(not_before).build(|| TaskResult::Success);

    scheduler.enqueue(&task);
    task.wait();

    assert_eq!(task.state(), TaskState::Success);
    assert!(Instant::now() >= not_before);

    scheduler.shutdown(true);
}

#[test]
fn reporter_observes_transitions() {
    init_logging();
    let scheduler = Scheduler::builder()
        .concurrency(2)
        .reporter(Arc::new(ConsoleReporter::new()))
        .build();
    scheduler.start();

    let task = success_task();
    scheduler.enqueue(&task);
    task.wait();
    assert_eq!(task.state(), TaskState::Success);

    scheduler.shutdown(true);
}

#[test]
fn completed_tasks_are_finalized_into_the_store() {
    init_logging();
    let store: Arc<MemoryTaskStore> = Arc::new(MemoryTaskStore::new());
    let scheduler = Scheduler::builder()
        .concurrency(1)
        .store(store.clone())
        .build();
    scheduler.start();

    let task = success_task();
    scheduler.enqueue(&task);
    task.wait();

    // Finalization happens on the supervisor's next active sweep; poll
    // the store until the terminal cache answers.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match store.get(&task.id()) {
            Err(Error::Completed) => break,
            Ok(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
            other => panic!("unexpected store answer: {:?}", other),
        }
    }

    scheduler.shutdown(true);
}
