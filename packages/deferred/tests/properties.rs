//! Integration tests for the behavioral guarantees of deferreds, combinators and event queues.
//!
//! Every test runs on its own thread via the watchdog, which also gives it a fresh thread-local
//! scheduler.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use deferred::{
    AggregateError, AsyncSequence, Clock, Deferred, Entry, EventQueue, Outcome, Pulled, Runtime,
    Status, UnhandledRejection, all, all_settled, any, race, rejected, resolved, sequence, spawn,
    wait, with_timeout,
};
use futures::StreamExt;
use testing::{Journal, with_watchdog};

fn recording_runtime() -> (Runtime, Rc<RefCell<Vec<UnhandledRejection>>>) {
    let reports = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&reports);
    let runtime = Runtime::builder()
        .clock(Clock::Virtual)
        .on_unhandled_rejection(move |rejection| sink.borrow_mut().push(rejection.clone()))
        .build();

    (runtime, reports)
}

#[test]
fn settles_only_once() {
    with_watchdog(|| {
        let runtime = Runtime::new();
        let (deferred, settler) = Deferred::<&str, String>::create();

        let other_settler = settler.clone();
        settler.settle_ok("first");
        other_settler.settle_err("second".to_string());
        settler.resolve(resolved("third"));

        assert_eq!(deferred.status(), Status::Fulfilled);
        assert_eq!(runtime.block_on(deferred).unwrap(), Ok("first"));
    });
}

#[test]
fn continuations_run_in_registration_order_after_current_turn() {
    with_watchdog(|| {
        let runtime = Runtime::new();
        let journal = Journal::new();

        let (deferred, settler) = Deferred::<i32, String>::create();

        for name in ["a", "b", "c"] {
            let entries = journal.clone();
            let _derived = deferred.register(
                move |value| {
                    entries.record(format!("{name} got {value}"));
                    Ok::<_, String>(())
                },
                |_| Ok(()),
            );
        }

        settler.settle_ok(1);
        journal.record("settled");

        runtime.run_until_idle();

        assert_eq!(
            journal.entries(),
            ["settled", "a got 1", "b got 1", "c got 1"]
        );
    });
}

#[test]
fn continuation_returning_deferred_is_flattened() {
    with_watchdog(|| {
        let runtime = Runtime::new();

        let next = resolved::<i32, String>(5).then(|value| resolved(value + 1));

        assert_eq!(runtime.block_on(next).unwrap(), Ok(6));
    });
}

#[test]
fn all_keeps_input_order_with_late_input() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();

        let later = wait::<String>(Duration::from_millis(50)).then(|()| Ok(2));
        let combined = all([Entry::Value(1), later.into(), Entry::Value(3)]);

        assert_eq!(runtime.block_on(combined).unwrap(), Ok(vec![1, 2, 3]));
    });
}

#[test]
fn race_settles_like_first_to_settle() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();

        let slow = wait::<String>(Duration::from_secs(2)).then(|()| Ok("slow"));
        let fast = wait::<String>(Duration::from_secs(1)).then(|()| Ok("fast"));

        assert_eq!(runtime.block_on(race([slow, fast])).unwrap(), Ok("fast"));
    });
}

#[test]
fn race_keeps_first_fulfillment_when_loser_rejects_later() {
    with_watchdog(|| {
        let (runtime, reports) = recording_runtime();

        let (first, first_settler) = Deferred::<&str, String>::create();
        let (second, second_settler) = Deferred::<&str, String>::create();
        let winner = race([first, second]);

        second_settler.settle_ok("second");
        runtime.run_until_idle();

        // The race is already decided; the late rejection is observed by the race and ignored.
        first_settler.settle_err("first failed".to_string());

        assert_eq!(runtime.block_on(winner).unwrap(), Ok("second"));

        runtime.run_until_idle();
        assert!(reports.borrow().is_empty());
    });
}

#[test]
fn all_settled_and_any_report_every_input() {
    with_watchdog(|| {
        let runtime = Runtime::new();

        let outcomes = all_settled([
            resolved::<i32, String>(1),
            rejected("two".to_string()),
        ]);
        assert_eq!(
            runtime.block_on(outcomes).unwrap(),
            Ok(vec![Outcome::Fulfilled(1), Outcome::Rejected("two".to_string())])
        );

        let first = any([
            rejected::<i32, String>("a".to_string()),
            rejected("b".to_string()),
        ]);
        let error: AggregateError<String> = runtime.block_on(first).unwrap().unwrap_err();
        assert_eq!(error.into_errors(), ["a".to_string(), "b".to_string()]);
    });
}

#[test]
fn sequence_chains_explicitly() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();
        let start = runtime.now();

        let results = sequence([3_u64, 1, 2], |seconds| {
            wait::<String>(Duration::from_secs(seconds)).then(move |()| Ok(seconds))
        });

        assert_eq!(runtime.block_on(results).unwrap(), Ok(vec![3, 1, 2]));

        // One after another, not concurrently.
        assert_eq!(
            runtime.now().duration_since(start),
            Duration::from_secs(6)
        );
    });
}

#[test]
fn queue_is_fifo_when_pulls_outrun_pushes() {
    with_watchdog(|| {
        let runtime = Runtime::new();
        let queue = EventQueue::new();

        let pulls: Vec<_> = (0..3).map(|_| queue.pull()).collect();

        for value in ["x", "y", "z"] {
            queue.push(value).unwrap();
        }

        let pulled = all(pulls);

        assert_eq!(
            runtime.block_on(pulled).unwrap(),
            Ok(vec![Pulled::Item("x"), Pulled::Item("y"), Pulled::Item("z")])
        );
    });
}

#[test]
fn closed_queue_drains_then_ends() {
    with_watchdog(|| {
        let runtime = Runtime::new();
        let queue = EventQueue::new();

        queue.push(1).unwrap();
        queue.close();
        queue.push(2).unwrap_err();

        let sequence = AsyncSequence::from(queue);

        assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(Some(1)));
        assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
        assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
    });
}

#[test]
fn unhandled_rejection_is_reported_exactly_once() {
    with_watchdog(|| {
        let (runtime, reports) = recording_runtime();

        let lost = rejected::<i32, String>("nobody listens".to_string());
        let id = lost.id();

        runtime.run_until_idle();
        runtime.run_until_idle();

        // Handling it late does not take the report back, nor does it cause a second one.
        let late = lost.recover(|_| Ok(0));
        assert_eq!(runtime.block_on(late).unwrap(), Ok(0));

        drop(runtime);

        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports.first().unwrap().deferred(), id);
        assert_eq!(reports.first().unwrap().reason(), "\"nobody listens\"");
    });
}

#[test]
fn rejection_handled_in_same_turn_is_not_reported() {
    with_watchdog(|| {
        let (runtime, reports) = recording_runtime();

        let (deferred, settler) = Deferred::<i32, String>::create();
        settler.settle_err("handled".to_string());
        let recovered = deferred.recover(|reason| Ok(i32::try_from(reason.len()).unwrap()));

        assert_eq!(runtime.block_on(recovered).unwrap(), Ok(7));
        assert!(reports.borrow().is_empty());
    });
}

#[test]
fn rejection_at_end_of_chain_is_reported_once() {
    with_watchdog(|| {
        let (runtime, reports) = recording_runtime();

        // The intermediate links are handled by the next link; only the tail is unhandled.
        let _tail = resolved::<i32, String>(1)
            .then(|_| Err::<i32, String>("broken".to_string()))
            .then(|value| Ok(value + 1))
            .finally(|| Ok(()));

        runtime.run_until_idle();

        assert_eq!(reports.borrow().len(), 1);
    });
}

async fn fetch(name: &'static str, ok: bool) -> Result<String, String> {
    wait::<String>(Duration::from_millis(10)).await?;

    if ok {
        Ok(format!("{name} fetched"))
    } else {
        Err(format!("{name} failed"))
    }
}

#[test]
fn suspension_capable_function_uses_question_mark() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();

        let good = spawn(async {
            let first = fetch("one", true).await?;
            let second = fetch("two", true).await?;
            Ok::<_, String>(format!("{first}, {second}"))
        });

        let bad = spawn(async {
            let first = fetch("one", true).await?;
            let second = fetch("two", false).await?;
            Ok::<_, String>(format!("{first}, {second}"))
        });

        assert_eq!(
            runtime.block_on(good).unwrap(),
            Ok("one fetched, two fetched".to_string())
        );
        assert_eq!(
            runtime.block_on(bad).unwrap(),
            Err("two failed".to_string())
        );
    });
}

#[test]
fn timeout_is_expressed_by_racing() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();

        let slow = wait::<String>(Duration::from_secs(30)).then(|()| Ok("done"));
        let bounded = with_timeout(slow, Duration::from_secs(5), || "timed out".to_string());

        assert_eq!(
            runtime.block_on(bounded).unwrap(),
            Err("timed out".to_string())
        );
    });
}

#[test]
fn sequence_consumed_as_stream() {
    with_watchdog(|| {
        let runtime = Runtime::builder().clock(Clock::Virtual).build();

        let ticks = AsyncSequence::ticks(Duration::from_secs(1), Some(4));

        let total = spawn(async move {
            let sum = ticks.fold(0, |sum, tick| async move { sum + tick }).await;
            Ok::<_, String>(sum)
        });

        assert_eq!(runtime.block_on(total).unwrap(), Ok(10));
    });
}
