//! End-to-end tests for the four execution strategies.

#[cfg(test)]
mod tests {
    use crate::cancellation::BackgroundTasks;
    use crate::context::TaskContext;
    use crate::errors::{PipeError, TaskError};
    use crate::events::CollectingEventSink;
    use crate::pipe::{Pipe, PipeConfig, Strategy};
    use crate::task::{async_task, task, TaskRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> TaskRef<i32> {
        let counter = counter.clone();
        task(name, move |_ctx, x: &i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(*x)
        })
    }

    fn sleeper(name: &str, millis: u64) -> TaskRef<i32> {
        async_task(name, move |_ctx, x: i32| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, TaskError>(x)
        })
    }

    #[tokio::test]
    async fn test_sequential_chains_outputs() {
        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("plus_one", |_ctx, x: &i32| Ok(x + 1)),
            task("times_two", |_ctx, x: &i32| Ok(x * 2)),
        ]);

        let out = pipe.execute(&TaskContext::new(), Strategy::Sequential, 1).await.unwrap();
        assert_eq!(out, 4);
    }

    #[tokio::test]
    async fn test_sequential_skip_keeps_value() {
        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("nothing", |_ctx, _x: &i32| Err(TaskError::Skip)),
            task("times_three", |_ctx, x: &i32| Ok(x * 3)),
        ]);

        let out = pipe.execute(&TaskContext::new(), Strategy::Sequential, 2).await.unwrap();
        assert_eq!(out, 6);
    }

    #[tokio::test]
    async fn test_concurrent_returns_input_and_runs_each_task_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        for name in ["a", "b", "c"] {
            let counter = counter.clone();
            pipe.push(task(name, move |_ctx, x: &i32| {
                assert_eq!(*x, 1);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(x + 1)
            }));
        }

        let out = pipe.execute(&TaskContext::new(), Strategy::Concurrent, 1).await.unwrap();
        assert_eq!(out, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_skip_counts_as_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("nothing", |_ctx, _x: &i32| Err(TaskError::Skip)),
            counting("count", &counter),
        ]);

        let out = pipe.execute(&TaskContext::new(), Strategy::Concurrent, 7).await.unwrap();
        assert_eq!(out, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_bounds_in_flight_tasks() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let mut pipe = Pipe::with_config(PipeConfig::new().with_batch_size(10));
        for i in 0..25 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let done = done.clone();
            pipe.push(async_task(format!("worker{i}"), move |_ctx, x: i32| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let done = done.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(x)
                }
            }));
        }

        pipe.execute(&TaskContext::new(), Strategy::Concurrent, 0).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 25);
        assert!(peak.load(Ordering::SeqCst) <= 10);
    }

    #[tokio::test]
    async fn test_concurrent_failure_stops_later_batches() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::with_config(PipeConfig::new().with_batch_size(2));
        pipe.enqueue([
            counting("ok", &counter),
            task("broken", |_ctx, _x: &i32| Err(TaskError::failed("store down"))),
            counting("later1", &counter),
            counting("later2", &counter),
        ]);

        let failure = pipe
            .execute(&TaskContext::new(), Strategy::Concurrent, 3)
            .await
            .unwrap_err();

        assert_eq!(failure.value, 3);
        assert!(matches!(failure.error, PipeError::Task { index: 1, .. }));
        assert!(counter.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_concurrent_failure_aborts_batch_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_clone = finished.clone();

        let mut pipe = Pipe::new();
        pipe.enqueue([
            async_task("slow", move |_ctx, x: i32| {
                let finished = finished_clone.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(x)
                }
            }),
            task("broken", |_ctx, _x: &i32| Err(TaskError::failed("boom"))),
        ]);

        let start = Instant::now();
        let result = pipe.execute(&TaskContext::new(), Strategy::Concurrent, 0).await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_result_skip_then_succeed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let third_counter = counter.clone();

        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("nothing", |_ctx, _x: &i32| Err(TaskError::Skip)),
            task("times_four", |_ctx, x: &i32| Ok(x * 4)),
            task("times_five", move |_ctx, x: &i32| {
                third_counter.fetch_add(1, Ordering::SeqCst);
                Ok(x * 5)
            }),
        ]);

        let out = pipe
            .execute(&TaskContext::new(), Strategy::SequentialWithFirstResult, 3)
            .await
            .unwrap();

        assert_eq!(out, 12);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocking_first_commits_then_replicates() {
        let (tx, mut rx) = mpsc::unbounded_channel::<i32>();
        let background = Arc::new(BackgroundTasks::new());

        let mut pipe = Pipe::new().with_background(background.clone());
        pipe.push(task("primary", |_ctx, x: &i32| Ok(x + 10)));
        for factor in [5, 10] {
            let tx = tx.clone();
            pipe.push(async_task(format!("replica_x{factor}"), move |_ctx, x: i32| {
                let tx = tx.clone();
                async move {
                    assert_eq!(x, 5);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    let _ = tx.send(x * factor);
                    Ok::<_, TaskError>(x)
                }
            }));
        }

        let start = Instant::now();
        let out = pipe
            .execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 5)
            .await
            .unwrap();

        assert_eq!(out, 15);
        assert!(start.elapsed() < Duration::from_millis(200));

        // Replication is observed separately, after the call returned.
        let mut total = 0;
        for _ in 0..2 {
            total += rx.recv().await.unwrap();
        }
        assert_eq!(total, 75);

        background.wait_idle().await;
        assert_eq!(background.pending(), 0);
    }

    #[tokio::test]
    async fn test_blocking_first_replicas_survive_caller_cancellation() {
        let background = Arc::new(BackgroundTasks::new());
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();

        let mut pipe = Pipe::new().with_background(background.clone());
        pipe.enqueue([
            task("primary", |_ctx, x: &i32| Ok(*x)),
            async_task("replica", move |ctx: TaskContext, x: i32| {
                let observed = observed_clone.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    assert!(ctx.is_detached());
                    if !ctx.is_cancelled() {
                        observed.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok::<_, TaskError>(x)
                }
            }),
        ]);

        let ctx = TaskContext::new();
        pipe.execute(&ctx, Strategy::SequentialBlockingOnlyFirst, 1).await.unwrap();
        ctx.cancel("request finished");

        background.wait_idle().await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blocking_first_background_errors_not_surfaced() {
        let background = Arc::new(BackgroundTasks::new());
        let sink = Arc::new(CollectingEventSink::new());

        let mut pipe = Pipe::new()
            .with_background(background.clone())
            .with_event_sink(sink.clone());
        pipe.enqueue([
            task("primary", |_ctx, x: &i32| Ok(x * 2)),
            task("replica", |_ctx, _x: &i32| Err(TaskError::failed("replica down"))),
        ]);

        let out = pipe
            .execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 4)
            .await
            .unwrap();
        assert_eq!(out, 8);

        background.wait_idle().await;
        assert_eq!(background.failures(), 1);
        assert_eq!(sink.events_of_type("task.background_failed").len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_first_refuses_after_shutdown() {
        let background = Arc::new(BackgroundTasks::new());
        background.shutdown().await;

        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new().with_background(background);
        pipe.enqueue([counting("primary", &counter), counting("replica", &counter)]);

        let failure = pipe
            .execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 1)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipeError::ShuttingDown));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blocking_first_hands_off_every_replica() {
        let background = Arc::new(BackgroundTasks::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new().with_background(background.clone());
        pipe.enqueue([
            counting("primary", &counter),
            counting("replica_a", &counter),
            counting("replica_b", &counter),
            counting("replica_c", &counter),
        ]);

        pipe.execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 1)
            .await
            .unwrap();
        background.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        background.shutdown().await;
        let failure = pipe
            .execute(&TaskContext::new(), Strategy::SequentialBlockingOnlyFirst, 1)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PipeError::ShuttingDown));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unknown_strategy_runs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        pipe.enqueue([counting("a", &counter), counting("b", &counter)]);

        let failure = pipe
            .execute_named(&TaskContext::new(), "FIRE_AND_FORGET", 1)
            .await
            .unwrap_err();

        assert!(failure.error.to_string().contains("FIRE_AND_FORGET"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_runs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        pipe.enqueue([counting("a", &counter), counting("b", &counter)]);

        let ctx = TaskContext::new();
        ctx.cancel("deadline exceeded");

        for strategy in Strategy::ALL {
            let failure = pipe.execute(&ctx, strategy, 1).await.unwrap_err();
            assert!(matches!(failure.error, PipeError::Cancelled(ref r) if r == "deadline exceeded"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_in_flight_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("plus_one", |_ctx, x: &i32| Ok(x + 1)),
            sleeper("slow", 5_000),
            counting("after", &counter),
        ]);

        let ctx = TaskContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("client disconnected");
        });

        let start = Instant::now();
        let failure = pipe.execute(&ctx, Strategy::Sequential, 1).await.unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(failure.value, 2);
        assert!(matches!(failure.error, PipeError::Cancelled(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_cancellation_returns_input() {
        let mut pipe = Pipe::new();
        pipe.enqueue([sleeper("slow1", 5_000), sleeper("slow2", 5_000)]);

        let ctx = TaskContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel("shutdown");
        });

        let failure = pipe.execute(&ctx, Strategy::Concurrent, 11).await.unwrap_err();
        assert_eq!(failure.value, 11);
        assert!(matches!(failure.error, PipeError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_pipe_shared_between_concurrent_callers() {
        let mut pipe = Pipe::new();
        pipe.enqueue([
            task("plus_one", |_ctx, x: &i32| Ok(x + 1)),
            task("times_two", |_ctx, x: &i32| Ok(x * 2)),
        ]);
        let pipe = Arc::new(pipe);

        let mut handles = Vec::new();
        for i in 0..16 {
            let pipe = pipe.clone();
            handles.push(tokio::spawn(async move {
                pipe.execute(&TaskContext::new(), Strategy::Sequential, i).await
            }));
        }

        for (i, handle) in (0..16).zip(handles) {
            assert_eq!(handle.await.unwrap().unwrap(), (i + 1) * 2);
        }
    }

    #[tokio::test]
    async fn test_repeated_concurrent_runs_leave_caller_token_clean() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pipe = Pipe::new();
        pipe.enqueue([counting("a", &counter), counting("b", &counter)]);

        let ctx = TaskContext::new();
        for _ in 0..500 {
            pipe.execute(&ctx, Strategy::Concurrent, 1).await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
        assert_eq!(ctx.token().callback_count(), 0);

        // The caller's token still reaches a fan-out started afterwards.
        ctx.cancel("caller gone");
        let failure = pipe.execute(&ctx, Strategy::Concurrent, 1).await.unwrap_err();
        assert!(matches!(failure.error, PipeError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_one_task_in_several_pipes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shared = counting("shared", &counter);

        let first = Pipe::new().with_task(shared.clone());
        let second = Pipe::new().with_task(shared);

        first.execute(&TaskContext::new(), Strategy::Sequential, 1).await.unwrap();
        second.execute(&TaskContext::new(), Strategy::Concurrent, 1).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
