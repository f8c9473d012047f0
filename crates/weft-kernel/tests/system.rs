//! Integration tests for the weft kernel.
//!
//! These exercise whole systems end to end: async operations feeding values
//! back into the event stream, cancellation of interrupted operations,
//! error recovery inside thread bodies, and admission while the scheduler
//! is parked.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use weft_kernel::{Admitter, Bid, SyncHandle, run};

type Recorder = Arc<Mutex<Vec<&'static str>>>;

fn recorder() -> Recorder {
    Arc::new(Mutex::new(Vec::new()))
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ═══════════════════════════════════════════════════════════════════════
//  Async operations
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn op_value_becomes_a_selectable_event() {
    init_tracing();
    let seen = recorder();
    let sink = Arc::clone(&seen);

    run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("worker", |mut handle: SyncHandle<&'static str>| async move {
                let bid = Bid::new().exec(|| async {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok("done")
                });
                let event = handle.sync(bid).await?;
                assert_eq!(event, "done");
                Ok(())
            });
        admitter
            .admit("watcher", move |mut handle: SyncHandle<&'static str>| async move {
                let event = handle.sync(Bid::wait_for(|_| true)).await?;
                sink.lock().unwrap().push(event);
                Ok(())
            });
    })
    .await
    .expect("system should complete");

    assert_eq!(*seen.lock().unwrap(), vec!["done"]);
}

#[tokio::test]
async fn advancing_a_thread_cancels_its_op() {
    init_tracing();
    let seen = recorder();
    let sink = Arc::clone(&seen);
    let started = Instant::now();

    run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("worker", |mut handle: SyncHandle<&'static str>| async move {
                let bid = Bid::wait_for(|e| *e == "timeout").exec(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok("done")
                });
                let event = handle.sync(bid).await?;
                assert_eq!(event, "timeout");
                Ok(())
            });
        admitter
            .admit("trigger", |mut handle: SyncHandle<&'static str>| async move {
                handle.sync(Bid::request(["timeout"])).await?;
                Ok(())
            });
        admitter
            .admit("watcher", move |mut handle: SyncHandle<&'static str>| async move {
                loop {
                    let event = handle.sync(Bid::wait_for(|_| true)).await?;
                    sink.lock().unwrap().push(event);
                }
            });
    })
    .await
    .expect("system should complete");

    // The cancelled op's value must never surface, and the system must not
    // wait out the op's ten seconds.
    assert_eq!(*seen.lock().unwrap(), vec!["timeout"]);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn failed_op_is_thrown_into_the_body_and_recoverable() {
    let seen = recorder();
    let sink = Arc::clone(&seen);

    run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("fragile", |mut handle: SyncHandle<&'static str>| async move {
                let bid: Bid<&'static str> =
                    Bid::new().exec(|| async { anyhow::bail!("disk on fire") });
                match handle.sync(bid).await {
                    Ok(event) => panic!("op failure should be thrown, got event {event}"),
                    Err(err) => {
                        assert!(err.to_string().contains("disk on fire"));
                        handle.sync(Bid::request(["recovered"])).await?;
                        Ok(())
                    }
                }
            });
        admitter
            .admit("watcher", move |mut handle: SyncHandle<&'static str>| async move {
                let event = handle.sync(Bid::wait_for(|e| *e == "recovered")).await?;
                sink.lock().unwrap().push(event);
                Ok(())
            });
    })
    .await
    .expect("system should complete");

    assert_eq!(*seen.lock().unwrap(), vec!["recovered"]);
}

#[tokio::test]
async fn failed_op_left_uncaught_terminates_only_that_thread() {
    let seen = recorder();
    let sink = Arc::clone(&seen);

    run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("fragile", |mut handle: SyncHandle<&'static str>| async move {
                let bid: Bid<&'static str> =
                    Bid::new().exec(|| async { anyhow::bail!("no recovery here") });
                handle.sync(bid).await?;
                Ok(())
            });
        admitter
            .admit("peer", |mut handle: SyncHandle<&'static str>| async move {
                handle.sync(Bid::request(["still-alive"])).await?;
                Ok(())
            });
        admitter
            .admit("watcher", move |mut handle: SyncHandle<&'static str>| async move {
                let event = handle.sync(Bid::wait_for(|e| *e == "still-alive")).await?;
                sink.lock().unwrap().push(event);
                Ok(())
            });
    })
    .await
    .expect("one thread's error must not take the system down");

    assert_eq!(*seen.lock().unwrap(), vec!["still-alive"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Dynamic admission
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn admission_from_a_suspended_body_wakes_the_scheduler() {
    let seen = recorder();
    let sink = Arc::clone(&seen);

    let label = run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("consumer", move |mut handle: SyncHandle<&'static str>| async move {
                let event = handle.sync(Bid::wait_for(|e| *e == "late")).await?;
                sink.lock().unwrap().push(event);
                Ok(())
            });

        // With nothing selectable and no ops, the scheduler parks here.
        tokio::time::sleep(Duration::from_millis(50)).await;

        admitter
            .admit("producer", |mut handle: SyncHandle<&'static str>| async move {
                handle.sync(Bid::request(["late"])).await?;
                Ok(())
            });
        "all admitted"
    })
    .await
    .expect("system should complete");

    assert_eq!(label, "all admitted");
    assert_eq!(*seen.lock().unwrap(), vec!["late"]);
}

#[tokio::test]
async fn threads_admitted_in_one_call_chain_interleave_by_turns() {
    let seen = recorder();
    let sink = Arc::clone(&seen);

    run(move |admitter: Admitter<&'static str>| async move {
        admitter
            .admit("ping", |mut handle: SyncHandle<&'static str>| async move {
                for _ in 0..3 {
                    handle.sync(Bid::request(["ping"])).await?;
                    handle.sync(Bid::wait_for(|e| *e == "pong")).await?;
                }
                Ok(())
            });
        admitter
            .admit("pong", |mut handle: SyncHandle<&'static str>| async move {
                loop {
                    handle.sync(Bid::wait_for(|e| *e == "ping")).await?;
                    handle.sync(Bid::request(["pong"])).await?;
                }
            });
        admitter
            .admit("umpire", move |mut handle: SyncHandle<&'static str>| async move {
                loop {
                    let event = handle.sync(Bid::wait_for(|_| true)).await?;
                    sink.lock().unwrap().push(event);
                }
            });
    })
    .await
    .expect("system should complete");

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["ping", "pong", "ping", "pong", "ping", "pong"]
    );
}
