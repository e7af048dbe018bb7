mod common;

use common::{journal, scheduler, tick_until, Ticker, Recorder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysminer_agent::shutdown::ShutdownCoordinator;
use sysminer_collector::Collector;
use sysminer_sink::Sink;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn batches_flow_from_collectors_to_every_sink() {
    let log = journal();
    let first = Recorder::new("first", &log);
    let second = Recorder::new("second", &log);
    let (first_rx, second_rx) = (first.received(), second.received());

    let (mut scheduler, stats) = scheduler(
        Duration::from_secs(10),
        vec![Box::new(Ticker::new("alpha", &log)), Box::new(Ticker::new("beta", &log))],
        vec![Box::new(first), Box::new(second)],
    );

    tick_until(&mut scheduler, |_| first_rx.lock().unwrap().len() >= 2).await;

    let mut seen: Vec<String> = first_rx
        .lock()
        .unwrap()
        .iter()
        .map(|b| b.collector.clone())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen, ["alpha", "beta"]);
    assert_eq!(*first_rx.lock().unwrap(), *second_rx.lock().unwrap());
    assert!(stats.snapshot().batches_collected >= 2);
}

#[tokio::test]
async fn failing_sink_does_not_starve_the_next_one() {
    let log = journal();
    let mut broken = Recorder::new("broken", &log);
    broken.fail_send = true;
    let broken_calls = Arc::clone(&broken.calls);
    let healthy = Recorder::new("healthy", &log);
    let healthy_rx = healthy.received();

    let (mut scheduler, _) = scheduler(
        Duration::from_secs(10),
        vec![Box::new(Ticker::new("alpha", &log))],
        vec![Box::new(broken), Box::new(healthy)],
    );

    tick_until(&mut scheduler, |_| !healthy_rx.lock().unwrap().is_empty()).await;
    assert!(broken_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn busy_collector_is_skipped_not_queued() {
    let log = journal();
    let gate = Arc::new(AtomicBool::new(false));
    let slow = Ticker::new("slow", &log).gated(&gate);
    let slow_polls = Arc::clone(&slow.polls);
    let slow_entered = Arc::clone(&slow.entered);
    let sink = Recorder::new("sink", &log);
    let received = sink.received();

    let (mut scheduler, stats) = scheduler(
        Duration::from_secs(10),
        vec![Box::new(slow), Box::new(Ticker::new("fast", &log))],
        vec![Box::new(sink)],
    );

    // Wait until the slow worker has taken a request and is stuck in poll
    tick_until(&mut scheduler, |_| slow_entered.load(Ordering::SeqCst)).await;
    let skips_before = stats.snapshot().dispatch_skips;
    for _ in 0..3 {
        let report = scheduler.tick().await;
        assert!(report.skipped >= 1);
    }
    assert!(stats.snapshot().dispatch_skips >= skips_before + 3);

    // The fast collector kept reporting while the slow one was stuck
    assert!(received.lock().unwrap().iter().all(|b| b.collector == "fast"));

    gate.store(true, Ordering::SeqCst);
    tick_until(&mut scheduler, |_| {
        received.lock().unwrap().iter().any(|b| b.collector == "slow")
    })
    .await;

    // The skipped offers were dropped, not replayed once the gate opened
    let slow_batches = received
        .lock()
        .unwrap()
        .iter()
        .filter(|b| b.collector == "slow")
        .count();
    assert!((1..=2).contains(&slow_batches));
    assert!(slow_polls.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn slow_delivery_is_reported_as_overrun() {
    let log = journal();
    let mut sink = Recorder::new("sluggish", &log);
    sink.delay = Duration::from_millis(30);

    let (mut scheduler, stats) = scheduler(Duration::from_millis(20), Vec::new(), vec![Box::new(sink)]);

    let report = scheduler.tick().await;
    assert!(report.overrun);
    assert!(report.elapsed >= Duration::from_millis(30));
    assert_eq!(stats.snapshot().tick_overruns, 1);
    assert_eq!(stats.snapshot().ticks, 1);
}

#[tokio::test]
async fn quick_tick_is_not_an_overrun() {
    let log = journal();
    let (mut scheduler, stats) = scheduler(
        Duration::from_secs(10),
        vec![Box::new(Ticker::new("alpha", &log))],
        vec![Box::new(Recorder::new("sink", &log))],
    );
    let report = scheduler.tick().await;
    assert!(!report.overrun);
    assert_eq!(stats.snapshot().tick_overruns, 0);
}

#[tokio::test]
async fn run_stops_when_cancelled() {
    let log = journal();
    let sink = Recorder::new("sink", &log);
    let calls = Arc::clone(&sink.calls);
    let (mut scheduler, _) = scheduler(
        Duration::from_millis(10),
        vec![Box::new(Ticker::new("alpha", &log))],
        vec![Box::new(sink)],
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let ticks = scheduler.run(cancel).await;
    assert!(ticks > 0);
    assert_eq!(calls.load(Ordering::SeqCst) as u64, ticks);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst) as u64, ticks);
}

#[tokio::test]
async fn shutdown_tears_down_in_order_despite_errors() {
    let log = journal();
    let mut closing = Recorder::new("out-a", &log);
    closing.fail_teardown = true;
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(Ticker::new("in-a", &log)),
        Box::new(Ticker::new("in-b", &log).failing_teardown()),
        Box::new(Ticker::new("in-c", &log)),
    ];
    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(closing), Box::new(Recorder::new("out-b", &log))];
    let (scheduler, _) = scheduler(Duration::from_secs(10), collectors, sinks);

    let (workers, aggregator, dispatcher) = scheduler.into_parts();
    let report = ShutdownCoordinator::new(Duration::from_secs(5))
        .shutdown(workers, aggregator, dispatcher)
        .await;

    assert_eq!(*log.lock().unwrap(), ["in-a", "in-b", "in-c", "out-a", "out-b"]);
    assert_eq!(report.torn_down, ["in-a", "in-c", "out-b"]);
    assert_eq!(report.failed, ["in-b", "out-a"]);
    assert!(report.leaked.is_empty());
    assert!(!report.is_clean());
}

#[tokio::test]
async fn stuck_collector_is_leaked_and_the_rest_still_stop() {
    let log = journal();
    let gate = Arc::new(AtomicBool::new(false));
    let stuck = Ticker::new("stuck", &log).gated(&gate);
    let entered = Arc::clone(&stuck.entered);
    let (mut scheduler, _) = scheduler(
        Duration::from_secs(10),
        vec![
            Box::new(stuck),
            Box::new(Ticker::new("fine", &log)),
        ],
        vec![Box::new(Recorder::new("sink", &log))],
    );

    // Make sure the gated worker is inside poll
    tick_until(&mut scheduler, |_| entered.load(Ordering::SeqCst)).await;

    let (workers, aggregator, dispatcher) = scheduler.into_parts();
    let report = ShutdownCoordinator::new(Duration::from_millis(100))
        .shutdown(workers, aggregator, dispatcher)
        .await;

    assert_eq!(report.leaked, ["stuck"]);
    assert_eq!(report.torn_down, ["fine", "sink"]);
    assert_eq!(*log.lock().unwrap(), ["fine", "sink"]);
    gate.store(true, Ordering::SeqCst);
}
