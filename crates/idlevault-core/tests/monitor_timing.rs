//! Timing behaviour of the trigger sources, with durations scaled down.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use idlevault_core::app::RunDispatcher;
use idlevault_core::monitor::{
    Debouncer, LivenessMonitor, LivenessProbe, LivenessSettings, ProcessLookupError,
    ProcessTable, Trigger, TriggerReason,
};
use idlevault_core::pipeline::RunReport;

/// One scaled "second".
const TICK: Duration = Duration::from_millis(40);

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn burst_within_quiet_window_fires_once() {
    let (fired, on_quiet) = counter();
    let debouncer = Debouncer::new(TICK * 5, on_quiet, tracing::Span::none()).unwrap();

    // Events at t=0, 1, 2 with a quiet window of 5.
    debouncer.touch();
    thread::sleep(TICK);
    debouncer.touch();
    thread::sleep(TICK);
    debouncer.touch();

    thread::sleep(TICK * 3);
    assert_eq!(fired.load(Ordering::SeqCst), 0, "fired before the window closed");

    thread::sleep(TICK * 6);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!debouncer.is_pending());
}

#[test]
fn separated_events_fire_twice() {
    let (fired, on_quiet) = counter();
    let debouncer = Debouncer::new(TICK * 5, on_quiet, tracing::Span::none()).unwrap();

    // Events at t=0 and t=10 with a quiet window of 5.
    debouncer.touch();
    thread::sleep(TICK * 10);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    debouncer.touch();
    thread::sleep(TICK * 10);
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

struct Toggle(Arc<AtomicBool>);

impl ProcessTable for Toggle {
    fn entries(&mut self) -> Vec<Result<String, ProcessLookupError>> {
        let mut names = vec![Ok("init".to_string())];
        if self.0.load(Ordering::SeqCst) {
            names.push(Ok("tally.exe".to_string()));
        }
        names
    }
}

#[test]
fn absent_host_triggers_once_per_cooldown() {
    let running = Arc::new(AtomicBool::new(true));
    let reasons = Arc::new(Mutex::new(Vec::<(Instant, TriggerReason)>::new()));
    let seen = Arc::clone(&reasons);
    let trigger: Trigger = Arc::new(move |reason| {
        seen.lock().unwrap().push((Instant::now(), reason));
    });

    let cooldown = TICK * 10;
    let mut monitor = LivenessMonitor::start(
        LivenessProbe::new(Toggle(Arc::clone(&running)), "tally"),
        LivenessSettings {
            poll_interval: TICK,
            cooldown,
        },
        trigger,
        tracing::Span::none(),
    )
    .unwrap();

    thread::sleep(TICK * 4);
    assert!(reasons.lock().unwrap().is_empty());

    running.store(false, Ordering::SeqCst);
    let gone_at = Instant::now();
    thread::sleep(TICK * 6);
    {
        let fired = reasons.lock().unwrap();
        assert_eq!(fired.len(), 1, "expected a single trigger within the cooldown");
        assert_eq!(fired[0].1, TriggerReason::HostExited);
        assert!(fired[0].0.duration_since(gone_at) <= TICK * 3);
    }

    // Still absent after cooldown + poll: fires again.
    thread::sleep(TICK * 12);
    assert!(reasons.lock().unwrap().len() >= 2);

    running.store(true, Ordering::SeqCst);
    monitor.stop();
}

#[test]
fn stop_interrupts_cooldown() {
    let running = Arc::new(AtomicBool::new(false));
    let trigger: Trigger = Arc::new(|_| {});
    let mut monitor = LivenessMonitor::start(
        LivenessProbe::new(Toggle(running), "tally"),
        LivenessSettings {
            poll_interval: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        },
        trigger,
        tracing::Span::none(),
    )
    .unwrap();

    thread::sleep(TICK);
    let started = Instant::now();
    monitor.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn concurrent_triggers_never_overlap() {
    let active = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicBool::new(false));
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, o, r) = (Arc::clone(&active), Arc::clone(&overlap), Arc::clone(&runs));
    let mut dispatcher = RunDispatcher::start(
        Box::new(move |_, _| {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.store(true, Ordering::SeqCst);
            }
            thread::sleep(TICK * 2);
            a.fetch_sub(1, Ordering::SeqCst);
            r.fetch_add(1, Ordering::SeqCst);
            Ok(RunReport::default())
        }),
        tracing::Span::none(),
    )
    .unwrap();

    let trigger = dispatcher.trigger_fn();
    let handles: Vec<_> = [TriggerReason::Change, TriggerReason::HostExited]
        .into_iter()
        .map(|reason| {
            let trigger = Arc::clone(&trigger);
            thread::spawn(move || {
                for _ in 0..20 {
                    trigger(reason);
                    thread::sleep(TICK / 4);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    dispatcher.shutdown();
    assert!(!overlap.load(Ordering::SeqCst));
    let completed = runs.load(Ordering::SeqCst);
    assert!(completed >= 1 && completed < 40, "runs: {completed}");
}
