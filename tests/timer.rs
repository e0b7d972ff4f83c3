use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use spout_io::service::Service;
use spout_io::timer::Timer;

// S5: a large batch of timers fires in non-decreasing deadline order with
// small jitter.
#[test]
fn timer_fairness() {
    const TIMERS: usize = 1000;

    let service = Service::new(1).unwrap();
    service.start();

    let fired: Arc<Mutex<Vec<(u64, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    // Deterministic pseudo-random deadlines in [0, 100] ms.
    let mut state = 0x2545F4914F6CDD1Du64;
    let mut timers = Vec::with_capacity(TIMERS);
    for _ in 0..TIMERS {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let delay_ms = (state >> 33) % 101;

        let sink = fired.clone();
        let timer = Timer::new(Duration::from_millis(delay_ms), move || {
            sink.lock().unwrap().push((delay_ms, Instant::now()));
        });
        assert!(service.add_timer(&timer));
        timers.push(timer);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while fired.lock().unwrap().len() < TIMERS && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let fired = fired.lock().unwrap();
    assert_eq!(fired.len(), TIMERS);

    // Non-decreasing deadline order.
    for pair in fired.windows(2) {
        assert!(
            pair[0].0 <= pair[1].0,
            "timer with deadline {}ms fired after {}ms",
            pair[1].0,
            pair[0].0
        );
    }

    // Mean fire jitter stays small.
    let total_jitter: Duration = fired
        .iter()
        .map(|(delay_ms, at)| {
            let due = start + Duration::from_millis(*delay_ms);
            if *at > due {
                *at - due
            } else {
                Duration::ZERO
            }
        })
        .sum();
    let mean = total_jitter / TIMERS as u32;
    assert!(mean < Duration::from_millis(5), "mean jitter {mean:?}");

    service.stop();
    service.wait_stopped();
}

#[test]
fn repeating_timer_until_stopped() {
    let service = Service::new(1).unwrap();
    service.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counted = fired.clone();
    let timer = Timer::repeating(Duration::from_millis(10), move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    assert!(service.add_timer(&timer));

    let deadline = Instant::now() + Duration::from_secs(2);
    while fired.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(fired.load(Ordering::SeqCst) >= 5);

    timer.stop();
    thread::sleep(Duration::from_millis(50));
    let frozen = fired.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    // One fire may have been in flight at stop time.
    assert!(fired.load(Ordering::SeqCst) <= frozen + 1);

    service.stop();
    service.wait_stopped();
}

#[test]
fn dropping_the_timer_cancels_it() {
    let service = Service::new(1).unwrap();
    service.start();

    let fired = Arc::new(AtomicUsize::new(0));
    let counted = fired.clone();
    let timer = Timer::new(Duration::from_millis(50), move || {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    assert!(service.add_timer(&timer));
    drop(timer);

    thread::sleep(Duration::from_millis(150));
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    service.stop();
    service.wait_stopped();
}
