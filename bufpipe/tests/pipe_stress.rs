//! Multi-threaded pipe scenarios: no loss, ordering, close and wake-ups.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bufpipe::{CancelToken, Config, FetchError, Pipe, ReceiveError};
use rand::Rng;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG=bufpipe=trace cargo test` shows close and wake-up forwarding.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Seven producers append disjoint strides of 0..10000 while seven
/// consumers drain with a mix of fetch and receive. Everything drained is
/// forwarded into a second pipe and checked at the end.
#[test]
fn mixed_consumers_no_loss_no_duplication() {
    init_tracing();
    const THRESHOLD: usize = 10_000;
    const PRODUCERS: usize = 7;
    const CONSUMERS: usize = 7;

    let source = Arc::new(Pipe::new());
    let sink = Arc::new(Pipe::new());

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|k| {
            let source = Arc::clone(&source);
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                let mut count = 0;
                if k % 2 == 0 {
                    loop {
                        match source.fetch() {
                            Ok(v) => {
                                sink.append(v).unwrap();
                                count += 1;
                            }
                            Err(FetchError::NoData) => thread::yield_now(),
                            Err(FetchError::EndOfStream) => break,
                        }
                    }
                } else {
                    let token = CancelToken::new();
                    loop {
                        match source.receive(&token) {
                            Ok(v) => {
                                sink.append(v).unwrap();
                                count += 1;
                            }
                            Err(ReceiveError::EndOfStream) => break,
                            Err(e) => panic!("consumer {k}: {e}"),
                        }
                    }
                }
                count
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|k| {
            let source = Arc::clone(&source);
            thread::spawn(move || {
                let mut count = 0;
                for v in (k..THRESHOLD).step_by(PRODUCERS) {
                    source.append(v).unwrap();
                    count += 1;
                }
                count
            })
        })
        .collect();

    let appended: usize = producers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(appended, THRESHOLD);
    assert!(source.close());

    let drained: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(drained, THRESHOLD);
    assert!(source.is_drained());
    assert_eq!(sink.len(), THRESHOLD);

    let mut out: Vec<usize> = std::iter::from_fn(|| sink.fetch().ok()).collect();
    out.sort_unstable();
    assert_eq!(out, (0..THRESHOLD).collect::<Vec<_>>());
}

#[test]
fn single_producer_fifo_to_single_receiver() {
    const COUNT: u64 = 100_000;

    let pipe = Arc::new(Pipe::new());
    let reader = {
        let pipe = Arc::clone(&pipe);
        thread::spawn(move || {
            let token = CancelToken::new();
            let mut expected = 0;
            while let Ok(v) = pipe.receive(&token) {
                assert_eq!(v, expected);
                expected += 1;
            }
            expected
        })
    };

    for i in 0..COUNT {
        pipe.append(i).unwrap();
    }
    pipe.close();

    assert_eq!(reader.join().unwrap(), COUNT);
}

/// Each producer's values reach the consumers in the order they were
/// appended, as seen through per-producer sequence numbers.
#[test]
fn per_producer_order_with_one_consumer() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let pipe = Arc::new(Pipe::new());
    let barrier = Arc::new(Barrier::new(PRODUCERS));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let pipe = Arc::clone(&pipe);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..PER_PRODUCER {
                    pipe.append((p, seq)).unwrap();
                }
            })
        })
        .collect();

    let consumer = {
        let pipe = Arc::clone(&pipe);
        thread::spawn(move || {
            let token = CancelToken::new();
            let mut next = [0usize; PRODUCERS];
            while let Ok((p, seq)) = pipe.receive(&token) {
                assert_eq!(seq, next[p], "producer {p} reordered");
                next[p] += 1;
            }
            next
        })
    };

    for h in producers {
        h.join().unwrap();
    }
    pipe.close();

    assert_eq!(consumer.join().unwrap(), [PER_PRODUCER; PRODUCERS]);
}

/// Appends racing a close either fail or are delivered; none is lost.
#[test]
fn append_racing_close_is_never_lost() {
    for _ in 0..50 {
        let pipe = Arc::new(Pipe::new());
        let accepted = Arc::new(AtomicUsize::new(0));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let pipe = Arc::clone(&pipe);
                let accepted = Arc::clone(&accepted);
                thread::spawn(move || {
                    for i in 0..1000 {
                        if pipe.append(i).is_err() {
                            break;
                        }
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        let reader = {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || {
                let token = CancelToken::new();
                let mut n = 0;
                while pipe.receive(&token).is_ok() {
                    n += 1;
                }
                n
            })
        };

        thread::sleep(Duration::from_micros(rand::thread_rng().gen_range(0..500)));
        pipe.close();

        for h in writers {
            h.join().unwrap();
        }
        assert_eq!(reader.join().unwrap(), accepted.load(Ordering::SeqCst));
    }
}

/// Rejected appends on a closed, empty pipe never turn end of stream back
/// into "no data", and a blocked receive still finishes.
#[test]
fn rejected_appends_do_not_delay_end_of_stream() {
    let pipe = Arc::new(Pipe::<u32>::new());
    assert!(pipe.close());
    let stop = Arc::new(AtomicBool::new(false));

    let hammers: Vec<_> = (0..4)
        .map(|_| {
            let pipe = Arc::clone(&pipe);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    assert!(pipe.append(1).is_err());
                }
            })
        })
        .collect();

    for _ in 0..200_000 {
        assert_eq!(pipe.fetch(), Err(FetchError::EndOfStream));
    }
    assert!(pipe.is_drained());
    assert_eq!(
        pipe.receive(&CancelToken::with_timeout(Duration::from_secs(5))),
        Err(ReceiveError::EndOfStream)
    );

    stop.store(true, Ordering::Relaxed);
    for h in hammers {
        h.join().unwrap();
    }
    assert!(pipe.is_empty());
}

#[test]
fn one_append_wakes_one_of_three() {
    init_tracing();
    let pipe = Arc::new(Pipe::new());
    let token = CancelToken::new();
    let got = Arc::new(AtomicUsize::new(0));

    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let pipe = Arc::clone(&pipe);
            let token = token.clone();
            let got = Arc::clone(&got);
            thread::spawn(move || {
                let result = pipe.receive(&token);
                if result.is_ok() {
                    got.fetch_add(1, Ordering::SeqCst);
                }
                result
            })
        })
        .collect();

    wait_for(|| pipe.pending_waiters() == 3);
    pipe.append(42).unwrap();
    wait_for(|| got.load(Ordering::SeqCst) == 1);

    // The other two stay parked.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(got.load(Ordering::SeqCst), 1);
    assert_eq!(pipe.blocked_receivers(), 2);

    token.cancel();
    let results: Vec<_> = receivers.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| **r == Ok(42)).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| **r == Err(ReceiveError::Cancelled))
            .count(),
        2
    );
}

#[test]
fn close_wakes_every_blocked_receiver() {
    let pipe = Arc::new(Pipe::<u8>::new());

    let receivers: Vec<_> = (0..8)
        .map(|_| {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || pipe.receive(&CancelToken::new()))
        })
        .collect();

    wait_for(|| pipe.pending_waiters() == 8);
    assert!(pipe.close());
    assert!(!pipe.close());

    for h in receivers {
        assert_eq!(h.join().unwrap(), Err(ReceiveError::EndOfStream));
    }
    assert_eq!(pipe.pending_waiters(), 0);
}

/// More blocked receivers than registry slots, fed one value at a time.
#[test]
fn saturated_registry_delivers_everything() {
    init_tracing();
    const RECEIVERS: usize = 6;
    const VALUES: usize = 2_000;

    let pipe = Arc::new(Pipe::with_config(
        Config::default()
            .registry_capacity(2)
            .registry_poll(Duration::from_micros(200)),
    ));

    let receivers: Vec<_> = (0..RECEIVERS)
        .map(|_| {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || {
                let token = CancelToken::new();
                let mut n = 0;
                while pipe.receive(&token).is_ok() {
                    n += 1;
                }
                n
            })
        })
        .collect();

    let mut rng = rand::thread_rng();
    for i in 0..VALUES {
        pipe.append(i).unwrap();
        if rng.gen_ratio(1, 50) {
            thread::sleep(Duration::from_micros(100));
        }
    }
    pipe.close();

    let total: usize = receivers.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, VALUES);
}

/// Receivers with short deadlines come and go while values trickle in.
/// Every value is received by somebody.
#[test]
fn timeouts_do_not_swallow_wakeups() {
    init_tracing();
    const VALUES: usize = 500;

    let pipe = Arc::new(Pipe::new());
    let received = Arc::new(AtomicUsize::new(0));

    let receivers: Vec<_> = (0..4)
        .map(|_| {
            let pipe = Arc::clone(&pipe);
            let received = Arc::clone(&received);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                loop {
                    let timeout = Duration::from_micros(rng.gen_range(50..2_000));
                    match pipe.receive(&CancelToken::with_timeout(timeout)) {
                        Ok(_) => {
                            received.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(ReceiveError::DeadlineExceeded) => {}
                        Err(ReceiveError::EndOfStream) => break,
                        Err(e) => panic!("{e}"),
                    }
                }
            })
        })
        .collect();

    let mut rng = rand::thread_rng();
    for i in 0..VALUES {
        pipe.append(i).unwrap();
        thread::sleep(Duration::from_micros(rng.gen_range(0..300)));
    }
    pipe.close();

    for h in receivers {
        h.join().unwrap();
    }
    assert_eq!(received.load(Ordering::SeqCst), VALUES);
}
