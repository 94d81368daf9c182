//! Ping-pong latency benchmark for bufpipe
//!
//! Measures round-trip latency through two pipes with exactly one value in
//! flight, so every receive parks and every append has a waiter to wake.
//!
//! For best results, disable turbo boost and pin to physical cores:
//!   echo 1 | sudo tee /sys/devices/system/cpu/intel_pstate/no_turbo
//!   sudo taskset -c 0,2 ./target/release/deps/perf_pipe_latency-*

use std::sync::Arc;
use std::thread;

use bufpipe::{CancelToken, Pipe};
use hdrhistogram::Histogram;

const WARMUP: u64 = 10_000;
const SAMPLES: u64 = 200_000;

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtscp() -> u64 {
    unsafe {
        let mut aux: u32 = 0;
        core::arch::x86_64::__rdtscp(&mut aux)
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn rdtscp() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

fn main() {
    let forward = Arc::new(Pipe::<u64>::new());
    let back = Arc::new(Pipe::<u64>::new());
    let total = WARMUP + SAMPLES;

    let echo = {
        let forward = Arc::clone(&forward);
        let back = Arc::clone(&back);
        thread::spawn(move || {
            let token = CancelToken::new();
            for _ in 0..total {
                let v = forward.receive(&token).unwrap();
                back.append(v).unwrap();
            }
        })
    };

    let token = CancelToken::new();
    let mut hist = Histogram::<u64>::new_with_max(10_000_000, 3).unwrap();

    for i in 0..total {
        let start = rdtscp();

        forward.append(i).unwrap();
        back.receive(&token).unwrap();

        let elapsed = rdtscp().wrapping_sub(start) / 2;
        if i >= WARMUP {
            let _ = hist.record(elapsed.min(10_000_000));
        }
    }

    echo.join().unwrap();

    println!("=== bufpipe ping-pong latency (RTT/2, cycles) ===");
    println!("min:    {:>8}", hist.min());
    println!("p50:    {:>8}", hist.value_at_quantile(0.50));
    println!("p90:    {:>8}", hist.value_at_quantile(0.90));
    println!("p99:    {:>8}", hist.value_at_quantile(0.99));
    println!("p99.9:  {:>8}", hist.value_at_quantile(0.999));
    println!("max:    {:>8}", hist.max());
}
