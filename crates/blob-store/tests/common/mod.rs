#![allow(dead_code)]

use std::io::{self, Read};
use std::sync::{Arc, Barrier, Once};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic pseudo-random content.
pub fn random_data(seed: u64, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill(&mut data[..]);
    data
}

/// Reader that waits on a barrier before reporting EOF, so several uploads
/// can be held at the point where all their bytes have been read.
pub struct DelayedEof<R> {
    inner: R,
    barrier: Arc<Barrier>,
    waited: bool,
}

impl<R> DelayedEof<R> {
    pub fn new(inner: R, barrier: Arc<Barrier>) -> Self {
        Self {
            inner,
            barrier,
            waited: false,
        }
    }
}

impl<R: Read> Read for DelayedEof<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && !self.waited {
            self.waited = true;
            self.barrier.wait();
        }
        Ok(n)
    }
}
