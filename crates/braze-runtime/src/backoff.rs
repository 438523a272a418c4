//! Exponential backoff for the poll loop.

use rand::Rng;
use tokio::time::Duration;

/// Doubling delay with a ceiling and multiplicative jitter.
///
/// The first failure waits roughly `base`, each further failure doubles the
/// wait up to `ceiling`, and a success resets the sequence. Jitter spreads
/// each wait across 50%..150% of its nominal value so restarting bots do
/// not reconnect in sync.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            current: None,
        }
    }

    /// Advances the sequence and returns the jittered wait.
    pub fn next(&mut self) -> Duration {
        let nominal = step(self.current, self.base, self.ceiling);
        self.current = Some(nominal);
        nominal.mul_f64(0.5 + rand::thread_rng().r#gen::<f64>())
    }

    /// Forgets accumulated failures.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

fn step(current: Option<Duration>, base: Duration, ceiling: Duration) -> Duration {
    match current {
        Some(current) => (current * 2).min(ceiling),
        None => base.min(ceiling),
    }
}
