use std::time::{Duration, Instant};

/// Utility for keeping track of the time it took to perform some operation.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start_time: Instant,
}

impl Timer {
    /// Create a new `Timer`.
    pub fn now() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Reset internal timer to now.
    pub fn reset(&mut self) {
        self.start_time = Instant::now();
    }

    /// Time since the timer was last reset.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Print a message with the elapsed time since the timer was last reset.
    pub fn print_elapsed(&self, label: &str) {
        eprintln!("{} took {:?}", label, self.elapsed());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::now();
        let first = timer.elapsed();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.elapsed() > first);
    }

    #[test]
    fn test_reset() {
        let mut timer = Timer::now();
        std::thread::sleep(Duration::from_millis(5));
        timer.reset();
        assert!(timer.elapsed() < Duration::from_millis(5));
    }
}
