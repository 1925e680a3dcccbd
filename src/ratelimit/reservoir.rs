//! Token reservoir with fixed-interval refill

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct ReservoirState {
    tokens: u32,
    next_refill: Instant,
}

/// Bounded burst budget shared by every scope
///
/// `size` tokens are available per `refill` window. When the reservoir is
/// empty, callers queue on the internal mutex (tokio's mutex is fair, so the
/// queue is FIFO) and the head of the queue sleeps until the next refill.
#[derive(Debug)]
pub struct Reservoir {
    size: u32,
    refill: Duration,
    state: Mutex<ReservoirState>,
}

impl Reservoir {
    pub fn new(size: u32, refill: Duration) -> Self {
        let refill = refill.max(Duration::from_millis(1));
        Self {
            size,
            refill,
            state: Mutex::new(ReservoirState {
                tokens: size,
                next_refill: Instant::now() + refill,
            }),
        }
    }

    /// Take one token, waiting for a refill if necessary
    pub async fn take(&self) {
        let mut state = self.state.lock().await;
        loop {
            self.refill_if_due(&mut state);
            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }
            let wake = state.next_refill;
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Tokens left in the current window
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill_if_due(&mut state);
        state.tokens
    }

    fn refill_if_due(&self, state: &mut ReservoirState) {
        let now = Instant::now();
        if now < state.next_refill {
            return;
        }
        state.tokens = self.size;
        while state.next_refill <= now {
            state.next_refill += self.refill;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_take_until_empty_then_wait_for_refill() {
        let reservoir = Reservoir::new(2, Duration::from_secs(60));
        let start = Instant::now();

        reservoir.take().await;
        reservoir.take().await;
        assert_eq!(reservoir.available().await, 0);
        assert!(start.elapsed() < Duration::from_secs(1));

        reservoir.take().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(reservoir.available().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_in_order() {
        let reservoir = Arc::new(Reservoir::new(1, Duration::from_secs(10)));
        reservoir.take().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for id in 0..3 {
            let reservoir = Arc::clone(&reservoir);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                reservoir.take().await;
                order.lock().await.push(id);
            }));
            // Let each task reach the queue before spawning the next
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }
}
