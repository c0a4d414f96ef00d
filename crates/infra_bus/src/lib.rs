use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Fan-out bus for state-transition events. Slow subscribers lag and lose the
/// oldest entries; publishers never block.
#[derive(Clone)]
pub struct RingBus<T: Clone + Send + Sync + 'static> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> RingBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    /// Having no subscribers is normal (e.g. before the API starts).
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Everything currently buffered for `rx`, skipping over lag gaps.
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(v) => out.push(v),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber() {
        let bus = RingBus::new(32);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);
        bus.emit(7u64);
        assert_eq!(a.recv().await.expect("recv"), 7);
        assert_eq!(b.recv().await.expect("recv"), 7);
    }

    #[test]
    fn emit_without_subscribers_is_dropped() {
        let bus: RingBus<u32> = RingBus::new(4);
        bus.emit(2);
        assert_eq!(bus.receiver_count(), 0);
        let mut late = bus.subscribe();
        assert!(drain(&mut late).is_empty());
    }

    #[test]
    fn drain_skips_lagged_entries() {
        let bus = RingBus::new(16);
        let mut rx = bus.subscribe();
        for i in 0..20u32 {
            bus.emit(i);
        }
        let got = drain(&mut rx);
        assert_eq!(got.len(), 16);
        assert_eq!(got.last().copied(), Some(19));
        assert!(drain(&mut rx).is_empty());
    }
}
