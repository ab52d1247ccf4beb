//! Bounded period FIFO between the render thread and the device

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Blocking bounded queue of rendered periods.
///
/// Writers block while full, readers block while empty. Every read that finds
/// the queue empty counts one underrun. Once closed, readers drain what is
/// left and then get `None`.
pub struct FifoBuffer<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    underruns: AtomicU64,
    closed: AtomicBool,
}

impl<T> FifoBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            underruns: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Blocks until there is room
    pub fn write(&self, item: T) {
        // Both ends live in self, so the channel never disconnects
        let _ = self.tx.send(item);
    }

    pub fn try_write(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    /// Returns the item back if there was no room within `timeout`
    pub fn write_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(item) | SendTimeoutError::Disconnected(item) => item,
        })
    }

    /// Blocks until an item arrives. `None` once closed and drained.
    pub fn read(&self) -> Option<T> {
        if let Ok(item) = self.rx.try_recv() {
            return Some(item);
        }
        self.underruns.fetch_add(1, Ordering::Relaxed);
        loop {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) if !self.is_closed() => continue,
                Err(_) => return self.rx.try_recv().ok(),
            }
        }
    }

    pub fn try_read(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Thread that renders periods ahead of the device and pushes them into a FIFO
pub struct FifoWriter<T> {
    writing: Arc<AtomicBool>,
    fifo: Arc<FifoBuffer<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> FifoWriter<T> {
    /// `render` produces one period per call
    pub fn spawn<F>(fifo: Arc<FifoBuffer<T>>, mut render: F) -> std::io::Result<Self>
    where
        F: FnMut() -> T + Send + 'static,
    {
        let writing = Arc::new(AtomicBool::new(true));
        let flag = writing.clone();
        let queue = fifo.clone();

        let handle = thread::Builder::new()
            .name("mixdown-fifo-writer".into())
            .spawn(move || {
                debug!("FIFO writer started");
                'periods: while flag.load(Ordering::Acquire) {
                    let mut period = render();
                    loop {
                        match queue.write_timeout(period, POLL_INTERVAL) {
                            Ok(()) => break,
                            Err(_) if !flag.load(Ordering::Acquire) => break 'periods,
                            Err(rejected) => period = rejected,
                        }
                    }
                }
                debug!("FIFO writer stopped");
            })?;

        Ok(Self { writing, fifo, handle: Some(handle) })
    }
}

impl<T> FifoWriter<T> {
    pub fn is_writing(&self) -> bool {
        self.writing.load(Ordering::Acquire)
    }

    /// Stop producing, wake blocked readers, and join the thread
    pub fn finish(&mut self) {
        self.writing.store(false, Ordering::Release);
        self.fifo.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("FIFO writer thread panicked");
            }
        }
    }
}

impl<T> Drop for FifoWriter<T> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_preserves_order() {
        let fifo = FifoBuffer::new(4);
        for i in 0..4 {
            fifo.write(i);
        }
        assert_eq!(fifo.len(), 4);
        let out: Vec<_> = (0..4).filter_map(|_| fifo.read()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(fifo.underruns(), 0);
    }

    #[test]
    fn test_backpressure() {
        let fifo = FifoBuffer::new(2);
        assert!(fifo.try_write(1).is_ok());
        assert!(fifo.try_write(2).is_ok());
        assert_eq!(fifo.try_write(3), Err(3));
        assert_eq!(fifo.write_timeout(3, Duration::from_millis(10)), Err(3));
        assert_eq!(fifo.try_read(), Some(1));
        assert!(fifo.try_write(3).is_ok());
    }

    #[test]
    fn test_underrun_counted_and_closed_read_returns_none() {
        let fifo = Arc::new(FifoBuffer::<u32>::new(2));
        let reader = {
            let fifo = fifo.clone();
            thread::spawn(move || fifo.read())
        };
        thread::sleep(Duration::from_millis(20));
        fifo.close();
        assert_eq!(reader.join().unwrap(), None);
        assert_eq!(fifo.underruns(), 1);
    }

    #[test]
    fn test_closed_fifo_drains_remaining() {
        let fifo = FifoBuffer::new(2);
        fifo.write(7);
        fifo.close();
        assert_eq!(fifo.read(), Some(7));
        assert_eq!(fifo.read(), None);
    }

    #[test]
    fn test_writer_fills_and_finishes() {
        let fifo = Arc::new(FifoBuffer::new(3));
        let mut counter = 0.0f32;
        let mut writer = FifoWriter::spawn(fifo.clone(), move || {
            counter += 1.0;
            vec![counter; 4]
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while fifo.len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(fifo.len(), 3);

        let first = fifo.read().unwrap();
        let second = fifo.read().unwrap();
        assert_eq!(first[0], 1.0);
        assert_eq!(second[0], 2.0);

        // Writer is blocked on a full queue; finish must still return
        writer.finish();
        assert!(!writer.is_writing());
        assert!(fifo.is_closed());
    }

    fn wait_for_len<T>(fifo: &FifoBuffer<T>, len: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        while fifo.len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        fifo.len()
    }

    #[test]
    fn test_writer_resumes_after_consumer_frees_space() {
        let fifo = Arc::new(FifoBuffer::new(2));
        let mut next = 0u32;
        let mut writer = FifoWriter::spawn(fifo.clone(), move || {
            next += 1;
            next
        })
        .unwrap();

        assert_eq!(wait_for_len(&fifo, 2), 2);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fifo.len(), 2);

        assert_eq!(fifo.read(), Some(1));
        assert_eq!(wait_for_len(&fifo, 2), 2);
        assert_eq!(fifo.read(), Some(2));
        assert_eq!(fifo.read(), Some(3));
        assert_eq!(wait_for_len(&fifo, 2), 2);
        assert_eq!(fifo.underruns(), 0);

        writer.finish();
    }

    #[test]
    fn test_slow_producer_blocks_reader_and_counts_underruns() {
        let fifo = Arc::new(FifoBuffer::new(4));
        let mut next = 0u32;
        let mut writer = FifoWriter::spawn(fifo.clone(), move || {
            thread::sleep(Duration::from_millis(30));
            next += 1;
            next
        })
        .unwrap();

        let started = Instant::now();
        let values: Vec<_> = (0..3).filter_map(|_| fifo.read()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert!(fifo.underruns() >= 1);

        writer.finish();
    }
}
