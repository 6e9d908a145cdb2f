//! Background writer and the hand-off used to feed it.
//!
//! The writer task owns the connection for as long as it runs, so it is the
//! only thing that ever writes to the board. Producers hand frames over
//! through a [`FrameSender`]; the channel holds a single frame, so a producer
//! can get at most one frame ahead of the writer before `send` waits.
//!
//! On shutdown the writer stops accepting new frames, writes the frames it
//! already accepted, and returns the connection to whoever awaits the task.

use crate::error::{Error, Result, WriteFailure};
use crate::tracing::prelude::*;
use crate::transport::Connection;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Frames the hand-off holds while the writer is busy.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

/// Undelivered-frame records kept before new ones are dropped.
pub(crate) const WRITE_FAILURE_QUEUE_DEPTH: usize = 16;

/// Producer side of the hand-off to a running writer.
///
/// Cheap to clone; every clone feeds the same writer, and frames are written
/// in the order the writer accepts them.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSender {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queue a frame, waiting while the writer is busy.
    ///
    /// Fails with [`Error::WriterStopped`] once the writer has exited.
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(frame.into())
            .await
            .map_err(|_| Error::WriterStopped)
    }

    /// Queue a frame without waiting.
    ///
    /// Fails with [`Error::Busy`] if the hand-off is occupied.
    pub fn try_send(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.tx.try_send(frame.into()).map_err(|e| match e {
            TrySendError::Full(_) => Error::Busy,
            TrySendError::Closed(_) => Error::WriterStopped,
        })
    }

    /// Queue a frame from synchronous code, blocking the current thread.
    ///
    /// # Panics
    /// Panics if called from within an async execution context.
    pub fn blocking_send(&self, frame: impl Into<Bytes>) -> Result<()> {
        self.tx
            .blocking_send(frame.into())
            .map_err(|_| Error::WriterStopped)
    }

    /// True once the writer no longer accepts frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The writer loop's state; consumed by [`Writer::run`].
pub(crate) struct Writer<C> {
    conn: C,
    frames: mpsc::Receiver<Bytes>,
    running: CancellationToken,
    failures: mpsc::Sender<WriteFailure>,
    pacing: Duration,
    device: String,
}

impl<C: Connection> Writer<C> {
    pub(crate) fn new(
        conn: C,
        frames: mpsc::Receiver<Bytes>,
        running: CancellationToken,
        failures: mpsc::Sender<WriteFailure>,
        pacing: Duration,
        device: String,
    ) -> Self {
        Self {
            conn,
            frames,
            running,
            failures,
            pacing,
            device,
        }
    }

    /// Write frames until cancelled or every sender is gone, then hand back
    /// the connection.
    pub(crate) async fn run(mut self) -> C {
        debug!(device = %self.device, "Writer started.");

        loop {
            tokio::select! {
                biased;

                _ = self.running.cancelled() => {
                    self.drain().await;
                    break;
                }
                frame = self.frames.recv() => match frame {
                    Some(frame) => self.write(frame).await,
                    None => {
                        debug!(device = %self.device, "All senders dropped.");
                        break;
                    }
                },
            }
        }

        debug!(device = %self.device, "Writer stopped.");
        self.conn
    }

    // Refuse further frames, then write the ones already accepted.
    async fn drain(&mut self) {
        self.frames.close();
        while let Ok(frame) = self.frames.try_recv() {
            self.write(frame).await;
        }
    }

    async fn write(&mut self, frame: Bytes) {
        trace!(device = %self.device, len = frame.len(), "Writing frame.");

        if let Err(e) = self.conn.write(&frame).await {
            error!(
                device = %self.device,
                len = frame.len(),
                error = %e,
                "Failed to write frame"
            );
            if self
                .failures
                .try_send(WriteFailure::new(frame.len(), &e))
                .is_err()
            {
                warn!(device = %self.device, "Write failure queue full, dropping record");
            }
        }

        time::sleep(self.pacing).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::transport::Transport;
    use crate::config::AdaptorConfig;
    use tokio::time::Instant;

    const PACING: Duration = Duration::from_millis(10);

    struct Harness {
        transport: FakeTransport,
        sender: FrameSender,
        running: CancellationToken,
        failures: mpsc::Receiver<WriteFailure>,
        task: tokio::task::JoinHandle<crate::transport::fake::FakeConnection>,
    }

    async fn spawn_writer() -> Harness {
        let transport = FakeTransport::default();
        let conn = transport
            .open(&AdaptorConfig::new("/dev/fake"))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (failures_tx, failures) = mpsc::channel(WRITE_FAILURE_QUEUE_DEPTH);
        let running = CancellationToken::new();
        let writer = Writer::new(
            conn,
            rx,
            running.clone(),
            failures_tx,
            PACING,
            "/dev/fake".to_string(),
        );
        Harness {
            transport,
            sender: FrameSender::new(tx),
            running,
            failures,
            task: tokio::spawn(writer.run()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_in_order() {
        let h = spawn_writer().await;

        let frames: [&[u8]; 3] = [b"b1", b"b2", b"b3"];
        for frame in frames {
            let frame = Bytes::copy_from_slice(frame);
            h.sender.send(frame).await.unwrap();
        }
        h.running.cancel();
        h.task.await.unwrap();

        assert_eq!(h.transport.writes(), vec![b"b1".to_vec(), b"b2".to_vec(), b"b3".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_writes() {
        let h = spawn_writer().await;

        h.sender.send(Bytes::from_static(b"\x01")).await.unwrap();
        h.sender.send(Bytes::from_static(b"\x02")).await.unwrap();
        h.sender.send(Bytes::from_static(b"\x03")).await.unwrap();
        h.running.cancel();
        h.task.await.unwrap();

        let times = h.transport.write_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= PACING, "writes {:?} apart", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_writer_does_not_spin() {
        let h = spawn_writer().await;
        let start = Instant::now();

        time::sleep(Duration::from_secs(60)).await;
        assert!(h.transport.writes().is_empty());

        let cancelled_at = Instant::now();
        h.running.cancel();
        h.task.await.unwrap();
        // Shutdown of an idle writer is immediate.
        assert_eq!(Instant::now(), cancelled_at);
        assert_eq!(cancelled_at - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_frames_written_after_cancel() {
        let h = spawn_writer().await;

        h.sender.send(Bytes::from_static(b"first")).await.unwrap();
        // Writer is now pacing after "first"; "second" waits in the slot.
        h.sender.send(Bytes::from_static(b"second")).await.unwrap();
        h.running.cancel();
        h.task.await.unwrap();

        assert_eq!(h.transport.writes(), vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(h.sender.is_closed());
        assert!(matches!(h.sender.send(Bytes::from_static(b"late")).await, Err(Error::WriterStopped)));
        assert_eq!(h.transport.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure() {
        let h = spawn_writer().await;

        h.sender.send(Bytes::from_static(b"a")).await.unwrap();
        h.sender.send(Bytes::from_static(b"b")).await.unwrap();
        // "a" is being paced and "b" fills the slot.
        assert!(matches!(h.sender.try_send(Bytes::from_static(b"c")), Err(Error::Busy)));

        h.running.cancel();
        h.task.await.unwrap();
        assert_eq!(h.transport.writes(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reported_and_loop_continues() {
        let mut h = spawn_writer().await;
        h.transport.fail_next_writes(1);

        h.sender.send(Bytes::from_static(b"lost")).await.unwrap();
        h.sender.send(Bytes::from_static(b"kept")).await.unwrap();
        h.running.cancel();
        h.task.await.unwrap();

        assert_eq!(h.transport.writes(), vec![b"kept".to_vec()]);
        let failure = h.failures.try_recv().unwrap();
        assert_eq!(failure.len, 4);
        assert_eq!(failure.kind, std::io::ErrorKind::BrokenPipe);
        assert!(h.failures.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_queue_overflow_drops_records() {
        let mut h = spawn_writer().await;
        let attempts = WRITE_FAILURE_QUEUE_DEPTH + 4;
        h.transport.fail_next_writes(attempts);

        for _ in 0..attempts {
            h.sender.send(Bytes::from_static(b"x")).await.unwrap();
        }
        h.running.cancel();
        h.task.await.unwrap();

        let mut recorded = 0;
        while h.failures.try_recv().is_ok() {
            recorded += 1;
        }
        assert_eq!(recorded, WRITE_FAILURE_QUEUE_DEPTH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_when_senders_dropped() {
        let h = spawn_writer().await;
        h.sender.send(Bytes::from_static(b"only")).await.unwrap();
        drop(h.sender);

        h.task.await.unwrap();
        assert_eq!(h.transport.writes(), vec![b"only".to_vec()]);
        assert!(!h.running.is_cancelled());
    }
}
