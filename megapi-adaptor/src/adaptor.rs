//! Connection lifecycle for a MegaPi board.
//!
//! An [`Adaptor`] is created unconnected. [`Adaptor::connect`] opens the
//! port, waits for the board to come out of reset, and starts the writer;
//! [`Adaptor::finalize`] stops the writer and closes the port. In between,
//! frames are queued with [`Adaptor::send`] or a [`FrameSender`].

use crate::{
    config::AdaptorConfig,
    error::{Error, Result, WriteFailure},
    tracing::prelude::*,
    transport::{Connection, SerialTransport, Transport},
    writer::{FrameSender, Writer, HANDOFF_CAPACITY, WRITE_FAILURE_QUEUE_DEPTH},
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

/// Name given to new adaptors.
pub const DEFAULT_NAME: &str = "MegaPi";

/// Lifecycle shared by board adaptors.
#[async_trait]
pub trait BoardAdaptor: Send {
    /// Human-readable name of this adaptor.
    fn name(&self) -> &str;

    /// Rename the adaptor. Has no effect on the connection.
    fn set_name(&mut self, name: String);

    /// Open the connection to the board.
    async fn connect(&mut self) -> Result<()>;

    /// Stop all traffic and close the connection.
    async fn finalize(&mut self) -> Result<()>;
}

/// A running writer and the means to stop it.
struct WriterHandle<C> {
    frames: FrameSender,
    running: CancellationToken,
    task: JoinHandle<C>,
}

/// Serial adaptor for a MegaPi board.
pub struct Adaptor<T: Transport = SerialTransport> {
    name: String,
    config: AdaptorConfig,
    transport: T,
    writer: Option<WriterHandle<T::Connection>>,
    failures_tx: mpsc::Sender<WriteFailure>,
    failures_rx: mpsc::Receiver<WriteFailure>,
}

impl Adaptor<SerialTransport> {
    /// Adaptor for the board on `device`, at 115200 baud.
    pub fn new(device: impl Into<String>) -> Self {
        Self::with_config(AdaptorConfig::new(device), SerialTransport)
    }
}

impl<T: Transport> Adaptor<T> {
    /// Adaptor using `transport` to open the port described by `config`.
    ///
    /// Nothing is validated or opened until [`connect`](Self::connect).
    pub fn with_config(config: AdaptorConfig, transport: T) -> Self {
        let (failures_tx, failures_rx) = mpsc::channel(WRITE_FAILURE_QUEUE_DEPTH);
        Self {
            name: DEFAULT_NAME.to_string(),
            config,
            transport,
            writer: None,
            failures_tx,
            failures_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn config(&self) -> &AdaptorConfig {
        &self.config
    }

    /// True between a successful `connect` and the next `finalize`.
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Open the port and start the writer.
    ///
    /// Waits [`AdaptorConfig::boot_settle`] after opening, before the writer
    /// may touch the port. Calling this while connected does nothing. On
    /// failure the adaptor stays unconnected and `connect` may be retried.
    pub async fn connect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            debug!(adaptor = %self.name, "Already connected.");
            return Ok(());
        }

        let device = self.config.device.clone();
        let conn = self
            .transport
            .open(&self.config)
            .await
            .map_err(|source| {
                warn!(adaptor = %self.name, device = %device, error = %source, "Failed to open port");
                Error::Open {
                    device: device.clone(),
                    source,
                }
            })?;
        info!(
            adaptor = %self.name,
            device = %device,
            baud = self.config.baud_rate,
            "Connected."
        );

        debug!(delay = ?self.config.boot_settle, "Waiting for board to boot.");
        time::sleep(self.config.boot_settle).await;

        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let running = CancellationToken::new();
        let writer = Writer::new(
            conn,
            rx,
            running.clone(),
            self.failures_tx.clone(),
            self.config.write_pacing,
            device,
        );
        self.writer = Some(WriterHandle {
            frames: FrameSender::new(tx),
            running,
            task: tokio::spawn(writer.run()),
        });

        Ok(())
    }

    /// Stop the writer and close the port.
    ///
    /// Frames the writer had already accepted are written first. Fails fast
    /// with [`Error::NotConnected`] if there is nothing to finalize.
    pub async fn finalize(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Err(Error::NotConnected);
        };

        trace!(adaptor = %self.name, "Stopping writer.");
        writer.running.cancel();
        let mut conn = writer.task.await?;

        let device = &self.config.device;
        conn.close().await.map_err(|source| {
            error!(adaptor = %self.name, device = %device, error = %source, "Failed to close port");
            Error::Close {
                device: device.clone(),
                source,
            }
        })?;
        info!(adaptor = %self.name, device = %device, "Disconnected.");

        Ok(())
    }

    /// A handle for queuing frames, if connected.
    ///
    /// The handle stops accepting frames once the adaptor is finalized.
    pub fn sender(&self) -> Option<FrameSender> {
        self.writer.as_ref().map(|w| w.frames.clone())
    }

    /// Queue a frame for the board, waiting while the writer is busy.
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.frames.send(frame).await,
            None => Err(Error::NotConnected),
        }
    }

    /// Drain the record of frames the writer failed to deliver.
    pub fn take_write_failures(&mut self) -> Vec<WriteFailure> {
        let mut failures = Vec::new();
        while let Ok(failure) = self.failures_rx.try_recv() {
            failures.push(failure);
        }
        failures
    }
}

impl<T: Transport> Drop for Adaptor<T> {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            // Unfinalized; let the writer exit and drop the port.
            writer.running.cancel();
        }
    }
}

#[async_trait]
impl<T: Transport> BoardAdaptor for Adaptor<T> {
    fn name(&self) -> &str {
        Adaptor::name(self)
    }

    fn set_name(&mut self, name: String) {
        Adaptor::set_name(self, name)
    }

    async fn connect(&mut self) -> Result<()> {
        Adaptor::connect(self).await
    }

    async fn finalize(&mut self) -> Result<()> {
        Adaptor::finalize(self).await
    }
}
