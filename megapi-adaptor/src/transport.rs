//! Physical transport to the board.
//!
//! The adaptor never talks to a serial port directly. It opens a
//! [`Connection`] through a [`Transport`], which keeps the lifecycle logic
//! testable without hardware. [`SerialTransport`] is the real one.

use crate::config::AdaptorConfig;
use crate::tracing::prelude::*;
use async_trait::async_trait;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// An open duplex byte channel to the board.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Write the whole buffer.
    async fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release the channel. No writes follow a close.
    async fn close(&mut self) -> io::Result<()>;
}

/// Something that can open connections to a board.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection;

    async fn open(&self, config: &AdaptorConfig) -> io::Result<Self::Connection>;
}

/// Serial port transport backed by tokio-serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialTransport;

#[async_trait]
impl Transport for SerialTransport {
    type Connection = SerialConnection;

    async fn open(&self, config: &AdaptorConfig) -> io::Result<SerialConnection> {
        let stream = tokio_serial::new(&config.device, config.baud_rate)
            .open_native_async()
            .map_err(io::Error::from)?;
        debug!(device = %config.device, baud = config.baud_rate, "Serial port opened");
        Ok(SerialConnection {
            stream: Some(stream),
        })
    }
}

/// An open serial port.
pub struct SerialConnection {
    stream: Option<SerialStream>,
}

impl SerialConnection {
    fn stream(&mut self) -> io::Result<&mut SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

#[async_trait]
impl Connection for SerialConnection {
    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(buf).await?;
        stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        let result = self.stream()?.shutdown().await;
        // Dropping the stream releases the file descriptor.
        self.stream = None;
        result
    }
}
