//! Serial adaptor for the MakeBlock MegaPi board.
//!
//! The adaptor owns the serial connection to one board and serializes every
//! write through a single background task. It does not know the board's
//! command set; drivers built on top hand it ready-made frames.
//!
//! ```rust,ignore
//! use megapi_adaptor::Adaptor;
//!
//! let mut megapi = Adaptor::new("/dev/ttyAMA0");
//! megapi.connect().await?;
//! megapi.send(vec![0xff, 0x55, 0x02, 0x00, 0x04]).await?;
//! megapi.finalize().await?;
//! ```

pub mod adaptor;
pub mod config;
pub mod error;
pub mod tracing;
pub mod transport;
mod writer;

pub use adaptor::{Adaptor, BoardAdaptor, DEFAULT_NAME};
pub use config::{AdaptorConfig, BOOT_SETTLE_DELAY, DEFAULT_BAUD_RATE, WRITE_PACING};
pub use error::{Error, Result, WriteFailure};
pub use transport::{Connection, SerialConnection, SerialTransport, Transport};
pub use writer::FrameSender;
