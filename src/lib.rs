//! A client for streaming time-series rows into QuestDB over the InfluxDB
//! Line Protocol (ILP), either over HTTP (with bounded retry) or over raw or
//! TLS-wrapped TCP (with optional ECDSA challenge-response authentication).
//!
//! ```no_run
//! use questdb_ilp_client::{Sender, TimestampNanos};
//!
//! let mut sender = Sender::from_conf("http::addr=localhost:9000;")?;
//! sender
//!     .table("trades")?
//!     .symbol("side", "buy")?
//!     .column_f64("price", 1234.5)?
//!     .column_i64("qty", 10)?
//!     .at(TimestampNanos::now())?;
//! sender.flush()?;
//! # Ok::<(), questdb_ilp_client::Error>(())
//! ```
#![warn(future_incompatible, rust_2018_idioms)]

#[cfg(feature = "tokio-rustls")]
pub mod aio;

mod buffer;
mod error;
mod ident;
mod net;
mod options;
mod sender;
mod transport;

pub use buffer::{Buffer, TimestampMicros, TimestampNanos};
pub use error::{Error, ErrorCode, Result};
pub use options::{Options, Protocol, TlsVerify};
pub use sender::Sender;
