//! The row-builder façade, auto-flush controller, and transaction discipline
//! (C3 + C6). `Sender` owns one transport and one [`Buffer`] — ownership is
//! unified so that a final best-effort flush can run from `Drop`, which a
//! transport-only type with an external buffer reference could not do.
//! `Sender::buffer()` exposes the owned buffer for the same fluent chaining
//! (`table().symbol().column_i64().at()`) shown by the retrieved real-world
//! consumer of this family of client.

use std::time::{Duration, Instant};

use crate::buffer::{Buffer, TimestampMicros, TimestampNanos};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::transport::http::HttpTransport;
use crate::transport::tcp::TcpTransport;

enum Transport {
    Http(HttpTransport),
    Tcp(TcpTransport),
}

/// Owns a transport connection and a buffer, and applies the auto-flush and
/// (HTTP-only) transaction rules on top of the raw send operation.
pub struct Sender {
    opts: Options,
    transport: Transport,
    buffer: Buffer,
    last_flush: Instant,
    errored: bool,
}

/// "Far future", so the wall-clock auto-flush trigger cannot fire before the
/// first successful send.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(10 * 365 * 24 * 3600)
}

impl Sender {
    /// Connects (eagerly, for TCP) using already-parsed `Options`.
    pub fn from_options(opts: Options) -> Result<Sender> {
        let transport = if opts.protocol.is_http() {
            Transport::Http(HttpTransport::new(&opts)?)
        } else {
            Transport::Tcp(TcpTransport::connect(&opts)?)
        };
        let buffer = Buffer::with_sizes(opts.init_buf_size, opts.max_buf_size, opts.max_name_len);
        Ok(Sender {
            opts,
            transport,
            buffer,
            last_flush: far_future(),
            errored: false,
        })
    }

    /// Parses `conf` (see [`crate::options::Options::from_conf`]) and
    /// connects.
    pub fn from_conf(conf: &str) -> Result<Sender> {
        Sender::from_options(Options::from_conf(conf)?)
    }

    /// Reads the configuration string from `QDB_CLIENT_CONF` and connects.
    pub fn from_env() -> Result<Sender> {
        Sender::from_options(Options::from_env()?)
    }

    /// The owned buffer, for callers that want to build a row without
    /// triggering auto-flush on every `at`/`at_now` (e.g. while composing a
    /// transaction meant to be committed as one unit). Row construction
    /// through this accessor does not check the auto-flush thresholds; use
    /// the `table`/`symbol`/`column_*`/`at`/`at_now` methods on `Sender`
    /// itself for the normal, auto-flushing chain.
    pub fn buffer(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Begins a new row for `name`, matching [`Buffer::table`].
    pub fn table(&mut self, name: &str) -> Result<&mut Self> {
        self.buffer.table(name)?;
        Ok(self)
    }

    /// Appends a `,name=value` symbol (tag), matching [`Buffer::symbol`].
    pub fn symbol(&mut self, name: &str, value: impl AsRef<str>) -> Result<&mut Self> {
        self.buffer.symbol(name, value)?;
        Ok(self)
    }

    /// Appends a UTF-8 string field, matching [`Buffer::column_str`].
    pub fn column_str(&mut self, name: &str, value: impl AsRef<str>) -> Result<&mut Self> {
        self.buffer.column_str(name, value)?;
        Ok(self)
    }

    /// Appends a 64-bit integer field, matching [`Buffer::column_i64`].
    pub fn column_i64(&mut self, name: &str, value: i64) -> Result<&mut Self> {
        self.buffer.column_i64(name, value)?;
        Ok(self)
    }

    /// Appends a boolean field, matching [`Buffer::column_bool`].
    pub fn column_bool(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        self.buffer.column_bool(name, value)?;
        Ok(self)
    }

    /// Appends a floating-point field, matching [`Buffer::column_f64`].
    pub fn column_f64(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        self.buffer.column_f64(name, value)?;
        Ok(self)
    }

    /// Appends a timestamp field, matching [`Buffer::column_ts`].
    pub fn column_ts(&mut self, name: &str, value: TimestampMicros) -> Result<&mut Self> {
        self.buffer.column_ts(name, value)?;
        Ok(self)
    }

    /// Terminates the current row with an explicit designated timestamp,
    /// then applies the row-count/byte-size/wall-clock auto-flush
    /// thresholds (see [`Sender::auto_flush_if_needed`]).
    pub fn at(&mut self, ts: TimestampNanos) -> Result<()> {
        self.buffer.at(ts)?;
        self.auto_flush_if_needed()
    }

    /// Terminates the current row using the local wall clock, then applies
    /// the auto-flush thresholds, as [`Sender::at`].
    pub fn at_now(&mut self) -> Result<()> {
        self.buffer.at_now()?;
        self.auto_flush_if_needed()
    }

    /// Call after every `at`/`at_now` to apply the row-count/byte-size/
    /// wall-clock auto-flush thresholds. A no-op when `auto_flush` is off,
    /// inside a transaction, or while the sender is in an error state.
    pub fn auto_flush_if_needed(&mut self) -> Result<()> {
        if !self.opts.auto_flush || self.buffer.is_within_transaction() || self.errored {
            return Ok(());
        }
        let triggered = (self.opts.auto_flush_rows > 0
            && self.buffer.row_count() as i64 >= self.opts.auto_flush_rows)
            || (self.opts.auto_flush_bytes > 0
                && self.buffer.len() as i64 >= self.opts.auto_flush_bytes)
            || (!self.opts.auto_flush_interval.is_zero()
                && self.last_flush.elapsed() >= self.opts.auto_flush_interval);
        if triggered {
            self.flush()?;
        }
        Ok(())
    }

    /// Sends the buffer over the wire and clears it on success. On failure
    /// the buffer is left intact (see §7: transport errors never silently
    /// discard data) and the sender is marked errored, which suppresses
    /// auto-flush on drop.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_inner(false)
    }

    fn flush_inner(&mut self, via_commit: bool) -> Result<()> {
        if self.buffer.is_within_transaction() && !via_commit {
            return Err(Error::invalid_api_call(
                "send is not permitted inside an open transaction except via commit()",
            ));
        }
        if self.buffer.is_empty() {
            return Ok(());
        }

        let result = match &mut self.transport {
            Transport::Http(http) => http.send(&self.buffer).map(|ok| {
                if let Some(date) = ok.server_date {
                    log::debug!("server acknowledged flush at {:?}", date);
                }
            }),
            Transport::Tcp(tcp) => tcp.send(&self.buffer),
        };

        match result {
            Ok(()) => {
                self.buffer.clear();
                self.last_flush = Instant::now();
                self.errored = false;
                Ok(())
            }
            Err(err) => {
                self.errored = true;
                Err(err)
            }
        }
    }

    /// Opens an HTTP transaction scoped to `table`. Requires an empty buffer
    /// and no already-open transaction.
    pub fn transaction(&mut self, table: &str) -> Result<()> {
        if !self.opts.protocol.is_http() {
            return Err(Error::http_not_supported(
                "transactions are only supported over the HTTP transport",
            ));
        }
        self.buffer.begin_transaction(table)
    }

    /// Flushes the transaction's buffered rows. On success the transaction
    /// is closed and the buffer cleared; on failure the transaction is
    /// still closed (so the caller can start a fresh one) but the buffer
    /// contents are preserved for inspection or manual resend.
    pub fn commit(&mut self) -> Result<()> {
        if !self.buffer.is_within_transaction() {
            return Err(Error::invalid_api_call("commit() called with no open transaction"));
        }
        let result = self.flush_inner(true);
        self.buffer.end_transaction();
        result
    }

    /// Discards the buffered transaction rows without contacting the
    /// server.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.buffer.is_within_transaction() {
            return Err(Error::invalid_api_call("rollback() called with no open transaction"));
        }
        self.buffer.clear();
        self.buffer.end_transaction();
        Ok(())
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.opts.auto_flush && !self.errored && !self.buffer.is_empty() {
            if let Err(err) = self.flush() {
                log::warn!("final auto-flush on drop failed and was suppressed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn http_sender() -> Sender {
        Sender::from_conf("http::addr=localhost:9000;auto_flush=off;").unwrap()
    }

    #[test]
    fn transaction_rejected_over_tcp() {
        let mut sender = Sender::from_conf("tcp::addr=localhost:9009;auto_flush=off;").unwrap();
        let err = sender.transaction("trades").unwrap_err();
        assert_eq!(err.code(), ErrorCode::HttpNotSupported);
    }

    #[test]
    fn commit_without_transaction_is_rejected() {
        let mut sender = http_sender();
        let err = sender.commit().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
    }

    #[test]
    fn rollback_without_transaction_is_rejected() {
        let mut sender = http_sender();
        let err = sender.rollback().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
    }

    #[test]
    fn rollback_discards_buffered_rows_without_contacting_server() {
        let mut sender = http_sender();
        sender.transaction("trades").unwrap();
        sender
            .buffer()
            .table("trades")
            .unwrap()
            .column_i64("qty", 1)
            .unwrap();
        sender.buffer().at_now().unwrap();
        assert!(sender.buffer().len() > 0);

        sender.rollback().unwrap();
        assert_eq!(sender.buffer().len(), 0);
        assert!(!sender.buffer().is_within_transaction());
    }

    #[test]
    fn transaction_scopes_table_name() {
        let mut sender = http_sender();
        sender.transaction("trades").unwrap();
        let err = sender.buffer().table("other").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
    }

    #[test]
    fn send_outside_commit_rejected_within_transaction() {
        let mut sender = http_sender();
        sender.transaction("trades").unwrap();
        sender
            .buffer()
            .table("trades")
            .unwrap()
            .column_bool("ok", true)
            .unwrap();
        sender.buffer().at_now().unwrap();

        let err = sender.flush().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidApiCall);
    }

    #[test]
    fn empty_flush_is_a_no_op() {
        let mut sender = http_sender();
        sender.flush().unwrap();
    }
}
