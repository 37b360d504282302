//! Suspendable sender: the async counterpart of [`crate::sender::Sender`].
//! Same auto-flush and transaction rules, same owned-buffer design, only the
//! transport calls are awaited instead of blocking the calling thread.

use std::time::{Duration, Instant};

use crate::aio::http::AsyncHttpTransport;
use crate::aio::tcp::AsyncTcpTransport;
use crate::buffer::{Buffer, TimestampMicros, TimestampNanos};
use crate::error::{Error, Result};
use crate::options::Options;

enum Transport {
    Http(AsyncHttpTransport),
    Tcp(AsyncTcpTransport),
}

pub struct AsyncSender {
    opts: Options,
    transport: Transport,
    buffer: Buffer,
    last_flush: Instant,
    errored: bool,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(10 * 365 * 24 * 3600)
}

impl AsyncSender {
    pub async fn from_options(opts: Options) -> Result<AsyncSender> {
        let transport = if opts.protocol.is_http() {
            Transport::Http(AsyncHttpTransport::new(&opts)?)
        } else {
            Transport::Tcp(AsyncTcpTransport::connect(&opts).await?)
        };
        let buffer = Buffer::with_sizes(opts.init_buf_size, opts.max_buf_size, opts.max_name_len);
        Ok(AsyncSender {
            opts,
            transport,
            buffer,
            last_flush: far_future(),
            errored: false,
        })
    }

    pub async fn from_conf(conf: &str) -> Result<AsyncSender> {
        AsyncSender::from_options(Options::from_conf(conf)?).await
    }

    /// The owned buffer, for callers that want to build a row without
    /// triggering auto-flush on every `at`/`at_now`. Use the
    /// `table`/`symbol`/`column_*`/`at`/`at_now` methods on `AsyncSender`
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
    /// then applies the auto-flush thresholds (see
    /// [`AsyncSender::auto_flush_if_needed`]).
    pub async fn at(&mut self, ts: TimestampNanos) -> Result<()> {
        self.buffer.at(ts)?;
        self.auto_flush_if_needed().await
    }

    /// Terminates the current row using the local wall clock, then applies
    /// the auto-flush thresholds, as [`AsyncSender::at`].
    pub async fn at_now(&mut self) -> Result<()> {
        self.buffer.at_now()?;
        self.auto_flush_if_needed().await
    }

    pub async fn auto_flush_if_needed(&mut self) -> Result<()> {
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
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.flush_inner(false).await
    }

    async fn flush_inner(&mut self, via_commit: bool) -> Result<()> {
        if self.buffer.is_within_transaction() && !via_commit {
            return Err(Error::invalid_api_call(
                "send is not permitted inside an open transaction except via commit()",
            ));
        }
        if self.buffer.is_empty() {
            return Ok(());
        }

        let result = match &mut self.transport {
            Transport::Http(http) => http.send(&self.buffer).await.map(|ok| {
                if let Some(date) = ok.server_date {
                    log::debug!("server acknowledged flush at {:?}", date);
                }
            }),
            Transport::Tcp(tcp) => tcp.send(&self.buffer).await,
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

    pub async fn transaction(&mut self, table: &str) -> Result<()> {
        if !self.opts.protocol.is_http() {
            return Err(Error::http_not_supported(
                "transactions are only supported over the HTTP transport",
            ));
        }
        self.buffer.begin_transaction(table)
    }

    pub async fn commit(&mut self) -> Result<()> {
        if !self.buffer.is_within_transaction() {
            return Err(Error::invalid_api_call("commit() called with no open transaction"));
        }
        let result = self.flush_inner(true).await;
        self.buffer.end_transaction();
        result
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if !self.buffer.is_within_transaction() {
            return Err(Error::invalid_api_call("rollback() called with no open transaction"));
        }
        self.buffer.clear();
        self.buffer.end_transaction();
        Ok(())
    }

    /// Performs a final best-effort flush. `Drop` cannot run async code, so
    /// callers that want the drop-time auto-flush semantics from the
    /// blocking `Sender` must call this explicitly before the value goes out
    /// of scope (documented limitation of `Drop` in async Rust).
    pub async fn close(mut self) -> Result<()> {
        if self.opts.auto_flush && !self.errored && !self.buffer.is_empty() {
            self.flush().await?;
        }
        Ok(())
    }
}
