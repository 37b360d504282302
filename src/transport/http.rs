//! Blocking HTTP transport (C4): `POST /write` with a throughput-scaled
//! per-attempt timeout and bounded, jittered retry — grounded on the
//! teacher's own use of `reqwest` for the Snowflake backend
//! (`snowflake/connection.rs`), generalized from a one-shot REST call into a
//! retrying streaming upload.

use std::collections::VecDeque;
use std::io::Read;
use std::time::{Instant, SystemTime};

use reqwest::blocking::{Body, Client};

use crate::buffer::Buffer;
use crate::error::{Error, ErrorCode, Result};
use crate::options::Options;
use crate::transport::common;

pub struct HttpTransport {
    client: Client,
    url: String,
    opts: Options,
}

/// Reads out owned, already-copied chunk buffers in order. Chunks are
/// copied out of `Buffer` once (so the transport never builds one
/// contiguous in-memory copy of the whole buffer) to satisfy
/// `reqwest::blocking::Body`'s `'static` bound on its reader.
struct ChunkReader {
    chunks: VecDeque<Vec<u8>>,
    cursor: usize,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.chunks.front() {
                None => return Ok(0),
                Some(chunk) => {
                    if self.cursor >= chunk.len() {
                        self.chunks.pop_front();
                        self.cursor = 0;
                        continue;
                    }
                    let n = buf.len().min(chunk.len() - self.cursor);
                    buf[..n].copy_from_slice(&chunk[self.cursor..self.cursor + n]);
                    self.cursor += n;
                    return Ok(n);
                }
            }
        }
    }
}

/// Outcome of a single successful flush, used by the sender to update
/// `last_flush`.
pub struct FlushSuccess {
    pub server_date: Option<SystemTime>,
}

impl HttpTransport {
    pub fn new(opts: &Options) -> Result<HttpTransport> {
        let mut builder = Client::builder().pool_idle_timeout(Some(opts.pool_timeout));

        if opts.protocol.is_tls() {
            if opts.tls_verify == crate::options::TlsVerify::UnsafeOff {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(path) = &opts.tls_roots {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::with_cause(
                        ErrorCode::TlsError,
                        format!("could not read tls_roots {:?}", path),
                        e,
                    )
                })?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| Error::with_cause(ErrorCode::TlsError, "invalid tls_roots pem", e))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::with_cause(ErrorCode::SocketError, "failed to build http client", e))?;

        let url = format!("{}://{}:{}/write", opts.protocol, opts.host, opts.port);

        Ok(HttpTransport {
            client,
            url,
            opts: opts.clone(),
        })
    }

    /// Sends the buffer, retrying on connection-refused and the retriable
    /// status set until `retry_timeout` has elapsed since the first attempt.
    pub fn send(&self, buffer: &Buffer) -> Result<FlushSuccess> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            log::debug!(
                "http flush attempt {} to {} ({} bytes, elapsed {:?})",
                attempt,
                self.url,
                buffer.len(),
                started.elapsed()
            );

            match self.attempt_once(buffer) {
                Ok(success) => return Ok(success),
                Err((err, retriable)) => {
                    if !retriable || self.opts.retry_timeout.is_zero() {
                        return Err(err);
                    }
                    if started.elapsed() >= self.opts.retry_timeout {
                        return Err(Error::server_flush_error(format!(
                            "retry budget of {:?} exhausted after {} attempts: {}",
                            self.opts.retry_timeout, attempt, err
                        )));
                    }
                    log::warn!("http flush attempt {} failed, retrying: {}", attempt, err);
                    std::thread::sleep(common::retry_backoff());
                }
            }
        }
    }

    /// Returns `Ok` on 2xx, or `Err((error, retriable))` otherwise.
    fn attempt_once(&self, buffer: &Buffer) -> std::result::Result<FlushSuccess, (Error, bool)> {
        let reader = ChunkReader {
            chunks: buffer.chunks().map(|c| c.to_vec()).collect(),
            cursor: 0,
        };
        let body = Body::sized(reader, buffer.len() as u64);

        let mut req = self
            .client
            .post(&self.url)
            .timeout(common::per_attempt_timeout(
                self.opts.request_timeout,
                self.opts.request_min_throughput,
                buffer.len(),
            ))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);

        if self.opts.has_basic_auth() {
            req = req.basic_auth(
                self.opts.username.as_deref().unwrap_or_default(),
                self.opts.password.as_deref(),
            );
        } else if self.opts.has_bearer_auth() {
            req = req.bearer_auth(self.opts.token.as_deref().unwrap_or_default());
        }

        let response = req.send().map_err(|e| {
            let retriable = e.is_connect() || e.is_timeout();
            (
                Error::with_cause(ErrorCode::ServerFlushError, "http request failed", e),
                retriable,
            )
        })?;

        let status = response.status();
        if status.is_success() {
            let server_date = response
                .headers()
                .get(reqwest::header::DATE)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| httpdate::parse_http_date(s).ok());
            return Ok(FlushSuccess { server_date });
        }

        let retriable = common::is_retriable_status(status.as_u16());
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        let text = response.text().unwrap_or_default();
        let message = common::describe_error_body(status.as_u16(), is_json, &text);
        Err((
            Error::server_flush_error(format!("server rejected flush: {}", message)),
            retriable,
        ))
    }
}
