//! Blocking TCP transport (C5): connect, optional TLS wrap, optional ECDSA
//! challenge-response authentication, then raw chunk streaming.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use crate::buffer::Buffer;
use crate::error::{Error, ErrorCode, Result};
use crate::net::tls::{self, TlsStream};
use crate::options::Options;
use crate::transport::common;

/// Either a bare TCP stream or one wrapped in TLS; both implement
/// `Read + Write`, so the rest of the transport is oblivious to which.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A connected, optionally authenticated TCP sender. Construction performs
/// the connect/TLS/auth sequence; `send` only ever streams chunks.
pub struct TcpTransport {
    stream: Stream,
}

fn io_err_is_connection_refused(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::ConnectionRefused
}

impl TcpTransport {
    pub fn connect(opts: &Options) -> Result<TcpTransport> {
        let addr = (opts.host.as_str(), opts.port);
        let tcp = TcpStream::connect(addr).map_err(|e| {
            if io_err_is_connection_refused(&e) {
                Error::with_cause(ErrorCode::SocketError, "connection refused", e)
            } else {
                Error::with_cause(
                    ErrorCode::CouldNotResolveAddr,
                    format!("could not connect to {}:{}", opts.host, opts.port),
                    e,
                )
            }
        })?;
        tcp.set_nodelay(true).ok();

        let mut stream = if opts.protocol.is_tls() {
            let tls_stream = tls::wrap(
                tcp,
                &opts.host,
                opts.tls_verify,
                opts.tls_roots.as_deref(),
            )?;
            Stream::Tls(Box::new(tls_stream))
        } else {
            Stream::Plain(tcp)
        };

        if opts.token.is_some() {
            authenticate(&mut stream, opts)?;
        }

        Ok(TcpTransport { stream })
    }

    /// Streams every finished chunk of `buffer` over the wire in order.
    pub fn send(&mut self, buffer: &Buffer) -> Result<()> {
        for chunk in buffer.chunks() {
            self.stream.write_all(chunk).map_err(|e| {
                Error::with_cause(ErrorCode::ServerFlushError, "tcp write failed", e)
            })?;
        }
        self.stream
            .flush()
            .map_err(|e| Error::with_cause(ErrorCode::ServerFlushError, "tcp flush failed", e))?;
        Ok(())
    }
}

/// Implements the five-step challenge-response handshake from the
/// specification's TCP authentication section, bounded by `auth_timeout`.
fn authenticate(stream: &mut Stream, opts: &Options) -> Result<()> {
    let deadline = Instant::now() + opts.auth_timeout;
    let username = opts
        .username
        .as_deref()
        .ok_or_else(|| Error::auth_error("tcp authentication requires `username`"))?;
    let token = opts
        .token
        .as_deref()
        .ok_or_else(|| Error::auth_error("tcp authentication requires `token`"))?;

    stream
        .write_all(username.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .and_then(|_| stream.flush())
        .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send username", e))?;

    let mut reader = BufReader::new(TimeoutGuard { stream, deadline });
    let mut challenge = Vec::new();
    reader
        .read_until(b'\n', &mut challenge)
        .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to read challenge", e))?;
    if challenge.last() == Some(&b'\n') {
        challenge.pop();
    }
    if challenge.is_empty() {
        return Err(Error::auth_error(
            "server closed the connection before sending an authentication challenge",
        ));
    }

    let encoded = common::sign_challenge(token, &challenge)?;

    stream
        .write_all(encoded.as_bytes())
        .and_then(|_| stream.flush())
        .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send signature", e))?;

    Ok(())
}

/// A `Read` wrapper that fails the read once `deadline` has elapsed, giving
/// the blocking auth handshake a coarse-grained bound on top of whatever
/// socket-level read timeout was already set.
struct TimeoutGuard<'a> {
    stream: &'a mut Stream,
    deadline: Instant,
}

impl Read for TimeoutGuard<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "auth_timeout elapsed while waiting for server challenge",
            ));
        }
        self.stream.read(buf)
    }
}
