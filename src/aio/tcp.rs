//! Suspendable TCP transport: the async counterpart of
//! [`crate::transport::tcp`], built on `tokio::net::TcpStream` and
//! `tokio_rustls::TlsConnector` instead of blocking I/O.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::buffer::Buffer;
use crate::error::{Error, ErrorCode, Result};
use crate::net::tls::build_client_config;
use crate::options::Options;
use crate::transport::common;

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(buf).await,
            Stream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush().await,
            Stream::Tls(s) => s.flush().await,
        }
    }
}

pub struct AsyncTcpTransport {
    stream: Stream,
}

impl AsyncTcpTransport {
    pub async fn connect(opts: &Options) -> Result<AsyncTcpTransport> {
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
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
            let config = build_client_config(opts.tls_verify, opts.tls_roots.as_deref())?;
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = rustls::pki_types::ServerName::try_from(opts.host.clone())
                .map_err(|e| Error::tls_error(format!("invalid server name: {}", e)))?;
            let tls = connector.connect(server_name, tcp).await.map_err(|e| {
                Error::with_cause(ErrorCode::TlsError, "tls handshake failed", e)
            })?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp)
        };

        if opts.token.is_some() {
            authenticate(&mut stream, opts).await?;
        }

        Ok(AsyncTcpTransport { stream })
    }

    pub async fn send(&mut self, buffer: &Buffer) -> Result<()> {
        for chunk in buffer.chunks() {
            self.stream.write_all(chunk).await.map_err(|e| {
                Error::with_cause(ErrorCode::ServerFlushError, "tcp write failed", e)
            })?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::with_cause(ErrorCode::ServerFlushError, "tcp flush failed", e))?;
        Ok(())
    }
}

async fn authenticate(stream: &mut Stream, opts: &Options) -> Result<()> {
    let body = async {
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
            .await
            .and(Ok(()))
            .map_err(|e: std::io::Error| {
                Error::with_cause(ErrorCode::AuthError, "failed to send username", e)
            })?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send username", e))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send username", e))?;

        let mut challenge = Vec::new();
        match stream {
            Stream::Plain(s) => {
                read_challenge(&mut BufReader::new(s), &mut challenge).await?;
            }
            Stream::Tls(s) => {
                read_challenge(&mut BufReader::new(s.as_mut()), &mut challenge).await?;
            }
        }
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
            .await
            .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send signature", e))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to send signature", e))?;
        Ok(())
    };

    match tokio::time::timeout(opts.auth_timeout, body).await {
        Ok(result) => result,
        Err(_) => Err(Error::auth_error(
            "auth_timeout elapsed during the tcp authentication handshake",
        )),
    }
}

async fn read_challenge<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
) -> Result<()> {
    tokio::io::AsyncBufReadExt::read_until(reader, b'\n', out)
        .await
        .map_err(|e| Error::with_cause(ErrorCode::AuthError, "failed to read challenge", e))?;
    Ok(())
}
