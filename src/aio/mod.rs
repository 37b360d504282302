//! Suspendable (tokio-based) transport and sender variants, gated behind the
//! `tokio-rustls` feature. Semantics mirror the blocking path exactly — same
//! retry/timeout/auth rules — only the I/O is `async`. Pure logic (retry
//! classification, timeout arithmetic, challenge signing) is shared with the
//! blocking transports via [`crate::transport::common`].

pub mod http;
pub mod sender;
pub mod tcp;

pub use sender::AsyncSender;
