//! Low-level networking helpers shared by the blocking transports.

pub mod tls;
