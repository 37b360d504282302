//! Wire transports: HTTP (C4) and TCP (C5). Both take a fully-formed
//! [`crate::buffer::Buffer`] and stream its chunks; neither transport knows
//! about the fluent row builder or the auto-flush controller, which live in
//! [`crate::sender`].

pub mod common;
pub mod http;
pub mod tcp;
