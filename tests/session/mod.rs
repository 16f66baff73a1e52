//! Session-level tests: channel semantics, both transports, and views
//! layered on a live channel.

mod stream;
mod views;
