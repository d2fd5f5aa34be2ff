//! Control plane: the `$ready` handshake over the data layer's stdout.
//!
//! The data plane (framed requests and responses) runs over the socket;
//! stdout carries exactly one control message, sent once the data layer is
//! connected and able to serve.
//!
//! # Workflow
//!
//! 1. Gateway binds a socket and spawns the data layer
//! 2. Data layer connects to the socket
//! 3. Data layer prints `$ready` on stdout
//! 4. Gateway starts submitting requests

mod ready;
mod stdio;

pub use ready::{
    build_ready_message, parse_ready_line, read_ready_signal, ReadySignal, PROTOCOL_VERSION,
    READY_METHOD,
};
pub use stdio::{write_stdout_json, write_stdout_line};
