//! Framed channel - discrete messages over a pair of byte streams.
//!
//! - [`FramedReader`] - single-owner inbound side (`read_message`)
//! - [`FramedWriter`] - cloneable outbound side backed by one writer task
//!   (`write_message`)
//!
//! The two directions are independent: a slow reader never blocks writers
//! and vice versa.

mod reader;
mod writer;

pub use reader::FramedReader;
pub use writer::{spawn_writer_task, spawn_writer_task_default, FramedWriter};
