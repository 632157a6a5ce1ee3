//! A [`log::Log`] implementation which formats records into an arbitrary [`core::fmt::Write`] sink
#![no_std]

mod sink_logger;

pub use sink_logger::SinkLogger;
