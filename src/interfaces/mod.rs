//! Outer adapters that feed data into the application layer.

pub mod csv;
