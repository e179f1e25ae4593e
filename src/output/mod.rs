//! Result serialization: a YAML-like text stream and length-delimited binary
//! records.

pub mod binary;
pub mod text;

pub use binary::{Record, decode_burndown, read_records, write_binary};
pub use text::write_text;
