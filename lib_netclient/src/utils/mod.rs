//! General helper types shared by the HTTP and WebSocket surfaces:
//! case-insensitive header storage and query-string rendering.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod headers;
pub mod query;

pub use headers::Headers;
pub use query::{to_query_string, QueryParams};
