//! HTTP/1.1 request parsing and response building.

pub mod mime;
pub mod request;
pub mod response;
pub mod status;

pub use request::{ParseOutcome, ParseState, Request};
pub use response::{MappedFile, Response};
