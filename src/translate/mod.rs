//! Translation between the client Chat Completions format and the upstream
//! deployment format.
//!
//! Converts requests, responses, stream chunks and errors. All translation
//! functions are pure (no I/O).

pub mod client_types;
pub mod request;
pub mod response;
pub mod streaming;
pub mod upstream_types;
