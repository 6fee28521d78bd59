//! Built-in normalizers.
//!
//! Framework adapters register their own normalizers at startup; the one
//! shipped here covers the common "request handled" event shape that
//! identifies the endpoint of a trace.

mod process_request;

pub use process_request::ProcessRequest;
pub use process_request::SOURCE_NAME as PROCESS_REQUEST;
