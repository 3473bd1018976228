//! Common Utilities
//!
//! Shared error handling, HTTP plumbing and helpers.

pub mod error;
pub mod http;
pub mod interpolation;
pub mod result;

pub use error::{AuthError, ErrorCode, ErrorKind};
pub use http::{
    encode_query, parse_query_pairs, query_param, send_checked, HttpClient, HttpMethod,
    HttpRequest, HttpResponse, ReqwestHttpClient, TransportError,
};
pub use interpolation::{interpolate, scalar_string};
pub use result::AuthResult;
