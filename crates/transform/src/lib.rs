//! Transform engine for refract.
//!
//! Evaluates jq-style queries against resolved input bundles and converts
//! the results into ConfigMap text maps or Secret byte maps.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod convert;
pub mod engine;
pub mod error;
pub mod query;

pub use convert::{
    InputScope, ResolvedInput, bytes_map_from_output, encode_bytes, encode_text,
    input_map_from_bytes, input_map_from_text, text_map_from_output,
};
pub use engine::{DEFAULT_QUERY_TIMEOUT, TransformEngine};
pub use error::{ConvertError, Result, TransformError};
pub use query::Query;
