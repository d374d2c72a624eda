//! Transformation compiler and delivery URL builder.
//!
//! Everything here is pure: no I/O, no clock. Functions that take the option
//! bag by mutable reference consume the keys they understand.

pub mod builder;
pub mod escape;
pub mod expression;
pub mod layer;
pub mod transformation;

pub use builder::{api_url, finalize_resource_type, finalize_source, url};
pub use escape::{escape_public_id, smart_escape};
pub use expression::normalize_expression;
pub use layer::process_layer;
pub use transformation::{Compiled, build_eager, compile, generate_transformation_string};
