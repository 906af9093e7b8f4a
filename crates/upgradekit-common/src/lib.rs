pub mod error;
pub mod serialized;

pub use error::{Error, Result};
pub use serialized::{Array, DecodeError, Key, ObjectPolicy, Value};
