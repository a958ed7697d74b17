pub mod error;
pub mod key;
pub mod key_range;
pub mod value;

pub use error::{DbError, Result};
pub use key::{Key, KeyPath};
pub use key_range::{KeyRange, Query};
pub use value::Value;
