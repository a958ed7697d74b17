//! Wrapped handles.
//!
//! Every wrapper owns its native handle plus the identity cache of its
//! connection, and compares by reference: two wrappers are equal exactly
//! when they are the same wrapper.

mod cursor;
mod database;
mod index;
mod iterate;
mod request;
mod store;
mod transactions;

pub use cursor::{Cursor, CursorPosition};
pub use database::Database;
pub use index::Index;
pub use iterate::CursorIterator;
pub use request::{Pending, Resolved, WrappedRequest};
pub use store::ObjectStore;
pub use transactions::{Completion, Done, Transaction};
