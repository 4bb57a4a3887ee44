//! Data structures for representing queries and their identities.
mod identity;
mod protocols;
mod query;

pub use identity::*;
pub use protocols::*;
pub use query::*;
