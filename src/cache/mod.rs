//! Caching primitives for generated pages.

pub(crate) mod lock;
mod store;

pub use store::{GeneratedPage, PageStore};
