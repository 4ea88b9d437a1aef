pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;

#[cfg(test)]
pub(crate) mod test_support;
