//! HTML views and templates.

pub mod views;
