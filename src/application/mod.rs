//! Application services layer.

pub mod error;
pub mod listing;
pub mod load_more;
pub mod normalize;
pub mod pagination;
pub mod paths;
pub mod render;
pub mod repos;
pub mod revalidate;
pub mod site;
