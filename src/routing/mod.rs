pub mod catalog;
pub(crate) mod tool_filter;

pub use catalog::{Catalog, CatalogSource, ToolConflict};
