//! Process-wide runtime: the store registry and its maintenance ticker.

pub mod registry;

pub use registry::StoreRegistry;
