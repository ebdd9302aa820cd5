pub mod config;
pub mod error;
pub mod extract;
pub mod loader;
pub mod pipeline;
pub mod table;
