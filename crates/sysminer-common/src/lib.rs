pub mod context;
pub mod error;
pub mod settings;
pub mod stats;
pub mod types;
