pub mod types;
pub mod error;
pub mod config;
pub mod events;
pub mod runtime;
pub mod services;
pub mod lifecycle;
pub mod engine;
pub mod supervisor;
pub mod scheduler;
pub mod storage;
pub mod launcher;
pub mod api;

pub use config::Config;
pub use types::*;
