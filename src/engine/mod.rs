pub mod executor;
mod loops;

pub use executor::{ExecutorConfig, PriorityExecutor};
