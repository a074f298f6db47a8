pub mod file;
pub mod memory;
pub mod traits;

pub use file::JsonFileStore;
pub use memory::InMemoryScheduleStore;
pub use traits::ScheduleStore;
