pub mod circular_queue;
pub mod fs;
pub mod path;
pub mod serialization;
pub mod system;
pub mod task;
pub mod time_measure;
