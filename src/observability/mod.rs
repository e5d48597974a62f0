pub mod execution_log;
pub mod progress;

pub use execution_log::*;
pub use progress::*;
