pub mod daemon;
pub mod pool;

pub use daemon::Daemon;
pub use pool::WorkPool;
