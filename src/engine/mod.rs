pub mod backoff;
pub mod stop;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod testkit;

pub use stop::StopToken;
pub use worker::UserWorker;
