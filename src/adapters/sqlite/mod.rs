pub mod pool;
pub mod schema;
pub mod users;

pub use pool::{create_pool, DbPool};
pub use schema::initialize_schema;

#[cfg(test)]
pub use pool::create_test_pool;
