//! Bounded thread pool and database connection pool.

pub mod db;
pub mod workers;

pub use db::DbPool;
pub use workers::WorkerPool;
