pub mod executor;
pub mod recovery;
pub mod result;
pub mod ssh;
pub mod transport;
