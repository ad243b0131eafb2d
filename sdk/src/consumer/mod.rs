pub mod retry;
pub mod runner;
