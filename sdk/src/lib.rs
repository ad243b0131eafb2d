pub mod broker;
pub mod consumer;
pub mod error;
pub mod leaderboard;
pub mod models;
pub mod producer;
pub mod schema;
pub mod sinks;
pub mod utils;
pub mod validatable;
