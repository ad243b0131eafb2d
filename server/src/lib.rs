pub mod args;
pub mod configs;
pub mod log;
pub mod pipeline;
pub mod server_error;
