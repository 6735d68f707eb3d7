pub mod cli;
pub mod clock;
pub mod config;
pub mod http;
pub mod ingest;
pub mod majority;
pub mod mqtt;
pub mod publish;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod timestamp;
