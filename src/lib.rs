pub mod bands;
pub mod config;
pub mod fetch;
pub mod history;
pub mod lineage;
pub mod pipeline;
pub mod score;
pub mod snapshot;
pub mod sources;
pub mod trace;
