pub mod models;
pub mod recorder;
