pub mod health;
pub mod images;
pub mod jobs;
pub mod metrics;
pub mod tokens;
