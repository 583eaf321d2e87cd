pub mod config;
pub mod kafka;
pub mod model;
pub mod pipeline;
pub mod schema;
pub mod serialization;
pub mod sink;
pub mod source;
