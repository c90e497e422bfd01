pub mod category;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod graph;
pub mod incremental;
pub mod model;
pub mod retriever;
pub mod source;
pub mod store;
pub mod sync;
