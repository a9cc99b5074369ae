pub mod clock;
pub mod config;
pub mod fanout;
pub mod models;
pub mod repositories;
pub mod services;
pub mod watcher;
