pub mod api;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod observability;
pub mod realtime;
pub mod state;
