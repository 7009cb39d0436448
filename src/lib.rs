pub mod alerts;
pub mod api;
pub mod chat;
pub mod config;
pub mod llm;
pub mod mart;
pub mod model;
pub mod reorder;
pub mod seed;
