pub mod analytics;
pub mod auth;
pub mod chat;
pub mod chat2;
pub mod internal;
pub mod purchasing;
