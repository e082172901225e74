pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod monitoring;
pub mod security;
pub mod state;
