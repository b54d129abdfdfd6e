pub mod auth;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod inbound;
pub mod keywords;
pub mod links;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod phone;
