pub mod analytics;
pub mod broadcast;
pub mod dashboard;
pub mod inbox;
pub mod keywords;
pub mod lists;
pub mod redirect;
pub mod settings;
pub mod subscribers;
pub mod webhooks;
