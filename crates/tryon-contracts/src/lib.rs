pub mod commands;
pub mod credentials;
pub mod events;
pub mod garments;
pub mod images;
pub mod models;
pub mod proxies;
