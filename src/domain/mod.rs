pub mod error;
pub mod game;
pub mod models;
pub mod registry;
pub mod settings;
pub mod vibration;
