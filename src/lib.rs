pub mod api;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod opencourse;
pub mod services;
pub mod state;
