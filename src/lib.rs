//! SmartPlate: upload a food photo, get a nutrition table or recipe ideas
//! back from a multimodal model.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod web; // Single-page UI + JSON API
