//! Lendkit Equipment Lending Platform
//!
//! A REST JSON API server for equipment lending: users submit borrow
//! requests against a finite inventory, staff approve or reject them, and
//! background jobs expire stale requests, flag overdue loans, send
//! escalating reminders, and reconcile inventory counts.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
