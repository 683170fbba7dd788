//! Study-trip booking API
//!
//! Order lifecycle, coupon and stock ledgers, refunds, and reconciliation with the mobile
//! payment gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::cache::InMemoryCache;
use crate::config::AppConfig;
use crate::gateway::PaymentGateway;
use crate::handlers::AppServices;
use crate::notifications::NotificationDispatcher;
use crate::services::orders::OrderSettings;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    pub gateway: Arc<dyn PaymentGateway>,
    /// Recently acknowledged callback ids
    pub webhook_cache: InMemoryCache,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let settings = OrderSettings {
            reserve_stock_on_create: config.reserve_stock_on_create,
        };
        let services = AppServices::new(db.clone(), gateway.clone(), notifier, settings);
        let webhook_cache = InMemoryCache::new(config.webhook_dedupe_ttl());
        Self {
            db,
            config,
            services,
            gateway,
            webhook_cache,
        }
    }
}
