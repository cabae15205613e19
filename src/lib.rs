pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::infra::{storage::DiskStorage, store::Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub storage: DiskStorage,
    pub token_key: [u8; 32],
    pub token_ttl_hours: u64,
}
