/// ISS tracking core: upstream clients, fetch orchestration and the shared store
pub mod clients;
pub mod config;
pub mod domain;
pub mod errors;
pub mod geo;
pub mod services;
pub mod store;
pub mod tasks;
pub mod tracker;
pub mod utils;
