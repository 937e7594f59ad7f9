pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod format;
pub mod geocode;
pub mod infra;
pub mod models;
pub mod output;
pub mod paginator;
pub mod paging;
pub mod poller;
pub mod routes;
pub mod schedule;
pub mod services;
pub mod trips;

#[cfg(test)]
mod test_support;
