// Library for tests to access modules

pub mod config;
pub mod error;
pub mod models;
pub mod rollup_worker;
pub mod routes;
pub mod stats_repo;
pub mod subnet;
