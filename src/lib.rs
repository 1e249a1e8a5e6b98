//! starchart: record-oriented REST backend for galaxies and planets.
//!
//! Queries are built with [`query::Query`] and run against a [`store::Backend`]
//! (PostgreSQL or in-memory); multi-step writes go through [`service::TransactionCoordinator`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod model;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::Settings;
pub use error::{expect_matched, AppError};
pub use model::{Galaxy, Planet, PlanetType, Record};
pub use query::{create, Direction, Logic, Op, Page, PageRequest, Query};
pub use response::{simple_ok, success_many, success_one};
pub use routes::app;
pub use service::{RequestValidator, TransactionCoordinator};
pub use state::AppState;
pub use store::{Backend, Executor, MemoryBackend, PgBackend};
