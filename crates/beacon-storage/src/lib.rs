// Postgres storage layer with sqlx
//
// This crate provides the database implementation of the core EventStore
// contract:
// - PgEventStore: implements EventStore over a PgPool
// - Embedded migrations for the events table

pub mod event_store;
pub mod models;

pub use event_store::PgEventStore;
pub use models::EventRow;
