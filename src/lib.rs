//! todolis - todo list with a random activity picker
//!
//! The stores hold per-user state in memory and talk to a
//! [`RemoteDataService`](remote::RemoteDataService). The bundled SQLite
//! backend and directory file store make the whole thing run locally.

pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod randomizer;
pub mod remote;
pub mod storage;
pub mod todo_store;

#[cfg(test)]
mod testing;

pub use error::{CoreError, CoreResult, RemoteError};
