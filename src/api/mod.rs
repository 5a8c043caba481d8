//! Operator HTTP surface.
//!
//! A thin axum layer over the ledger, archive store and job submission.
//! Callers identify themselves with the `X-Runbox-User` header.

mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;
mod validation;

pub use error::ApiError;
pub use server::router;
pub use state::AppState;
pub use utils::USER_HEADER;
