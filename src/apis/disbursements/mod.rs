//! APIs and models related to disbursement transfers.

mod api;
mod model;

pub use api::DisbursementsApi;
pub use model::*;
