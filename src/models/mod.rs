//! Data models for backend entities

mod bill;
mod company;
mod expense;
mod group;
mod transaction;

pub use bill::*;
pub use company::*;
pub use expense::*;
pub use group::*;
pub use transaction::*;
