//! Domain models for the hospital management core

mod billing;
mod insurance;
mod user;

pub use billing::*;
pub use insurance::*;
pub use user::*;
