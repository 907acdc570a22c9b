//! Wire-facing request and status types.

pub mod commands;
pub mod status;
pub mod validation;
