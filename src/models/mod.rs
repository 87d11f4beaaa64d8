//! Data models for the vehicle inventory.
//!
//! `Vehicle` keeps the field names the browser client already uses, so documents written by
//! either side stay interchangeable.

mod document;
mod vehicle;

pub use document::*;
pub use vehicle::*;
