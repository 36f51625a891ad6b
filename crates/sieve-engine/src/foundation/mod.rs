//! Shared foundation types used by every compiler and runtime stage.

pub mod limits;
pub mod span;

pub use span::{LineIndex, Span};
