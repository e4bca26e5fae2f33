//! Error interface for this crate.
//!
//! This module creates an [`Error`] trait, which allows
//! front-ends to point at the source line that caused a problem
//! and to offer a hint on how to fix it.

use std::borrow::Cow;

/// Unified error interface for all errors in this crate.
///
/// Note that the [`Display`] implementation is used for a brief message,
/// where as [`Error::help`] is used for any clarifying messages.
///
/// [`Display`]: std::fmt::Display
pub trait Error: std::error::Error {
    /// The zero-based source line this error is associated with (if it exists).
    fn line(&self) -> Option<usize> {
        None
    }

    /// A clarifying message to help aid someone in how to fix the message.
    fn help(&self) -> Option<Cow<str>>;
}
