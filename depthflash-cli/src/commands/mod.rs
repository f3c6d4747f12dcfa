//! Command implementations.
//!
//! Offline image commands live in `image`; everything that talks to a
//! device lives in `device`.

pub(crate) mod completions;
pub(crate) mod device;
pub(crate) mod image;
