//! Change capture at the source.
//!
//! A [`ChangeSource`] triggers the capture of pending changes and returns the whole staging log
//! as a materialized list, since reduction needs every record of the cycle at once.

mod base;
pub mod memory;
pub mod postgres;

pub use base::ChangeSource;
