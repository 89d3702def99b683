//! Types flowing through a batch: change-log records, their reduced state and the typed rows
//! handed to destinations.

mod cell;
mod change;
mod resolved;
mod schema;
mod table_row;

pub use cell::*;
pub use change::*;
pub use resolved::*;
pub use schema::*;
pub use table_row::*;
