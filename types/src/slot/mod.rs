//! Slot domain types.
//!
//! Defines the reel vocabulary, drawn outcomes, judge results and the player/team/global
//! aggregates folded by the ledger.

mod aggregate;
mod codec;
mod constants;
mod outcome;

pub use aggregate::*;
pub use codec::{
    optional_string_encode_size, read_optional_string, read_string, string_encode_size,
    write_optional_string, write_string,
};
pub use constants::*;
pub use outcome::*;

#[cfg(test)]
mod tests;
