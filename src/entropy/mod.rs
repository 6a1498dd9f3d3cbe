//! Entropy control
//!
//! The phase/budget gate, scoped allowances, the armed OS source and the
//! helpers every randomness consumer goes through.

pub mod budget;
pub mod gate;
pub mod primitives;
pub mod source;
