//! Helpers for serialization.

pub mod duration;
pub mod ether;
pub mod hash_map;
