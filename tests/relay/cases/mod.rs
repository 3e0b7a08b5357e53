//! Execution relay test cases

mod funding;
mod policy;
mod queue;
