//! Execution relay integration tests
#![allow(missing_docs)]

mod cases;
