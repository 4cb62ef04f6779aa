//! I/O layer
//!
//! `file_system` abstracts the few filesystem operations the parser and the
//! index need, so both can run against an in-memory filesystem in tests.

pub mod file_system;
