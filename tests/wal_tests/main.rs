//! WAL test suite

mod reader_tests;
mod recovery_tests;
