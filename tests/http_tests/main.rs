//! HTTP front end test suite
