//! WAL test suite

mod buffer_tests;
