//! End-to-end archive run tests.
