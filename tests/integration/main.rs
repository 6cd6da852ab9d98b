//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a slice of the firmware
//! against the mock adapters in [`mock_env`].  All tests run on the host
//! (x86_64) with no real hardware required.

mod flow_tests;
mod link_tests;
mod mock_env;
