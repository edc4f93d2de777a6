//! Test doubles and canned workflows shared by flowdeck's test suites.

mod fixtures;
mod mock_runtime;

pub use fixtures::*;
pub use mock_runtime::MockRuntimeClient;
