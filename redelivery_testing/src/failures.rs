//! A small failure type hierarchy shared by policy tests.

use redelivery::FailureType;
use rstest::fixture;

/// `Error > IoError > {ConnectError, TimeoutError}` and
/// `Error > ValidationError`.
#[derive(Clone, Debug)]
pub struct Hierarchy {
    /// Root of every type below.
    pub error: FailureType,
    /// Child of `error`.
    pub io: FailureType,
    /// Child of `io`.
    pub connect: FailureType,
    /// Child of `io`.
    pub timeout: FailureType,
    /// Child of `error`, unrelated to `io`.
    pub validation: FailureType,
}

impl Default for Hierarchy {
    fn default() -> Self {
        let error = FailureType::root("Error");
        let io = error.subtype("IoError");
        Self {
            connect: io.subtype("ConnectError"),
            timeout: io.subtype("TimeoutError"),
            validation: error.subtype("ValidationError"),
            io,
            error,
        }
    }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn hierarchy() -> Hierarchy { Hierarchy::default() }
