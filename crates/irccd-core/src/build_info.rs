//! Build metadata embedded by the build script.

/// `git describe` of the source tree, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("IRCCD_GIT_HASH");

/// The cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("IRCCD_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Long version for `irccd --version` and the startup log line,
/// e.g. `"0.2.0 (1a2b3c4d, release)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
