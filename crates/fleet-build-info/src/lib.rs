//! Build metadata embedded into every fleetd binary.

/// Static build information, filled in at compile time.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    /// The crate version, from `CARGO_PKG_VERSION`.
    pub version: &'static str,
    /// The Git SHA the binary was built from, or `"unknown"` outside a Git
    /// checkout.
    pub sha: &'static str,
    /// The UTC build timestamp.
    pub time: &'static str,
    /// The target triple the binary was built for.
    pub target_triple: &'static str,
}

impl BuildInfo {
    /// Formats the build info the way `--version` output and the `/1.0`
    /// server-identity response render it.
    pub fn human_version(&self) -> String {
        format!(
            "{} ({}, built {} for {})",
            self.version, self.sha, self.time, self.target_triple
        )
    }
}

/// Builds a [`BuildInfo`] from the calling crate's compile-time environment.
///
/// Unlike the teacher's `run_command_str!`-based `BUILD_INFO` const (which
/// shells out to `git` at compile time), fleetd reads `FLEET_BUILD_SHA`, set
/// by the build script when available, falling back to `"unknown"` so the
/// crate builds reproducibly without a `.git` directory present.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::BuildInfo {
            version: env!("CARGO_PKG_VERSION"),
            sha: match option_env!("FLEET_BUILD_SHA") {
                Some(sha) => sha,
                None => "unknown",
            },
            time: match option_env!("FLEET_BUILD_TIME") {
                Some(time) => time,
                None => "unknown",
            },
            target_triple: match option_env!("TARGET_TRIPLE") {
                Some(triple) => triple,
                None => "unknown",
            },
        }
    };
}
