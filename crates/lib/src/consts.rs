pub const APP_NAME: &str = "wheelhouse";

/// Build tool driven by every pipeline.
pub const BUILD_TOOL: &str = "maturin";

/// Release page the build tool binaries are downloaded from.
pub const BUILD_TOOL_RELEASES: &str = "https://github.com/PyO3/maturin/releases";

/// Disables the `sudo` prefix on cleanup commands when truthy.
pub const ALLOW_ROOT_ENV: &str = "WHEELHOUSE_ALLOW_ROOT";
