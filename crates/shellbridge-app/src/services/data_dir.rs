// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable that overrides the data directory outright.
pub const DATA_DIR_ENV: &str = "SHELLBRIDGE_DATA_DIR";

/// Subdirectory used under a shared data root.
const APP_DIR: &str = "shellbridge";

/// Return the bridge's data directory (holding `config.json`), creating it
/// if needed.
///
/// On mobile the shell passes its documents directory via
/// [`DATA_DIR_ENV`]; desktop falls back to the XDG convention.
pub fn data_dir() -> PathBuf {
    let dir = resolve(
        std::env::var_os(DATA_DIR_ENV),
        std::env::var_os("XDG_DATA_HOME"),
        std::env::var_os("HOME"),
    );
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(path = %dir.display(), error = %e, "could not create data directory");
    }
    dir
}

/// Pick the directory from the shell override, then `$XDG_DATA_HOME`, then
/// `$HOME/.local/share`, then the system temp dir.
///
/// Empty values count as unset.  A relative `$XDG_DATA_HOME` is ignored, as
/// the XDG base directory rules require.
fn resolve(shell_dir: Option<OsString>, xdg_data_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let set = |value: Option<OsString>| value.filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(dir) = set(shell_dir) {
        return dir;
    }
    let shared_root = set(xdg_data_home)
        .filter(|xdg| xdg.is_absolute())
        .or_else(|| set(home).map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir);
    shared_root.join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(s: &str) -> Option<OsString> {
        Some(OsString::from(s))
    }

    #[test]
    fn shell_override_is_used_verbatim() {
        let dir = resolve(os("/data/app/docs"), os("/xdg"), os("/home/u"));
        assert_eq!(dir, PathBuf::from("/data/app/docs"));
    }

    #[test]
    fn xdg_then_home() {
        assert_eq!(resolve(None, os("/xdg"), os("/home/u")), PathBuf::from("/xdg/shellbridge"));
        assert_eq!(
            resolve(None, None, os("/home/u")),
            PathBuf::from("/home/u/.local/share/shellbridge")
        );
    }

    #[test]
    fn empty_and_relative_values_are_skipped() {
        assert_eq!(
            resolve(os(""), os("relative/xdg"), os("/home/u")),
            PathBuf::from("/home/u/.local/share/shellbridge")
        );
        assert_eq!(resolve(None, os(""), os("")), std::env::temp_dir().join(APP_DIR));
    }
}
