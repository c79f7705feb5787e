//! Executable resolution for stdio backends.
//!
//! - Resolve bare command names (`npx`, `uvx`) against an enriched PATH
//! - Build the PATH handed to the child process
//! - Validate working directories

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Extra locations searched on macOS, where launchd hands out a minimal PATH.
#[cfg(target_os = "macos")]
const MACOS_DEFAULT_PATHS: &str = "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// Resolve `command` to an absolute executable path.
///
/// Absolute paths are checked as-is; bare names are looked up in the
/// effective PATH (process PATH, platform defaults, `path_extra`).
pub fn resolve_command(command: &str, path_extra: Option<&str>) -> Result<PathBuf, String> {
    let candidate = Path::new(command);
    if candidate.is_absolute() {
        validate_exe_path(candidate)?;
        return Ok(candidate.to_path_buf());
    }

    let search_path = build_effective_path(None, path_extra);
    let cwd = env::current_dir().map_err(|e| format!("Failed to read current directory: {e}"))?;
    which::which_in(command, Some(&search_path), cwd).map_err(|e| {
        format!(
            "Executable '{command}' not found: {e} (searched {})",
            search_path.to_string_lossy()
        )
    })
}

/// Check that an absolute path names an executable file.
pub fn validate_exe_path(path: &Path) -> Result<(), String> {
    let shown = path.display();

    if !path.exists() {
        return Err(format!("Executable not found: {shown}"));
    }
    if !path.is_file() {
        return Err(format!("Executable path is not a file: {shown}"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata =
            std::fs::metadata(path).map_err(|e| format!("Failed to check permissions: {e}"))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(format!("File is not executable: {shown}"));
        }
    }

    Ok(())
}

/// Check that a working directory exists.
pub fn validate_working_dir(cwd: &str) -> Result<(), String> {
    let path = Path::new(cwd);

    if !path.exists() {
        return Err(format!("Working directory does not exist: {cwd}"));
    }
    if !path.is_dir() {
        return Err(format!("Working directory path is not a directory: {cwd}"));
    }

    Ok(())
}

/// Build the PATH for a child process.
///
/// Order: directory of the executable, current PATH, platform defaults,
/// `path_extra`. Duplicates are dropped, first occurrence wins.
pub fn build_effective_path(exe_path: Option<&Path>, path_extra: Option<&str>) -> OsString {
    let mut entries: Vec<String> = Vec::new();

    if let Some(dir) = exe_path.and_then(Path::parent).and_then(Path::to_str) {
        entries.push(dir.to_string());
    }

    if let Some(current) = env::var_os("PATH") {
        if let Some(current) = current.to_str() {
            entries.extend(
                current
                    .split(PATH_SEPARATOR)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string),
            );
        }
    }

    #[cfg(target_os = "macos")]
    entries.extend(MACOS_DEFAULT_PATHS.split(':').map(str::to_string));

    if let Some(extra) = path_extra {
        entries.extend(
            extra
                .split(PATH_SEPARATOR)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        );
    }

    let mut seen = HashSet::new();
    let deduped: Vec<String> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    OsString::from(deduped.join(PATH_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_command() {
        let err = resolve_command("definitely-not-a-real-binary-xyz", None).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_absolute_path_must_exist() {
        let err = resolve_command("/nonexistent/path/to/exe", None).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_finds_sh() {
        let path = resolve_command("sh", Some("/bin:/usr/bin")).unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_effective_path_starts_with_exe_dir() {
        let path = build_effective_path(Some(Path::new("/opt/tools/bin/server")), None);
        assert!(path.to_str().unwrap().starts_with("/opt/tools/bin"));
    }

    #[test]
    fn test_effective_path_deduplicates() {
        let path = build_effective_path(
            Some(Path::new("/usr/bin/node")),
            Some("/usr/bin:/custom/path"),
        );
        let path = path.to_str().unwrap();
        let count = path.split(PATH_SEPARATOR).filter(|e| *e == "/usr/bin").count();
        assert_eq!(count, 1);
        assert!(path.contains("/custom/path"));
    }

    #[test]
    fn test_validate_working_dir_rejects_nonexistent() {
        let err = validate_working_dir("/nonexistent/directory").unwrap_err();
        assert!(err.contains("does not exist"));
    }
}
