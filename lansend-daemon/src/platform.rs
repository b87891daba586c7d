//! Platform-specific default paths.

use std::path::PathBuf;

/// Root of the daemon's persisted state: config.json, certs/, metadata/.
pub fn default_config_dir() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("org", "lansend", "LanSend") {
        return dirs.config_dir().to_path_buf();
    }

    #[cfg(windows)]
    {
        if let Ok(program_data) = std::env::var("PROGRAMDATA") {
            return PathBuf::from(program_data).join("lansend");
        }
        PathBuf::from("C:\\lansend")
    }

    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/lansend")
    }
}

/// Default directory for received files.
pub fn default_save_dir() -> PathBuf {
    if let Some(dirs) = directories::UserDirs::new() {
        if let Some(download) = dirs.download_dir() {
            return download.to_path_buf();
        }
        return dirs.home_dir().join("Downloads");
    }
    PathBuf::from(".")
}

/// Local hostname, used as the certificate common name.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "lansend".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dirs_are_nonempty() {
        assert!(!default_config_dir().as_os_str().is_empty());
        assert!(!default_save_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_hostname_is_nonempty() {
        assert!(!local_hostname().is_empty());
    }
}
