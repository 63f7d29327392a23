//! Utility functions for command implementation

use crate::config::TestparConfig;
use crate::error::Result;
use std::path::Path;

/// Load .testpar.conf from the given path (or current directory if None)
pub fn load_config(base_path: Option<&str>) -> Result<TestparConfig> {
    let base = base_path.map(Path::new).unwrap_or_else(|| Path::new("."));
    TestparConfig::load_from_dir(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("No .testpar.conf file found"));
    }

    #[test]
    fn test_load_config_sets_base_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILE), "[unit]\nok = true\n").unwrap();
        let path = temp.path().to_string_lossy().to_string();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.base_dir, temp.path());
        assert_eq!(config.suites.len(), 1);
    }
}
