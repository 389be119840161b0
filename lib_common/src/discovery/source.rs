//! # Backend Address Sources
//!
//! Where the discovery loop gets its list of `host:port` addresses. Sources
//! are consulted at the start of every cycle, so edits to the environment
//! variable or the file are picked up without a restart. A source that
//! cannot be read makes the loop skip one cycle, nothing more.

use std::env;
use std::path::PathBuf;

use super::DiscoveryError;

/// Supplies the configured backend addresses for one discovery cycle.
pub trait BackendSource: Send + Sync {
    /// Current list of addresses, in configured order.
    fn addresses(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Splits a comma and/or newline separated list, trimming entries and
/// dropping empty ones.
pub fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A fixed list given at startup.
#[derive(Debug, Clone)]
pub struct StaticBackendSource {
    addresses: Vec<String>,
}

impl StaticBackendSource {
    /// Wraps an already split list.
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }
}

impl BackendSource for StaticBackendSource {
    fn addresses(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.addresses.clone())
    }
}

/// # Environment Source
///
/// Reads a comma-separated list from an environment variable on every cycle,
/// falling back to a default list when the variable is unset.
#[derive(Debug, Clone)]
pub struct EnvBackendSource {
    var: String,
    default: String,
}

impl EnvBackendSource {
    /// `var` is the variable name (usually `BACKEND_SERVICES`), `default` the
    /// raw list used when it is not set.
    pub fn new(var: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            default: default.into(),
        }
    }
}

impl BackendSource for EnvBackendSource {
    fn addresses(&self) -> Result<Vec<String>, DiscoveryError> {
        match env::var(&self.var) {
            Ok(raw) => Ok(parse_address_list(&raw)),
            Err(env::VarError::NotPresent) => Ok(parse_address_list(&self.default)),
            Err(e) => Err(DiscoveryError::AddressList(format!(
                "environment variable {}: {}",
                self.var, e
            ))),
        }
    }
}

/// # File Source
///
/// Re-reads a file holding a comma or newline separated list on every cycle.
#[derive(Debug, Clone)]
pub struct FileBackendSource {
    path: PathBuf,
}

impl FileBackendSource {
    /// Watches `path`; the file does not need to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BackendSource for FileBackendSource {
    fn addresses(&self) -> Result<Vec<String>, DiscoveryError> {
        std::fs::read_to_string(&self.path)
            .map(|raw| parse_address_list(&raw))
            .map_err(|e| DiscoveryError::AddressList(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_trims_and_drops_empty_entries() {
        assert_eq!(
            parse_address_list(" a:80, b:81 ,,\nc:82\n"),
            vec!["a:80", "b:81", "c:82"]
        );
        assert!(parse_address_list("").is_empty());
    }

    #[test]
    fn env_source_falls_back_to_default_when_unset() {
        let source = EnvBackendSource::new("RELAY_TEST_SURELY_UNSET_VAR", "notebook:8080");
        assert_eq!(source.addresses().unwrap(), vec!["notebook:8080"]);
    }

    #[test]
    fn env_source_reads_variable_each_call() {
        let var = "RELAY_TEST_BACKENDS_EACH_CALL";
        let source = EnvBackendSource::new(var, "fallback:1");

        env::set_var(var, "a:80,b:81");
        assert_eq!(source.addresses().unwrap(), vec!["a:80", "b:81"]);

        env::set_var(var, "c:82");
        assert_eq!(source.addresses().unwrap(), vec!["c:82"]);

        env::remove_var(var);
        assert_eq!(source.addresses().unwrap(), vec!["fallback:1"]);
    }

    #[test]
    fn file_source_rereads_and_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backends.txt");
        let source = FileBackendSource::new(&path);

        assert!(matches!(
            source.addresses().unwrap_err(),
            DiscoveryError::AddressList(_)
        ));

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "a:80\nb:81").unwrap();
        drop(file);
        assert_eq!(source.addresses().unwrap(), vec!["a:80", "b:81"]);
    }

    #[test]
    fn static_source_returns_its_list() {
        let source = StaticBackendSource::new(vec!["x:1".into()]);
        assert_eq!(source.addresses().unwrap(), vec!["x:1"]);
    }
}
