use std::collections::BTreeMap;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use tcprobe::ProbeModule;
use thiserror::Error;

pub const DEFAULT_MODULE: &str = "tcp_connect";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse configuration: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
    #[error("unknown module {0:?}")]
    UnknownModule(String),
}

/// Named probe modules, as `[modules.<name>]` tables
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modules: BTreeMap<String, ProbeModule>,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/tcprobe/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("tcprobe/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self { modules: BTreeMap::from([(DEFAULT_MODULE.to_string(), ProbeModule::default())]) }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Probe Configuration:")?;
        for (name, module) in &self.modules {
            write_title_1(f, name)?;
            write_1(f, "Timeout", &format_args!("{:?}", module.timeout))?;
            write_1(f, "Transport", &format_args!("{:?}", module.transport_protocol))?;
            write_1(f, "Preferred IP Protocol", &module.preferred_ip_protocol)?;
            write_1(f, "TLS", &module.tls)?;
            if module.tls {
                let starttls = module.tls_config.starttls.as_deref().unwrap_or("none");
                write_2(f, "STARTTLS", &starttls)?;
                write_2(f, "Skip Verify", &module.tls_config.insecure_skip_verify)?;
            }
            write_1(f, "Query Steps", &module.query_response.len())?;
            for step in &module.query_response {
                write_2(f, "Expect", &format_args!("{:?}", step.expect))?;
                write_2(f, "Send", &format_args!("{:?}", step.send))?;
            }
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/tcprobe/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Look up a module by name
    pub fn module(&self, name: &str) -> Result<&ProbeModule, Error> {
        self.modules.get(name).ok_or_else(|| Error::UnknownModule(name.to_string()))
    }
}
