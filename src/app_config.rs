//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::cli::parse_rate;

/// Defaults read from `config.toml`; command-line values win over them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub tries: Option<u32>,
    pub retry_wait_secs: Option<u64>,
    pub dns_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    /// Bytes per second.
    pub limit_rate: Option<u64>,
    pub user_agent: Option<String>,
    pub directory_prefix: Option<PathBuf>,
    pub max_redirect: Option<u32>,
    pub keep_alive: Option<bool>,
    pub check_certificate: Option<bool>,
    pub ca_certificate: Option<PathBuf>,
    pub retry_connrefused: Option<bool>,
    pub timestamping: Option<bool>,
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against the command-line constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_redirect) = self.max_redirect
            && max_redirect > 1000
        {
            bail!("Invalid config value for `max_redirect`: {max_redirect}. Expected range: 0..=1000");
        }
        if let Some(retry_wait) = self.retry_wait_secs
            && retry_wait > 3600
        {
            bail!("Invalid config value for `retry_wait_secs`: {retry_wait}. Expected range: 0..=3600");
        }
        if self.limit_rate == Some(0) {
            bail!("Invalid config value for `limit_rate`: 0. Omit the key for no limit");
        }
        validate_timeout_secs("dns_timeout_secs", self.dns_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// The tracing filter this setting stands for.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fetcher/config.toml`
/// 2. `$HOME/.config/fetcher/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("fetcher").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("fetcher")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "tries" => cfg.tries = Some(parse_integer_u32(value).with_context(context)?),
            "retry_wait_secs" => {
                cfg.retry_wait_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "dns_timeout_secs" => {
                cfg.dns_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "limit_rate" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                let rate = parse_rate(&parsed)
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(context)?;
                cfg.limit_rate = Some(rate);
            }
            "user_agent" => {
                cfg.user_agent = Some(parse_string_literal(value).with_context(context)?);
            }
            "directory_prefix" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.directory_prefix = Some(PathBuf::from(parsed));
            }
            "max_redirect" => {
                cfg.max_redirect = Some(parse_integer_u32(value).with_context(context)?);
            }
            "keep_alive" => cfg.keep_alive = Some(parse_boolean(value).with_context(context)?),
            "check_certificate" => {
                cfg.check_certificate = Some(parse_boolean(value).with_context(context)?);
            }
            "ca_certificate" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.ca_certificate = Some(PathBuf::from(parsed));
            }
            "retry_connrefused" => {
                cfg.retry_connrefused = Some(parse_boolean(value).with_context(context)?);
            }
            "timestamping" => {
                cfg.timestamping = Some(parse_boolean(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!(
                        "Invalid `verbosity` value '{}' on line {}",
                        parsed,
                        line_index + 1
                    )
                })?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
