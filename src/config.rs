//! CLI/config surface (A3), SPEC_FULL.md §6. Out of scope as a *design to
//! follow from an external source*, but still shipped concretely here so
//! the binary entrypoint is runnable: a `clap` derive `Cli`, merged
//! underneath an optional `--config <yaml>` file read with `serde_yaml`
//! (explicit CLI flags always win on conflict), matching the reference
//! server's own dev-tooling use of `clap`.

use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

/// `--auth` modes accepted by the gateway (SPEC_FULL.md §6). Only `None` is
/// wired up to anything in this repository (the concrete `MemBackend` has
/// no notion of per-user scoping); the rest are accepted and threaded
/// through so an external `Backend`/credentials provider can act on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthMode {
    None,
    JaCookie,
    UserToken,
    Custom,
    Mixed,
}

/// `--access` modes: full read/write, or one of the read-only variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccessMode {
    Full,
    ReadOnly,
}

impl AccessMode {
    pub fn method_set(self) -> crate::util::DavMethodSet {
        match self {
            AccessMode::Full => crate::util::DavMethodSet::WEBDAV_RW,
            AccessMode::ReadOnly => crate::util::DavMethodSet::WEBDAV_RO,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tbox-dav-gateway", version, about = "WebDAV gateway in front of the Tbox object store")]
pub struct Cli {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Minimum 10 MiB (SPEC_FULL.md §6); enforced in `Config::resolve`, not
    /// by `clap` itself, so the same check applies whether the value came
    /// from a flag or from `--config`.
    #[arg(long)]
    pub cachesize: Option<u64>,

    #[arg(long, value_enum)]
    pub auth: Option<AuthMode>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub cookie: Option<String>,

    #[arg(long)]
    pub token: Option<String>,

    #[arg(long, value_enum)]
    pub access: Option<AccessMode>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The same fields as [`Cli`], all optional, as they appear in a
/// `--config` YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    cachesize: Option<u64>,
    auth: Option<AuthMode>,
    username: Option<String>,
    password: Option<String>,
    cookie: Option<String>,
    token: Option<String>,
    access: Option<AccessMode>,
}

const MIN_CACHESIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_PORT: u16 = 4918;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    /// `--cachesize` below `MIN_CACHESIZE`.
    CacheSizeTooSmall(u64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "reading --config file: {}", e),
            ConfigError::Yaml(e) => write!(f, "parsing --config file: {}", e),
            ConfigError::CacheSizeTooSmall(n) => {
                write!(f, "--cachesize {} is below the {} byte minimum", n, MIN_CACHESIZE)
            },
        }
    }
}

impl std::error::Error for ConfigError {}

/// Fully resolved configuration: `--config` file values with explicit CLI
/// flags layered on top.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cachesize: u64,
    pub auth: AuthMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie: Option<String>,
    pub token: Option<String>,
    pub access: AccessMode,
}

impl Config {
    pub fn resolve(cli: Cli) -> Result<Config, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
                serde_yaml::from_str::<FileConfig>(&text).map_err(ConfigError::Yaml)?
            },
            None => FileConfig::default(),
        };

        let cachesize = cli.cachesize.or(file.cachesize).unwrap_or(MIN_CACHESIZE);
        if cachesize < MIN_CACHESIZE {
            return Err(ConfigError::CacheSizeTooSmall(cachesize));
        }

        Ok(Config {
            host: cli.host.or(file.host).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            cachesize,
            auth: cli.auth.or(file.auth).unwrap_or(AuthMode::None),
            username: cli.username.or(file.username),
            password: cli.password.or(file.password),
            cookie: cli.cookie.or(file.cookie),
            token: cli.token.or(file.token),
            access: cli.access.or(file.access).unwrap_or(AccessMode::Full),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            host: None,
            port: None,
            cachesize: None,
            auth: None,
            username: None,
            password: None,
            cookie: None,
            token: None,
            access: None,
            config: None,
        }
    }

    #[test]
    fn defaults_apply_with_no_flags_or_file() {
        let cfg = Config::resolve(bare_cli()).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.cachesize, MIN_CACHESIZE);
        assert_eq!(cfg.auth, AuthMode::None);
        assert_eq!(cfg.access, AccessMode::Full);
    }

    #[test]
    fn cachesize_below_minimum_is_rejected() {
        let mut cli = bare_cli();
        cli.cachesize = Some(1024);
        assert!(matches!(Config::resolve(cli), Err(ConfigError::CacheSizeTooSmall(1024))));
    }

    #[test]
    fn explicit_cli_flag_wins_over_file_value() {
        // No file is read here (config: None), but resolve()'s precedence
        // is `cli.field.or(file.field)` everywhere, so a present CLI value
        // always short-circuits before the file value is consulted.
        let mut cli = bare_cli();
        cli.port = Some(9999);
        let cfg = Config::resolve(cli).unwrap();
        assert_eq!(cfg.port, 9999);
    }
}
