use crate::storage::{DEFAULT_STREAM_STEP, cluster::DEFAULT_UNIT_SIZE};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr};

/// Which blob backend a deployment writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Local,
    Cluster,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cluster" | "ceph" => Ok(Self::Cluster),
            other => bail!("unknown backend `{other}` (expected `local` or `cluster`)"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cluster => f.write_str("cluster"),
        }
    }
}

/// Connection parameters for the storage cluster.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub cluster_name: String,
    pub user: String,
    pub conf_file: PathBuf,
    pub keyring_file: PathBuf,
    pub pool_name: String,
    /// Directory holding one sub-directory per pool.
    pub pool_root: PathBuf,
    /// Hard per-unit size limit; larger blobs are split into parts.
    pub unit_size: u64,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backend: BackendKind,
    pub upload_dir: String,
    pub cluster: ClusterSettings,
    pub stream_step: u64,
    pub optimize_threshold: i64,
    pub default_page_limit: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Harbor object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides HARBOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides HARBOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides HARBOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend (overrides HARBOR_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Local backend upload directory (overrides HARBOR_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Cluster name (overrides HARBOR_CLUSTER_NAME)
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Cluster user (overrides HARBOR_CLUSTER_USER)
    #[arg(long)]
    pub cluster_user: Option<String>,

    /// Cluster config file (overrides HARBOR_CLUSTER_CONF)
    #[arg(long)]
    pub cluster_conf: Option<PathBuf>,

    /// Cluster keyring file (overrides HARBOR_CLUSTER_KEYRING)
    #[arg(long)]
    pub cluster_keyring: Option<PathBuf>,

    /// Cluster pool name (overrides HARBOR_CLUSTER_POOL)
    #[arg(long)]
    pub cluster_pool: Option<String>,

    /// Directory the pools live in (overrides HARBOR_CLUSTER_POOL_ROOT)
    #[arg(long)]
    pub cluster_pool_root: Option<PathBuf>,

    /// Per-unit size limit in bytes (overrides HARBOR_CLUSTER_UNIT_SIZE)
    #[arg(long)]
    pub cluster_unit_size: Option<u64>,

    /// Download step size in bytes (overrides HARBOR_STREAM_STEP)
    #[arg(long)]
    pub stream_step: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

pub const DEFAULT_OPTIMIZE_THRESHOLD: i64 = 10_000;
pub const DEFAULT_PAGE_LIMIT: i64 = 200;

fn env_string(name: &str, default: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default.to_string()),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env_string("HARBOR_HOST", "0.0.0.0")?;
        let env_port = env_parse("HARBOR_PORT", 3000u16)?;
        let env_db = env_string("HARBOR_DATABASE_URL", "sqlite://./data/meta/harbor.db")?;
        let env_backend = env_parse("HARBOR_BACKEND", BackendKind::Local)?;
        let env_upload = env_string("HARBOR_UPLOAD_DIR", "./data/upload")?;

        let env_cluster_name = env_string("HARBOR_CLUSTER_NAME", "ceph")?;
        let env_cluster_user = env_string("HARBOR_CLUSTER_USER", "client.admin")?;
        let env_cluster_conf = env_string("HARBOR_CLUSTER_CONF", "/etc/ceph/ceph.conf")?;
        let env_cluster_keyring =
            env_string("HARBOR_CLUSTER_KEYRING", "/etc/ceph/ceph.client.admin.keyring")?;
        let env_cluster_pool = env_string("HARBOR_CLUSTER_POOL", "harbor")?;
        let env_cluster_root = env_string("HARBOR_CLUSTER_POOL_ROOT", "./data/pools")?;
        let env_unit_size = env_parse("HARBOR_CLUSTER_UNIT_SIZE", DEFAULT_UNIT_SIZE)?;
        let env_step = env_parse("HARBOR_STREAM_STEP", DEFAULT_STREAM_STEP)?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            backend: args.backend.unwrap_or(env_backend),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            cluster: ClusterSettings {
                cluster_name: args.cluster_name.unwrap_or(env_cluster_name),
                user: args.cluster_user.unwrap_or(env_cluster_user),
                conf_file: args.cluster_conf.unwrap_or_else(|| env_cluster_conf.into()),
                keyring_file: args
                    .cluster_keyring
                    .unwrap_or_else(|| env_cluster_keyring.into()),
                pool_name: args.cluster_pool.unwrap_or(env_cluster_pool),
                pool_root: args
                    .cluster_pool_root
                    .unwrap_or_else(|| env_cluster_root.into()),
                unit_size: args.cluster_unit_size.unwrap_or(env_unit_size),
            },
            stream_step: args.stream_step.unwrap_or(env_step),
            optimize_threshold: DEFAULT_OPTIMIZE_THRESHOLD,
            default_page_limit: DEFAULT_PAGE_LIMIT,
        };

        if cfg.cluster.unit_size == 0 {
            bail!("cluster unit size must be greater than zero");
        }
        if cfg.stream_step == 0 {
            bail!("stream step must be greater than zero");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("Cluster".parse::<BackendKind>().unwrap(), BackendKind::Cluster);
        assert_eq!("ceph".parse::<BackendKind>().unwrap(), BackendKind::Cluster);
        assert!("s3".parse::<BackendKind>().is_err());
    }

    #[test]
    fn cli_values_override_defaults() {
        let args = Args {
            port: Some(9000),
            backend: Some(BackendKind::Cluster),
            cluster_unit_size: Some(1024),
            ..Args::default()
        };
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.backend, BackendKind::Cluster);
        assert_eq!(cfg.cluster.unit_size, 1024);
        assert_eq!(cfg.default_page_limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(cfg.addr(), format!("{}:9000", cfg.host));
    }

    #[test]
    fn zero_unit_size_is_rejected() {
        let args = Args {
            cluster_unit_size: Some(0),
            ..Args::default()
        };
        assert!(AppConfig::merge(args).is_err());
    }
}
