use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SEED_ROOMS: &str =
    "Conference Room A,Conference Room B,Meeting Room 1,Meeting Room 2,Board Room";

/// Server settings, read from `ROOMD_*` environment variables.
/// Unparseable numbers fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub seed_rooms: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("ROOMD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(lookup("ROOMD_PORT")).unwrap_or(5433),
            data_dir: lookup("ROOMD_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("ROOMD_PASSWORD").unwrap_or_else(|| "roomd".into()),
            max_connections: parsed(lookup("ROOMD_MAX_CONNECTIONS")).unwrap_or(256),
            compact_threshold: parsed(lookup("ROOMD_COMPACT_THRESHOLD")).unwrap_or(1000),
            metrics_port: parsed(lookup("ROOMD_METRICS_PORT")),
            tls_cert: lookup("ROOMD_TLS_CERT"),
            tls_key: lookup("ROOMD_TLS_KEY"),
            seed_rooms: split_names(
                &lookup("ROOMD_SEED_ROOMS").unwrap_or_else(|| DEFAULT_SEED_ROOMS.into()),
            ),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomd.wal")
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
