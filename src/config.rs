use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::access::TrustedNetworks;
use crate::events::EventBusConfig;
use crate::model::WorkKind;

/// Store namespace for each work kind.
#[derive(Debug, Clone)]
pub struct Namespaces {
    pub etd: String,
    pub oa: String,
}

impl Namespaces {
    pub fn get(&self, kind: WorkKind) -> &str {
        match kind {
            WorkKind::Etd => &self.etd,
            WorkKind::Oa => &self.oa,
        }
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            etd: "libraetd".to_string(),
            oa: "libraoa".to_string(),
        }
    }
}

pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: Option<String>,
    pub namespaces: Namespaces,
    pub trusted_networks: TrustedNetworks,
    pub redis_url: Option<String>,
    pub bus: EventBusConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = env::var("LIBRA_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("invalid LIBRA_ADDR")?;

        let redis_url = optional("LIBRA_REDIS_URL");

        let namespaces = Namespaces::default();
        let defaults = EventBusConfig::default();
        let bus = EventBusConfig {
            redis_url: redis_url.clone(),
            channel: env::var("LIBRA_EVENT_CHANNEL").unwrap_or(defaults.channel),
            source: env::var("LIBRA_EVENT_SOURCE").unwrap_or(defaults.source),
            dev_mode: parse_bool("LIBRA_DEV_BUS", false)?,
        };

        Ok(Self {
            listen_addr,
            jwt_secret: optional("LIBRA_JWT_SECRET"),
            namespaces: Namespaces {
                etd: env::var("LIBRA_ETD_NAMESPACE").unwrap_or(namespaces.etd),
                oa: env::var("LIBRA_OA_NAMESPACE").unwrap_or(namespaces.oa),
            },
            trusted_networks: trusted_networks()?,
            redis_url,
            bus,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

fn optional(env_key: &str) -> Option<String> {
    env::var(env_key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(env_key: &str, default: bool) -> Result<bool> {
    match optional(env_key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{env_key} must be true or false")),
    }
}

fn trusted_networks() -> Result<TrustedNetworks> {
    let mut networks = match optional("LIBRA_TRUSTED_NETWORKS") {
        Some(raw) => TrustedNetworks::parse(&raw).context("invalid LIBRA_TRUSTED_NETWORKS")?,
        None => TrustedNetworks::default(),
    };

    if let Some(path) = optional("LIBRA_TRUSTED_NETWORKS_FILE") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("unable to read trusted networks from {path}"))?;
        let from_file = TrustedNetworks::parse(&raw)
            .with_context(|| format!("invalid trusted network in {path}"))?;
        networks.extend(from_file);
    }

    if networks.is_empty() {
        tracing::warn!("no trusted networks configured; uva files are only visible to owners and admins");
    }
    Ok(networks)
}
