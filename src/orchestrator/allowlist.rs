use crate::config::OrchestratorConfig;
use crate::error::{AppError, Result};
use reqwest::Url;
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Destinations workflow steps may call.
///
/// A URL passes when its scheme is https (or http when permitted), its
/// host is listed exactly, and its port lies in the allowed range.
#[derive(Debug, Clone)]
pub struct AllowList {
    hosts: HashSet<String>,
    ports: RangeInclusive<u16>,
    allow_http: bool,
}

impl AllowList {
    pub fn new<I, S>(hosts: I, ports: RangeInclusive<u16>, allow_http: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            ports,
            allow_http,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            &config.allowed_hosts,
            config.allowed_port_min..=config.allowed_port_max,
            config.allow_http,
        )
    }

    /// Parse `url` and confirm it may be called
    pub fn check(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("invalid service_url '{}': {}", url, e)))?;

        match parsed.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            scheme => {
                return Err(AppError::Validation(format!(
                    "service_url '{}': scheme '{}' is not allowed",
                    url, scheme
                )))
            }
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(AppError::Validation(format!(
                "service_url '{}': credentials in URLs are not allowed",
                url
            )));
        }

        let host = parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| AppError::Validation(format!("service_url '{}' has no host", url)))?;
        if !self.hosts.contains(&host) {
            return Err(AppError::Validation(format!(
                "service_url '{}': host '{}' is not in the allow-list",
                url, host
            )));
        }

        let port = parsed.port_or_known_default().unwrap_or(0);
        if !self.ports.contains(&port) {
            return Err(AppError::Validation(format!(
                "service_url '{}': port {} is outside {}-{}",
                url,
                port,
                self.ports.start(),
                self.ports.end()
            )));
        }

        Ok(parsed)
    }
}
