// src/config.rs
//! Source manifest loading for the demo runner. Supports TOML or JSON.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "SOURCE_MANIFEST_PATH";

/// One configured source instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Rss(crate::sources::rss::RssArgs),
    Elastic(crate::sources::elastic::ElasticArgs),
    Snow(crate::sources::snow::SnowArgs),
    Webhooksite(crate::sources::webhooksite::WebhookSiteArgs),
    Pubsub(crate::sources::pubsub::PubSubArgs),
    Mqtt(crate::sources::mqtt::MqttArgs),
    Nextdns(crate::sources::nextdns::NextDnsArgs),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

/// Load a manifest from an explicit path. Format is picked by extension with
/// a content-shape fallback.
pub fn load_manifest_from(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading manifest from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_manifest(&content, ext.as_str())
}

/// Load a manifest using env var + fallbacks:
/// 1) $SOURCE_MANIFEST_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_manifest_default() -> Result<Manifest> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_manifest_from(&pb);
        } else {
            return Err(anyhow!("SOURCE_MANIFEST_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_manifest_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_manifest_from(&json_p);
    }
    Ok(Manifest::default())
}

fn parse_manifest(s: &str, hint_ext: &str) -> Result<Manifest> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(m) = toml::from_str::<Manifest>(s) {
            return Ok(m);
        }
    }
    if let Ok(m) = serde_json::from_str::<Manifest>(s) {
        return Ok(m);
    }
    if !try_toml {
        if let Ok(m) = toml::from_str::<Manifest>(s) {
            return Ok(m);
        }
    }
    Err(anyhow!("unsupported manifest format"))
}
