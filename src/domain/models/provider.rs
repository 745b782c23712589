//! Provider registry model.
//!
//! The registry is produced by an external discovery tool and read by the hub
//! on every request. Providers are data: a closed set of transports.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};

/// The only registry document version this gateway understands.
pub const REGISTRY_VERSION: u32 = 1;

/// Versioned registry document: `{version: 1, providers: [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistry {
    pub version: u32,
    #[serde(default)]
    pub providers: Vec<Provider>,
}

/// Downstream MCP server reachable over HTTP(S).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProvider {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Downstream MCP server launched as a child process. Registry entry only;
/// the hub does not spawn these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioProvider {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provider {
    Http(HttpProvider),
    Stdio(StdioProvider),
}

impl Provider {
    pub fn id(&self) -> &str {
        match self {
            Self::Http(p) => &p.id,
            Self::Stdio(p) => &p.id,
        }
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Stdio(_) => "stdio",
        }
    }
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            version: REGISTRY_VERSION,
            providers,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// HTTP providers in registry order.
    pub fn http_providers(&self) -> impl Iterator<Item = &HttpProvider> {
        self.providers.iter().filter_map(|p| match p {
            Provider::Http(http) => Some(http),
            Provider::Stdio(_) => None,
        })
    }

    /// Check version and id rules: ids are non-empty, unique and contain no `.`
    /// (the namespace separator).
    pub fn validate(&self) -> DomainResult<()> {
        if self.version != REGISTRY_VERSION {
            return Err(DomainError::ValidationFailed(format!(
                "unsupported registry version {} (expected {REGISTRY_VERSION})",
                self.version
            )));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            let id = provider.id();
            if id.is_empty() {
                return Err(DomainError::ValidationFailed(
                    "provider id cannot be empty".to_string(),
                ));
            }
            if id.contains('.') {
                return Err(DomainError::ValidationFailed(format!(
                    "provider id '{id}' must not contain '.'"
                )));
            }
            if !seen.insert(id) {
                return Err(DomainError::ValidationFailed(format!(
                    "duplicate provider id '{id}'"
                )));
            }
            if let Provider::Http(http) = provider {
                if http.url.is_empty() {
                    return Err(DomainError::ValidationFailed(format!(
                        "provider '{id}' has an empty url"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(id: &str) -> Provider {
        Provider::Http(HttpProvider {
            id: id.to_string(),
            url: format!("http://localhost/{id}"),
            headers: BTreeMap::new(),
        })
    }

    #[test]
    fn test_parse_registry_document() {
        let json = r#"{
            "version": 1,
            "providers": [
                {"id": "github", "type": "http", "url": "https://example.test/mcp",
                 "headers": {"Authorization": "Bearer abc"}},
                {"id": "fs", "type": "stdio", "command": "mcp-fs", "args": ["--root", "/tmp"]}
            ]
        }"#;

        let registry: ProviderRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.providers.len(), 2);
        assert_eq!(registry.providers[0].transport(), "http");
        assert_eq!(registry.providers[1].id(), "fs");
        assert_eq!(registry.http_providers().count(), 1);
        registry.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_dotted_id() {
        let registry = ProviderRegistry::new(vec![http("a.b")]);
        assert!(matches!(
            registry.validate(),
            Err(DomainError::ValidationFailed(msg)) if msg.contains("must not contain")
        ));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_version() {
        let registry = ProviderRegistry::new(vec![http("a"), http("a")]);
        assert!(registry.validate().is_err());

        let mut registry = ProviderRegistry::new(vec![http("a")]);
        registry.version = 2;
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_find_provider() {
        let registry = ProviderRegistry::new(vec![http("a"), http("b")]);
        assert_eq!(registry.find("b").map(Provider::id), Some("b"));
        assert!(registry.find("c").is_none());
    }
}
