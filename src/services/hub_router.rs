//! Hub routing: many providers behind one namespaced endpoint.
//!
//! Tool names are exposed as `<provider id>.<tool name>`. The registry is
//! passed in per call; the router itself holds no provider state.

use futures::future::join_all;
use reqwest::header::HeaderMap;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::http_forwarder::{ForwardOutcome, ForwardTarget, HttpForwarder};
use super::protocol::JSONRPC_VERSION;
use crate::domain::models::{HttpProvider, Provider, ProviderRegistry};

/// Separator between the provider id and the provider's own tool name.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Split a namespaced tool name on the first separator.
///
/// `"github.search.code"` gives `(Some("github"), "search.code")`; a name
/// without a separator has no prefix.
pub fn split_namespaced(name: &str) -> (Option<&str>, &str) {
    match name.split_once(NAMESPACE_SEPARATOR) {
        Some((prefix, rest)) => (Some(prefix), rest),
        None => (None, name),
    }
}

/// Where a `tools/call` goes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRoute {
    /// Registered HTTP provider, with the namespace stripped from the name.
    Http { provider: HttpProvider, tool: String },
    /// Registered provider whose transport the hub cannot reach.
    Unsupported { provider_id: String, tool: String },
    /// No provider matches the prefix.
    UnknownProvider { prefix: Option<String>, tool: String },
}

impl ToolRoute {
    /// Provider key to record for this call.
    pub fn upstream_key(&self) -> Option<&str> {
        match self {
            Self::Http { provider, .. } => Some(&provider.id),
            Self::Unsupported { provider_id, .. } => Some(provider_id),
            Self::UnknownProvider { prefix, .. } => prefix.as_deref(),
        }
    }

    /// Tool name as the provider knows it.
    pub fn tool(&self) -> &str {
        match self {
            Self::Http { tool, .. } | Self::Unsupported { tool, .. } | Self::UnknownProvider { tool, .. } => tool,
        }
    }
}

/// Resolve a namespaced tool name against `registry`.
pub fn resolve_tool(registry: &ProviderRegistry, name: &str) -> ToolRoute {
    let (prefix, tool) = split_namespaced(name);
    let Some(prefix) = prefix else {
        return ToolRoute::UnknownProvider {
            prefix: None,
            tool: tool.to_string(),
        };
    };

    match registry.find(prefix) {
        Some(Provider::Http(provider)) => ToolRoute::Http {
            provider: provider.clone(),
            tool: tool.to_string(),
        },
        Some(Provider::Stdio(provider)) => ToolRoute::Unsupported {
            provider_id: provider.id.clone(),
            tool: tool.to_string(),
        },
        None => ToolRoute::UnknownProvider {
            prefix: Some(prefix.to_string()),
            tool: tool.to_string(),
        },
    }
}

/// Copy of a `tools/call` body with `params.name` replaced by `tool`.
pub fn rewrite_tool_name(body: &Value, tool: &str) -> Value {
    let mut rewritten = body.clone();
    if let Some(params) = rewritten.get_mut("params").and_then(Value::as_object_mut) {
        params.insert("name".to_string(), Value::String(tool.to_string()));
    }
    rewritten
}

#[derive(Debug, Clone)]
pub struct HubRouter {
    forwarder: HttpForwarder,
    list_timeout: Duration,
}

impl HubRouter {
    pub fn new(forwarder: HttpForwarder, list_timeout: Duration) -> Self {
        Self { forwarder, list_timeout }
    }

    pub fn forwarder(&self) -> &HttpForwarder {
        &self.forwarder
    }

    /// Aggregate `tools/list` over every HTTP provider.
    ///
    /// Providers are queried concurrently, each under its own deadline. A
    /// provider that fails is left out of the result. Tools appear in
    /// registry order, then in the order each provider reported them.
    pub async fn list_tools(&self, registry: &ProviderRegistry, incoming: &HeaderMap) -> Vec<Value> {
        let providers: Vec<&HttpProvider> = registry.http_providers().collect();
        let queries = providers
            .iter()
            .enumerate()
            .map(|(index, provider)| self.list_provider_tools(provider, incoming, index));

        join_all(queries).await.into_iter().flatten().flatten().collect()
    }

    async fn list_provider_tools(
        &self,
        provider: &HttpProvider,
        incoming: &HeaderMap,
        index: usize,
    ) -> Option<Vec<Value>> {
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": format!("hub-list-{index}"),
            "method": "tools/list",
            "params": {},
        });
        let target = ForwardTarget {
            url: &provider.url,
            headers: &provider.headers,
        };

        let outcome = self
            .forwarder
            .forward_within(target, incoming, &request, self.list_timeout)
            .await;

        let tools = match outcome {
            ForwardOutcome::Reply {
                status,
                parsed: Some(reply),
                ..
            } if status.is_success() => reply
                .get("result")
                .and_then(|r| r.get("tools"))
                .and_then(Value::as_array)
                .cloned(),
            _ => None,
        };

        let Some(tools) = tools else {
            tracing::warn!(provider = %provider.id, "tools/list failed; provider omitted from hub listing");
            return None;
        };

        let namespaced: Vec<Value> = tools
            .into_iter()
            .filter_map(|tool| namespace_tool(&provider.id, tool))
            .collect();
        tracing::debug!(provider = %provider.id, tools = namespaced.len(), "provider tools listed");
        Some(namespaced)
    }

    /// Forward a `tools/call` to `provider` with the namespace stripped.
    pub async fn call_tool(
        &self,
        provider: &HttpProvider,
        tool: &str,
        incoming: &HeaderMap,
        body: &Value,
    ) -> ForwardOutcome {
        let rewritten = rewrite_tool_name(body, tool);
        let target = ForwardTarget {
            url: &provider.url,
            headers: &provider.headers,
        };
        self.forwarder.forward(target, incoming, &rewritten).await
    }
}

/// Prefix a tool descriptor's name. Descriptors without a string name are dropped.
fn namespace_tool(provider_id: &str, tool: Value) -> Option<Value> {
    let Value::Object(mut descriptor) = tool else {
        return None;
    };
    let name = descriptor.get("name").and_then(Value::as_str)?;
    let namespaced = format!("{provider_id}{NAMESPACE_SEPARATOR}{name}");
    descriptor.insert("name".to_string(), Value::String(namespaced));
    Some(Value::Object(descriptor))
}

/// `tools/list` result body for an aggregated listing.
pub fn tools_list_result(tools: Vec<Value>) -> Value {
    let mut result = Map::new();
    result.insert("tools".to_string(), Value::Array(tools));
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StdioProvider;
    use std::collections::BTreeMap;

    fn http(id: &str) -> Provider {
        Provider::Http(HttpProvider {
            id: id.to_string(),
            url: format!("http://127.0.0.1:1/{id}"),
            headers: BTreeMap::new(),
        })
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(vec![
            http("A"),
            http("B"),
            Provider::Stdio(StdioProvider {
                id: "local".to_string(),
                command: "server".to_string(),
                args: vec![],
                env: BTreeMap::new(),
            }),
        ])
    }

    #[test]
    fn test_split_on_first_separator() {
        assert_eq!(split_namespaced("A.a1"), (Some("A"), "a1"));
        assert_eq!(split_namespaced("A.x.y"), (Some("A"), "x.y"));
        assert_eq!(split_namespaced("plain"), (None, "plain"));
        assert_eq!(split_namespaced(".x"), (Some(""), "x"));
    }

    #[test]
    fn test_resolve_routes() {
        let registry = registry();

        let route = resolve_tool(&registry, "A.a1");
        assert!(matches!(&route, ToolRoute::Http { provider, tool } if provider.id == "A" && tool == "a1"));
        assert_eq!(route.upstream_key(), Some("A"));

        let route = resolve_tool(&registry, "C.x");
        assert_eq!(
            route,
            ToolRoute::UnknownProvider {
                prefix: Some("C".to_string()),
                tool: "x".to_string()
            }
        );
        assert_eq!(route.upstream_key(), Some("C"));
        assert_eq!(route.tool(), "x");

        let route = resolve_tool(&registry, "local.run");
        assert!(matches!(route, ToolRoute::Unsupported { .. }));

        let route = resolve_tool(&registry, "nonamespace");
        assert_eq!(route.upstream_key(), None);
        assert_eq!(route.tool(), "nonamespace");
    }

    #[test]
    fn test_rewrite_tool_name_keeps_everything_else() {
        let body = json!({"jsonrpc": "2.0", "id": 9, "method": "tools/call",
                          "params": {"name": "A.a1", "arguments": {"q": 1}}});
        let rewritten = rewrite_tool_name(&body, "a1");
        assert_eq!(rewritten["params"]["name"], "a1");
        assert_eq!(rewritten["params"]["arguments"], json!({"q": 1}));
        assert_eq!(rewritten["id"], 9);
        assert_eq!(body["params"]["name"], "A.a1");
    }

    #[test]
    fn test_namespace_tool() {
        let tool = json!({"name": "search", "description": "d", "inputSchema": {}});
        let namespaced = namespace_tool("github", tool).unwrap();
        assert_eq!(namespaced["name"], "github.search");
        assert_eq!(namespaced["description"], "d");

        assert!(namespace_tool("github", json!({"description": "nameless"})).is_none());
        assert!(namespace_tool("github", json!("search")).is_none());
    }

    #[tokio::test]
    async fn test_empty_registry_lists_nothing() {
        let router = HubRouter::new(HttpForwarder::new(Duration::from_secs(1)), Duration::from_secs(1));
        let tools = router
            .list_tools(&ProviderRegistry::new(vec![]), &HeaderMap::new())
            .await;
        assert!(tools.is_empty());
    }
}
