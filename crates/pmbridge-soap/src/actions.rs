//! Action candidate ordering.
//!
//! Deployments of the remote service disagree on which SOAP action string
//! selects an operation. Candidates are tried in a fixed order: the
//! configured base, then configured templates, then historically observed
//! variants. Every string here is configuration, not a contract.

use serde::Deserialize;

pub const DEFAULT_NAMESPACE: &str = "http://www.kareo.com/api/schemas/";

/// Historically observed action shapes. `{namespace}` and `{operation}` are
/// substituted.
pub const HISTORICAL_ACTION_TEMPLATES: &[&str] = &[
    "{namespace}KareoServices/{operation}",
    "http://tempuri.org/IKareoServices/{operation}",
    "{namespace}IKareoServices/{operation}",
    "{namespace}{operation}",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub namespace: String,
    /// Prefix that the operation name is appended to.
    pub action_base: Option<String>,
    pub templates: Vec<String>,
    pub historical_fallbacks: bool,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            action_base: None,
            templates: Vec::new(),
            historical_fallbacks: true,
        }
    }
}

fn expand(template: &str, namespace: &str, operation: &str) -> String {
    template
        .replace("{namespace}", namespace)
        .replace("{operation}", operation)
}

/// Returns the deduplicated, ordered action candidates for `operation`.
pub fn action_candidates(operation: &str, config: &ActionConfig) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    if let Some(base) = config.action_base.as_deref().map(str::trim)
        && !base.is_empty()
    {
        if base.ends_with('/') {
            push(format!("{base}{operation}"));
        } else {
            push(format!("{base}/{operation}"));
        }
    }

    for template in &config.templates {
        push(expand(template, &config.namespace, operation));
    }

    if config.historical_fallbacks {
        for template in HISTORICAL_ACTION_TEMPLATES {
            push(expand(template, &config.namespace, operation));
        }
    }

    candidates
}
