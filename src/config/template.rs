//! `{{ variable }}` interpolation for snapshot and image names.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

#[expect(
    clippy::expect_used,
    reason = "the pattern is a constant and is covered by tests"
)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("constant regex pattern is valid")
});

/// Values available to name templates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplateContext {
    /// Unix timestamp in seconds, exposed as `{{ timestamp }}`.
    pub timestamp: i64,
    /// Random identifier, exposed as `{{ uuid }}`.
    pub uuid: String,
}

impl TemplateContext {
    /// Creates a context with fixed values.
    #[must_use]
    pub fn new(timestamp: i64, uuid: impl Into<String>) -> Self {
        Self {
            timestamp,
            uuid: uuid.into(),
        }
    }

    /// Captures the current time and a fresh UUID.
    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now().timestamp(), Uuid::new_v4().to_string())
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "timestamp" => Some(self.timestamp.to_string()),
            "uuid" => Some(self.uuid.clone()),
            _ => None,
        }
    }
}

/// Replaces every `{{ name }}` placeholder in `template`.
///
/// # Errors
///
/// Returns a message naming the first placeholder without a value.
pub fn render_template(template: &str, context: &TemplateContext) -> Result<String, String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = context
            .lookup(name.as_str())
            .ok_or_else(|| format!("unknown template variable {:?}", name.as_str()))?;
        rendered.push_str(template.get(last..whole.start()).unwrap_or_default());
        rendered.push_str(&value);
        last = whole.end();
    }
    rendered.push_str(template.get(last..).unwrap_or_default());
    Ok(rendered)
}
