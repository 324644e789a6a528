use std::collections::HashMap;

use tracing::warn;

/// Template value meaning "do not caption spans with this label".
pub const SKIP_SENTINEL: &str = "-";
/// Placeholder replaced with the span's aligned text context.
pub const CONTEXT_PLACEHOLDER: &str = "[CONTEXT]";
/// Maximum number of context characters substituted into a prompt.
pub const MAX_CONTEXT_CHARS: usize = 200;

/// Mapping from span label to prompt template, with a default template for
/// unmapped labels.
#[derive(Debug, Clone)]
pub struct PromptMap {
    templates: HashMap<String, String>,
    default_template: String,
}

impl PromptMap {
    /// Parse `label:template` entries. Entries without a `:` separator are
    /// logged and ignored.
    pub fn parse(entries: &[String], default_template: &str) -> Self {
        let mut templates = HashMap::new();
        for entry in entries {
            match entry.split_once(':') {
                Some((label, template)) => {
                    templates.insert(label.to_owned(), template.to_owned());
                }
                None => warn!(entry = %entry, "ignoring promptMap entry without a ':' separator"),
            }
        }
        Self {
            templates,
            default_template: default_template.to_owned(),
        }
    }

    /// Resolve the template for `label` (the default template when the label
    /// is unmapped or absent) and substitute the truncated context. Returns
    /// `None` when the resolved template is the skip sentinel.
    pub fn render(&self, label: Option<&str>, context: &str) -> Option<String> {
        let template = label
            .and_then(|l| self.templates.get(l))
            .unwrap_or(&self.default_template);
        if template == SKIP_SENTINEL {
            return None;
        }
        let context: String = context.chars().take(MAX_CONTEXT_CHARS).collect();
        Some(template.replace(CONTEXT_PLACEHOLDER, &context))
    }
}
