use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::error::TemplateError;

/// Where named body templates come from.
pub trait TemplateSource: Send + Sync {
    fn template(&self, name: &str) -> Option<Arc<str>>;
}

/// Templates held in memory, typically loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct MemoryTemplates {
    templates: HashMap<String, Arc<str>>,
}

impl MemoryTemplates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, body: impl Into<Arc<str>>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl<K: Into<String>, V: Into<Arc<str>>> FromIterator<(K, V)> for MemoryTemplates {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            templates: iter
                .into_iter()
                .map(|(name, body)| (name.into(), body.into()))
                .collect(),
        }
    }
}

impl TemplateSource for MemoryTemplates {
    fn template(&self, name: &str) -> Option<Arc<str>> {
        self.templates.get(name).cloned()
    }
}

/// Substitutes every `{{ field }}` in `template` with its value from `data`.
///
/// Whitespace inside the braces is ignored. An unterminated `{{` is kept
/// verbatim.
///
/// # Errors
///
/// [`TemplateError::MissingField`] if a placeholder has no value in `data`.
pub fn expand(
    name: &str,
    template: &str,
    data: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };

        let field = after[..end].trim();
        let value = data.get(field).ok_or_else(|| TemplateError::MissingField {
            template: name.to_string(),
            field: field.to_string(),
        })?;
        output.push_str(value);

        rest = &after[end + 2..];
    }

    output.push_str(rest);
    Ok(output)
}
