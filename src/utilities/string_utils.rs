//! Placeholder interpolation for prompt templates.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_\-]*)\}").unwrap());

/// Names of every `{variable}` placeholder in `template`, deduplicated.
pub fn template_variables(template: &str) -> BTreeSet<String> {
    VARIABLE_PATTERN
        .captures_iter(template)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Interpolate `{key}` placeholders in a string while leaving JSON untouched.
///
/// Only placeholders whose name starts with a letter or underscore and
/// contains alphanumerics, underscores and hyphens are interpolated. The
/// template is scanned once, so braces inside substituted values are never
/// expanded again.
///
/// # Errors
/// Returns the name of the first placeholder that has no entry in `inputs`.
pub fn interpolate_only(template: &str, inputs: &HashMap<&str, &str>) -> Result<String, String> {
    if !template.contains('{') {
        return Ok(template.to_string());
    }

    if let Some(missing) = VARIABLE_PATTERN
        .captures_iter(template)
        .map(|cap| cap.get(1).map(|m| m.as_str()).unwrap_or_default())
        .find(|name| !inputs.contains_key(name))
    {
        return Err(format!(
            "Template variable '{}' not found in inputs dictionary",
            missing
        ));
    }

    let result = VARIABLE_PATTERN.replace_all(template, |cap: &Captures<'_>| {
        inputs.get(&cap[1]).copied().unwrap_or_default().to_string()
    });

    Ok(result.into_owned())
}
