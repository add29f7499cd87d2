//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterErrorKind};

/// Ordered CSS lookup rules plus the fallback slice length for a page content read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentQuery {
    pub rules: Vec<String>,
    pub fallback_chars: usize,
}

impl ContentQuery {
    pub fn new(rules: Vec<String>, fallback_chars: usize) -> Self {
        Self {
            rules,
            fallback_chars,
        }
    }

    /// Page-side expression returning `{ text, rule }`.
    ///
    /// The first rule whose element carries non-empty text wins; otherwise the
    /// first `fallback_chars` characters of the body text are returned with a
    /// null rule.
    pub fn to_expression(&self) -> Result<String, AdapterError> {
        let rules = serde_json::to_string(&self.rules).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
        })?;
        Ok(format!(
            r#"(() => {{
    const rules = {rules};
    for (const rule of rules) {{
        let el = null;
        try {{ el = document.querySelector(rule); }} catch (err) {{ el = null; }}
        if (!el) {{ continue; }}
        const text = (el.innerText || el.textContent || '').trim();
        if (text.length > 0) {{ return {{ text, rule }}; }}
    }}
    const body = document.body ? (document.body.innerText || '') : '';
    return {{ text: body.slice(0, {limit}), rule: null }};
}})()"#,
            rules = rules,
            limit = self.fallback_chars
        ))
    }
}

/// Result of a [`ContentQuery`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub text: String,
    /// Rule that produced `text`; `None` when the fallback slice was used.
    pub rule: Option<String>,
}

impl ContentSnapshot {
    pub fn is_fallback(&self) -> bool {
        self.rule.is_none()
    }
}

/// Viewport emulation applied to a page.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}
