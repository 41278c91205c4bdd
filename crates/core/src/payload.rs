// Step payload rendering
//
// Template step payloads are JSON with minijinja expressions in string values.
// A string that is exactly one `{{ expr }}` is evaluated as an expression so the
// result keeps its JSON type (arrays, objects, numbers); any other string is
// rendered as text. Missing context keys render as null or empty.

use minijinja::{Environment, UndefinedBehavior, Value as TemplateValue};
use serde_json::Value;

use crate::template::TemplateError;

/// Render context for step payloads.
pub struct PayloadRenderer {
    env: Environment<'static>,
}

impl Default for PayloadRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        Self { env }
    }

    /// Render every string in `payload` against `context`.
    pub fn render(&self, payload: &Value, context: &Value) -> Result<Value, TemplateError> {
        let ctx = TemplateValue::from_serialize(context);
        self.render_value(payload, &ctx)
    }

    fn render_value(&self, value: &Value, ctx: &TemplateValue) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => self.render_string(s, ctx),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.render_value(item, ctx)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, source: &str, ctx: &TemplateValue) -> Result<Value, TemplateError> {
        if let Some(expr) = lone_expression(source) {
            let compiled = self
                .env
                .compile_expression(expr)
                .map_err(|e| TemplateError::Render(e.to_string()))?;
            let value = compiled
                .eval(ctx)
                .map_err(|e| TemplateError::Render(e.to_string()))?;
            if value.is_undefined() || value.is_none() {
                return Ok(Value::Null);
            }
            return serde_json::to_value(&value).map_err(|e| TemplateError::Render(e.to_string()));
        }

        if !source.contains("{{") && !source.contains("{%") {
            return Ok(Value::String(source.to_string()));
        }

        self.env
            .render_str(source, ctx)
            .map(Value::String)
            .map_err(|e| TemplateError::Render(e.to_string()))
    }
}

/// The inner expression of a string that is exactly `{{ expr }}`.
fn lone_expression(source: &str) -> Option<&str> {
    let inner = source.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}
