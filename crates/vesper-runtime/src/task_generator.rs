//! `TaskGenerator` — a macro/template expander over JSON task parameters
//!
//!
//! A macro is a named function `(args) -> String`. The expander scans every
//! string leaf of a JSON tree for `{name}` or `{name:arg1,arg2,...}` tokens
//! and replaces each with its macro's evaluation; an unknown macro name is
//! left untouched and logged. Expansion repeats to a fixpoint, capped at
//! eight passes to defend against pathological self-reference (e.g. a macro
//! whose own expansion reintroduces the same token).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use vesper_core::Sequence;

const MAX_PASSES: usize = 8;

pub trait Macro: Send + Sync {
    fn call(&self, args: &[String]) -> String;
}

impl<F: Fn(&[String]) -> String + Send + Sync> Macro for F {
    fn call(&self, args: &[String]) -> String {
        self(args)
    }
}

/// Expands `{name}`/`{name:arg1,arg2}` tokens in JSON string leaves against a
/// registry of named macros, including the built-ins `target.uuid(name)`,
/// `target.status(name)`, and `sequence.progress()` bound to a live
/// [`Sequence`].
pub struct TaskGenerator {
    macros: RwLock<HashMap<String, Arc<dyn Macro>>>,
}

impl TaskGenerator {
    pub fn new() -> Self {
        Self {
            macros: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a generator with the built-in macros bound against `sequence`.
    pub fn with_builtins(sequence: Arc<Sequence>) -> Self {
        let generator = Self::new();

        {
            let sequence = sequence.clone();
            generator.register("target.uuid", move |args| {
                args.first()
                    .and_then(|name| sequence.target_by_name(name))
                    .map(|t| t.uuid.to_string())
                    .unwrap_or_default()
            });
        }
        {
            let sequence = sequence.clone();
            generator.register("target.status", move |args| {
                args.first()
                    .and_then(|name| sequence.target_by_name(name))
                    .map(|t| format!("{:?}", t.status()))
                    .unwrap_or_default()
            });
        }
        generator.register("sequence.progress", move |_args| format!("{:.1}", sequence.progress()));

        generator
    }

    pub fn register(&self, name: impl Into<String>, f: impl Fn(&[String]) -> String + Send + Sync + 'static) {
        self.macros.write().insert(name.into(), Arc::new(f));
    }

    /// Expands every string leaf of `value` to a fixpoint, capped at
    /// [`MAX_PASSES`] passes.
    pub fn expand(&self, value: &Value) -> Value {
        let mut current = value.clone();
        for _ in 0..MAX_PASSES {
            let next = self.expand_once(&current);
            if next == current {
                return next;
            }
            current = next;
        }
        current
    }

    fn expand_once(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_once(v)).collect()),
            Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), self.expand_once(v))).collect()),
            other => other.clone(),
        }
    }

    fn expand_string(&self, input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find('{') {
            let Some(end) = rest[start..].find('}') else {
                output.push_str(rest);
                return output;
            };
            output.push_str(&rest[..start]);
            let token = &rest[start + 1..start + end];
            output.push_str(&self.evaluate_token(token));
            rest = &rest[start + end + 1..];
        }
        output.push_str(rest);
        output
    }

    fn evaluate_token(&self, token: &str) -> String {
        let (name, args_str) = match token.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (token, None),
        };
        let args: Vec<String> = args_str
            .map(|a| a.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        match self.macros.read().get(name) {
            Some(m) => m.call(&args),
            None => {
                tracing::warn!(macro_name = name, "unknown macro token left unexpanded");
                format!("{{{token}}}")
            }
        }
    }
}

impl Default for TaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_a_registered_macro() {
        let generator = TaskGenerator::new();
        generator.register("greet", |args| format!("hello {}", args.first().cloned().unwrap_or_default()));
        let expanded = generator.expand(&json!({"msg": "{greet:world}"}));
        assert_eq!(expanded, json!({"msg": "hello world"}));
    }

    #[test]
    fn unknown_macro_is_left_unchanged() {
        let generator = TaskGenerator::new();
        let expanded = generator.expand(&json!("{nope}"));
        assert_eq!(expanded, json!("{nope}"));
    }

    #[test]
    fn expansion_recurses_to_a_fixpoint() {
        let generator = TaskGenerator::new();
        generator.register("wrap", |args| format!("[{}]", args.first().cloned().unwrap_or_default()));
        // {outer} expands to a string that itself contains a macro token.
        generator.register("outer", |_| "{wrap:done}".to_string());
        let expanded = generator.expand(&json!("{outer}"));
        assert_eq!(expanded, json!("[done]"));
    }

    #[test]
    fn builtin_sequence_progress_reports_percentage() {
        let seq = Arc::new(Sequence::new());
        let target = Arc::new(vesper_core::Target::new("m31"));
        target.restore_status(vesper_core::TargetStatus::Completed);
        seq.add_target(target);
        let generator = TaskGenerator::with_builtins(seq);
        let expanded = generator.expand(&json!("{sequence.progress}"));
        assert_eq!(expanded, json!("100.0"));
    }
}
