//! `${{ ... }}` expansion and secret masking for step commands.

use gantry_core::ports::StepInvocation;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

const MASK: &str = "***";

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").expect("expression pattern is valid")
});

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline, job and step environment
    pub env: HashMap<String, String>,
    /// Matrix values for the current instance
    pub matrix: HashMap<String, String>,
    /// Secret values, also masked in output
    pub secrets: HashMap<String, String>,
    /// Run metadata: `ref`, `branch`, `tag`, `event`, `job`, `instance`
    pub gantry: HashMap<String, String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything a step invocation exposes to expressions.
    pub fn from_invocation(invocation: &StepInvocation) -> Self {
        let ctx = &invocation.context;
        let mut gantry = HashMap::from([
            ("ref".to_string(), ctx.git_ref.clone()),
            ("event".to_string(), ctx.kind.to_string()),
            ("job".to_string(), invocation.job.clone()),
            ("instance".to_string(), invocation.instance.clone()),
        ]);
        if let Some(branch) = &ctx.branch {
            gantry.insert("branch".to_string(), branch.clone());
        }
        if let Some(tag) = &ctx.tag {
            gantry.insert("tag".to_string(), tag.clone());
        }

        Self {
            env: invocation
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            matrix: invocation
                .matrix
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            secrets: invocation
                .secrets
                .iter()
                .map(|(k, v)| (k.clone(), v.expose().to_string()))
                .collect(),
            gantry,
        }
    }

    /// Interpolate expressions in a string.
    ///
    /// Supports:
    /// - `${{ env.VAR }}` - environment value, falling back to the process environment
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ secrets.NAME }}` - secret value
    /// - `${{ gantry.ref }}` and friends - run metadata
    /// - `${{ VAR }}` - shorthand for `env.VAR`
    ///
    /// Unknown names expand to the empty string; an unterminated `${{` is
    /// left as written.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &Captures| self.resolve_expression(caps[1].trim()))
            .into_owned()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }
        if let Some(name) = expr.strip_prefix("secrets.") {
            return self.secrets.get(name).cloned().unwrap_or_default();
        }
        if let Some(key) = expr.strip_prefix("gantry.") {
            return self.gantry.get(key).cloned().unwrap_or_default();
        }

        let var_name = expr.strip_prefix("env.").unwrap_or(expr);
        self.env
            .get(var_name)
            .cloned()
            .or_else(|| std::env::var(var_name).ok())
            .unwrap_or_default()
    }

    /// Mask secrets in the input string.
    pub fn mask_secrets(&self, input: &str) -> String {
        mask(input, self.secrets.values())
    }
}

/// Replace every occurrence of each non-empty secret with `***`.
///
/// Longer secrets are replaced first so a secret containing another one is
/// masked as a whole.
pub fn mask<'a, I>(input: &str, secrets: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let mut secrets: Vec<&String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut output = input.to_string();
    for value in secrets {
        output = output.replace(value.as_str(), MASK);
    }
    output
}
