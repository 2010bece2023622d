use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::schema::{ConfigIssue, SecurityConfig};

/// How strictly a rules file is checked while loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Fail the load on any configuration issue instead of logging it.
    pub strict: bool,
}

/// Load a [`SecurityConfig`] from a YAML (or JSON) file on disk.
pub fn load_security(path: impl AsRef<Path>, options: &LoadOptions) -> Result<SecurityConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file: {}", path.display()))?;
    load_security_from_str(&contents, options)
        .with_context(|| format!("failed to load rules file: {}", path.display()))
}

/// Parse and compile a [`SecurityConfig`] from YAML or JSON text.
///
/// The whole document is the security setting: a boolean, `null`, or the
/// root rule object.
pub fn load_security_from_str(source: &str, options: &LoadOptions) -> Result<SecurityConfig> {
    let (config, issues) = compile(source)?;

    if options.strict && !issues.is_empty() {
        let listed: Vec<String> = issues.iter().map(ToString::to_string).collect();
        bail!(
            "rules have {} issue(s) and strict mode is on:\n  {}",
            issues.len(),
            listed.join("\n  ")
        );
    }
    for issue in &issues {
        warn!(path = %issue.path, issue = %issue.kind, "rule configuration issue");
    }

    Ok(config)
}

/// Compile rules text and return every configuration issue found.
pub fn lint(source: &str) -> Result<Vec<ConfigIssue>> {
    compile(source).map(|(_, issues)| issues)
}

/// [`lint`] for a file on disk.
pub fn lint_file(path: impl AsRef<Path>) -> Result<Vec<ConfigIssue>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file: {}", path.display()))?;
    lint(&contents).with_context(|| format!("failed to lint rules file: {}", path.display()))
}

fn compile(source: &str) -> Result<(SecurityConfig, Vec<ConfigIssue>)> {
    let document: serde_yml::Value =
        serde_yml::from_str(source).context("YAML deserialization failed")?;
    let value = yaml_to_json(document)?;
    Ok(SecurityConfig::compile(&value)?)
}

/// Convert a YAML document to JSON, keeping mapping order. Scalar keys are
/// stringified and tags are dropped.
fn yaml_to_json(value: serde_yml::Value) -> Result<Value> {
    use serde_yml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => Value::Number(yaml_number(&n)?),
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Null => "null".to_string(),
                    other => bail!("unsupported mapping key: {other:?}"),
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_number(n: &serde_yml::Number) -> Result<Number> {
    if let Some(i) = n.as_i64() {
        return Ok(Number::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Number::from(u));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .ok_or_else(|| anyhow!("unsupported number: {n}"))
}
