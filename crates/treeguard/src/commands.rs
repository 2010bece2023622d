use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use rule_engine::{
    loader, split_path, ClaimsTokenDecoder, JsonData, PermissionGate, RequestContext,
};

use crate::cli::CheckArgs;
use crate::config::Config;

/// Print every configuration issue in `rules`. Returns `true` when there are
/// none.
pub fn lint(rules: &Path, out: &mut impl Write) -> Result<bool> {
    let issues = loader::lint_file(rules)?;
    if issues.is_empty() {
        writeln!(out, "{}: no issues found", rules.display())?;
        return Ok(true);
    }
    for issue in &issues {
        writeln!(out, "{}: {issue}", rules.display())?;
    }
    writeln!(out, "{} issue(s) found", issues.len())?;
    Ok(false)
}

/// Run one checkpoint and print the decision. Returns `true` when the
/// permission is granted.
pub fn check(cfg: &Config, args: &CheckArgs, out: &mut impl Write) -> Result<bool> {
    let rules = args.rules.as_deref().unwrap_or(cfg.rules_file.as_path());
    let mut load_options = cfg.load_options();
    load_options.strict |= args.strict;

    let security = loader::load_security(rules, &load_options)?;
    let gate = PermissionGate::with_options(security, cfg.gate_options())
        .with_token_decoder(Arc::new(ClaimsTokenDecoder::new()));
    info!(
        rules = %rules.display(),
        enabled = gate.security().is_enabled(),
        ?gate,
        "rules loaded"
    );

    let store = load_store(args)?;
    let new_data = args
        .new_data
        .as_deref()
        .map(|raw| serde_json::from_str::<Value>(raw).context("--new-data is not valid JSON"))
        .transpose()?;
    let request = request_for(args, &cfg.token_param)?;

    let path = split_path(&args.path);
    let decision = gate.decide(
        args.permission,
        path.as_slice(),
        &store.at(path.as_slice()),
        new_data.as_ref(),
        request.as_ref(),
    );

    if decision.allowed {
        writeln!(out, "allow {} {}: {}", decision.permission, decision.path, decision.reason)?;
    } else {
        writeln!(out, "deny {} {}: {}", decision.permission, decision.path, decision.reason)?;
    }
    Ok(decision.allowed)
}

fn load_store(args: &CheckArgs) -> Result<JsonData> {
    if let Some(path) = &args.data {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read data file: {}", path.display()))?;
        let root: Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse data file: {}", path.display()))?;
        return Ok(JsonData::new(root));
    }
    if let Some(path) = &args.sheets {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sheets file: {}", path.display()))?;
        let sheets: BTreeMap<String, Vec<Vec<Value>>> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse sheets file: {}", path.display()))?;
        return Ok(JsonData::from_sheets(sheets));
    }
    Ok(JsonData::new(Value::Object(Default::default())))
}

/// The caller's identity travels as a token, the way a real request carries
/// it. `--auth` claims are wrapped in a `json:` token.
fn request_for(args: &CheckArgs, token_param: &str) -> Result<Option<RequestContext>> {
    let token = match (&args.auth, &args.token) {
        (Some(claims), _) => {
            let claims: Value =
                serde_json::from_str(claims).context("--auth is not valid JSON")?;
            format!("json:{claims}")
        }
        (None, Some(token)) => token.clone(),
        (None, None) => return Ok(None),
    };
    Ok(Some(RequestContext::new().with_query(token_param, token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use tempfile::NamedTempFile;

    const RULES: &str = r#"
.read: true
users:
  $uid:
    .write: "auth != null && auth.uid == uid && newData.name.length > 0"
"#;

    fn file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    fn check_args(argv: &[&str]) -> CheckArgs {
        let mut full = vec!["treeguard", "check"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Check(args) => args,
            other => panic!("expected check, got {other:?}"),
        }
    }

    fn run(argv: &[&str]) -> (bool, String) {
        let mut out = Vec::new();
        let allowed = check(&Config::default(), &check_args(argv), &mut out).unwrap();
        (allowed, String::from_utf8(out).unwrap())
    }

    #[test]
    fn check_allows_and_denies() {
        let rules = file(RULES);
        let rules_path = rules.path().to_str().unwrap();

        let (allowed, out) = run(&["--rules", rules_path, "read", "/users/u1"]);
        assert!(allowed);
        assert!(out.starts_with("allow read /users/u1"), "unexpected output: {out}");

        let (allowed, out) = run(&["--rules", rules_path, "write", "users/u1"]);
        assert!(!allowed);
        assert!(out.starts_with("deny write /users/u1"), "unexpected output: {out}");

        let (allowed, _) = run(&[
            "--rules",
            rules_path,
            "--auth",
            r#"{"uid":"u1"}"#,
            "--new-data",
            r#"{"name":"Ada"}"#,
            "write",
            "users/u1",
        ]);
        assert!(allowed);
    }

    #[test]
    fn check_reads_sheets() {
        let rules = file(r#"{ "posts": { "$id": { ".read": "data != null && data.published" } } }"#);
        let sheets = file(r#"{ "posts": [["key", "published"], ["p1", "TRUE"], ["p2", "FALSE"]] }"#);
        let rules_path = rules.path().to_str().unwrap();
        let sheets_path = sheets.path().to_str().unwrap();

        let (allowed, _) = run(&["--rules", rules_path, "--sheets", sheets_path, "read", "posts/p1"]);
        assert!(allowed);
        let (allowed, _) = run(&["--rules", rules_path, "--sheets", sheets_path, "read", "posts/p2"]);
        assert!(!allowed);
    }

    #[test]
    fn strict_flag_rejects_issues() {
        let rules = file("items:\n  $a: {}\n  $b: {}\n");
        let args = check_args(&["--rules", rules.path().to_str().unwrap(), "--strict", "read", "items/x"]);
        let err = check(&Config::default(), &args, &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("strict mode"), "unexpected error: {err:#}");
    }

    #[test]
    fn invalid_auth_is_an_error() {
        let rules = file(RULES);
        let args = check_args(&["--rules", rules.path().to_str().unwrap(), "--auth", "{", "read", "a"]);
        assert!(check(&Config::default(), &args, &mut Vec::new()).is_err());
    }

    #[test]
    fn lint_lists_issues() {
        let clean = file(RULES);
        let mut out = Vec::new();
        assert!(lint(clean.path(), &mut out).unwrap());

        let noisy = file(".read: 1\nleaf: false\n");
        let mut out = Vec::new();
        assert!(!lint(noisy.path(), &mut out).unwrap());
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("2 issue(s) found"), "unexpected output: {out}");
    }
}
