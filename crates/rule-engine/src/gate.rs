use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::context::{DataAccessor, RequestContext, DEFAULT_TOKEN_PARAM};
use crate::decision::{Decision, PermissionDenied};
use crate::evaluator::ExpressionEvaluator;
use crate::resolver::resolve;
use crate::schema::{display_path, Directive, Permission, SecurityConfig};
use crate::token::TokenDecoder;

/// Fixed settings of a [`PermissionGate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOptions {
    /// Query/body parameter carrying the identity token.
    #[serde(default = "default_token_param")]
    pub token_param: String,
}

fn default_token_param() -> String {
    DEFAULT_TOKEN_PARAM.to_string()
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            token_param: default_token_param(),
        }
    }
}

/// Decides whether an operation on a path is permitted.
///
/// The gate is built once from a loaded [`SecurityConfig`] and shared; every
/// check is independent and nothing about a request is kept between calls.
#[derive(Clone)]
pub struct PermissionGate {
    security: Arc<SecurityConfig>,
    evaluator: ExpressionEvaluator,
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("enabled", &self.security.is_enabled())
            .field("evaluator", &self.evaluator)
            .finish()
    }
}

impl PermissionGate {
    pub fn new(security: impl Into<Arc<SecurityConfig>>) -> Self {
        Self::with_options(security, GateOptions::default())
    }

    pub fn with_options(security: impl Into<Arc<SecurityConfig>>, options: GateOptions) -> Self {
        Self {
            security: security.into(),
            evaluator: ExpressionEvaluator::new(options.token_param),
        }
    }

    /// Decode identity tokens with `decoder`. Without one every caller is
    /// anonymous.
    pub fn with_token_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.evaluator = self.evaluator.with_decoder(decoder);
        self
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Work out the full decision for `permission` on `path`. Never fails;
    /// anything that goes wrong along the way denies.
    pub fn decide<S: AsRef<str>>(
        &self,
        permission: Permission,
        path: &[S],
        data: &dyn DataAccessor,
        new_data: Option<&Value>,
        request: Option<&RequestContext>,
    ) -> Decision {
        let path_display = display_path(path);

        let decision = match self.security.tree() {
            None => Decision::disabled(permission, path_display),
            Some(tree) => {
                let resolution = resolve(tree, path, permission);
                trace!(
                    permission = %permission,
                    path = %path_display,
                    directive = resolution.directive.kind(),
                    "directive resolved"
                );
                match &resolution.directive {
                    Directive::Bool(allowed) => Decision::from_bool(permission, path_display, *allowed),
                    Directive::Malformed { reason, .. } => {
                        Decision::malformed(permission, path_display, reason)
                    }
                    Directive::Expression(expression) => {
                        let context =
                            self.evaluator
                                .context(data, new_data, request, &resolution.bindings);
                        let allowed = self.evaluator.evaluate(expression, &context);
                        Decision::from_expression(permission, path_display, expression.source(), allowed)
                    }
                }
            }
        };

        if decision.allowed {
            debug!(
                permission = %decision.permission,
                path = %decision.path,
                basis = ?decision.basis,
                "permission granted"
            );
        } else {
            info!(
                permission = %decision.permission,
                path = %decision.path,
                basis = ?decision.basis,
                reason = %decision.reason,
                "permission denied"
            );
        }
        decision
    }

    /// Check `permission` on `path`, failing with [`PermissionDenied`] unless
    /// it is granted.
    pub fn checkpoint<S: AsRef<str>>(
        &self,
        permission: Permission,
        path: &[S],
        data: &dyn DataAccessor,
        new_data: Option<&Value>,
        request: Option<&RequestContext>,
    ) -> Result<(), PermissionDenied> {
        self.decide(permission, path, data, new_data, request)
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::JsonData;
    use crate::decision::Basis;
    use crate::token::ClaimsTokenDecoder;
    use serde_json::json;

    fn gate(config: Value) -> PermissionGate {
        PermissionGate::new(SecurityConfig::from_value(&config).unwrap())
            .with_token_decoder(Arc::new(ClaimsTokenDecoder::new()))
    }

    fn signed_in(uid: &str) -> RequestContext {
        RequestContext::new().with_query("idToken", format!(r#"json:{{"uid":"{uid}"}}"#))
    }

    fn denied(permission: Permission) -> Result<(), PermissionDenied> {
        Err(PermissionDenied { permission })
    }

    #[test]
    fn disabled_security_allows_everything() {
        let store = JsonData::new(json!({}));
        for config in [json!(false), Value::Null, json!(0), json!("")] {
            let g = gate(config);
            let data = store.at(&["anything", "at", "all"]);
            assert_eq!(
                g.checkpoint(Permission::Write, &["anything", "at", "all"], &data, None, None),
                Ok(())
            );
            let d = g.decide(Permission::Read, &["x"], &data, None, None);
            assert_eq!(d.basis, Basis::SecurityDisabled);
            assert!(!g.security().is_enabled());
        }
        assert!(gate(json!(true)).security().is_enabled());
    }

    #[test]
    fn root_booleans_apply_everywhere() {
        let g = gate(json!({ ".read": true, ".write": false }));
        let store = JsonData::new(json!({}));
        let data = store.at(&["a", "b"]);

        assert_eq!(g.checkpoint(Permission::Read, &["a", "b"], &data, None, None), Ok(()));
        let err = g
            .checkpoint(Permission::Write, &["a", "b"], &data, None, None)
            .unwrap_err();
        assert_eq!(err.to_string(), "no write permission");
    }

    #[test]
    fn overly_deep_rules_deny() {
        let store = JsonData::new(json!({}));
        let empty: [&str; 0] = [];
        let data = store.at(&empty);
        for source in [
            format!("root{} == null", ".a".repeat(400)),
            format!("1{} > 0", " + 1".repeat(400)),
        ] {
            let g = gate(json!({ ".read": source }));
            assert_eq!(
                g.checkpoint(Permission::Read, &empty, &data, None, None),
                denied(Permission::Read)
            );
            let d = g.decide(Permission::Read, &empty, &data, None, None);
            assert_eq!(d.basis, Basis::Malformed);
        }
    }

    #[test]
    fn bare_true_denies_everything() {
        let g = gate(json!(true));
        let store = JsonData::new(json!({}));
        let data = store.at(&["a"]);
        assert_eq!(
            g.checkpoint(Permission::Read, &["a"], &data, None, None),
            denied(Permission::Read)
        );
        let empty: [&str; 0] = [];
        assert_eq!(
            g.checkpoint(Permission::Write, &empty, &store.at(&empty), None, None),
            denied(Permission::Write)
        );
    }

    #[test]
    fn owner_rule_uses_identity_and_binding() {
        let g = gate(json!({
            "users": { "$uid": { ".read": "auth != null && auth.uid == uid" } }
        }));
        let store = JsonData::new(json!({ "users": { "u1": { "name": "Ada" } } }));
        let data = store.at(&["users", "u1"]);

        assert_eq!(
            g.checkpoint(Permission::Read, &["users", "u1"], &data, None, None),
            denied(Permission::Read)
        );
        assert_eq!(
            g.checkpoint(Permission::Read, &["users", "u1"], &data, None, Some(&signed_in("u1"))),
            Ok(())
        );
        assert_eq!(
            g.checkpoint(Permission::Read, &["users", "u1"], &data, None, Some(&signed_in("u2"))),
            denied(Permission::Read)
        );
    }

    #[test]
    fn undecodable_token_denies_identity_rules() {
        let g = gate(json!({ ".read": "auth != null" }));
        let store = JsonData::new(json!({}));
        let data = store.at(&["x"]);
        let request = RequestContext::new().with_query("idToken", "%%%garbage%%%");
        assert_eq!(
            g.checkpoint(Permission::Read, &["x"], &data, None, Some(&request)),
            denied(Permission::Read)
        );
    }

    #[test]
    fn invalid_expression_denies() {
        let g = gate(json!({ ".read": "((( not valid" }));
        let store = JsonData::new(json!({}));
        let data = store.at(&["x"]);
        let d = g.decide(Permission::Read, &["x"], &data, None, None);
        assert!(!d.allowed);
        assert_eq!(d.basis, Basis::Malformed);
        assert_eq!(d.into_result(), denied(Permission::Read));
    }

    #[test]
    fn write_rule_sees_new_data() {
        let g = gate(json!({
            "rooms": { "$roomId": { ".write": "newData !== null && newData.name.length > 0" } }
        }));
        let store = JsonData::new(json!({}));
        let data = store.at(&["rooms", "42"]);
        let record = json!({ "name": "lobby" });
        let blank = json!({ "name": "" });

        assert_eq!(
            g.checkpoint(Permission::Write, &["rooms", "42"], &data, Some(&record), None),
            Ok(())
        );
        assert_eq!(
            g.checkpoint(Permission::Write, &["rooms", "42"], &data, Some(&blank), None),
            denied(Permission::Write)
        );
        assert_eq!(
            g.checkpoint(Permission::Write, &["rooms", "42"], &data, None, None),
            denied(Permission::Write)
        );
    }

    #[test]
    fn decision_reports_path_and_reason() {
        let g = gate(json!({ "public": { ".read": true } }));
        let store = JsonData::new(json!({}));
        let d = g.decide(Permission::Read, &["public", "doc"], &store.at(&["public", "doc"]), None, None);
        assert!(d.allowed);
        assert_eq!(d.path, "/public/doc");
        assert_eq!(d.basis, Basis::Boolean);
    }

    #[test]
    fn custom_token_param_is_honoured() {
        let config = SecurityConfig::from_value(&json!({ ".read": "auth.uid == 'u1'" })).unwrap();
        let g = PermissionGate::with_options(
            config,
            GateOptions {
                token_param: "access_token".to_string(),
            },
        )
        .with_token_decoder(Arc::new(ClaimsTokenDecoder::new()));
        let store = JsonData::new(json!({}));
        let data = store.at::<&str>(&[]);
        let request = RequestContext::new().with_query("access_token", r#"json:{"uid":"u1"}"#);
        let empty: [&str; 0] = [];

        assert_eq!(g.checkpoint(Permission::Read, &empty, &data, None, Some(&request)), Ok(()));
        assert_eq!(
            g.checkpoint(Permission::Read, &empty, &data, None, Some(&signed_in("u1"))),
            denied(Permission::Read)
        );
    }

    #[test]
    fn gate_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PermissionGate>();
    }
}
