use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::context::{
    resolve_identity, DataAccessor, EvaluationContext, RequestContext, DEFAULT_TOKEN_PARAM,
};
use crate::expression::{Expression, MAX_STEPS};
use crate::resolver::Bindings;
use crate::token::TokenDecoder;

/// Evaluates expression directives. Every failure inside an evaluation is
/// reported as `false`.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    token_param: String,
    decoder: Option<Arc<dyn TokenDecoder>>,
    step_budget: usize,
}

impl std::fmt::Debug for ExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEvaluator")
            .field("token_param", &self.token_param)
            .field("has_decoder", &self.decoder.is_some())
            .field("step_budget", &self.step_budget)
            .finish()
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PARAM)
    }
}

impl ExpressionEvaluator {
    /// An evaluator reading identity tokens from `token_param`. Without a
    /// decoder every caller is anonymous.
    pub fn new(token_param: impl Into<String>) -> Self {
        Self {
            token_param: token_param.into(),
            decoder: None,
            step_budget: MAX_STEPS,
        }
    }

    /// Cap the number of nodes one evaluation may visit.
    #[cfg(test)]
    pub(crate) fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn token_param(&self) -> &str {
        &self.token_param
    }

    /// The caller's claims, or `None` for an anonymous caller.
    pub fn identity(&self, request: Option<&RequestContext>) -> Option<Value> {
        resolve_identity(request, &self.token_param, self.decoder.as_deref())
    }

    /// Assemble the context for one check.
    pub fn context<'a>(
        &self,
        data: &'a dyn DataAccessor,
        new_data: Option<&'a Value>,
        request: Option<&RequestContext>,
        bindings: &Bindings,
    ) -> EvaluationContext<'a> {
        EvaluationContext::new(data, new_data, self.identity(request), bindings)
    }

    /// Run `expression` against `context`. Errors and non-boolean results
    /// are `false`.
    pub fn evaluate(&self, expression: &Expression, context: &EvaluationContext<'_>) -> bool {
        match expression.evaluate_bool_with_budget(context, self.step_budget) {
            Ok(result) => {
                trace!(expression = expression.source(), result, "expression evaluated");
                result
            }
            Err(err) => {
                debug!(
                    expression = expression.source(),
                    error = %err,
                    "expression evaluation failed; treating as false"
                );
                false
            }
        }
    }

    /// Compile and run `source` in one go. Compile errors are `false`.
    pub fn evaluate_source(&self, source: &str, context: &EvaluationContext<'_>) -> bool {
        match Expression::compile(source) {
            Ok(expression) => self.evaluate(&expression, context),
            Err(err) => {
                debug!(expression = source, error = %err, "expression failed to compile; treating as false");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::JsonData;
    use crate::token::ClaimsTokenDecoder;
    use serde_json::json;

    fn evaluator() -> ExpressionEvaluator {
        ExpressionEvaluator::default().with_decoder(Arc::new(ClaimsTokenDecoder::new()))
    }

    fn signed_in(uid: &str) -> RequestContext {
        RequestContext::new().with_query("idToken", format!(r#"json:{{"uid":"{uid}"}}"#))
    }

    #[test]
    fn evaluates_against_bound_context() {
        let store = JsonData::new(json!({ "posts": { "p1": { "owner": "u1" } } }));
        let data = store.at(&["posts", "p1"]);
        let mut bindings = Bindings::new();
        bindings.insert("postId", "p1");
        let request = signed_in("u1");

        let ev = evaluator();
        let ctx = ev.context(&data, None, Some(&request), &bindings);
        assert!(ev.evaluate_source("auth.uid == data.owner && $postId == 'p1'", &ctx));
        assert!(ev.evaluate_source("root.posts[postId].owner === auth.uid", &ctx));
        assert!(!ev.evaluate_source("newData != null", &ctx));
    }

    #[test]
    fn failures_evaluate_to_false() {
        let store = JsonData::new(json!({}));
        let data = store.at::<&str>(&[]);
        let ev = evaluator();
        let ctx = ev.context(&data, None, None, &Bindings::new());

        // null member access, unknown name, non-boolean result, parse error
        assert!(!ev.evaluate_source("auth.uid == 'u1'", &ctx));
        assert!(!ev.evaluate_source("window.location", &ctx));
        assert!(!ev.evaluate_source("'yes'", &ctx));
        assert!(!ev.evaluate_source("((( not valid", &ctx));
        assert!(ev.evaluate_source("auth == null", &ctx));
    }

    #[test]
    fn exhausted_budget_evaluates_to_false() {
        let store = JsonData::new(json!({ "count": 2 }));
        let data = store.at::<&str>(&[]);
        let source = "data.count + data.count + data.count == 6";

        let ev = evaluator();
        let ctx = ev.context(&data, None, None, &Bindings::new());
        assert!(ev.evaluate_source(source, &ctx));

        let tight = evaluator().with_step_budget(4);
        let ctx = tight.context(&data, None, None, &Bindings::new());
        assert!(!tight.evaluate_source(source, &ctx));
    }

    #[test]
    fn custom_token_param() {
        let ev = ExpressionEvaluator::new("token").with_decoder(Arc::new(ClaimsTokenDecoder::new()));
        let request = RequestContext::new().with_body(json!({ "token": "json:{\"uid\":\"u9\"}" }));
        assert_eq!(ev.identity(Some(&request)), Some(json!({ "uid": "u9" })));
        assert_eq!(ev.identity(Some(&signed_in("u1"))), None);
    }

    #[test]
    fn without_decoder_everyone_is_anonymous() {
        let ev = ExpressionEvaluator::default();
        assert_eq!(ev.identity(Some(&signed_in("u1"))), None);
    }
}
