//! Everything a rule expression can see.
//!
//! The gate builds one [`EvaluationContext`] per check from the caller's data
//! accessor, the candidate record, the resolved identity and the wildcard
//! bindings. Expressions can only read these names:
//!
//! - `now`: current time in milliseconds since the Unix epoch
//! - `root`: the whole data tree
//! - `data`: the record currently stored at the path (`null` if none)
//! - `newData`: the record about to be written (`null` on reads)
//! - `auth`: the caller's decoded token claims (`null` if anonymous)
//! - one entry per wildcard binding, as `$name` and as `name`

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::expression::Scope;
use crate::resolver::Bindings;
use crate::token::TokenDecoder;

/// Query/body parameter the identity token is read from by default.
pub const DEFAULT_TOKEN_PARAM: &str = "idToken";

static NULL: Value = Value::Null;

/// Read access to the data store at the path being checked.
pub trait DataAccessor {
    /// The whole data tree.
    fn root(&self) -> &Value;

    /// The record currently stored at the checked path, if any.
    fn current(&self) -> Option<&Value>;
}

/// The inbound request, as far as authorization is concerned.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub query: HashMap<String, String>,
    pub body: Map<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Use `body` as the request body. Non-object bodies carry no parameters.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    /// The identity token under `param`: the query string first, then the
    /// body. Empty values count as absent.
    pub fn token(&self, param: &str) -> Option<&str> {
        self.query
            .get(param)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.body
                    .get(param)
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
            })
    }
}

/// Decode the caller's identity. Missing request, missing token, missing
/// decoder and decoding failures all mean "anonymous".
pub fn resolve_identity(
    request: Option<&RequestContext>,
    token_param: &str,
    decoder: Option<&dyn TokenDecoder>,
) -> Option<Value> {
    let token = request?.token(token_param)?;
    let decoder = decoder?;
    match decoder.decode(token) {
        Ok(claims) => Some(claims),
        Err(err) => {
            debug!(error = %err, "identity token rejected; evaluating as anonymous");
            None
        }
    }
}

/// The immutable set of names visible to one expression evaluation.
#[derive(Debug)]
pub struct EvaluationContext<'a> {
    now: Value,
    root: &'a Value,
    data: &'a Value,
    new_data: &'a Value,
    auth: Value,
    bindings: HashMap<String, Value>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        data: &'a dyn DataAccessor,
        new_data: Option<&'a Value>,
        auth: Option<Value>,
        bindings: &Bindings,
    ) -> Self {
        let bindings = bindings
            .iter()
            .map(|(name, segment)| (name.to_string(), Value::String(segment.to_string())))
            .collect();
        Self {
            now: Value::from(chrono::Utc::now().timestamp_millis()),
            root: data.root(),
            data: data.current().unwrap_or(&NULL),
            new_data: new_data.unwrap_or(&NULL),
            auth: auth.unwrap_or(Value::Null),
            bindings,
        }
    }

    /// Pin `now` to a fixed instant (milliseconds since the epoch).
    pub fn with_now(mut self, millis: i64) -> Self {
        self.now = Value::from(millis);
        self
    }
}

impl Scope for EvaluationContext<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        match name {
            "now" => Some(&self.now),
            "root" => Some(self.root),
            "data" => Some(self.data),
            "newData" => Some(self.new_data),
            "auth" => Some(&self.auth),
            _ => {
                let bare = name
                    .strip_prefix(crate::schema::WILDCARD_SIGIL)
                    .unwrap_or(name);
                self.bindings.get(bare)
            }
        }
    }
}
