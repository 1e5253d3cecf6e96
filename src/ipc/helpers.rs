use crate::config::EngineSettings;
use crate::context::RequestContext;
use crate::error::EngineError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for HandlerErr {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_params(e.to_string())
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Deserializes `params[key]` (or the whole params object when `key` is
/// empty) into `T`.
pub fn parse_param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, HandlerErr> {
    let raw = if key.is_empty() {
        params.clone()
    } else {
        params
            .get(key)
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?
    };
    serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", if key.is_empty() { "params" } else { key }, e)))
}

fn no_workspace(id: &str) -> Value {
    err(id, "no_workspace", "select a workspace first", None)
}

fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

/// Read-only request against the open workspace.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    respond(&req.id, f(conn, &req.params))
}

/// Runs `f` in one transaction; any error drops it and nothing is written.
pub fn with_tx<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let result = (|| {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        let v = f(&tx, &req.params)?;
        tx.commit()
            .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
        Ok(v)
    })();
    respond(&req.id, result)
}

/// Like [`with_tx`], for operations acting as the session user. Transient
/// messages collected on the context are returned with the result.
pub fn with_student_tx<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &mut RequestContext, &Value) -> Result<Value, HandlerErr>,
{
    state.request_counter += 1;
    let request_no = state.request_counter;
    let Some(user_id) = state.current_user else {
        return err(&req.id, "no_user", "call session.setUser first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let result = (|| {
        let settings = EngineSettings::load(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let mut ctx = RequestContext::new(user_id, settings, request_no);
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        let mut v = f(&tx, &mut ctx, &req.params)?;
        tx.commit()
            .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
        if let Some(obj) = v.as_object_mut() {
            obj.insert("messages".into(), json!(ctx.messages));
        }
        Ok(v)
    })();
    respond(&req.id, result)
}
