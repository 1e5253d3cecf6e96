use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Set by `session.setUser`; student operations act as this user.
    pub current_user: Option<i64>,
    /// Mixed into the configured RNG seed so each request draws fresh values.
    pub request_counter: u64,
}
