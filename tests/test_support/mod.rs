#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_langlessond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn langlessond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

pub fn error_code(value: &Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// A sidecar with a fresh workspace, pinned clock and RNG seed, acting as
/// user 7.
pub struct Session {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Session {
    pub fn start(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Self {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        s.ok("workspace.select", json!({ "path": workspace.to_string_lossy() }));
        s.ok(
            "setup.update",
            json!({ "section": "navigation", "patch": { "rngSeed": 42 } }),
        );
        s.ok(
            "setup.update",
            json!({ "section": "clock", "patch": { "fixedNow": 1700000000 } }),
        );
        s.ok("session.setUser", json!({ "userId": 7 }));
        s
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn create_lesson(&mut self, fields: Value) -> i64 {
        let res = self.ok("lessons.create", fields);
        res["lesson"]["id"].as_i64().expect("lesson id")
    }

    /// Appends a page at the end of the lesson and returns its id.
    pub fn add_page(&mut self, lesson_id: i64, after: i64, qtype: &str, title: &str) -> i64 {
        let res = self.ok(
            "pages.insert",
            json!({
                "lessonId": lesson_id,
                "afterPageId": after,
                "page": { "qtype": qtype, "title": title }
            }),
        );
        res["page"]["id"].as_i64().expect("page id")
    }

    /// Replaces a page's answers; returns the stored answer ids in order.
    pub fn set_answers(&mut self, page_id: i64, answers: Value) -> Vec<i64> {
        let res = self.ok("answers.set", json!({ "pageId": page_id, "answers": answers }));
        res["answers"]
            .as_array()
            .expect("answers")
            .iter()
            .map(|a| a["id"].as_i64().expect("answer id"))
            .collect()
    }

    pub fn order(&mut self, lesson_id: i64) -> Vec<i64> {
        let res = self.ok("pages.list", json!({ "lessonId": lesson_id }));
        res["pages"]
            .as_array()
            .expect("pages")
            .iter()
            .map(|p| p["id"].as_i64().expect("id"))
            .collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// `Destination` as serialized by the engine.
pub fn dest_page(result: &Value) -> Option<i64> {
    match result["destination"]["kind"].as_str() {
        Some("page") => result["destination"]["pageId"].as_i64(),
        _ => None,
    }
}

pub fn is_end(result: &Value) -> bool {
    result["destination"]["kind"].as_str() == Some("endOfLesson")
}
