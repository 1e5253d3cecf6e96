use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Navigation,
    Clock,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [Self::Navigation, Self::Clock];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "navigation" => Some(Self::Navigation),
            "clock" => Some(Self::Clock),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Clock => "clock",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Navigation => "setup.navigation",
            Self::Clock => "setup.clock",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Navigation => json!({
            "rngSeed": null,
            "clusterExitFallbackScan": true,
            "undefinedJump": "next"
        }),
        SetupSection::Clock => json!({
            "fixedNow": null
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be a boolean", key))
}

fn parse_optional_int(v: &Value, key: &str, min: i64) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let Some(n) = v.as_i64() else {
        return Err(format!("{} must be an integer or null", key));
    };
    if n < min {
        return Err(format!("{} must be >= {}", key, min));
    }
    Ok(json!(n))
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Navigation => match k.as_str() {
                "rngSeed" => {
                    obj.insert(k.clone(), parse_optional_int(v, k, 0)?);
                }
                "clusterExitFallbackScan" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "undefinedJump" => {
                    let Some(s) = v.as_str() else {
                        return Err("undefinedJump must be a string".to_string());
                    };
                    if s != "next" && s != "reject" {
                        return Err("undefinedJump must be one of: next, reject".to_string());
                    }
                    obj.insert(k.clone(), Value::String(s.to_string()));
                }
                _ => return Err(format!("unknown navigation field: {}", k)),
            },
            SetupSection::Clock => match k.as_str() {
                "fixedNow" => {
                    obj.insert(k.clone(), parse_optional_int(v, k, 0)?);
                }
                _ => return Err(format!("unknown clock field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &single) {
                    log::warn!("ignoring stored {} setting: {}", section.name(), e);
                }
            }
        }
    }
    Ok(current)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndefinedJumpPolicy {
    Next,
    Reject,
}

/// Typed view over the `navigation` and `clock` sections.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub rng_seed: Option<u64>,
    pub cluster_exit_fallback_scan: bool,
    pub undefined_jump: UndefinedJumpPolicy,
    pub fixed_now: Option<i64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rng_seed: None,
            cluster_exit_fallback_scan: true,
            undefined_jump: UndefinedJumpPolicy::Next,
            fixed_now: None,
        }
    }
}

impl EngineSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let nav = load_section(conn, SetupSection::Navigation)?;
        let clock = load_section(conn, SetupSection::Clock)?;
        Ok(Self {
            rng_seed: nav.get("rngSeed").and_then(|v| v.as_u64()),
            cluster_exit_fallback_scan: nav
                .get("clusterExitFallbackScan")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            undefined_jump: match nav.get("undefinedJump").and_then(|v| v.as_str()) {
                Some("reject") => UndefinedJumpPolicy::Reject,
                _ => UndefinedJumpPolicy::Next,
            },
            fixed_now: clock.get("fixedNow").and_then(|v| v.as_i64()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_stored_settings() {
        let conn = db::test_conn();
        assert_eq!(EngineSettings::load(&conn).expect("load"), EngineSettings::default());
    }

    #[test]
    fn patch_validation_rejects_unknown_and_bad_values() {
        let mut current = default_section(SetupSection::Navigation);
        let bad = json!({ "undefinedJump": "explode" });
        assert!(merge_section_patch(
            SetupSection::Navigation,
            &mut current,
            bad.as_object().expect("obj")
        )
        .is_err());
        let unknown = json!({ "colour": "red" });
        assert!(merge_section_patch(
            SetupSection::Navigation,
            &mut current,
            unknown.as_object().expect("obj")
        )
        .is_err());
    }

    #[test]
    fn stored_sections_drive_typed_settings() {
        let conn = db::test_conn();
        db::settings_set_json(
            &conn,
            SetupSection::Navigation.key(),
            &json!({ "rngSeed": 11, "undefinedJump": "reject", "bogus": 1 }),
        )
        .expect("store nav");
        db::settings_set_json(&conn, SetupSection::Clock.key(), &json!({ "fixedNow": 1000 }))
            .expect("store clock");
        let s = EngineSettings::load(&conn).expect("load");
        assert_eq!(s.rng_seed, Some(11));
        assert_eq!(s.undefined_jump, UndefinedJumpPolicy::Reject);
        assert!(s.cluster_exit_fallback_scan);
        assert_eq!(s.fixed_now, Some(1000));
    }
}
