use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("langlesson.sqlite3");
    let conn = Connection::open(&db_path)?;
    init_schema(&conn)?;
    log::info!("opened lesson workspace {}", db_path.display());
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            scoring_mode TEXT NOT NULL DEFAULT 'assignment',
            custom INTEGER NOT NULL DEFAULT 1,
            retake INTEGER NOT NULL DEFAULT 0,
            usemaxgrade INTEGER NOT NULL DEFAULT 0,
            maxattempts INTEGER NOT NULL DEFAULT 0,
            minquestions INTEGER NOT NULL DEFAULT 0,
            maxpages INTEGER NOT NULL DEFAULT 0,
            nextpagedefault INTEGER NOT NULL DEFAULT 0,
            grade REAL NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_lessons_autograde(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pages(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            prev_page_id INTEGER NOT NULL DEFAULT 0,
            next_page_id INTEGER NOT NULL DEFAULT 0,
            ordering INTEGER NOT NULL DEFAULT 0,
            qtype INTEGER NOT NULL,
            qoption INTEGER NOT NULL DEFAULT 0,
            branch_id INTEGER NOT NULL DEFAULT 0,
            max_score REAL NOT NULL DEFAULT 0,
            title TEXT NOT NULL DEFAULT '',
            contents TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pages_lesson ON pages(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            page_id INTEGER NOT NULL,
            jumpto INTEGER NOT NULL DEFAULT -1,
            grade INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0,
            answer TEXT NOT NULL DEFAULT '',
            response TEXT NOT NULL DEFAULT '',
            ordering INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(page_id) REFERENCES pages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_page ON answers(page_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_lesson ON answers(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS branches(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL,
            ordering INTEGER NOT NULL,
            first_page_id INTEGER NOT NULL,
            end_page_id INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_branches_lesson ON branches(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attempts(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            page_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            answer_id INTEGER,
            retry INTEGER NOT NULL,
            correct INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0,
            user_response TEXT NOT NULL DEFAULT '',
            time_seen INTEGER NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 1,
            viewed INTEGER NOT NULL DEFAULT 0,
            graded INTEGER NOT NULL DEFAULT 0,
            resubmit INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attempts_lesson_user_retry ON attempts(lesson_id, user_id, retry)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attempts_page_user ON attempts(page_id, user_id, retry)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS page_views(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            page_id INTEGER NOT NULL,
            retry INTEGER NOT NULL,
            time_seen INTEGER NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_page_views_lesson_user ON page_views(lesson_id, user_id, retry)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lesson_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            retry INTEGER NOT NULL,
            grade REAL NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            UNIQUE(lesson_id, user_id, retry)
        )",
        [],
    )?;

    Ok(())
}

// Workspaces created before essay autograding existed lack the column.
fn ensure_lessons_autograde(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "autograde")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lessons ADD COLUMN autograde INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    init_schema(&conn).expect("schema");
    conn
}
