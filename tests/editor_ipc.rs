mod test_support;

use serde_json::{json, Value};
use test_support::{error_code, Session};

fn assert_linked(pages: &Value) {
    let list = pages.as_array().expect("pages");
    for (i, p) in list.iter().enumerate() {
        let prev = if i == 0 { 0 } else { list[i - 1]["id"].as_i64().unwrap_or(-1) };
        let next = list
            .get(i + 1)
            .map(|n| n["id"].as_i64().unwrap_or(-1))
            .unwrap_or(0);
        assert_eq!(p["prevPageId"].as_i64(), Some(prev), "prev of {}", p["id"]);
        assert_eq!(p["nextPageId"].as_i64(), Some(next), "next of {}", p["id"]);
        assert_eq!(p["ordering"].as_i64(), Some(i as i64 + 1));
    }
}

#[test]
fn insert_move_and_delete_keep_the_list_linked() {
    let mut s = Session::start("langlesson-editor-structure");
    let lesson = s.create_lesson(json!({ "name": "Structure" }));
    let a = s.add_page(lesson, 0, "description", "A");
    let c = s.add_page(lesson, a, "description", "C");
    let b = s.add_page(lesson, a, "description", "B");
    let head = s.add_page(lesson, 0, "description", "Start");
    assert_eq!(s.order(lesson), vec![head, a, b, c]);

    let moved = s.ok("pages.move", json!({ "pageId": head, "afterPageId": c }));
    assert_eq!(moved["order"], json!([a, b, c, head]));

    let many = s.ok(
        "pages.moveMany",
        json!({ "lessonId": lesson, "pageIds": [c, a], "afterPageId": head }),
    );
    assert_eq!(many["order"], json!([b, head, a, c]));

    s.ok("pages.delete", json!({ "pageId": head }));
    assert_eq!(s.order(lesson), vec![b, a, c]);

    let listed = s.ok("pages.list", json!({ "lessonId": lesson }));
    assert_linked(&listed["pages"]);

    let info = s.ok("lessons.get", json!({ "lessonId": lesson }));
    assert_eq!(info["firstPageId"].as_i64(), Some(b));
    assert_eq!(info["lastPageId"].as_i64(), Some(c));
    assert_eq!(info["pageCount"].as_i64(), Some(3));
}

#[test]
fn bad_moves_are_rejected_without_changes() {
    let mut s = Session::start("langlesson-editor-badmoves");
    let lesson = s.create_lesson(json!({ "name": "Moves" }));
    let a = s.add_page(lesson, 0, "description", "A");
    let b = s.add_page(lesson, a, "description", "B");
    let c = s.add_page(lesson, b, "description", "C");
    let other = s.create_lesson(json!({ "name": "Other" }));
    let foreign = s.add_page(other, 0, "description", "X");

    let inside = s.call(
        "pages.moveMany",
        json!({ "lessonId": lesson, "pageIds": [a, b], "afterPageId": b }),
    );
    assert_eq!(error_code(&inside), "graph_inconsistent");

    let twice = s.call(
        "pages.moveMany",
        json!({ "lessonId": lesson, "pageIds": [a, a], "afterPageId": c }),
    );
    assert_eq!(error_code(&twice), "graph_inconsistent");

    let stray = s.call(
        "pages.moveMany",
        json!({ "lessonId": lesson, "pageIds": [foreign], "afterPageId": c }),
    );
    assert_eq!(error_code(&stray), "graph_inconsistent");

    let itself = s.call("pages.move", json!({ "pageId": b, "afterPageId": b }));
    assert_eq!(error_code(&itself), "graph_inconsistent");

    let missing = s.call("pages.move", json!({ "pageId": a, "afterPageId": 9999 }));
    assert_eq!(error_code(&missing), "not_found");

    let missing_after = s.call(
        "pages.insert",
        json!({ "lessonId": lesson, "afterPageId": foreign, "page": { "qtype": "essay" } }),
    );
    assert_eq!(error_code(&missing_after), "not_found");

    let bad_type = s.call(
        "pages.insert",
        json!({ "lessonId": lesson, "page": { "qtype": "crossword" } }),
    );
    assert_eq!(error_code(&bad_type), "bad_params");

    assert_eq!(s.order(lesson), vec![a, b, c]);
}

#[test]
fn answers_are_validated_and_drive_scores_and_branches() {
    let mut s = Session::start("langlesson-editor-answers");
    let lesson = s.create_lesson(json!({ "name": "Answers" }));
    let table = s.add_page(lesson, 0, "branch_table", "Menu");
    let one = s.add_page(lesson, table, "multiple_choice", "Q1");
    let end = s.add_page(lesson, one, "end_of_branch", "");
    let desc = s.add_page(lesson, end, "description", "After");

    let too_many = s.call(
        "answers.set",
        json!({ "pageId": desc, "answers": [{ "jumpto": -1 }, { "jumpto": -1 }] }),
    );
    assert_eq!(error_code(&too_many), "bad_params");

    let dangling = s.call(
        "answers.set",
        json!({ "pageId": one, "answers": [{ "answer": "x", "jumpto": 9999 }] }),
    );
    assert_eq!(error_code(&dangling), "invalid_jump");

    let unknown_code = s.call(
        "answers.set",
        json!({ "pageId": one, "answers": [{ "answer": "x", "jumpto": -33 }] }),
    );
    assert_eq!(error_code(&unknown_code), "bad_params");

    let set = s.ok(
        "answers.set",
        json!({
            "pageId": one,
            "answers": [
                { "answer": "a", "jumpto": -1, "score": 2 },
                { "answer": "b", "jumpto": 0, "score": 0.5 }
            ]
        }),
    );
    assert_eq!(set["maxScore"].as_f64(), Some(2.0));
    let listed = s.ok("answers.list", json!({ "pageId": one }));
    assert_eq!(listed["answers"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(listed["answers"][1]["ordering"].as_i64(), Some(1));

    s.set_answers(table, json!([{ "answer": "Go", "jumpto": one }]));
    let branches = s.ok("branches.list", json!({ "lessonId": lesson }));
    let rows = branches["branches"].as_array().expect("branches");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["firstPageId"].as_i64(), Some(one));
    assert_eq!(rows[0]["endPageId"].as_i64(), Some(end));

    let report = s.ok("pages.reorder", json!({ "lessonId": lesson }));
    assert_eq!(report["grade"].as_f64(), Some(2.0));
    let in_branch = report["pages"]
        .as_array()
        .and_then(|p| p.iter().find(|p| p["id"].as_i64() == Some(one)))
        .cloned()
        .expect("page in report");
    assert_eq!(in_branch["branchId"], rows[0]["id"]);

    let deleted = s.ok("pages.delete", json!({ "pageId": one }));
    assert_eq!(deleted["ok"], true);
    let after = s.ok("lessons.get", json!({ "lessonId": lesson }));
    assert_eq!(after["lesson"]["grade"].as_f64(), Some(0.0));
}

#[test]
fn page_and_lesson_patches_apply_partially() {
    let mut s = Session::start("langlesson-editor-patch");
    let lesson = s.create_lesson(json!({ "name": "Patch" }));
    let p = s.add_page(lesson, 0, "multiple_choice", "Old");

    let updated = s.ok(
        "pages.update",
        json!({ "pageId": p, "patch": { "title": "New", "qoption": true } }),
    );
    assert_eq!(updated["page"]["title"], "New");
    assert_eq!(updated["page"]["qoption"], true);
    let got = s.ok("pages.get", json!({ "pageId": p }));
    assert_eq!(got["page"]["title"], "New");

    let lesson_patch = s.ok(
        "lessons.update",
        json!({ "lessonId": lesson, "patch": { "maxattempts": 3 } }),
    );
    assert_eq!(lesson_patch["lesson"]["maxattempts"].as_i64(), Some(3));
    assert_eq!(lesson_patch["lesson"]["name"], "Patch");

    let unknown = s.call(
        "lessons.update",
        json!({ "lessonId": lesson, "patch": { "colour": "red" } }),
    );
    assert_eq!(error_code(&unknown), "bad_params");
    let negative = s.call(
        "lessons.update",
        json!({ "lessonId": lesson, "patch": { "minquestions": -1 } }),
    );
    assert_eq!(error_code(&negative), "bad_params");
    let nameless = s.call("lessons.create", json!({ "retake": true }));
    assert_eq!(error_code(&nameless), "bad_params");

    let all = s.ok("lessons.list", json!({}));
    assert_eq!(all["lessons"].as_array().map(|l| l.len()), Some(1));
}
