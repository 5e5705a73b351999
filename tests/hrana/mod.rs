//! End-to-end tests for the Hrana v2/v3 pipeline endpoints.

use hyper::StatusCode;
use serde_json::json;

use crate::common::{baton_of, get, make_app, pipeline, post_json};

#[tokio::test]
async fn execute_select_on_v3() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([{"type": "execute", "stmt": {"sql": "SELECT 1 AS x"}}]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let baton = baton_of(&body);
    assert_eq!(baton.len(), 64);
    assert!(baton.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(body["base_url"], json!(null));

    let result = &body["results"][0];
    assert_eq!(result["type"], "ok");
    assert_eq!(result["response"]["type"], "execute");
    let stmt_result = &result["response"]["result"];
    assert_eq!(stmt_result["cols"][0]["name"], "x");
    assert_eq!(stmt_result["rows"][0][0], json!({"type": "integer", "value": "1"}));
    assert_eq!(stmt_result["rows_read"], 1);
    assert!(stmt_result["query_duration_ms"].is_number());
}

#[tokio::test]
async fn stored_sql_used_across_pipelines() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{"type": "store_sql", "sql_id": 7, "sql": "SELECT ?"}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["type"], "ok");

    let (status, body) = pipeline(
        &app,
        "v2",
        json!(baton_of(&body)),
        json!([{
            "type": "execute",
            "stmt": {"sql_id": 7, "args": [{"type": "integer", "value": "42"}]},
        }]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"][0]["response"]["result"]["rows"][0][0],
        json!({"type": "integer", "value": "42"})
    );
}

#[tokio::test]
async fn transaction_control_is_intercepted() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([
            {"type": "execute", "stmt": {"sql": "BEGIN"}},
            {"type": "get_autocommit"},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["type"], "ok");
    let begin_result = &body["results"][0]["response"]["result"];
    assert_eq!(begin_result["cols"], json!([]));
    assert_eq!(begin_result["rows"], json!([]));
    assert_eq!(begin_result["affected_row_count"], 0);
    assert_eq!(begin_result["last_insert_rowid"], json!(null));

    assert_eq!(body["results"][1]["type"], "ok");
    assert_eq!(body["results"][1]["response"]["is_autocommit"], true);
}

#[tokio::test]
async fn statements_after_interception_still_reach_the_backend() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([
            {"type": "execute", "stmt": {"sql": "BEGIN"}},
            {"type": "execute", "stmt": {"sql": "CREATE TABLE t(x)"}},
            {"type": "execute", "stmt": {"sql": "INSERT INTO t VALUES (1)"}},
            {"type": "execute", "stmt": {"sql": "COMMIT"}},
            {"type": "execute", "stmt": {"sql": "SELECT x FROM t"}},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    for result in body["results"].as_array().unwrap() {
        assert_eq!(result["type"], "ok");
    }
    assert_eq!(
        body["results"][4]["response"]["result"]["rows"],
        json!([[{"type": "integer", "value": "1"}]])
    );
}

#[tokio::test]
async fn insert_reports_last_insert_rowid() {
    let app = make_app();
    let (_, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "execute", "stmt": {"sql": "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)"}},
            {"type": "execute", "stmt": {"sql": "INSERT INTO t(v) VALUES ('hi')"}},
        ]),
    )
    .await;

    let insert_result = &body["results"][1]["response"]["result"];
    assert_eq!(insert_result["affected_row_count"], 1);
    assert_eq!(insert_result["last_insert_rowid"], "1");
}

#[tokio::test]
async fn baton_is_single_use() {
    let app = make_app();
    let (_, body) = pipeline(&app, "v2", json!(null), json!([])).await;
    let baton = baton_of(&body);

    let (status, body) = pipeline(&app, "v2", json!(baton.clone()), json!([])).await;
    assert_eq!(status, StatusCode::OK);
    // rotated: the response carries a different baton
    assert_ne!(baton_of(&body), baton);

    let (status, body) = pipeline(&app, "v2", json!(baton), json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired baton");
}

#[tokio::test]
async fn unknown_baton_is_rejected() {
    let app = make_app();
    let fake = "ab".repeat(32);
    let (status, body) = pipeline(&app, "v3", json!(fake), json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired baton");
}

#[tokio::test(start_paused = true)]
async fn idle_stream_expires_after_five_minutes() {
    let app = make_app();
    let (_, body) = pipeline(&app, "v2", json!(null), json!([])).await;
    let baton = baton_of(&body);

    tokio::time::advance(std::time::Duration::from_secs(5 * 60 + 1)).await;

    let (status, body) = pipeline(&app, "v2", json!(baton), json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("expired"));
}

#[tokio::test]
async fn request_failures_are_isolated() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "execute", "stmt": {"sql": "SELECT 1"}},
            {"type": "execute", "stmt": {"sql": "SELECT notacolumn"}},
            {"type": "execute", "stmt": {"sql": "SELECT 2"}},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["type"], "ok");
    assert_eq!(results[1]["type"], "error");
    assert!(results[1]["error"]["message"].is_string());
    assert_eq!(results[2]["type"], "ok");
}

#[tokio::test]
async fn missing_and_conflicting_sql_are_request_errors() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "execute", "stmt": {}},
            {"type": "execute", "stmt": {"sql": "SELECT 1", "sql_id": 1}},
            {"type": "execute", "stmt": {"sql_id": 99}},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["type"] == "error"));
    assert_eq!(results[2]["error"]["code"], "SQL_NOT_FOUND");
}

#[tokio::test]
async fn stored_sql_is_scoped_to_its_stream() {
    let app = make_app();
    let (_, _) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{"type": "store_sql", "sql_id": 7, "sql": "SELECT 1"}]),
    )
    .await;

    // a fresh stream does not see the other stream's cache
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{"type": "execute", "stmt": {"sql_id": 7}}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["type"], "error");
    assert_eq!(body["results"][0]["error"]["code"], "SQL_NOT_FOUND");
}

#[tokio::test]
async fn store_sql_is_last_write_wins() {
    let app = make_app();
    let (_, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "store_sql", "sql_id": 7, "sql": "SELECT 1"},
            {"type": "store_sql", "sql_id": 7, "sql": "SELECT 2"},
            {"type": "execute", "stmt": {"sql_id": 7}},
            {"type": "close_sql", "sql_id": 7},
            {"type": "close_sql", "sql_id": 7},
            {"type": "execute", "stmt": {"sql_id": 7}},
        ]),
    )
    .await;

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[1]["type"], "ok");
    assert_eq!(
        results[2]["response"]["result"]["rows"][0][0],
        serde_json::json!({"type": "integer", "value": "2"})
    );
    // close_sql is idempotent, and the id is gone afterwards
    assert_eq!(results[4]["type"], "ok");
    assert_eq!(results[5]["type"], "error");
}

#[tokio::test]
async fn batch_conditions_gate_steps() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{
            "type": "batch",
            "batch": {"steps": [
                {"stmt": {"sql": "SELECT notacolumn"}},
                {"condition": {"type": "ok", "step": 0}, "stmt": {"sql": "SELECT 1"}},
                {"condition": {"type": "error", "step": 0}, "stmt": {"sql": "SELECT 2"}},
            ]},
        }]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let result = &body["results"][0];
    assert_eq!(result["type"], "ok");
    let batch_result = &result["response"]["result"];
    let step_results = batch_result["step_results"].as_array().unwrap();
    let step_errors = batch_result["step_errors"].as_array().unwrap();

    assert!(step_results[0].is_null());
    assert!(step_errors[0]["message"].is_string());

    assert!(step_results[1].is_null());
    assert!(step_errors[1].is_null());

    assert_eq!(
        step_results[2]["rows"],
        json!([[{"type": "integer", "value": "2"}]])
    );
    assert!(step_errors[2].is_null());
}

#[tokio::test]
async fn sequence_executes_a_script() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "sequence", "sql": "CREATE TABLE t(x); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);"},
            {"type": "execute", "stmt": {"sql": "SELECT count(*) FROM t"}},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["type"], "ok");
    assert_eq!(body["results"][0]["response"]["type"], "sequence");
    assert_eq!(
        body["results"][1]["response"]["result"]["rows"][0][0],
        json!({"type": "integer", "value": "2"})
    );
}

#[tokio::test]
async fn describe_reports_flags() {
    let app = make_app();
    let (_, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "describe", "sql": "EXPLAIN SELECT 1"},
            {"type": "describe", "sql": "INSERT INTO t VALUES (1)"},
        ]),
    )
    .await;

    let explain = &body["results"][0]["response"]["result"];
    assert_eq!(explain["is_explain"], true);
    assert_eq!(explain["is_readonly"], true);
    assert_eq!(explain["params"], json!([]));
    assert_eq!(explain["cols"], json!([]));

    let insert = &body["results"][1]["response"]["result"];
    assert_eq!(insert["is_explain"], false);
    assert_eq!(insert["is_readonly"], false);
}

#[tokio::test]
async fn close_retires_the_stream() {
    let app = make_app();
    let (status, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([
            {"type": "close"},
            {"type": "execute", "stmt": {"sql": "SELECT 1"}},
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["baton"], json!(null));
    assert_eq!(body["results"][0]["type"], "ok");
    // data requests after close fail, but the pipeline still answers them in order
    assert_eq!(body["results"][1]["type"], "error");
}

#[tokio::test]
async fn v2_omits_stats_and_v3_reports_them() {
    let app = make_app();
    let (_, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{"type": "execute", "stmt": {"sql": "SELECT 1"}}]),
    )
    .await;
    let result = &body["results"][0]["response"]["result"];
    assert!(result.get("rows_read").is_none());
    assert!(result.get("rows_written").is_none());
    assert!(result.get("query_duration_ms").is_none());

    let (_, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([{"type": "execute", "stmt": {"sql": "SELECT 1"}}]),
    )
    .await;
    let result = &body["results"][0]["response"]["result"];
    assert_eq!(result["rows_read"], 1);
    assert_eq!(result["rows_written"], 0);
    assert!(result["query_duration_ms"].is_number());
}

#[tokio::test]
async fn named_args_as_map_and_list() {
    let app = make_app();
    let (_, body) = pipeline(
        &app,
        "v2",
        json!(null),
        json!([{
            "type": "execute",
            "stmt": {"sql": "SELECT :a AS a", "named_args": {"a": 7}},
        }]),
    )
    .await;
    assert_eq!(
        body["results"][0]["response"]["result"]["rows"][0][0],
        json!({"type": "integer", "value": "7"})
    );

    let (_, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([{
            "type": "execute",
            "stmt": {
                "sql": "SELECT :a AS a",
                "named_args": [{"name": "a", "value": {"type": "text", "value": "hi"}}],
            },
        }]),
    )
    .await;
    assert_eq!(
        body["results"][0]["response"]["result"]["rows"][0][0],
        json!({"type": "text", "value": "hi"})
    );
}

#[tokio::test]
async fn values_round_trip_on_v3() {
    let app = make_app();
    let args = json!([
        {"type": "null"},
        {"type": "integer", "value": "-9223372036854775808"},
        {"type": "float", "value": 1.5},
        {"type": "text", "value": "héllo"},
        {"type": "blob", "base64": "AP8Q"},
    ]);
    let (_, body) = pipeline(
        &app,
        "v3",
        json!(null),
        json!([{
            "type": "execute",
            "stmt": {"sql": "SELECT ?, ?, ?, ?, ?", "args": args},
        }]),
    )
    .await;

    let row = &body["results"][0]["response"]["result"]["rows"][0];
    assert_eq!(row[0], json!({"type": "null"}));
    assert_eq!(row[1], json!({"type": "integer", "value": "-9223372036854775808"}));
    assert_eq!(row[2], json!({"type": "float", "value": 1.5}));
    assert_eq!(row[3], json!({"type": "text", "value": "héllo"}));
    assert_eq!(row[4], json!({"type": "blob", "base64": "AP8Q"}));
}

#[tokio::test]
async fn malformed_pipeline_body_is_a_400() {
    let app = make_app();
    let (status, body) = post_json(&app, "/v2/pipeline", json!({"nonsense": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn routes_and_probes() {
    let app = make_app();

    let (status, body) = get(&app, "/health").await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));

    let (status, body) = get(&app, "/v2").await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));

    let (status, body) = get(&app, "/v3/").await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));

    let (status, body) = get(&app, "/version").await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["version"], "libsql-do-http-0.1.0");

    let (status, body) = get(&app, "/v3-protobuf").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].is_string());

    let (status, body) = get(&app, "/no/such/route").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn trailing_slash_variants_dispatch_the_same() {
    let app = make_app();
    let (status, body) = post_json(
        &app,
        "/v3/pipeline/",
        json!({"baton": null, "requests": [{"type": "execute", "stmt": {"sql": "SELECT 1"}}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["type"], "ok");
}
