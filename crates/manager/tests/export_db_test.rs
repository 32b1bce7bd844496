#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Export and re-evaluation against a seeded PostgreSQL.
//!
//! Needs `DATABASE_URL` pointing at a disposable database; the fixture drops
//! and recreates its tables. Without it every test here returns early.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};

use common::{REEVAL_KEY, body_string, run_test, seeded_apps};

const JSON: &str = "application/json";
const CSV: &str = "text/csv";

const ADVISORY_HEADER: &str = "id,description,public_date,synopsis,advisory_type,advisory_type_name,\
severity,cve_count,reboot_required,release_versions,installable_systems,applicable_systems";

const RH1_LINE: &str =
    "RH-1,adv-1-des,2016-09-22T16:00:00Z,adv-1-syn,1,enhancement,,0,false,\"7.0,7Server\",4,2";

#[test]
fn single_advisory_has_identical_counts_cached_and_live() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };
        let uri = "/api/patch/v3/export/advisories?filter%5Bid%5D=RH-1";

        let (status, cached) = apps.cached.export(uri, CSV).await;
        assert_eq!(status, 200);
        assert_eq!(cached, format!("{ADVISORY_HEADER}\n{RH1_LINE}\n"));

        let (status, live) = apps.live.export(uri, CSV).await;
        assert_eq!(status, 200);
        assert_eq!(live, cached);

        let (_, json) = apps.cached.export(uri, JSON).await;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["installable_systems"], 4);
        assert_eq!(rows[0]["applicable_systems"], 2);

        assert!(
            apps.cached
                .metrics()
                .await
                .contains(r#"resource="advisories",format="csv",strategy="cached""#)
        );
        assert!(
            apps.live
                .metrics()
                .await
                .contains(r#"resource="advisories",format="csv",strategy="live""#)
        );
    });
}

#[test]
fn full_exports_match_across_strategies() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };

        for uri in [
            "/api/patch/v3/export/advisories",
            "/api/patch/v2/export/advisories?sort=-installable_systems",
            "/api/patch/v3/export/packages",
            "/api/patch/v1/export/packages?sort=-systems_updatable",
        ] {
            for accept in [JSON, CSV] {
                let (cached_status, cached) = apps.cached.export(uri, accept).await;
                let (live_status, live) = apps.live.export(uri, accept).await;
                assert_eq!(cached_status, 200, "{uri} {accept}");
                assert_eq!(live_status, 200, "{uri} {accept}");
                assert_eq!(cached, live, "{uri} {accept}");
            }
        }

        // Other accounts and stale systems stay out.
        let (_, advisories) = apps.live.export("/api/patch/v3/export/advisories", JSON).await;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&advisories).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["RH-3", "RH-2", "RH-1"]);

        let (_, packages) = apps.live.export("/api/patch/v3/export/packages", CSV).await;
        assert_eq!(
            packages,
            "name,summary,systems_installed,systems_installable,systems_applicable\n\
             bash,,1,0,0\n\
             kernel,The Linux kernel,3,2,1\n"
        );
    });
}

#[test]
fn zero_rows_is_a_complete_document() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };
        let uri = "/api/patch/v3/export/advisories?filter%5Bid%5D=RH-999";

        for app in [&apps.cached, &apps.live] {
            let (status, json) = app.export(uri, JSON).await;
            assert_eq!(status, 200);
            assert_eq!(json, "[]");

            let (status, csv) = app.export(uri, CSV).await;
            assert_eq!(status, 200);
            assert_eq!(csv, format!("{ADVISORY_HEADER}\n"));
        }
    });
}

#[test]
fn repeated_requests_are_byte_identical() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };

        for uri in [
            "/api/patch/v3/export/advisories",
            "/api/patch/v3/export/systems",
        ] {
            let (_, first) = apps.live.export(uri, CSV).await;
            let (_, second) = apps.live.export(uri, CSV).await;
            assert_eq!(first, second, "{uri}");
        }
    });
}

#[test]
fn search_treats_like_wildcards_literally() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };

        for (search, expected) in [("100%25", "RH-2"), ("fix_all", "RH-2"), ("1000", "RH-3")] {
            let uri = format!("/api/patch/v3/export/advisories?search={search}");
            for app in [&apps.cached, &apps.live] {
                let (status, json) = app.export(&uri, JSON).await;
                assert_eq!(status, 200);
                let rows: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
                let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
                assert_eq!(ids, vec![expected], "search={search}");
            }
        }
    });
}

#[test]
fn systems_export_is_scoped_and_tagged() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };

        let (status, json) = apps
            .cached
            .export("/api/patch/v3/export/systems?tags=ns1/k1=val1", JSON)
            .await;
        assert_eq!(status, 200);
        let rows: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["display_name"], "sys1");
        assert_eq!(rows[0]["tags"], serde_json::json!(["ns1/k1=val1"]));
    });
}

#[test]
fn reevaluation_trigger_feeds_metrics() {
    run_test(async {
        let Some(apps) = seeded_apps().await else {
            return;
        };
        let app = &apps.cached;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/reevaluate/{REEVAL_KEY}"))
            .body(Body::empty())
            .unwrap();
        let response = app.request(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["sent"], 8);

        // Batches of three, ordered by account.
        {
            let batches = app.sink.batches.lock().unwrap();
            let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
            assert_eq!(sizes, vec![3, 3, 2]);
            assert_eq!(batches[2].last().unwrap().rh_account_id, 2);
        }

        assert!(app.metrics().await.contains("reeval_messages_sent_total 8"));
    });
}
