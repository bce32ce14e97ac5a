// tests/pipeline_e2e.rs
// One pipeline pass over a crawled-style JSON payload, checked stage by stage.

use flood_pipeline::pipeline::{ListQuery, ListView, COLLECTION_ALERTS, COLLECTION_REPORTS, COLLECTION_REQUESTS};
use flood_pipeline::relevance::{default_rules, FeedDrop, FeedVerdict};
use flood_pipeline::{run_pipeline, Report, ReportKind};

const PAYLOAD: &str = r#"[
  {"id":"1","title":"Lũ quét tại Mù Cang Chải, 3 người mất tích","type":"ALERT","source":"https://vnexpress.net/thoi-su","trust_score":0.92,
   "lat":21.85,"lon":104.08,"created_at":"2024-09-10T03:00:00Z","description":"Lực lượng cứu hộ đang tiếp cận hiện trường","media":["https://img.example/1.jpg"]},
  {"id":"2","title":"Lũ quét tại Mù Cang Chải, 3 người mất tích","type":"ALERT","source":"https://tuoitre.vn","trust_score":0.80,
   "lat":21.85,"lon":104.08,"created_at":"2024-09-10T03:05:00Z"},
  {"id":"3","title":"Flash flood in Mu Cang Chai","type":"ALERT","source":"https://vnexpress.net/en/news","trust_score":0.95,
   "lat":21.85,"lon":104.08,"created_at":"2024-09-10T03:10:00Z","description":"Three people missing after flash flood hits the district"},
  {"id":"4","title":"Va chạm giữa xe khách và xe máy trên quốc lộ 6","type":"OTHER","source":"https://baogiaothong.vn","trust_score":0.9,
   "lat":20.8,"lon":105.3,"created_at":"2024-09-10T04:00:00Z"},
  {"id":"5","title":"Cần thuyền cứu hộ cho 20 hộ dân bị cô lập","type":"SOS","source":"crowd","trust_score":1.7,
   "lat":21.03,"lon":105.85,"created_at":"2024-09-10T05:00:00Z"},
  {"id":"6","title":"Điểm tiếp nhận hàng cứu trợ","type":"FOOD_DRIVE","source":"crowd","trust_score":-3,
   "created_at":"2024-09-10T06:00:00Z"}
]"#;

fn reports() -> Vec<Report> {
    serde_json::from_str(PAYLOAD).expect("payload parses")
}

#[test]
fn ingestion_clamps_trust_and_defaults_unknown_kind() {
    let r = reports();
    assert_eq!(r[4].trust_score, 1.0);
    assert_eq!(r[5].trust_score, 0.0);
    assert_eq!(r[5].kind, ReportKind::Other);
}

#[test]
fn full_pass_counts_and_collections() {
    let out = run_pipeline(&reports(), default_rules());
    assert_eq!(out.stats.original_count, 6);
    assert_eq!(out.stats.duplicates_removed, 1);
    assert_eq!(out.stats.noise_dropped, 1);

    let ids: Vec<&str> = out.reports.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "5", "6"]);

    assert_eq!(out.collections[COLLECTION_ALERTS].len(), 2);
    assert_eq!(out.collections[COLLECTION_REQUESTS].len(), 1);
    assert!(out.collections[COLLECTION_REPORTS].is_empty(), "6 has no coordinates");
}

#[test]
fn english_edition_never_reaches_feed_or_pin() {
    let rules = default_rules();
    let out = run_pipeline(&reports(), rules);
    let english = out.reports.iter().find(|r| r.id == "3").unwrap();
    assert_eq!(rules.feed_verdict(english), FeedVerdict::Drop(FeedDrop::ForeignLocale));

    let feed: Vec<&str> = out.feed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(feed, vec!["1"]);
    // 3 has the highest trust but a foreign locale; 5 is SOS with trust 1.0
    assert_eq!(out.pinned.as_ref().map(|r| r.id.as_str()), Some("5"));
}

#[test]
fn radius_list_excludes_reports_without_coordinates() {
    let out = run_pipeline(&reports(), default_rules());
    let view = out.list(&ListQuery {
        origin: Some((21.0285, 105.8542)),
        radius_km: Some(1_000.0),
        feed_only: false,
    });
    let ListView::Ranked(ranked) = view else {
        panic!("origin given, expected ranked view");
    };
    let ids: Vec<&str> = ranked.iter().map(|r| r.report.id.as_str()).collect();
    assert_eq!(ids, vec!["5", "1", "3"]);
    assert!(ranked[0].distance_km < 1.0);
}

#[test]
fn rerun_is_deterministic() {
    let a = run_pipeline(&reports(), default_rules());
    let b = run_pipeline(&reports(), default_rules());
    assert_eq!(a.reports, b.reports);
    assert_eq!(a.feed, b.feed);
    assert_eq!(a.pinned, b.pinned);
}
