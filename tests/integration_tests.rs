//! HTTP 接口集成测试
//!
//! 用内存中的工作进程连接驱动管理器，直接对路由发请求，不打开端口。

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower::ServiceExt;
use vprox::api::{create_routes, with_middleware, AppState};
use vprox::config::AlertConfig;
use vprox::error::{SendError, SupervisorError};
use vprox::monitoring::MonitoringSystem;
use vprox::supervisor::{WorkerEvent, WorkerLauncher, WorkerLink, WorkerSupervisor};
use vprox::utils::now_ms;
use vprox_core::{
    MasterMessage, MinerRecord, PoolDescriptor, PoolState, WorkerId, WorkerMessage, WorkerSnapshot,
};

/// 记录收到的消息
struct RecordingLink {
    id: WorkerId,
    sent: Mutex<Vec<MasterMessage>>,
}

impl WorkerLink for RecordingLink {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn send(&self, message: &MasterMessage) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn terminate(&self) {}
}

struct RecordingLauncher {
    next_pid: AtomicU32,
    links: Mutex<Vec<Arc<RecordingLink>>>,
}

#[async_trait]
impl WorkerLauncher for RecordingLauncher {
    async fn launch(
        &self,
        _events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Arc<dyn WorkerLink>, SupervisorError> {
        let link = Arc::new(RecordingLink {
            id: WorkerId(self.next_pid.fetch_add(100, Ordering::SeqCst)),
            sent: Mutex::new(Vec::new()),
        });
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

struct Harness {
    app: Router,
    launcher: Arc<RecordingLauncher>,
    supervisor: Arc<WorkerSupervisor>,
}

fn miner(id: &str, submitted: u64, accepted: u64, rejected: u64) -> MinerRecord {
    let mut record = MinerRecord::new(id, format!("10.0.0.{}", id));
    record.worker_name = Some(format!("wallet.rig{}", id));
    record.submitted = submitted;
    record.accepted = accepted;
    record.rejected = rejected;
    record.submit_latency_ms_sum = 40.0 * submitted as f64;
    record.submit_latency_count = submitted;
    record.last_seen_at = Some(now_ms());
    record
}

fn snapshot(miners: Vec<MinerRecord>, pool_index: usize) -> WorkerSnapshot {
    let pools = vec![
        PoolDescriptor::new("primary", "na.example.com", 3956),
        PoolDescriptor::new("backup", "eu.example.com", 3956),
    ];
    WorkerSnapshot {
        total: miners.len() as u64,
        active: miners,
        pool_state: PoolState::select(pools, pool_index),
        updated_at: Some(now_ms()),
    }
}

async fn harness() -> Harness {
    harness_with_web_root(std::env::temp_dir().join("vprox-missing-web-root")).await
}

/// 两个工作进程：100 号 5 个矿工 (1000/900/100)，200 号 3 个矿工 (500/450/50)
async fn harness_with_web_root(web_root: PathBuf) -> Harness {
    let monitoring = Arc::new(MonitoringSystem::new(AlertConfig::default()));
    let launcher = Arc::new(RecordingLauncher {
        next_pid: AtomicU32::new(100),
        links: Mutex::new(Vec::new()),
    });
    let supervisor = Arc::new(WorkerSupervisor::new(
        launcher.clone(),
        2,
        monitoring.snapshots(),
    ));
    supervisor.start().await.unwrap();

    let first = (1..=5)
        .map(|n| miner(&n.to_string(), 200, 180, 20))
        .collect();
    let second = vec![
        miner("1", 200, 190, 10),
        miner("6", 150, 150, 0),
        miner("7", 150, 110, 40),
    ];

    for (pid, snapshot) in [(100, snapshot(first, 0)), (200, snapshot(second, 0))] {
        supervisor
            .handle_event(WorkerEvent::Message {
                worker: WorkerId(pid),
                message: WorkerMessage::StatsUpdate { snapshot },
            })
            .await;
    }

    let app = create_routes(AppState {
        monitoring,
        supervisor: supervisor.clone(),
        web_root,
    });

    Harness {
        app,
        launcher,
        supervisor,
    }
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Method::GET, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_status_totals_across_workers() {
    let harness = harness().await;
    let (status, body) = get_json(&harness.app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "vprox");
    assert_eq!(body["threads"], 2);
    assert_eq!(body["totals"]["miners"], 8);
    assert_eq!(body["totals"]["submitted"], 1500);
    assert_eq!(body["totals"]["accepted"], 1350);
    assert_eq!(body["totals"]["rejected"], 150);
    assert_eq!(body["totals"]["avgSubmitLatencyMs"], 40);
    assert_eq!(body["totals"]["miningWorkers"], 7);
    assert_eq!(body["poolState"]["activePool"]["name"], "primary");

    let workers = body["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0]["workerId"], 100);
    assert_eq!(workers[0]["miners"], 5);
    assert_eq!(workers[1]["workerId"], 200);
    assert_eq!(workers[1]["submitted"], 500);
}

#[tokio::test]
async fn test_status_requests_fresh_stats() {
    let harness = harness().await;
    get_json(&harness.app, "/status").await;

    let links = harness.launcher.links.lock().unwrap();
    assert_eq!(links.len(), 2);
    for link in links.iter() {
        assert!(link.sent.lock().unwrap().contains(&MasterMessage::StatsRequest));
    }
}

#[tokio::test]
async fn test_metrics_agree_with_status() {
    let harness = harness().await;
    let (status, body) = send(&harness.app, Method::GET, "/metrics").await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("vprox_up 1\n"));
    assert!(text.contains("vprox_miners_total 8\n"));
    assert!(text.contains("vprox_shares_submitted_total 1500\n"));
    assert!(text.contains("vprox_shares_accepted_total 1350\n"));
    assert!(text.contains("vprox_shares_rejected_total 150\n"));
    assert!(text.contains("vprox_worker_miners_total{worker_id=\"100\"} 5\n"));
    assert!(text.contains("# TYPE vprox_miner_shares_submitted_total counter\n"));
    assert!(text.ends_with('\n'));
}

#[tokio::test]
async fn test_miners_paging_and_search() {
    let harness = harness().await;

    let (status, body) = get_json(&harness.app, "/miners?sortBy=submitted&order=asc&limit=3&page=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 8);
    assert_eq!(body["pages"], 3);
    assert_eq!(body["page"], 2);
    assert_eq!(body["sortBy"], "submitted");
    assert_eq!(body["order"], "asc");
    assert_eq!(body["miners"].as_array().unwrap().len(), 3);

    let (_, body) = get_json(&harness.app, "/miners?worker=200").await;
    assert_eq!(body["total"], 3);

    let (_, body) = get_json(&harness.app, "/miners?q=rig7").await;
    let miners = body["miners"].as_array().unwrap();
    assert_eq!(miners.len(), 1);
    assert_eq!(miners[0]["minerKey"], "200:7");
}

#[tokio::test]
async fn test_miner_lookup() {
    let harness = harness().await;

    let (status, body) = get_json(&harness.app, "/miners/200:1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["miner"]["minerKey"], "200:1");
    assert_eq!(body["miner"]["submitted"], 200);

    let (status, body) = get_json(&harness.app, "/miners/6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["miner"]["workerId"], 200);

    let (status, body) = get_json(&harness.app, "/miners/1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "ambiguous_miner_id");
    assert_eq!(body["matches"].as_array().unwrap().len(), 2);

    let (status, body) = get_json(&harness.app, "/miners/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "miner_not_found");
}

#[tokio::test]
async fn test_alerts_report_high_reject_miner() {
    let harness = harness().await;
    let (status, body) = get_json(&harness.app, "/alerts").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 1);
    let alerts = body["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["id"], "high_reject:200:7");
    assert_eq!(alerts[0]["type"], "high_reject");
    assert_eq!(alerts[0]["level"], "warn");
    assert_eq!(alerts[0]["minerKey"], "200:7");
}

#[tokio::test]
async fn test_failover_alert_follows_pool_state() {
    let harness = harness().await;
    let backup = snapshot(vec![miner("1", 10, 10, 0)], 1);
    let primary = snapshot(vec![miner("1", 10, 10, 0)], 0);

    // 100 号是表中第一个，它的矿池状态生效
    harness
        .supervisor
        .handle_event(WorkerEvent::Message {
            worker: WorkerId(100),
            message: WorkerMessage::StatsUpdate { snapshot: backup },
        })
        .await;
    let (_, body) = get_json(&harness.app, "/alerts").await;
    let failover = body["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|alert| alert["id"] == "pool_failover")
        .cloned()
        .unwrap();
    assert_eq!(failover["active"], true);
    assert_eq!(failover["message"], "Failover active: running on backup");

    harness
        .supervisor
        .handle_event(WorkerEvent::Message {
            worker: WorkerId(100),
            message: WorkerMessage::StatsUpdate { snapshot: primary },
        })
        .await;
    let (_, body) = get_json(&harness.app, "/alerts?all=1").await;
    let failover = body["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|alert| alert["id"] == "pool_failover")
        .cloned()
        .unwrap();
    assert_eq!(failover["active"], false);
    assert!(failover["resolvedAt"].is_i64());
}

#[tokio::test]
async fn test_pool_switch_is_broadcast() {
    let harness = harness().await;
    let (status, body) = send(&harness.app, Method::POST, "/pool/switch?name=backup&index=x").await;
    let body: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["requested"]["name"], "backup");
    assert_eq!(body["requested"]["reason"], "manual-ui");
    assert!(body["requested"].get("index").map_or(true, Value::is_null));

    let links = harness.launcher.links.lock().unwrap();
    for link in links.iter() {
        let sent = link.sent.lock().unwrap();
        assert!(sent.iter().any(|message| matches!(
            message,
            MasterMessage::PoolSwitch { target } if target.name.as_deref() == Some("backup")
        )));
    }
}

#[tokio::test]
async fn test_exited_worker_leaves_totals() {
    let harness = harness().await;
    harness
        .supervisor
        .handle_event(WorkerEvent::Exited {
            worker: WorkerId(200),
            code: Some(1),
        })
        .await;

    let (_, body) = get_json(&harness.app, "/status").await;
    assert_eq!(body["totals"]["miners"], 5);
    assert_eq!(body["totals"]["submitted"], 1000);

    // 补齐的新进程还没有上报
    assert_eq!(harness.supervisor.worker_ids().await.len(), 2);
    assert_eq!(body["workers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_redirect_and_not_found() {
    let harness = harness().await;

    let (status, body) = send(&harness.app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/ui/");

    let (status, body) = get_json(&harness.app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = get_json(&harness.app, "/ui/index.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_empty_alias_falls_through() {
    let harness = harness().await;

    let (status, body) = get_json(&harness.app, "/miners?sort=&sortBy=submitted&order=&dir=asc&limit=&pageSize=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sortBy"], "submitted");
    assert_eq!(body["order"], "asc");
    assert_eq!(body["limit"], 5);
    assert_eq!(body["pages"], 2);

    let miners = body["miners"].as_array().unwrap();
    assert_eq!(miners.len(), 5);
    let submitted: Vec<u64> = miners.iter().map(|m| m["submitted"].as_u64().unwrap()).collect();
    assert_eq!(submitted, vec![150, 150, 200, 200, 200]);

    // 空的 worker 参数不做过滤
    let (_, body) = get_json(&harness.app, "/miners?worker=").await;
    assert_eq!(body["total"], 8);
}

#[tokio::test]
async fn test_undecodable_miner_id_is_json_not_found() {
    let harness = harness().await;

    let (status, body) = get_json(&harness.app, "/miners/%FF").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "miner_not_found");
}

#[tokio::test]
async fn test_pretty_output_is_indented() {
    let harness = harness().await;

    let (_, compact) = send(&harness.app, Method::GET, "/status").await;
    let compact = String::from_utf8(compact).unwrap();
    assert!(compact.starts_with("{\"name\":\"vprox\""));

    let (status, pretty) = send(&harness.app, Method::GET, "/status?pretty=1").await;
    let pretty = String::from_utf8(pretty).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(pretty.starts_with("{\n  \"name\": \"vprox\""));

    let parsed: Value = serde_json::from_str(&pretty).unwrap();
    assert_eq!(parsed["totals"]["accepted"], 1350);
}

async fn explode() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let app = with_middleware(Router::new().route("/explode", get(explode)));

    let (status, body) = get_json(&app, "/explode").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");

    // 之后的请求不受影响
    let harness = harness().await;
    let (status, _) = send(&harness.app, Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_ui_files_served_without_caching() {
    let web_root = std::env::temp_dir().join(format!("vprox-web-root-{}", std::process::id()));
    std::fs::create_dir_all(&web_root).unwrap();
    std::fs::write(web_root.join("index.html"), "<h1>vprox</h1>").unwrap();

    let harness = harness_with_web_root(web_root.clone()).await;

    for uri in ["/ui/index.html", "/ui/"] {
        let response = harness
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"<h1>vprox</h1>");
    }

    let (status, body) = get_json(&harness.app, "/ui/../Cargo.toml").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let _ = std::fs::remove_dir_all(&web_root);
}
