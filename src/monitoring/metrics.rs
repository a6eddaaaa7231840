use crate::monitoring::aggregator::{AggregateSnapshot, MinerView};
use crate::utils::finite_or_zero;
use std::fmt::Write;

/// Prometheus 文本格式的 Content-Type
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// 计数器 - 只增不减的累积值
    Counter,
    /// 仪表 - 可增可减的瞬时值
    Gauge,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// 标签值转义：`\` -> `\\`，换行 -> `\n`，`"` -> `\"`
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '"' => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 按顺序拼接的 Prometheus 文本
#[derive(Debug, Default)]
pub struct PrometheusWriter {
    out: String,
}

impl PrometheusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指标族头部，即使没有样本也输出
    pub fn family(&mut self, name: &str, metric_type: MetricType, help: &str) -> &mut Self {
        let _ = writeln!(self.out, "# HELP {} {}", name, help);
        let _ = writeln!(self.out, "# TYPE {} {}", name, metric_type.as_str());
        self
    }

    pub fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: f64) -> &mut Self {
        self.out.push_str(name);
        if !labels.is_empty() {
            self.out.push('{');
            for (i, (key, label)) in labels.iter().enumerate() {
                if i > 0 {
                    self.out.push(',');
                }
                let _ = write!(self.out, "{}=\"{}\"", key, escape_label_value(label));
            }
            self.out.push('}');
        }
        let _ = writeln!(self.out, " {}", finite_or_zero(value));
        self
    }

    /// 只有一个无标签样本的指标族
    pub fn single(&mut self, name: &str, metric_type: MetricType, help: &str, value: f64) -> &mut Self {
        self.family(name, metric_type, help).sample(name, &[], value)
    }

    pub fn finish(self) -> String {
        self.out
    }
}

struct MinerFamily {
    name: &'static str,
    metric_type: MetricType,
    help: &'static str,
    value: fn(&MinerView) -> f64,
}

fn miner_submitted(m: &MinerView) -> f64 {
    m.record.submitted as f64
}

fn miner_accepted(m: &MinerView) -> f64 {
    m.record.accepted as f64
}

fn miner_rejected(m: &MinerView) -> f64 {
    m.record.rejected as f64
}

fn miner_latency(m: &MinerView) -> f64 {
    m.record.avg_latency_ms()
}

const MINER_FAMILIES: [MinerFamily; 4] = [
    MinerFamily {
        name: "vprox_miner_shares_submitted_total",
        metric_type: MetricType::Counter,
        help: "Submitted shares per miner.",
        value: miner_submitted,
    },
    MinerFamily {
        name: "vprox_miner_shares_accepted_total",
        metric_type: MetricType::Counter,
        help: "Accepted shares per miner.",
        value: miner_accepted,
    },
    MinerFamily {
        name: "vprox_miner_shares_rejected_total",
        metric_type: MetricType::Counter,
        help: "Rejected shares per miner.",
        value: miner_rejected,
    },
    MinerFamily {
        name: "vprox_miner_submit_latency_ms_avg",
        metric_type: MetricType::Gauge,
        help: "Average mining.submit response latency (ms) per miner.",
        value: miner_latency,
    },
];

/// 渲染聚合快照为 Prometheus 文本
pub fn render_prometheus(agg: &AggregateSnapshot, uptime_sec: u64) -> String {
    let mut w = PrometheusWriter::new();
    let totals = &agg.totals;

    w.single("vprox_up", MetricType::Gauge, "Whether the proxy is running (always 1).", 1.0);
    w.single(
        "vprox_uptime_seconds",
        MetricType::Gauge,
        "Uptime of the master process in seconds.",
        uptime_sec as f64,
    );
    w.single(
        "vprox_miners_total",
        MetricType::Gauge,
        "Total connected miners (across workers).",
        totals.miners as f64,
    );
    w.single(
        "vprox_shares_submitted_total",
        MetricType::Counter,
        "Total submitted shares (across workers).",
        totals.submitted as f64,
    );
    w.single(
        "vprox_shares_accepted_total",
        MetricType::Counter,
        "Total accepted shares (across workers).",
        totals.accepted as f64,
    );
    w.single(
        "vprox_shares_rejected_total",
        MetricType::Counter,
        "Total rejected shares (across workers).",
        totals.rejected as f64,
    );
    w.single(
        "vprox_mining_workers_total",
        MetricType::Gauge,
        "Unique Stratum worker names observed via mining.authorize.",
        totals.mining_workers as f64,
    );

    w.family(
        "vprox_pool_active_info",
        MetricType::Gauge,
        "Active upstream pool info (value is always 1).",
    );
    if let Some(state) = &agg.pool_state {
        if let Some(pool) = &state.active_pool {
            let port = pool.port.to_string();
            let index = state.active_pool_index.to_string();
            w.sample(
                "vprox_pool_active_info",
                &[
                    ("name", pool.name.as_str()),
                    ("host", pool.host.as_str()),
                    ("port", port.as_str()),
                    ("index", index.as_str()),
                ],
                1.0,
            );
        }
    }

    w.family(
        "vprox_worker_miners_total",
        MetricType::Gauge,
        "Connected miners per worker.",
    );
    for worker in &agg.workers {
        let worker_id = worker.worker_id.to_string();
        w.sample(
            "vprox_worker_miners_total",
            &[("worker_id", worker_id.as_str())],
            worker.miners as f64,
        );
    }

    // 每个指标族的样本放在一起
    let labels: Vec<[(&str, String); 3]> = agg
        .miners
        .iter()
        .map(|m| {
            [
                ("worker_id", m.worker_id.to_string()),
                ("miner_id", m.record.miner_id.clone()),
                ("ip", m.record.ip.clone()),
            ]
        })
        .collect();

    for family in &MINER_FAMILIES {
        w.family(family.name, family.metric_type, family.help);
        for (miner, miner_labels) in agg.miners.iter().zip(&labels) {
            let pairs: Vec<(&str, &str)> =
                miner_labels.iter().map(|(k, v)| (*k, v.as_str())).collect();
            w.sample(family.name, &pairs, (family.value)(miner));
        }
    }

    w.finish()
}
