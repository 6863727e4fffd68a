use anyhow::{anyhow, Result};
use bollard::container::{ListContainersOptions, Stats as DockerStats, StatsOptions};
use bollard::Docker;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::utils::now_iso_local;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(30);
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);
const TEST_QUERY: &str = "Performance test query";
const SERVICE_CONTAINERS: [&str; 3] = ["rag", "ollama", "chroma"];

#[derive(Debug, Clone, Serialize)]
pub struct MemoryMetrics {
    pub total_kb: u64,
    pub available_kb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory: MemoryMetrics,
    pub load_average_1m: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointTiming {
    pub success: bool,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiPerformance {
    pub health_endpoint: EndpointTiming,
    pub chat_endpoint: EndpointTiming,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerMetrics {
    pub cpu_percent: f64,
    pub memory_usage_mb: f64,
    pub memory_limit_mb: f64,
    pub memory_percent: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContainerSample {
    Metrics(ContainerMetrics),
    Error { error: String },
}

/// Raw counters from one non-streaming stats read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerCounters {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system: u64,
    pub presystem: u64,
    pub cpus: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

impl ContainerCounters {
    pub fn from_stats(stats: &DockerStats) -> Result<Self> {
        let cpu = &stats.cpu_stats;
        let cpus = cpu
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|per_cpu| per_cpu.len() as u64)
            .filter(|count| *count > 0)
            .or(cpu.online_cpus)
            .ok_or_else(|| anyhow!("missing cpu count"))?;
        Ok(ContainerCounters {
            cpu_total: cpu.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system: cpu.system_cpu_usage.ok_or_else(|| anyhow!("missing system_cpu_usage"))?,
            presystem: stats
                .precpu_stats
                .system_cpu_usage
                .ok_or_else(|| anyhow!("missing previous system_cpu_usage"))?,
            cpus,
            memory_usage: stats.memory_stats.usage.ok_or_else(|| anyhow!("missing memory usage"))?,
            memory_limit: stats.memory_stats.limit.ok_or_else(|| anyhow!("missing memory limit"))?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub timestamp: String,
    pub system: Option<SystemMetrics>,
    pub docker_containers: BTreeMap<String, ContainerSample>,
    pub api_performance: ApiPerformance,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub average_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub average_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringPeriod {
    pub start_time: String,
    pub end_time: String,
    pub total_samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemPerformance {
    pub cpu: Stats,
    pub memory: Stats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiPerformanceReport {
    pub health_endpoint: TimingStats,
    pub chat_endpoint: ChatStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerPerformance {
    pub cpu: Stats,
    pub memory: Stats,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub monitoring_period: MonitoringPeriod,
    pub system_performance: SystemPerformance,
    pub api_performance: ApiPerformanceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_performance: Option<BTreeMap<String, ContainerPerformance>>,
}

pub struct PerformanceMonitor {
    client: reqwest::Client,
    docker: Option<Docker>,
    base_url: String,
    samples: Vec<Sample>,
}

impl PerformanceMonitor {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow!("HTTP client: {}", e))?;
        let docker = match Docker::connect_with_local_defaults() {
            Ok(docker) => Some(docker),
            Err(e) => {
                warn!(error = %e, "Docker client unavailable");
                None
            }
        };
        Ok(PerformanceMonitor {
            client,
            docker,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            samples: Vec::new(),
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Samples every `interval` until `duration` elapses or Ctrl-C arrives.
    pub async fn run(&mut self, interval: Duration, duration: Duration) {
        info!(
            interval_s = interval.as_secs(),
            duration_min = duration.as_secs() / 60,
            "Starting RAG performance monitor"
        );
        let deadline = Instant::now() + duration;
        let stop = tokio::signal::ctrl_c();
        tokio::pin!(stop);

        while Instant::now() < deadline {
            let sample = tokio::select! {
                sample = self.collect_metrics() => sample,
                _ = &mut stop => {
                    info!("Monitoring stopped by user");
                    return;
                }
            };
            log_sample(&sample);
            self.samples.push(sample);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut stop => {
                    info!("Monitoring stopped by user");
                    return;
                }
            }
        }
    }

    pub async fn collect_metrics(&self) -> Sample {
        let timestamp = now_iso_local();
        let system = match system_metrics().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                error!(error = %e, "Error getting system metrics");
                None
            }
        };
        let docker_containers = self.docker_metrics().await;

        let health_endpoint = self
            .time_request(self.client.get(format!("{}/health", self.base_url)).timeout(HEALTH_TIMEOUT))
            .await;
        let chat_endpoint = self
            .time_request(
                self.client
                    .post(format!("{}/api/v1/chat", self.base_url))
                    .timeout(CHAT_TIMEOUT)
                    .json(&json!({"query": TEST_QUERY, "conversation_id": null, "context": null})),
            )
            .await;

        Sample {
            timestamp,
            system,
            docker_containers,
            api_performance: ApiPerformance {
                health_endpoint,
                chat_endpoint,
            },
        }
    }

    /// Stats for running rag/ollama/chroma containers; empty without a reachable daemon.
    async fn docker_metrics(&self) -> BTreeMap<String, ContainerSample> {
        let mut metrics = BTreeMap::new();
        let Some(docker) = &self.docker else {
            return metrics;
        };
        let containers = match docker
            .list_containers(Some(ListContainersOptions::<String>::default()))
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                debug!(error = %e, "Skipping container stats");
                return metrics;
            }
        };

        for summary in containers {
            let Some(name) = summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string())
            else {
                continue;
            };
            if !is_service_container(&name) {
                continue;
            }
            let status = summary.state.clone().unwrap_or_default();
            let entry = match container_counters(docker, &name)
                .await
                .and_then(|counters| container_metrics(&counters, &status))
            {
                Ok(container) => ContainerSample::Metrics(container),
                Err(e) => {
                    error!(container = %name, error = %e, "Error getting container stats");
                    ContainerSample::Error { error: e.to_string() }
                }
            };
            metrics.insert(name, entry);
        }
        metrics
    }

    async fn time_request(&self, request: reqwest::RequestBuilder) -> EndpointTiming {
        let started = Instant::now();
        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                response.bytes().await.map(|body| (status, body.len()))
            }
            Err(e) => Err(e),
        };
        let response_time_ms = round2(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok((status, size)) => EndpointTiming {
                success: status == reqwest::StatusCode::OK,
                response_time_ms,
                status_code: Some(status.as_u16()),
                response_size: Some(size),
                error: None,
            },
            Err(e) => EndpointTiming {
                success: false,
                response_time_ms,
                status_code: None,
                response_size: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Writes `{report, raw_metrics}` as pretty JSON and returns the path used.
    pub fn save_results(&self, output: Option<PathBuf>) -> Result<PathBuf> {
        let path = output.unwrap_or_else(default_output_path);
        let report = match generate_report(&self.samples) {
            Some(report) => serde_json::to_value(report)?,
            None => json!({"error": "No metrics collected"}),
        };
        let results = json!({
            "report": report,
            "raw_metrics": self.samples,
        });
        write_json(&path, &serde_json::to_string_pretty(&results)?)?;
        info!(path = %path.display(), "Performance results saved");
        Ok(path)
    }
}

async fn container_counters(docker: &Docker, name: &str) -> Result<ContainerCounters> {
    let options = StatsOptions {
        stream: false,
        one_shot: false,
    };
    let mut stream = Box::pin(docker.stats(name, Some(options)));
    let stats = stream
        .next()
        .await
        .ok_or_else(|| anyhow!("no stats returned"))??;
    ContainerCounters::from_stats(&stats)
}

pub fn is_service_container(name: &str) -> bool {
    let name = name.to_lowercase();
    SERVICE_CONTAINERS.iter().any(|part| name.contains(part))
}

/// CPU share scaled by core count, memory as a share of the container limit.
pub fn container_metrics(counters: &ContainerCounters, status: &str) -> Result<ContainerMetrics> {
    let cpu_delta = counters.cpu_total as f64 - counters.precpu_total as f64;
    let system_delta = counters.system as f64 - counters.presystem as f64;
    if system_delta == 0.0 {
        return Err(anyhow!("system CPU delta is zero"));
    }
    if counters.memory_limit == 0 {
        return Err(anyhow!("memory limit is zero"));
    }
    let usage = counters.memory_usage as f64;
    let limit = counters.memory_limit as f64;
    Ok(ContainerMetrics {
        cpu_percent: round2(cpu_delta / system_delta * counters.cpus as f64 * 100.0),
        memory_usage_mb: round2(usage / 1024.0 / 1024.0),
        memory_limit_mb: round2(limit / 1024.0 / 1024.0),
        memory_percent: round2(usage / limit * 100.0),
        status: status.to_string(),
    })
}

fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("rag_performance_monitor_{}.json", stamp))
}

fn write_json(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| anyhow!("Write {}: {}", path.display(), e))
}

fn log_sample(sample: &Sample) {
    let (cpu, ram) = sample
        .system
        .as_ref()
        .map(|s| (s.cpu_percent, s.memory.percent))
        .unwrap_or_default();
    info!(
        "CPU: {:.1}% | RAM: {:.1}% | Health: {}ms | Chat: {}ms",
        cpu,
        ram,
        sample.api_performance.health_endpoint.response_time_ms,
        sample.api_performance.chat_endpoint.response_time_ms
    );
    if !sample.api_performance.chat_endpoint.success {
        warn!(
            error = sample.api_performance.chat_endpoint.error.as_deref().unwrap_or("non-200 status"),
            "Chat endpoint check failed"
        );
    }
}

pub fn generate_report(samples: &[Sample]) -> Option<Report> {
    let first = samples.first()?;
    let last = samples.last()?;

    let cpu: Vec<f64> = samples
        .iter()
        .map(|s| s.system.as_ref().map(|m| m.cpu_percent).unwrap_or(0.0))
        .collect();
    let memory: Vec<f64> = samples
        .iter()
        .map(|s| s.system.as_ref().map(|m| m.memory.percent).unwrap_or(0.0))
        .collect();
    let health: Vec<f64> = samples
        .iter()
        .map(|s| s.api_performance.health_endpoint.response_time_ms)
        .collect();
    let chat_ok: Vec<f64> = samples
        .iter()
        .map(|s| &s.api_performance.chat_endpoint)
        .filter(|timing| timing.success)
        .map(|timing| timing.response_time_ms)
        .collect();

    let health_stats = stats(&health);
    let chat_stats = stats(&chat_ok);
    Some(Report {
        monitoring_period: MonitoringPeriod {
            start_time: first.timestamp.clone(),
            end_time: last.timestamp.clone(),
            total_samples: samples.len(),
        },
        system_performance: SystemPerformance {
            cpu: stats(&cpu),
            memory: stats(&memory),
        },
        api_performance: ApiPerformanceReport {
            health_endpoint: TimingStats {
                average_ms: health_stats.average,
                max_ms: health_stats.max,
                min_ms: health_stats.min,
            },
            chat_endpoint: ChatStats {
                average_ms: chat_stats.average,
                max_ms: chat_stats.max,
                min_ms: chat_stats.min,
                success_rate: round2(chat_ok.len() as f64 / samples.len() as f64 * 100.0),
            },
        },
        container_performance: container_report(samples),
    })
}

fn container_report(samples: &[Sample]) -> Option<BTreeMap<String, ContainerPerformance>> {
    let mut series: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for sample in samples {
        for (name, entry) in &sample.docker_containers {
            if let ContainerSample::Metrics(container) = entry {
                let (cpu, memory) = series.entry(name.clone()).or_default();
                cpu.push(container.cpu_percent);
                memory.push(container.memory_percent);
            }
        }
    }
    if series.is_empty() {
        return None;
    }
    Some(
        series
            .into_iter()
            .map(|(name, (cpu, memory))| {
                (
                    name,
                    ContainerPerformance {
                        cpu: stats(&cpu),
                        memory: stats(&memory),
                    },
                )
            })
            .collect(),
    )
}

/// All zeros for an empty slice.
fn stats(values: &[f64]) -> Stats {
    if values.is_empty() {
        return Stats {
            average: 0.0,
            max: 0.0,
            min: 0.0,
        };
    }
    Stats {
        average: round2(values.iter().sum::<f64>() / values.len() as f64),
        max: values.iter().copied().fold(f64::MIN, f64::max),
        min: values.iter().copied().fold(f64::MAX, f64::min),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn system_metrics() -> Result<SystemMetrics> {
    let before = parse_cpu_times(&tokio::fs::read_to_string("/proc/stat").await?)
        .ok_or_else(|| anyhow!("No cpu line in /proc/stat"))?;
    tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
    let after = parse_cpu_times(&tokio::fs::read_to_string("/proc/stat").await?)
        .ok_or_else(|| anyhow!("No cpu line in /proc/stat"))?;

    let memory = parse_meminfo(&tokio::fs::read_to_string("/proc/meminfo").await?)
        .ok_or_else(|| anyhow!("MemTotal/MemAvailable missing from /proc/meminfo"))?;
    let load_average_1m = tokio::fs::read_to_string("/proc/loadavg")
        .await
        .ok()
        .and_then(|raw| parse_loadavg(&raw));

    Ok(SystemMetrics {
        cpu_percent: cpu_percent(before, after),
        memory,
        load_average_1m,
    })
}

/// `(idle, total)` jiffies from the aggregate `cpu` line.
pub fn parse_cpu_times(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    // guest time is already counted in user/nice
    let total = values.iter().take(8).sum();
    Some((idle, total))
}

pub fn cpu_percent(before: (u64, u64), after: (u64, u64)) -> f64 {
    let idle = after.0.saturating_sub(before.0) as f64;
    let total = after.1.saturating_sub(before.1) as f64;
    if total == 0.0 {
        return 0.0;
    }
    round2((1.0 - idle / total) * 100.0)
}

pub fn parse_meminfo(meminfo: &str) -> Option<MemoryMetrics> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total_kb = field("MemTotal:")?;
    let available_kb = field("MemAvailable:")?;
    if total_kb == 0 {
        return None;
    }
    Some(MemoryMetrics {
        total_kb,
        available_kb,
        percent: round2(total_kb.saturating_sub(available_kb) as f64 / total_kb as f64 * 100.0),
    })
}

pub fn parse_loadavg(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(success: bool, ms: f64) -> EndpointTiming {
        EndpointTiming {
            success,
            response_time_ms: ms,
            status_code: Some(if success { 200 } else { 500 }),
            response_size: Some(10),
            error: None,
        }
    }

    fn sample(ts: &str, cpu: f64, health_ms: f64, chat: EndpointTiming) -> Sample {
        Sample {
            timestamp: ts.to_string(),
            system: Some(SystemMetrics {
                cpu_percent: cpu,
                memory: MemoryMetrics {
                    total_kb: 100,
                    available_kb: 40,
                    percent: 60.0,
                },
                load_average_1m: Some(0.5),
            }),
            docker_containers: BTreeMap::new(),
            api_performance: ApiPerformance {
                health_endpoint: timing(true, health_ms),
                chat_endpoint: chat,
            },
        }
    }

    #[test]
    fn cpu_line_is_parsed() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        assert_eq!(parse_cpu_times(stat), Some((850, 1000)));
        assert_eq!(cpu_percent((850, 1000), (900, 1100)), 50.0);
        assert_eq!(cpu_percent((1, 1), (1, 1)), 0.0);
        assert_eq!(parse_cpu_times("intr 1 2 3"), None);
    }

    #[test]
    fn meminfo_percent_uses_available() {
        let meminfo = "MemTotal:       16000 kB\nMemFree:         1000 kB\nMemAvailable:    4000 kB\n";
        let memory = parse_meminfo(meminfo).unwrap();
        assert_eq!(memory.total_kb, 16000);
        assert_eq!(memory.available_kb, 4000);
        assert_eq!(memory.percent, 75.0);
        assert!(parse_meminfo("MemTotal: 1 kB\n").is_none());
    }

    #[test]
    fn loadavg_first_field() {
        assert_eq!(parse_loadavg("0.42 0.30 0.21 1/123 4567\n"), Some(0.42));
        assert_eq!(parse_loadavg(""), None);
    }

    #[test]
    fn report_uses_only_successful_chats() {
        let samples = vec![
            sample("t1", 10.0, 5.0, timing(true, 1000.0)),
            sample("t2", 30.0, 7.0, timing(false, 50.0)),
            sample("t3", 20.0, 6.0, timing(true, 2000.0)),
            sample("t4", 40.0, 6.0, timing(true, 3000.0)),
        ];
        let report = generate_report(&samples).unwrap();

        assert_eq!(report.monitoring_period.start_time, "t1");
        assert_eq!(report.monitoring_period.end_time, "t4");
        assert_eq!(report.monitoring_period.total_samples, 4);
        assert_eq!(report.system_performance.cpu.average, 25.0);
        assert_eq!(report.system_performance.cpu.max, 40.0);
        assert_eq!(report.system_performance.cpu.min, 10.0);
        assert_eq!(report.api_performance.health_endpoint.average_ms, 6.0);
        assert_eq!(report.api_performance.chat_endpoint.average_ms, 2000.0);
        assert_eq!(report.api_performance.chat_endpoint.min_ms, 1000.0);
        assert_eq!(report.api_performance.chat_endpoint.success_rate, 75.0);
    }

    #[test]
    fn report_with_no_successful_chat_is_zeroed() {
        let report = generate_report(&[sample("t1", 1.0, 1.0, timing(false, 9.0))]).unwrap();
        assert_eq!(report.api_performance.chat_endpoint.max_ms, 0.0);
        assert_eq!(report.api_performance.chat_endpoint.success_rate, 0.0);
    }

    #[test]
    fn empty_run_has_no_report() {
        assert!(generate_report(&[]).is_none());
    }

    fn container(cpu: f64, memory: f64) -> ContainerSample {
        ContainerSample::Metrics(ContainerMetrics {
            cpu_percent: cpu,
            memory_usage_mb: 100.0,
            memory_limit_mb: 1000.0,
            memory_percent: memory,
            status: "running".to_string(),
        })
    }

    #[test]
    fn container_cpu_uses_deltas_and_core_count() {
        let counters = ContainerCounters {
            cpu_total: 300,
            precpu_total: 100,
            system: 2_000,
            presystem: 1_000,
            cpus: 4,
            memory_usage: 256 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
        };
        let metrics = container_metrics(&counters, "running").unwrap();
        assert_eq!(metrics.cpu_percent, 80.0);
        assert_eq!(metrics.memory_usage_mb, 256.0);
        assert_eq!(metrics.memory_limit_mb, 1024.0);
        assert_eq!(metrics.memory_percent, 25.0);
        assert_eq!(metrics.status, "running");

        let idle_host = ContainerCounters { presystem: 2_000, ..counters };
        assert!(container_metrics(&idle_host, "running").is_err());
    }

    #[test]
    fn only_service_containers_are_watched() {
        assert!(is_service_container("thea-RAG-chatbot"));
        assert!(is_service_container("ollama"));
        assert!(is_service_container("chromadb_1"));
        assert!(!is_service_container("postgres"));
    }

    #[test]
    fn report_aggregates_containers_and_skips_errors() {
        let mut first = sample("t1", 10.0, 5.0, timing(true, 100.0));
        first.docker_containers.insert("ollama".to_string(), container(50.0, 20.0));
        first.docker_containers.insert(
            "rag-chatbot".to_string(),
            ContainerSample::Error {
                error: "no stats returned".to_string(),
            },
        );
        let mut second = sample("t2", 10.0, 5.0, timing(true, 100.0));
        second.docker_containers.insert("ollama".to_string(), container(10.0, 30.0));

        let report = generate_report(&[first, second]).unwrap();
        let containers = report.container_performance.unwrap();
        assert_eq!(containers.len(), 1);
        let ollama = &containers["ollama"];
        assert_eq!(ollama.cpu.average, 30.0);
        assert_eq!(ollama.cpu.max, 50.0);
        assert_eq!(ollama.cpu.min, 10.0);
        assert_eq!(ollama.memory.average, 25.0);
    }

    #[test]
    fn report_without_containers_omits_section() {
        let report = generate_report(&[sample("t1", 1.0, 1.0, timing(true, 9.0))]).unwrap();
        assert!(report.container_performance.is_none());
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("container_performance").is_none());
    }

    #[test]
    fn container_errors_serialize_flat() {
        let value = serde_json::to_value(ContainerSample::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"error": "boom"}));
        assert_eq!(serde_json::to_value(container(1.0, 2.0)).unwrap()["status"], "running");
    }

    #[tokio::test]
    async fn save_results_writes_report_and_raw_metrics() {
        let mut monitor = PerformanceMonitor::new("http://localhost:8001/").unwrap();
        monitor.samples.push(sample("t1", 12.0, 3.0, timing(true, 100.0)));
        let path = std::env::temp_dir().join(format!("{}.json", uuid::Uuid::new_v4()));

        let written = monitor.save_results(Some(path.clone())).unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(saved["report"]["monitoring_period"]["total_samples"], 1);
        assert_eq!(saved["raw_metrics"][0]["api_performance"]["chat_endpoint"]["status_code"], 200);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn default_output_name() {
        let name = default_output_path().display().to_string();
        assert!(name.starts_with("rag_performance_monitor_"));
        assert!(name.ends_with(".json"));
    }
}
