#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Snapshot returned in a `PING` response.
///
/// The fixed fields come from the server itself; `extra` holds whatever the
/// installed [`StatisticsProvider`] reports (CPU, memory, threads...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatistics {
    pub client_count: usize,
    pub total_messages: u64,
    pub uptime_ms: u64,
    pub store_size: usize,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Host metrics source plugged into the server.
#[cfg_attr(test, automock)]
pub trait StatisticsProvider: Send + Sync + 'static {
    fn collect(&self) -> Map<String, Value>;
}

/// Reports what the standard library can observe without platform probes.
#[derive(Debug, Default, Clone)]
pub struct ProcessStatistics;

impl StatisticsProvider for ProcessStatistics {
    fn collect(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        map.insert("availableProcessors".into(), Value::from(processors));
        map.insert("processId".into(), Value::from(std::process::id()));
        map
    }
}
