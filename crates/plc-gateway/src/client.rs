use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use edge_types::{EdgeEvent, RetryBackoff};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::cache::{GatewayCache, TagEntry, TagValue};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(8);
const STREAM_BACKOFF_BASE: Duration = Duration::from_secs(1);
const STREAM_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Poll,
    Sse,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub poll_rate: Duration,
    pub enabled: bool,
    pub mode: GatewayMode,
}

impl GatewayConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tag read error: {0}")]
    Read(#[from] crate::cache::ReadError),
    #[error("gateway stream ended")]
    StreamEnded,
}

#[derive(Debug, Deserialize)]
struct PlcListResponse {
    plcs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireTag {
    value: serde_json::Value,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagBundleResponse {
    tags: HashMap<String, WireTag>,
}

/// One entry from `discoverTags`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredTag {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    tags: Vec<DiscoveredTag>,
}

/// One entry from `fetchAllTags`.
#[derive(Debug, Clone, Deserialize)]
pub struct FullTag {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub enabled: bool,
    pub published: bool,
}

#[derive(Debug, Deserialize)]
struct FetchAllResponse {
    tags: Vec<FullTag>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum StreamEvent {
    ValueChange {
        plc: String,
        tag: String,
        value: serde_json::Value,
        #[serde(rename = "type")]
        type_name: String,
    },
    StatusChange {
        plc: String,
        connected: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Health {
        plc: String,
        healthy: bool,
        #[serde(default)]
        detail: Option<String>,
    },
}

fn coerce_tag_value(raw: &serde_json::Value) -> Option<TagValue> {
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(TagValue::Int(i))
            } else {
                n.as_f64().map(TagValue::Float)
            }
        }
        serde_json::Value::Bool(b) => Some(TagValue::Bool(*b)),
        serde_json::Value::String(s) => Some(TagValue::Text(s.clone())),
        _ => None,
    }
}

pub struct GatewayClient {
    config: RwLock<GatewayConfig>,
    http: reqwest::Client,
    cache: Arc<GatewayCache>,
    events: mpsc::UnboundedSender<EdgeEvent>,
    gateway_connected: AtomicBool,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, events: mpsc::UnboundedSender<EdgeEvent>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .expect("reqwest client builder with static config cannot fail");
        Self {
            config: RwLock::new(config),
            http,
            cache: Arc::new(GatewayCache::new()),
            events,
            gateway_connected: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> Arc<GatewayCache> {
        self.cache.clone()
    }

    fn config_snapshot(&self) -> GatewayConfig {
        self.config.read().expect("gateway config lock poisoned").clone()
    }

    /// Hot-reload the warlink section. Caller is responsible for stopping
    /// and restarting the run loop around this, per `spec.md` §6.
    pub fn reconfigure(&self, config: GatewayConfig) {
        *self.config.write().expect("gateway config lock poisoned") = config;
    }

    fn emit(&self, event: EdgeEvent) {
        if self.events.send(event).is_err() {
            debug!("gateway event receiver dropped, discarding event");
        }
    }

    fn set_gateway_connected(&self, connected: bool) {
        let was = self.gateway_connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            if connected {
                self.emit(EdgeEvent::GatewayConnected { at: chrono::Utc::now() });
            } else {
                self.emit(EdgeEvent::GatewayDisconnected { at: chrono::Utc::now() });
            }
        }
    }

    pub fn is_gateway_connected(&self) -> bool {
        self.gateway_connected.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, plc: &str) -> bool {
        self.cache.is_connected(plc)
    }

    pub fn read_tag(&self, plc: &str, tag: &str) -> Result<TagValue, crate::cache::ReadError> {
        self.cache.read_tag(plc, tag)
    }

    pub async fn discover_tags(&self, plc: &str) -> Result<Vec<DiscoveredTag>, GatewayError> {
        let url = format!("{}/plcs/{}/tags/discover", self.config_snapshot().base_url(), plc);
        let resp: DiscoverResponse = self.http.get(url).send().await?.json().await?;
        Ok(resp.tags)
    }

    pub async fn fetch_all_tags(&self, plc: &str) -> Result<Vec<FullTag>, GatewayError> {
        let url = format!("{}/plcs/{}/tags/all", self.config_snapshot().base_url(), plc);
        let resp: FetchAllResponse = self.http.get(url).send().await?.json().await?;
        Ok(resp.tags)
    }

    pub async fn enable_tag_publishing(&self, plc: &str, tag: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/plcs/{}/tags/{}/enable",
            self.config_snapshot().base_url(),
            plc,
            tag
        );
        self.http.post(url).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn disable_tag_publishing(&self, plc: &str, tag: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/plcs/{}/tags/{}/disable",
            self.config_snapshot().base_url(),
            plc,
            tag
        );
        self.http.post(url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Run the gateway client until `shutdown` fires. Dispatches to the
    /// poll or stream loop per the configured mode.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mode = self.config_snapshot().mode;
        match mode {
            GatewayMode::Poll => self.run_poll_loop(shutdown).await,
            GatewayMode::Sse => self.run_stream_loop(shutdown).await,
        }
        self.stop();
    }

    /// Mark every tracked PLC and the gateway itself disconnected. Called
    /// both from shutdown and on fatal stream loop exit.
    pub fn stop(&self) {
        for plc in self.cache.disconnect_all() {
            self.emit(EdgeEvent::PlcDisconnected { plc, at: chrono::Utc::now() });
        }
        self.set_gateway_connected(false);
    }

    async fn run_poll_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.poll_tick().await;
            let poll_rate = self.config_snapshot().poll_rate;
            tokio::select! {
                _ = tokio::time::sleep(poll_rate) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn poll_tick(&self) {
        let base = self.config_snapshot().base_url();
        let plcs = match self
            .http
            .get(format!("{base}/plcs"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json::<PlcListResponse>().await {
                Ok(list) => list.plcs,
                Err(e) => {
                    warn!(error = %e, "gateway plc list decode failed");
                    self.set_gateway_connected(false);
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "gateway plc list fetch failed");
                self.set_gateway_connected(false);
                return;
            }
        };
        self.set_gateway_connected(true);

        for plc in plcs {
            let url = format!("{base}/plcs/{plc}/tags");
            match self.http.get(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => match resp.json::<TagBundleResponse>().await {
                    Ok(bundle) => {
                        let tags = bundle
                            .tags
                            .into_iter()
                            .filter_map(|(name, wire)| {
                                if let Some(err) = wire.error {
                                    Some((
                                        name,
                                        TagEntry {
                                            value: TagValue::Text(String::new()),
                                            type_name: wire.type_name,
                                            error: Some(err),
                                        },
                                    ))
                                } else {
                                    coerce_tag_value(&wire.value).map(|v| {
                                        (
                                            name,
                                            TagEntry {
                                                value: v,
                                                type_name: wire.type_name,
                                                error: None,
                                            },
                                        )
                                    })
                                }
                            })
                            .collect();
                        self.cache.replace_tags(&plc, tags);
                        if self.cache.set_connected(&plc, true, None) {
                            self.emit(EdgeEvent::PlcConnected { plc: plc.clone(), at: chrono::Utc::now() });
                        }
                    }
                    Err(e) => {
                        warn!(plc, error = %e, "tag bundle decode failed");
                        if self.cache.set_connected(&plc, false, Some(e.to_string())) {
                            self.emit(EdgeEvent::PlcDisconnected { plc: plc.clone(), at: chrono::Utc::now() });
                        }
                    }
                },
                Err(e) => {
                    if self.cache.set_connected(&plc, false, Some(e.to_string())) {
                        self.emit(EdgeEvent::PlcDisconnected { plc: plc.clone(), at: chrono::Utc::now() });
                    }
                }
            }
        }
    }

    async fn run_stream_loop(&self, mut shutdown: watch::Receiver<bool>) {
        // Bootstrap with one poll tick so readers see values before the
        // first stream event arrives.
        self.poll_tick().await;

        let backoff = RetryBackoff::new(STREAM_BACKOFF_BASE, STREAM_BACKOFF_CAP);
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.stream_once(&mut shutdown).await {
                Ok(()) => {
                    // Clean shutdown requested mid-stream.
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "gateway stream disconnected, reconnecting");
                    for plc in self.cache.disconnect_all() {
                        self.emit(EdgeEvent::PlcDisconnected { plc, at: chrono::Utc::now() });
                    }
                    self.set_gateway_connected(false);

                    let delay = backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Open one SSE connection and apply events until it errors or
    /// `shutdown` fires (returns `Ok(())` only for a clean shutdown).
    async fn stream_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), GatewayError> {
        let url = format!("{}/stream", self.config_snapshot().base_url());
        let resp = self.http.get(url).send().await?.error_for_status()?;
        self.set_gateway_connected(true);

        let mut byte_stream = resp.bytes_stream();
        loop {
            tokio::select! {
                chunk = byte_stream.next() => {
                    let Some(chunk) = chunk else {
                        return Err(GatewayError::StreamEnded);
                    };
                    let bytes = chunk?;
                    for line in bytes.split(|b| *b == b'\n') {
                        let Some(data) = line.strip_prefix(b"data: ") else { continue };
                        match serde_json::from_slice::<StreamEvent>(data) {
                            Ok(event) => self.apply_stream_event(event),
                            Err(e) => debug!(error = %e, "unparseable stream event, skipping"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn apply_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::ValueChange { plc, tag, value, type_name } => {
                if let Some(v) = coerce_tag_value(&value) {
                    // Merge, don't replace: a value-change event only carries one tag.
                    let mut tags = self.cache.plc_tags(&plc);
                    tags.insert(tag, TagEntry { value: v, type_name, error: None });
                    self.cache.replace_tags(&plc, tags);
                }
            }
            StreamEvent::StatusChange { plc, connected, error } => {
                if self.cache.set_connected(&plc, connected, error) {
                    let ev = if connected {
                        EdgeEvent::PlcConnected { plc, at: chrono::Utc::now() }
                    } else {
                        EdgeEvent::PlcDisconnected { plc, at: chrono::Utc::now() }
                    };
                    self.emit(ev);
                }
            }
            StreamEvent::Health { plc, healthy, detail } => {
                let ev = if healthy {
                    EdgeEvent::PlcHealthRecover { plc, at: chrono::Utc::now() }
                } else {
                    EdgeEvent::PlcHealthAlert {
                        plc,
                        detail: detail.unwrap_or_default(),
                        at: chrono::Utc::now(),
                    }
                };
                self.emit(ev);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_tag_value_accepts_int_and_float_rejects_other() {
        assert!(matches!(
            coerce_tag_value(&serde_json::json!(5)),
            Some(TagValue::Int(5))
        ));
        assert!(matches!(
            coerce_tag_value(&serde_json::json!(5.5)),
            Some(TagValue::Float(_))
        ));
        assert!(coerce_tag_value(&serde_json::json!([1, 2])).is_none());
    }
}
