// Notification dispatcher: fans selected events out to one or more
// chat bots. The enqueue side is synchronous and never blocks, so the
// logging pipeline can hand events over from its drain thread; actual
// sending happens on a tokio task bound to whichever runtime handle
// was last re-pointed at the dispatcher (see rebind_runtime).

pub mod error_codes;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{debug, trace, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use v4vapp_common::config::{NOTIFY_CONNECT_TIMEOUT, NOTIFY_READ_TIMEOUT};
use v4vapp_common::utils::{strip_ansi_codes, truncate_with_ellipsis};

use error_codes::ErrorCodeFilter;

// Messages are identified by their trailing signature for rate limiting
const SIGNATURE_LEN: usize = 20;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MAX: usize = 5;
const MAX_MESSAGE_CHARS: usize = 300;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport asked to retry after {0}s")]
    RetryAfter(u64),
    #[error("Transient transport failure: {0}")]
    Transient(String),
    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait BotTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, text: &str) -> Result<(), TransportError>;
}

// Telegram-shaped HTTP bot transport
pub struct TelegramTransport {
    name: String,
    http: reqwest::Client,
    token: String,
    chat_id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<TelegramParameters>,
}

impl TelegramTransport {
    pub fn new(name: String, token: String, chat_id: i64) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(NOTIFY_CONNECT_TIMEOUT)
            .timeout(NOTIFY_READ_TIMEOUT)
            .build()?;
        Ok(Self {
            name,
            http,
            token,
            chat_id,
        })
    }
}

#[async_trait]
impl BotTransport for TelegramTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if body.ok {
            return Ok(());
        }
        // The transport's explicit retry-after signal is honoured
        if let Some(retry_after) = body.parameters.and_then(|p| p.retry_after) {
            return Err(TransportError::RetryAfter(retry_after));
        }
        let description = body.description.unwrap_or_else(|| status.to_string());
        if status.is_server_error() {
            Err(TransportError::Transient(description))
        } else {
            Err(TransportError::Permanent(description))
        }
    }
}

// One event heading for the bots
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    pub component: String,
    pub message: String,
    pub level: log::Level,
    pub notify: bool,
    pub error_code: Option<String>,
    // Additional bots named by the originating log event
    pub extra_bots: Vec<String>,
}

impl NotifyEvent {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
            level: log::Level::Info,
            notify: true,
            error_code: None,
            extra_bots: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_extra_bots(mut self, bots: Vec<String>) -> Self {
        self.extra_bots = bots;
        self
    }

    // Selection rule: WARNING+ or an explicit notify flag
    pub fn is_publishable(&self) -> bool {
        self.notify || self.level <= log::Level::Warn
    }
}

struct RateWindow {
    hits: VecDeque<Instant>,
    throttling: bool,
}

struct RegisteredBot {
    transport: Arc<dyn BotTransport>,
    // Default bots receive every published message; non-default bots
    // only messages that name them in extra_bots
    default: bool,
}

struct NotifierInner {
    transports: StdMutex<Vec<RegisteredBot>>,
    silenced: StdMutex<HashSet<String>>,
    windows: StdMutex<HashMap<String, RateWindow>>,
    error_filter: StdMutex<Option<Arc<ErrorCodeFilter>>>,
}

pub struct Notifier {
    tx: UnboundedSender<NotifyEvent>,
    rx: Arc<TokioMutex<UnboundedReceiver<NotifyEvent>>>,
    drain: StdMutex<Option<JoinHandle<()>>>,
    inner: Arc<NotifierInner>,
}

lazy_static! {
    static ref NOTIFIER: Notifier = Notifier::new();
}

impl Notifier {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx: Arc::new(TokioMutex::new(rx)),
            drain: StdMutex::new(None),
            inner: Arc::new(NotifierInner {
                transports: StdMutex::new(Vec::new()),
                silenced: StdMutex::new(HashSet::new()),
                windows: StdMutex::new(HashMap::new()),
                error_filter: StdMutex::new(None),
            }),
        }
    }

    // Process-wide dispatcher instance
    pub fn global() -> &'static Notifier {
        &NOTIFIER
    }

    pub fn add_transport(&self, transport: Arc<dyn BotTransport>, default: bool) {
        self.inner
            .transports
            .lock()
            .unwrap()
            .push(RegisteredBot { transport, default });
    }

    pub fn set_silenced(&self, components: impl IntoIterator<Item = String>) {
        let mut silenced = self.inner.silenced.lock().unwrap();
        silenced.clear();
        silenced.extend(components);
    }

    pub fn set_error_filter(&self, filter: Arc<ErrorCodeFilter>) {
        *self.inner.error_filter.lock().unwrap() = Some(filter);
    }

    // Enqueue an event. Synchronous and non-blocking: safe to call from
    // the logging drain thread even before any runtime exists.
    pub fn publish(&self, event: NotifyEvent) {
        if !event.is_publishable() {
            return;
        }
        if self.tx.send(event).is_err() {
            trace!("Notifier queue closed, dropping event");
        }
    }

    // Every main entry point must call this immediately after its task
    // runtime starts. Dispatch runs on whichever runtime was bound
    // last; without a bound runtime events only accumulate.
    pub fn rebind_runtime(&self, handle: &Handle) {
        let mut drain = self.drain.lock().unwrap();
        if let Some(task) = drain.take() {
            task.abort();
        }
        let rx = Arc::clone(&self.rx);
        let inner = Arc::clone(&self.inner);
        *drain = Some(handle.spawn(async move {
            let mut rx = rx.lock().await;
            while let Some(event) = rx.recv().await {
                process_event(&inner, event).await;
            }
        }));
        debug!("Notification dispatcher bound to runtime");
    }

    pub fn is_bound(&self) -> bool {
        self.drain
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

async fn process_event(inner: &Arc<NotifierInner>, event: NotifyEvent) {
    if inner.silenced.lock().unwrap().contains(&event.component) {
        trace!("Component {} silenced, dropping message", event.component);
        return;
    }

    if let Some(code) = &event.error_code {
        let filter = inner.error_filter.lock().unwrap().clone();
        if let Some(filter) = filter {
            if !filter.should_alert(code, &event.message) {
                return;
            }
        }
    }

    let text = truncate_with_ellipsis(&strip_ansi_codes(&event.message), MAX_MESSAGE_CHARS);

    match check_rate_limit(inner, &text) {
        RateDecision::Send => {}
        RateDecision::Throttle => {
            let notice = format!("Throttling repeated messages like: {}", text);
            fan_out(inner, &event, notice).await;
            return;
        }
        RateDecision::Drop => return,
    }

    fan_out(inner, &event, text).await;
}

enum RateDecision {
    Send,
    // First drop in a burst gets one throttling notice
    Throttle,
    Drop,
}

fn signature(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(SIGNATURE_LEN);
    chars[start..].iter().collect()
}

fn check_rate_limit(inner: &Arc<NotifierInner>, text: &str) -> RateDecision {
    let mut windows = inner.windows.lock().unwrap();
    let window = windows.entry(signature(text)).or_insert_with(|| RateWindow {
        hits: VecDeque::new(),
        throttling: false,
    });

    let now = Instant::now();
    while let Some(front) = window.hits.front() {
        if now.duration_since(*front) > RATE_LIMIT_WINDOW {
            window.hits.pop_front();
        } else {
            break;
        }
    }

    if window.hits.len() >= RATE_LIMIT_MAX {
        if window.throttling {
            return RateDecision::Drop;
        }
        window.throttling = true;
        return RateDecision::Throttle;
    }

    window.throttling = false;
    window.hits.push_back(now);
    RateDecision::Send
}

async fn fan_out(inner: &Arc<NotifierInner>, event: &NotifyEvent, text: String) {
    let transports: Vec<Arc<dyn BotTransport>> = {
        let registered = inner.transports.lock().unwrap();
        registered
            .iter()
            .filter(|bot| {
                bot.default || event.extra_bots.iter().any(|name| name == bot.transport.name())
            })
            .map(|bot| Arc::clone(&bot.transport))
            .collect()
    };

    for transport in transports {
        let text = text.clone();
        tokio::spawn(async move {
            send_with_retry(transport.as_ref(), &text).await;
        });
    }
}

async fn send_with_retry(transport: &dyn BotTransport, text: &str) {
    let mut delay = RETRY_BASE_DELAY;
    for attempt in 1..=RETRY_ATTEMPTS {
        match transport.send(text).await {
            Ok(()) => return,
            Err(TransportError::Permanent(e)) => {
                warn!("Bot {} rejected message: {}", transport.name(), e);
                return;
            }
            Err(TransportError::RetryAfter(secs)) if attempt < RETRY_ATTEMPTS => {
                sleep(Duration::from_secs(secs)).await;
            }
            Err(TransportError::Transient(e)) if attempt < RETRY_ATTEMPTS => {
                debug!("Bot {} transient failure ({}), retrying", transport.name(), e);
                sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!(
                    "Bot {} unreachable after {} attempts: {}",
                    transport.name(),
                    RETRY_ATTEMPTS,
                    e
                );
                return;
            }
        }
    }
}

// Convenience wrapper used by components that want the explicit
// notify flag regardless of level
pub fn notify(component: &str, message: impl Into<String>) {
    Notifier::global().publish(NotifyEvent::new(component, message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingTransport {
        name: String,
        sent: Arc<StdMutex<Vec<String>>>,
        failures_before_success: AtomicUsize,
    }

    #[async_trait]
    impl BotTransport for RecordingTransport {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, text: &str) -> Result<(), TransportError> {
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Transient("flaky".into()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn fresh_inner() -> Arc<NotifierInner> {
        Arc::new(NotifierInner {
            transports: StdMutex::new(Vec::new()),
            silenced: StdMutex::new(HashSet::new()),
            windows: StdMutex::new(HashMap::new()),
            error_filter: StdMutex::new(None),
        })
    }

    #[test]
    fn selection_rule_matches_severity_or_flag() {
        let mut event = NotifyEvent::new("engine", "hello");
        event.notify = false;
        event.level = log::Level::Info;
        assert!(!event.is_publishable());
        event.level = log::Level::Warn;
        assert!(event.is_publishable());
        event.level = log::Level::Info;
        event.notify = true;
        assert!(event.is_publishable());
    }

    #[test]
    fn rate_limit_throttles_after_five() {
        let inner = fresh_inner();
        let message = "LN payment failed for alice";
        for _ in 0..RATE_LIMIT_MAX {
            assert!(matches!(check_rate_limit(&inner, message), RateDecision::Send));
        }
        assert!(matches!(
            check_rate_limit(&inner, message),
            RateDecision::Throttle
        ));
        assert!(matches!(check_rate_limit(&inner, message), RateDecision::Drop));
        // different signature is unaffected
        assert!(matches!(
            check_rate_limit(&inner, "a completely different tail"),
            RateDecision::Send
        ));
    }

    #[test]
    fn signatures_use_the_trailing_window() {
        assert_eq!(signature("short"), "short");
        let long = format!("{}{}", "x".repeat(100), "abcdefghijklmnopqrst");
        assert_eq!(signature(&long), "abcdefghijklmnopqrst");
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            name: "test".into(),
            sent: sent.clone(),
            failures_before_success: AtomicUsize::new(2),
        };
        send_with_retry(&transport, "eventually delivered").await;
        assert_eq!(sent.lock().unwrap().as_slice(), ["eventually delivered"]);
    }

    #[tokio::test]
    async fn runtime_rebinding_is_load_bearing() {
        // Events published before any runtime is bound must neither
        // block nor get lost; rebinding starts delivery.
        let notifier = Notifier::new();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        notifier.add_transport(
            Arc::new(RecordingTransport {
                name: "test".into(),
                sent: sent.clone(),
                failures_before_success: AtomicUsize::new(0),
            }),
            true,
        );

        notifier.publish(NotifyEvent::new("startup", "sentinel self-test"));
        assert!(!notifier.is_bound());
        assert!(sent.lock().unwrap().is_empty());

        notifier.rebind_runtime(&Handle::current());
        assert!(notifier.is_bound());
        for _ in 0..50 {
            if !sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent.lock().unwrap().as_slice(), ["sentinel self-test"]);
    }

    #[tokio::test]
    async fn silenced_components_are_dropped() {
        let inner = fresh_inner();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        inner.transports.lock().unwrap().push(RegisteredBot {
            transport: Arc::new(RecordingTransport {
                name: "test".into(),
                sent: sent.clone(),
                failures_before_success: AtomicUsize::new(0),
            }),
            default: true,
        });
        inner
            .silenced
            .lock()
            .unwrap()
            .insert("noisy_component".to_string());

        process_event(&inner, NotifyEvent::new("noisy_component", "ignored")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.lock().unwrap().is_empty());
    }
}
