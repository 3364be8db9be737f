//! Test doubles shared across the Postern crates.
//!
//! Everything here is deterministic: a hand-driven clock, an in-memory
//! key-value store, and a scripted transport that answers by path match so
//! tests never touch the network.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use indexmap::IndexMap;
use postern_core::{Clock, Error, KeyValueStore, Result, TransportErrorKind};
use postern_transport::{HttpTransport, PreparedRequest, TransportResponse};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;

/// Install a fmt subscriber for test debugging; safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Clock driven by the test.
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Start the clock at an arbitrary fixed epoch.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    /// Start the clock at a specific instant.
    pub fn starting_at(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Advance the clock.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    values: AsyncMutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a stored value as UTF-8 for assertions.
    pub async fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .await
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}

struct StubResponse {
    result: Result<TransportResponse>,
    delay: Option<Duration>,
}

struct Stub {
    fragment: String,
    queue: VecDeque<StubResponse>,
    sticky: Option<StubResponse>,
}

/// Transport answering from scripted stubs matched by path fragment.
///
/// Stubs are matched in registration order; the first whose fragment is
/// contained in the request path answers. Queued responses pop in order,
/// after which the sticky response (if any) repeats.
#[derive(Default)]
pub struct MockTransport {
    stubs: Mutex<Vec<Stub>>,
    calls: Mutex<Vec<PreparedRequest>>,
}

impl MockTransport {
    /// Create a transport with no stubs; unmatched requests fail.
    pub fn new() -> Self {
        Self::default()
    }

    fn stub_entry<'a>(stubs: &'a mut Vec<Stub>, fragment: &str) -> &'a mut Stub {
        if let Some(index) = stubs.iter().position(|s| s.fragment == fragment) {
            &mut stubs[index]
        } else {
            stubs.push(Stub {
                fragment: fragment.to_string(),
                queue: VecDeque::new(),
                sticky: None,
            });
            stubs.last_mut().unwrap()
        }
    }

    /// Always answer paths containing `fragment` with `result`.
    pub fn stub(&self, fragment: &str, result: Result<TransportResponse>) {
        let mut stubs = self.stubs.lock().unwrap();
        Self::stub_entry(&mut stubs, fragment).sticky = Some(StubResponse {
            result,
            delay: None,
        });
    }

    /// Like [`MockTransport::stub`], delaying each answer to widen race
    /// windows in coalescing tests.
    pub fn stub_delayed(&self, fragment: &str, result: Result<TransportResponse>, delay: Duration) {
        let mut stubs = self.stubs.lock().unwrap();
        Self::stub_entry(&mut stubs, fragment).sticky = Some(StubResponse {
            result,
            delay: Some(delay),
        });
    }

    /// Queue one answer for paths containing `fragment`; queued answers
    /// take precedence over the sticky one.
    pub fn push(&self, fragment: &str, result: Result<TransportResponse>) {
        let mut stubs = self.stubs.lock().unwrap();
        Self::stub_entry(&mut stubs, fragment)
            .queue
            .push_back(StubResponse {
                result,
                delay: None,
            });
    }

    /// Every request the transport has seen.
    pub fn calls(&self) -> Vec<PreparedRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// How many requests hit paths containing `fragment`.
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.path.contains(fragment))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: &PreparedRequest) -> Result<TransportResponse> {
        self.calls.lock().unwrap().push(request.clone());

        let answer = {
            let mut stubs = self.stubs.lock().unwrap();
            let stub = stubs
                .iter_mut()
                .find(|stub| request.path.contains(&stub.fragment));
            match stub {
                Some(stub) => {
                    if let Some(queued) = stub.queue.pop_front() {
                        Some(queued)
                    } else {
                        stub.sticky.as_ref().map(|s| StubResponse {
                            result: s.result.clone(),
                            delay: s.delay,
                        })
                    }
                }
                None => None,
            }
        };

        let Some(answer) = answer else {
            return Err(Error::transport(
                format!("no stub for path {}", request.path),
                TransportErrorKind::Other,
            ));
        };
        if let Some(delay) = answer.delay {
            tokio::time::sleep(delay).await;
        }
        answer.result
    }
}

/// Build a JSON response with the given status.
pub fn json_response(status: u16, body: serde_json::Value) -> TransportResponse {
    TransportResponse {
        status,
        headers: IndexMap::new(),
        body: body.to_string().into_bytes(),
    }
}

/// Build a 200 response with the given JSON body.
pub fn ok_json(body: serde_json::Value) -> TransportResponse {
    json_response(200, body)
}

/// Build a structured error response in the service's wire shape.
pub fn error_response(status: u16, code: &str, message: &str) -> TransportResponse {
    json_response(
        status,
        serde_json::json!({
            "errors": [{"code": code, "message": message}],
            "trace_id": "test-trace",
        }),
    )
}

/// Unsigned JWT whose payload carries the given `exp` claim.
pub fn test_jwt(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}
