//! Recording fakes of the platform seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stowaway_core::{CacheEntry, CacheStore, EntryMeta, Error, MemoryStore, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use url::Url;

use crate::fetch::Network;
use crate::notification::NotificationDescriptor;
use crate::platform::{Analytics, AnalyticsEvent, ClientInfo, Clients, Notifier};

#[derive(Default)]
struct NetworkState {
    routes: HashMap<String, (u16, String)>,
    failing: Vec<String>,
    oversized: Vec<String>,
    offline: bool,
    delay: Option<Duration>,
    calls: Vec<Request>,
}

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeNetwork {
    state: StdMutex<NetworkState>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.state.lock().unwrap().routes.insert(url.to_string(), (status, body.to_string()));
    }

    /// Transport failure for one URL.
    pub fn fail(&self, url: &str) {
        self.state.lock().unwrap().failing.push(url.to_string());
    }

    /// The server answers `url`, but the body is over the size limit.
    pub fn oversize(&self, url: &str) {
        self.state.lock().unwrap().oversized.push(url.to_string());
    }

    pub fn heal(&self, url: &str) {
        self.state.lock().unwrap().failing.retain(|u| u != url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Request> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.url.to_string()).collect()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|r| r.url.as_str() == url).count()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, Error> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(request.clone());
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        let url = request.url.as_str();
        if state.offline || state.failing.iter().any(|u| u == url) {
            return Err(Error::Transport(format!("offline: {url}")));
        }
        if state.oversized.iter().any(|u| u == url) {
            return Err(Error::ResponseTooLarge(format!("{url}: body over limit")));
        }

        let (status, body) = state
            .routes
            .get(url)
            .cloned()
            .unwrap_or((404, "not found".to_string()));
        Ok(Response::new(status, request.url.clone(), body))
    }
}

#[derive(Default)]
struct ClientsState {
    clients: Vec<ClientInfo>,
    calls: Vec<String>,
    messages: Vec<(String, Value)>,
    opened: usize,
}

/// Window list with a call log.
#[derive(Default)]
pub struct FakeClients {
    state: Mutex<ClientsState>,
}

impl FakeClients {
    pub fn with(clients: Vec<ClientInfo>) -> Self {
        Self { state: Mutex::new(ClientsState { clients, ..Default::default() }) }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn messages(&self) -> Vec<(String, Value)> {
        self.state.lock().await.messages.clone()
    }
}

#[async_trait]
impl Clients for FakeClients {
    async fn list(&self) -> Result<Vec<ClientInfo>, Error> {
        Ok(self.state.lock().await.clients.clone())
    }

    async fn focus(&self, id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("focus {id}"));
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::Client(format!("no client {id}")))?;
        client.focused = true;
        Ok(())
    }

    async fn navigate(&self, id: &str, url: &Url) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("navigate {id} {url}"));
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::Client(format!("no client {id}")))?;
        client.url = url.clone();
        Ok(())
    }

    async fn open(&self, url: &Url) -> Result<Option<ClientInfo>, Error> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("open {url}"));
        state.opened += 1;
        let client =
            ClientInfo { id: format!("opened-{}", state.opened), url: url.clone(), can_navigate: true, focused: true };
        state.clients.push(client.clone());
        Ok(Some(client))
    }

    async fn post_message(&self, id: &str, message: &Value) -> Result<(), Error> {
        self.state.lock().await.messages.push((id.to_string(), message.clone()));
        Ok(())
    }

    async fn claim(&self) -> Result<Vec<ClientInfo>, Error> {
        let mut state = self.state.lock().await;
        state.calls.push("claim".to_string());
        Ok(state.clients.clone())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    shown: Mutex<Vec<NotificationDescriptor>>,
    fail: bool,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub async fn shown(&self) -> Vec<NotificationDescriptor> {
        self.shown.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn show(&self, notification: &NotificationDescriptor) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Notification("permission denied".into()));
        }
        self.shown.lock().await.push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
    fail: bool,
}

impl FakeAnalytics {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Analytics for FakeAnalytics {
    async fn record(&self, event: &AnalyticsEvent) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Transport("analytics endpoint unreachable".into()));
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// [`MemoryStore`] whose reads or writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    listings: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `entries` calls, i.e. eviction passes.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn open_namespace(&self, name: &str) -> Result<(), Error> {
        self.inner.open_namespace(name).await
    }

    async fn namespaces(&self) -> Result<Vec<String>, Error> {
        self.inner.namespaces().await
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, Error> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::CorruptEntry(format!("{namespace}/{key}: unreadable")));
        }
        self.inner.get(namespace, key).await
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::CorruptEntry("quota exceeded".into()));
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, Error> {
        self.inner.delete(namespace, key).await
    }

    async fn entries(&self, namespace: &str) -> Result<Vec<EntryMeta>, Error> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.inner.entries(namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, Error> {
        self.inner.delete_namespace(name).await
    }
}

/// Local HTTP server that reads each request in full, answers every one
/// with `response` verbatim, and closes the connection.
///
/// Returns the base URL and a counter of requests received.
pub async fn serve_raw(response: Vec<u8>) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let response = Arc::new(response);

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            let response = response.clone();
            tokio::spawn(async move {
                if read_request(&mut stream).await.is_none() {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (base, hits)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return Some(buf);
            }
        }
    }
}

/// Raw HTTP/1.1 response with an explicit `Content-Length`.
pub fn raw_response(status_line: &str, declared_len: usize, body: &[u8]) -> Vec<u8> {
    let mut out =
        format!("HTTP/1.1 {status_line}\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n").into_bytes();
    out.extend_from_slice(body);
    out
}
