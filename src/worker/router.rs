//! Request-routing cache engine.
//!
//! Intercepts same-origin GET traffic, classifies each request by route
//! pattern and applies one of three strategies (cache-first, network-first,
//! stale-while-revalidate). When both cache and network fail, a synthesized
//! offline response is served; intercepted routes never surface a network
//! error to the caller.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::cache::{CacheNames, ResponseCache};
use super::fetch::{Fetch, Request, RequestMode, Response};
use super::messages::{ClientEvent, SyncSource, WorkerMessage, WorkerReply};

/// Synthesized page served when nothing else can be.
const OFFLINE_PAGE: &str = r#"<!doctype html>
<html lang="pt-BR">
<head><meta charset="utf-8"><title>Offline</title></head>
<body>
<h1>Você está offline</h1>
<p>Suas tarefas salvas continuam disponíveis. Tente novamente quando a conexão voltar.</p>
</body>
</html>
"#;

/// Router lifecycle. Install must complete before activation; a redundant
/// router stops writing to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Installing,
  Waiting,
  Active,
  Redundant,
}

/// Which strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

/// Static routing configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
  /// Origin whose GET traffic is intercepted.
  pub origin: Url,
  /// Current cache generation names.
  pub names: CacheNames,
  /// App-shell paths pre-cached at install. Extending this list requires a
  /// version bump to force cache regeneration.
  pub shell: Vec<String>,
  /// Path prefixes served network-first.
  pub network_first: Vec<String>,
  /// Path prefixes served cache-first.
  pub cache_first: Vec<String>,
}

impl RouterConfig {
  /// Config with the standard route tables.
  pub fn new(origin: Url, names: CacheNames, shell: Vec<String>) -> Self {
    Self {
      origin,
      names,
      shell,
      network_first: vec![
        "/api/".to_string(),
        "/sync/".to_string(),
        "/analytics/".to_string(),
      ],
      cache_first: vec![
        "/assets/".to_string(),
        "/icons/".to_string(),
        "/images/".to_string(),
        "/sounds/".to_string(),
      ],
    }
  }
}

/// The caching request router.
///
/// Generic over the network transport so strategies can be exercised
/// against simulated failures.
pub struct CacheRouter<F: Fetch + 'static> {
  cache: Arc<ResponseCache>,
  fetcher: Arc<F>,
  config: RouterConfig,
  state: Arc<Mutex<Lifecycle>>,
  skip_waiting: AtomicBool,
  clients: broadcast::Sender<ClientEvent>,
}

impl<F: Fetch + 'static> CacheRouter<F> {
  pub fn new(cache: ResponseCache, fetcher: F, config: RouterConfig) -> Self {
    let (clients, _) = broadcast::channel(16);
    Self {
      cache: Arc::new(cache),
      fetcher: Arc::new(fetcher),
      config,
      state: Arc::new(Mutex::new(Lifecycle::Installing)),
      skip_waiting: AtomicBool::new(false),
      clients,
    }
  }

  /// Current lifecycle state.
  pub fn lifecycle(&self) -> Lifecycle {
    *lock_state(&self.state)
  }

  fn set_state(&self, state: Lifecycle) {
    *lock_state(&self.state) = state;
  }

  /// Subscribe to events broadcast to client contexts.
  pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
    self.clients.subscribe()
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  /// Pre-cache the app shell. All-or-nothing: every shell fetch must
  /// succeed before anything is stored. Signals skip-waiting so the new
  /// version activates without waiting for old instances to close.
  pub async fn install(&self) -> Result<()> {
    self.set_state(Lifecycle::Installing);

    let mut entries = Vec::with_capacity(self.config.shell.len());
    for path in &self.config.shell {
      let request = self.shell_request(path)?;
      let response = self.fetcher.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          path,
          response.status
        ));
      }
      entries.push((request, response));
    }

    let static_gen = self.config.names.static_gen();
    for (request, response) in entries {
      self.cache.put(&static_gen, &request, &response)?;
    }

    debug!("Precached {} shell files", self.config.shell.len());
    self.skip_waiting.store(true, Ordering::SeqCst);
    self.set_state(Lifecycle::Waiting);

    Ok(())
  }

  /// Evict stale cache generations, then claim client contexts.
  ///
  /// Every generation in this app's namespace that is not one of the three
  /// current names is purged outright. Eviction completes before the claim
  /// broadcast, so clients never observe a mixed set of generations.
  pub async fn activate(&self) -> Result<()> {
    if self.lifecycle() == Lifecycle::Installing {
      return Err(eyre!("Cannot activate before install has completed"));
    }

    for generation in self.cache.generation_names()? {
      if self.config.names.is_stale(&generation) {
        debug!("Evicting stale cache generation {}", generation);
        self.cache.delete_generation(&generation)?;
      }
    }

    self.set_state(Lifecycle::Active);
    let _ = self.clients.send(ClientEvent::Claimed);

    Ok(())
  }

  /// Mark this router redundant (a newer version installed). In-flight
  /// background refreshes check this flag instead of being aborted.
  pub fn retire(&self) {
    self.set_state(Lifecycle::Redundant);
  }

  // ==========================================================================
  // Request handling
  // ==========================================================================

  /// Route a request.
  ///
  /// Non-GET and cross-origin requests pass through to the network
  /// untouched (their errors propagate). Intercepted requests always
  /// produce a response, synthesizing offline content when cache and
  /// network are both unavailable.
  pub async fn handle(&self, request: Request) -> Result<Response> {
    if !request.method.is_get() || !request.same_origin_as(&self.config.origin) {
      return self.fetcher.fetch(&request).await;
    }

    let strategy = self.classify(request.path());
    debug!("{} {} via {:?}", request.method.as_str(), request.path(), strategy);

    let response = match strategy {
      Strategy::CacheFirst => self.cache_first(&request).await,
      Strategy::NetworkFirst => self.network_first(&request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&request).await,
    };

    Ok(response)
  }

  /// Classify a path, in priority order: exact shell match, network-first
  /// prefixes, cache-first prefixes, then stale-while-revalidate.
  fn classify(&self, path: &str) -> Strategy {
    if self.config.shell.iter().any(|shell| shell == path) {
      return Strategy::CacheFirst;
    }
    if self
      .config
      .network_first
      .iter()
      .any(|prefix| path.starts_with(prefix))
    {
      return Strategy::NetworkFirst;
    }
    if self
      .config
      .cache_first
      .iter()
      .any(|prefix| path.starts_with(prefix))
    {
      return Strategy::CacheFirst;
    }
    Strategy::StaleWhileRevalidate
  }

  async fn cache_first(&self, request: &Request) -> Response {
    match self.cache.match_any(request) {
      Ok(Some(cached)) => return cached,
      Ok(None) => {}
      Err(e) => warn!("Cache lookup failed for {}: {}", request.url, e),
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(&self.config.names.dynamic_gen(), request, &response);
        }
        response
      }
      Err(e) => {
        debug!("Network unavailable for {}: {}", request.url, e);
        self.offline_fallback(request)
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Response {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(&self.config.names.runtime_gen(), request, &response);
        }
        response
      }
      Err(e) => {
        debug!("Network unavailable for {}: {}", request.url, e);
        match self.cache.match_any(request) {
          Ok(Some(cached)) => cached,
          _ => self.offline_fallback(request),
        }
      }
    }
  }

  /// Serve the cached copy immediately and refresh in the background. The
  /// refresh outcome never affects the already-returned response.
  async fn stale_while_revalidate(&self, request: &Request) -> Response {
    let cached = match self.cache.match_any(request) {
      Ok(cached) => cached,
      Err(e) => {
        warn!("Cache lookup failed for {}: {}", request.url, e);
        None
      }
    };

    if let Some(cached) = cached {
      self.spawn_revalidate(request.clone());
      return cached;
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store(&self.config.names.runtime_gen(), request, &response);
        }
        response
      }
      Err(e) => {
        debug!("Network unavailable for {}: {}", request.url, e);
        self.offline_fallback(request)
      }
    }
  }

  fn spawn_revalidate(&self, request: Request) {
    let fetcher = Arc::clone(&self.fetcher);
    let cache = Arc::clone(&self.cache);
    let state = Arc::clone(&self.state);
    let runtime_gen = self.config.names.runtime_gen();

    tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_ok() => {
          if *lock_state(&state) == Lifecycle::Redundant {
            return;
          }
          if let Err(e) = cache.put(&runtime_gen, &request, &response) {
            warn!("Failed to refresh cache for {}: {}", request.url, e);
          }
        }
        Ok(_) => {}
        Err(e) => debug!("Background refresh failed for {}: {}", request.url, e),
      }
    });
  }

  fn store(&self, generation: &str, request: &Request, response: &Response) {
    if let Err(e) = self.cache.put(generation, request, response) {
      warn!("Failed to cache {}: {}", request.url, e);
    }
  }

  /// Synthesize an offline response: the cached shell document for
  /// navigations, a JSON error for API paths, an offline page otherwise.
  fn offline_fallback(&self, request: &Request) -> Response {
    if request.mode == RequestMode::Navigate {
      let static_gen = self.config.names.static_gen();
      for path in ["/index.html", "/"] {
        if let Ok(shell) = self.shell_request(path) {
          if let Ok(Some(cached)) = self.cache.get(&static_gen, &shell) {
            return cached;
          }
        }
      }
    }

    if request.path().starts_with("/api/") {
      return Response::json(
        503,
        &json!({
          "error": "offline",
          "message": "Você está offline. Tente novamente quando a conexão voltar.",
        }),
      );
    }

    // Status 200 so the client renders the page instead of a raw network
    // error.
    Response::html(200, OFFLINE_PAGE)
  }

  fn shell_request(&self, path: &str) -> Result<Request> {
    let url = self
      .config
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid shell path '{}': {}", path, e))?;
    Ok(Request::get(url))
  }

  // ==========================================================================
  // Messaging
  // ==========================================================================

  /// Handle a control message from a client context.
  pub async fn on_message(&self, message: WorkerMessage) {
    match message {
      WorkerMessage::SkipWaiting => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.lifecycle() == Lifecycle::Waiting {
          if let Err(e) = self.activate().await {
            warn!("Failed to activate on skip-waiting: {}", e);
          }
        }
      }
      WorkerMessage::CacheUrls { urls } => {
        for url in urls {
          self.cache_url(&url).await;
        }
      }
      WorkerMessage::ClearCache => {
        let generations = match self.cache.generation_names() {
          Ok(generations) => generations,
          Err(e) => {
            warn!("Failed to enumerate cache generations: {}", e);
            return;
          }
        };
        for generation in generations {
          if self.config.names.owns(&generation) {
            if let Err(e) = self.cache.delete_generation(&generation) {
              warn!("Failed to clear generation {}: {}", generation, e);
            }
          }
        }
      }
      WorkerMessage::GetCacheSize { reply } => {
        let bytes = self.cache_size();
        let _ = reply.send(WorkerReply::CacheSize { bytes });
      }
    }
  }

  /// Opportunistically fetch one URL into the dynamic generation,
  /// tolerating failure.
  async fn cache_url(&self, raw: &str) {
    let url = match Url::parse(raw).or_else(|_| self.config.origin.join(raw)) {
      Ok(url) => url,
      Err(e) => {
        warn!("Ignoring uncacheable url '{}': {}", raw, e);
        return;
      }
    };

    let request = Request::get(url);
    match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_ok() => {
        self.store(&self.config.names.dynamic_gen(), &request, &response);
      }
      Ok(response) => debug!("Not caching {} (status {})", request.url, response.status),
      Err(e) => debug!("Failed to cache {}: {}", request.url, e),
    }
  }

  /// Total byte size of every cached response body in this app's
  /// namespace.
  pub fn cache_size(&self) -> u64 {
    let generations = match self.cache.generation_names() {
      Ok(generations) => generations,
      Err(e) => {
        warn!("Failed to enumerate cache generations: {}", e);
        return 0;
      }
    };

    generations
      .iter()
      .filter(|generation| self.config.names.owns(generation))
      .map(|generation| self.cache.generation_size(generation).unwrap_or(0))
      .sum()
  }

  // ==========================================================================
  // Background sync
  // ==========================================================================

  /// Run one background sync pass for a tag.
  ///
  /// Items sync independently: one failure does not abort the batch.
  /// Broadcasts the synced count to every client context on completion.
  pub async fn sync_pending(&self, tag: &str, source: &dyn SyncSource) -> usize {
    let mut synced = 0;
    for item in source.pending(tag) {
      match source.sync_item(&item).await {
        Ok(()) => {
          source.mark_synced(&item);
          synced += 1;
        }
        Err(e) => warn!("Failed to sync item {}: {}", item.id, e),
      }
    }

    let _ = self.clients.send(ClientEvent::SyncComplete {
      tag: tag.to_string(),
      synced,
    });

    synced
  }
}

fn lock_state(state: &Mutex<Lifecycle>) -> std::sync::MutexGuard<'_, Lifecycle> {
  match state.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::fetch::Method;
  use crate::worker::messages::{EmptySyncSource, PendingItem};
  use futures::future::BoxFuture;
  use std::collections::HashMap;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  const ORIGIN: &str = "https://app.example";

  struct FetcherState {
    routes: Mutex<HashMap<String, Response>>,
    online: AtomicBool,
    calls: AtomicUsize,
  }

  /// In-memory origin server with an on/off switch.
  #[derive(Clone)]
  struct TestFetcher {
    state: Arc<FetcherState>,
  }

  impl TestFetcher {
    fn new() -> Self {
      Self {
        state: Arc::new(FetcherState {
          routes: Mutex::new(HashMap::new()),
          online: AtomicBool::new(true),
          calls: AtomicUsize::new(0),
        }),
      }
    }

    fn route(&self, path: &str, response: Response) {
      self
        .state
        .routes
        .lock()
        .unwrap()
        .insert(path.to_string(), response);
    }

    fn set_online(&self, online: bool) {
      self.state.online.store(online, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.state.calls.load(Ordering::SeqCst)
    }
  }

  impl Fetch for TestFetcher {
    fn fetch(&self, request: &Request) -> BoxFuture<'static, Result<Response>> {
      self.state.calls.fetch_add(1, Ordering::SeqCst);
      let online = self.state.online.load(Ordering::SeqCst);
      let response = self
        .state
        .routes
        .lock()
        .unwrap()
        .get(request.path())
        .cloned();

      Box::pin(async move {
        if !online {
          return Err(eyre!("network unreachable"));
        }
        match response {
          Some(response) => Ok(response),
          None => Ok(Response::html(404, "not found")),
        }
      })
    }
  }

  fn shell() -> Vec<String> {
    vec!["/".to_string(), "/index.html".to_string(), "/scripts/app.js".to_string()]
  }

  fn router_with(fetcher: TestFetcher, shell: Vec<String>) -> CacheRouter<TestFetcher> {
    let config = RouterConfig::new(
      Url::parse(ORIGIN).unwrap(),
      CacheNames::new("offtask", "2"),
      shell,
    );
    CacheRouter::new(ResponseCache::in_memory().unwrap(), fetcher, config)
  }

  fn serve_shell(fetcher: &TestFetcher) {
    fetcher.route("/", Response::html(200, "<html>shell</html>"));
    fetcher.route("/index.html", Response::html(200, "<html>shell</html>"));
    fetcher.route("/scripts/app.js", Response::html(200, "console.log(1)"));
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse(&format!("{}{}", ORIGIN, path)).unwrap())
  }

  #[tokio::test]
  async fn test_install_precaches_shell_and_skips_waiting() {
    let fetcher = TestFetcher::new();
    serve_shell(&fetcher);
    let router = router_with(fetcher.clone(), shell());

    router.install().await.unwrap();
    assert_eq!(router.lifecycle(), Lifecycle::Waiting);
    assert!(router.cache_size() > 0);

    // Shell files now come from the static generation, not the network.
    fetcher.set_online(false);
    let response = router.handle(get("/index.html")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let fetcher = TestFetcher::new();
    fetcher.route("/", Response::html(200, "<html>shell</html>"));
    // /index.html and /scripts/app.js 404
    let router = router_with(fetcher, shell());

    assert!(router.install().await.is_err());
    assert_eq!(router.cache_size(), 0);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let router = router_with(TestFetcher::new(), vec![]);
    assert!(router.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_evicts_stale_generations_and_claims() {
    let cache = ResponseCache::in_memory().unwrap();
    let stale = Response::html(200, "old");
    cache.put("offtask-v1-static", &get("/old"), &stale).unwrap();
    cache.put("offtask-v1-runtime", &get("/old2"), &stale).unwrap();
    cache.put("othertool-v9-static", &get("/other"), &stale).unwrap();

    let fetcher = TestFetcher::new();
    serve_shell(&fetcher);
    let config = RouterConfig::new(
      Url::parse(ORIGIN).unwrap(),
      CacheNames::new("offtask", "2"),
      shell(),
    );
    let router = CacheRouter::new(cache, fetcher, config);
    let mut events = router.subscribe();

    router.install().await.unwrap();
    router.activate().await.unwrap();
    assert_eq!(router.lifecycle(), Lifecycle::Active);
    assert_eq!(events.recv().await.unwrap(), ClientEvent::Claimed);

    let generations = router.cache.generation_names().unwrap();
    assert!(!generations.contains(&"offtask-v1-static".to_string()));
    assert!(!generations.contains(&"offtask-v1-runtime".to_string()));
    // Other apps' caches are not ours to purge.
    assert!(generations.contains(&"othertool-v9-static".to_string()));
    assert!(generations.contains(&"offtask-v2-static".to_string()));
  }

  #[tokio::test]
  async fn test_non_get_passes_through_uncached() {
    let fetcher = TestFetcher::new();
    fetcher.route("/api/tasks", Response::json(200, &json!({"ok": true})));
    let router = router_with(fetcher.clone(), vec![]);

    let request = Request {
      method: Method::Post,
      url: Url::parse(&format!("{}/api/tasks", ORIGIN)).unwrap(),
      mode: RequestMode::Default,
    };
    let response = router.handle(request.clone()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(router.cache_size(), 0);

    // Pass-through errors propagate.
    fetcher.set_online(false);
    assert!(router.handle(request).await.is_err());
  }

  #[tokio::test]
  async fn test_cross_origin_passes_through() {
    let fetcher = TestFetcher::new();
    let router = router_with(fetcher, vec![]);

    let request = Request::get(Url::parse("https://cdn.example/lib.js").unwrap());
    let response = router.handle(request).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(router.cache_size(), 0);
  }

  #[tokio::test]
  async fn test_classification_priority() {
    let router = router_with(TestFetcher::new(), shell());

    assert_eq!(router.classify("/index.html"), Strategy::CacheFirst);
    assert_eq!(router.classify("/api/tasks"), Strategy::NetworkFirst);
    assert_eq!(router.classify("/sync/queue"), Strategy::NetworkFirst);
    assert_eq!(router.classify("/analytics/events"), Strategy::NetworkFirst);
    assert_eq!(router.classify("/assets/logo.svg"), Strategy::CacheFirst);
    assert_eq!(router.classify("/icons/icon-192.png"), Strategy::CacheFirst);
    assert_eq!(
      router.classify("/some/page"),
      Strategy::StaleWhileRevalidate
    );
  }

  #[tokio::test]
  async fn test_cache_first_caches_then_serves_offline() {
    let fetcher = TestFetcher::new();
    fetcher.route("/assets/logo.svg", Response::html(200, "<svg/>"));
    let router = router_with(fetcher.clone(), vec![]);

    let first = router.handle(get("/assets/logo.svg")).await.unwrap();
    assert_eq!(first.body_text(), "<svg/>");

    fetcher.set_online(false);
    let second = router.handle(get("/assets/logo.svg")).await.unwrap();
    assert_eq!(second.body_text(), "<svg/>");
  }

  #[tokio::test]
  async fn test_network_first_prefers_network_then_cache() {
    let fetcher = TestFetcher::new();
    fetcher.route("/api/tasks", Response::json(200, &json!([1, 2])));
    let router = router_with(fetcher.clone(), vec![]);

    router.handle(get("/api/tasks")).await.unwrap();

    // Fresher data replaces the cached copy while online.
    fetcher.route("/api/tasks", Response::json(200, &json!([1, 2, 3])));
    let online = router.handle(get("/api/tasks")).await.unwrap();
    assert!(online.body_text().contains('3'));

    fetcher.set_online(false);
    let offline = router.handle(get("/api/tasks")).await.unwrap();
    assert_eq!(offline.status, 200);
    assert!(offline.body_text().contains('3'));
  }

  #[tokio::test]
  async fn test_api_offline_with_empty_cache_returns_503_json() {
    let fetcher = TestFetcher::new();
    fetcher.set_online(false);
    let router = router_with(fetcher, vec![]);

    let response = router.handle(get("/api/tasks")).await.unwrap();
    assert_eq!(response.status, 503);
    let body: serde_json::Value = serde_json::from_str(&response.body_text()).unwrap();
    assert_eq!(body["error"], "offline");
    assert!(body["message"].is_string());
  }

  #[tokio::test]
  async fn test_offline_navigation_serves_cached_shell() {
    let fetcher = TestFetcher::new();
    serve_shell(&fetcher);
    let router = router_with(fetcher.clone(), shell());
    router.install().await.unwrap();

    fetcher.set_online(false);
    let request = Request::navigate(Url::parse(&format!("{}/some/page", ORIGIN)).unwrap());
    let response = router.handle(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_other_request_gets_synthesized_page() {
    let fetcher = TestFetcher::new();
    fetcher.set_online(false);
    let router = router_with(fetcher, vec![]);

    let response = router.handle(get("/some/page")).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.body_text().contains("offline"));
  }

  #[tokio::test]
  async fn test_swr_serves_stale_and_refreshes_in_background() {
    let fetcher = TestFetcher::new();
    fetcher.route("/some/page", Response::html(200, "v1"));
    let router = router_with(fetcher.clone(), vec![]);

    // First request populates the runtime generation.
    let first = router.handle(get("/some/page")).await.unwrap();
    assert_eq!(first.body_text(), "v1");

    // Content changes upstream; the stale copy is served immediately.
    fetcher.route("/some/page", Response::html(200, "v2"));
    let stale = router.handle(get("/some/page")).await.unwrap();
    assert_eq!(stale.body_text(), "v1");

    // The background refresh lands; the next request sees v2.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fresh = router.handle(get("/some/page")).await.unwrap();
    assert_eq!(fresh.body_text(), "v2");
  }

  #[tokio::test]
  async fn test_swr_does_not_block_on_failed_refresh() {
    let fetcher = TestFetcher::new();
    fetcher.route("/some/page", Response::html(200, "v1"));
    let router = router_with(fetcher.clone(), vec![]);
    router.handle(get("/some/page")).await.unwrap();

    fetcher.set_online(false);
    let response = router.handle(get("/some/page")).await.unwrap();
    assert_eq!(response.body_text(), "v1");
  }

  #[tokio::test]
  async fn test_skip_waiting_message_activates() {
    let fetcher = TestFetcher::new();
    serve_shell(&fetcher);
    let router = router_with(fetcher, shell());
    router.install().await.unwrap();
    assert_eq!(router.lifecycle(), Lifecycle::Waiting);

    router.on_message(WorkerMessage::SkipWaiting).await;
    assert_eq!(router.lifecycle(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn test_cache_urls_message_is_best_effort() {
    let fetcher = TestFetcher::new();
    fetcher.route("/assets/a.css", Response::html(200, "a{}"));
    // /assets/missing.css 404s and must not abort the batch.
    let router = router_with(fetcher.clone(), vec![]);

    router
      .on_message(WorkerMessage::CacheUrls {
        urls: vec![
          "/assets/a.css".to_string(),
          "/assets/missing.css".to_string(),
          "::not a url::".to_string(),
        ],
      })
      .await;

    fetcher.set_online(false);
    let cached = router.handle(get("/assets/a.css")).await.unwrap();
    assert_eq!(cached.body_text(), "a{}");
  }

  #[tokio::test]
  async fn test_clear_cache_and_get_cache_size_messages() {
    let fetcher = TestFetcher::new();
    serve_shell(&fetcher);
    let router = router_with(fetcher, shell());
    router.install().await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    router
      .on_message(WorkerMessage::GetCacheSize { reply: tx })
      .await;
    match rx.await.unwrap() {
      WorkerReply::CacheSize { bytes } => assert!(bytes > 0),
    }

    router.on_message(WorkerMessage::ClearCache).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    router
      .on_message(WorkerMessage::GetCacheSize { reply: tx })
      .await;
    match rx.await.unwrap() {
      WorkerReply::CacheSize { bytes } => assert_eq!(bytes, 0),
    }
  }

  struct FlakySource {
    items: Vec<PendingItem>,
    synced: Mutex<Vec<String>>,
  }

  impl SyncSource for FlakySource {
    fn pending(&self, _tag: &str) -> Vec<PendingItem> {
      self.items.clone()
    }

    fn sync_item(&self, item: &PendingItem) -> BoxFuture<'static, Result<()>> {
      let fail = item.id == "bad";
      Box::pin(async move {
        if fail {
          Err(eyre!("remote rejected item"))
        } else {
          Ok(())
        }
      })
    }

    fn mark_synced(&self, item: &PendingItem) {
      self.synced.lock().unwrap().push(item.id.clone());
    }
  }

  #[tokio::test]
  async fn test_sync_pending_tolerates_item_failures_and_broadcasts() {
    let router = router_with(TestFetcher::new(), vec![]);
    let mut events = router.subscribe();

    let source = FlakySource {
      items: vec![
        PendingItem { id: "a".to_string() },
        PendingItem { id: "bad".to_string() },
        PendingItem { id: "b".to_string() },
      ],
      synced: Mutex::new(Vec::new()),
    };

    let synced = router
      .sync_pending(crate::worker::messages::SYNC_TASKS_TAG, &source)
      .await;
    assert_eq!(synced, 2);
    assert_eq!(*source.synced.lock().unwrap(), vec!["a", "b"]);

    assert_eq!(
      events.recv().await.unwrap(),
      ClientEvent::SyncComplete {
        tag: "sync-tasks".to_string(),
        synced: 2,
      }
    );
  }

  #[tokio::test]
  async fn test_empty_sync_source_reports_zero() {
    let router = router_with(TestFetcher::new(), vec![]);
    let mut events = router.subscribe();

    let synced = router
      .sync_pending(crate::worker::messages::SYNC_ANALYTICS_TAG, &EmptySyncSource)
      .await;
    assert_eq!(synced, 0);
    assert_eq!(
      events.recv().await.unwrap(),
      ClientEvent::SyncComplete {
        tag: "sync-analytics".to_string(),
        synced: 0,
      }
    );
  }

  #[tokio::test]
  async fn test_retired_router_skips_background_refresh() {
    let fetcher = TestFetcher::new();
    fetcher.route("/some/page", Response::html(200, "v1"));
    let router = router_with(fetcher.clone(), vec![]);
    router.handle(get("/some/page")).await.unwrap();

    fetcher.route("/some/page", Response::html(200, "v2"));
    router.retire();
    router.handle(get("/some/page")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The refresh fetched but did not write through.
    assert!(fetcher.calls() >= 2);
    let cached = router.cache.match_any(&get("/some/page")).unwrap().unwrap();
    assert_eq!(cached.body_text(), "v1");
  }
}
