//! The worker itself: event dispatch over the router, strategies, queue,
//! and presenter.

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheStorage, CachedResponse, Served};
use crate::config::{CacheNames, Config};
use crate::db::{FormKind, QueueStore};
use crate::event::{EventHandler, WorkerEvent};
use crate::lifecycle::{self, WorkerState};
use crate::net::{FetchRequest, HttpClient};
use crate::notify::{ClientSurface, Presenter};
use crate::router::{Router, Strategy};
use crate::sync::{self, ReplayReport};

/// The offline worker. Owns every component and dispatches inbound
/// events; one handler runs at a time, detached strategy legs interleave
/// underneath.
pub struct Worker<S: CacheStorage + 'static, Q: QueueStore> {
  config: Config,
  names: CacheNames,
  state: WorkerState,
  router: Router,
  layer: CacheLayer<S>,
  storage: Arc<S>,
  queue: Arc<Q>,
  net: HttpClient,
  surface: Arc<dyn ClientSurface>,
  presenter: Presenter,
}

impl<S: CacheStorage + 'static, Q: QueueStore> Worker<S, Q> {
  pub fn new(
    config: Config,
    storage: Arc<S>,
    queue: Arc<Q>,
    net: HttpClient,
    surface: Arc<dyn ClientSurface>,
  ) -> Self {
    let names = config.cache_names();
    let router = Router::new(&config);
    let layer = CacheLayer::new(Arc::clone(&storage), &config);
    let presenter = Presenter::new(&config);

    Self {
      config,
      names,
      state: WorkerState::Installing,
      router,
      layer,
      storage,
      queue,
      net,
      surface,
      presenter,
    }
  }

  #[allow(dead_code)]
  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Run until the channel closes or a Shutdown arrives.
  ///
  /// Handler errors are caught here, logged, and suppressed; the loop
  /// itself never dies to a failed event.
  pub async fn run(&mut self, mut events: EventHandler) -> Result<()> {
    while let Some(event) = events.next().await {
      if matches!(event, WorkerEvent::Shutdown) {
        info!("Worker shutting down");
        break;
      }
      if let Err(e) = self.handle_event(event).await {
        warn!(error = %e, "Event handler failed");
      }
    }
    Ok(())
  }

  /// Dispatch one inbound event.
  pub async fn handle_event(&mut self, event: WorkerEvent) -> Result<()> {
    match event {
      WorkerEvent::Install => self.handle_install().await,
      WorkerEvent::Activate => self.handle_activate(),
      WorkerEvent::Fetch { request, reply } => {
        let served = self.handle_fetch(request).await;
        // The requester may have gone away; that is not our problem
        let _ = reply.send(served);
        Ok(())
      }
      WorkerEvent::Sync { tag } => self.handle_sync(&tag).await.map(|_| ()),
      WorkerEvent::Push { payload } => {
        self
          .presenter
          .present(self.surface.as_ref(), payload.as_deref());
        Ok(())
      }
      WorkerEvent::NotificationClick { action, data } => {
        self
          .presenter
          .activate(self.surface.as_ref(), &action, &data);
        Ok(())
      }
      WorkerEvent::Tick => {
        lifecycle::evict_dynamic(
          self.storage.as_ref(),
          &self.names.dynamic_store,
          self.config.dynamic_ceiling,
        )?;
        Ok(())
      }
      WorkerEvent::Shutdown => Ok(()),
    }
  }

  /// Install: precache the manifest. Asset failures are logged inside
  /// and never block readiness.
  pub async fn handle_install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;
    let net = self.net.clone();
    lifecycle::install(self.storage.as_ref(), &self.config, move |url| {
      let net = net.clone();
      async move { net.fetch(&FetchRequest::get(url)).await }
    })
    .await?;
    Ok(())
  }

  /// Activate: garbage-collect stale generations, claim clients.
  pub fn handle_activate(&mut self) -> Result<()> {
    self.state = WorkerState::Activating;
    lifecycle::activate(self.storage.as_ref(), &self.names, self.surface.as_ref())?;
    self.state = WorkerState::Active;
    Ok(())
  }

  /// Route a request through its strategy; non-GETs pass through.
  pub async fn handle_fetch(&self, request: FetchRequest) -> Result<Served> {
    let strategy = self.router.classify(&request);
    debug!(url = %request.url, strategy = ?strategy, "Fetch");

    match strategy {
      Some(Strategy::NetworkFirst) => {
        let net = self.net.clone();
        let outbound = request.clone();
        self
          .layer
          .network_first(&request, move || async move { net.fetch(&outbound).await })
          .await
      }
      Some(Strategy::CacheFirst) => {
        let net = self.net.clone();
        let outbound = request.clone();
        self
          .layer
          .cache_first(&request, move || async move { net.fetch(&outbound).await })
          .await
      }
      Some(Strategy::StaleWhileRevalidate) => {
        let net = self.net.clone();
        let outbound = request.clone();
        self
          .layer
          .stale_while_revalidate(&request, move || async move { net.fetch(&outbound).await })
          .await
      }
      None => self.pass_through(request).await,
    }
  }

  /// Non-GET requests go straight to the network. A form submission that
  /// cannot reach it is queued for replay and answered with a synthesized
  /// 503; anything else re-raises the failure.
  async fn pass_through(&self, request: FetchRequest) -> Result<Served> {
    match self.net.fetch(&request).await {
      Ok(response) => Ok(Served::network(response)),
      Err(fetch_err) => {
        if request.method == Method::POST {
          if let Some(kind) = FormKind::from_endpoint_path(&request.path()) {
            let payload = request
              .body
              .as_deref()
              .map(|body| String::from_utf8_lossy(body).into_owned())
              .unwrap_or_else(|| "{}".to_string());
            let id = self.queue_submission(kind, &payload)?;
            return Ok(Served::offline(queued_response(kind, id)));
          }
        }
        Err(fetch_err)
      }
    }
  }

  /// Store a form submission for later replay. Hosts that queue from
  /// page script call this directly.
  pub fn queue_submission(&self, kind: FormKind, payload: &str) -> Result<i64> {
    let id = self.queue.enqueue(kind, payload)?;
    info!(kind = kind.store_name(), id, "Form submission queued");
    Ok(id)
  }

  /// Drain the queue partition a sync tag names. Unknown tags are
  /// ignored with a warning.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<ReplayReport>> {
    let Some(kind) = FormKind::from_sync_tag(tag) else {
      warn!(tag, "Unknown sync tag ignored");
      return Ok(None);
    };

    let endpoint = self.config.resolve(kind.endpoint_path());
    let net = self.net.clone();
    let report = sync::drain(self.queue.as_ref(), kind, move |record| {
      let net = net.clone();
      let endpoint = endpoint.clone();
      async move {
        net
          .fetch(&FetchRequest::post_json_raw(endpoint, &record.payload))
          .await
      }
    })
    .await?;

    Ok(Some(report))
  }
}

/// 503 handed back for a submission that was queued instead of sent.
fn queued_response(kind: FormKind, id: i64) -> CachedResponse {
  CachedResponse::json(
    503,
    &serde_json::json!({
      "error": "Offline mode",
      "queued": true,
      "kind": kind.store_name(),
      "id": id,
    }),
  )
}

// ============================================================================
// Tests
// ============================================================================
