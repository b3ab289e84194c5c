//! Pipeline engine lifecycle.
//!
//! The holder is the only owner of the engine. It constructs and starts the
//! engine on first access, bulk-loads the persisted routes whenever the engine
//! holds none, and serves single-route reloads, point-in-time restores and
//! full restarts.
//!
//! ```text
//! Uninitialized ──► Initialized(no routes) ──► Initialized(routes loaded)
//!                          ▲                              │
//!                          │          restart()           │
//!                          └────────── Stopped ◄──────────┘
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::engine::{EngineFactory, PipelineEngine, RouteDocument};
use crate::error::{PipelineError, PipelineResult};
use crate::routes::{Route, RouteStore};

/// Lifecycle state of the held engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No engine has been constructed yet.
    Uninitialized,
    /// The engine is started.
    Initialized {
        /// Whether the persisted routes have been loaded.
        routes_loaded: bool,
    },
    /// The engine was stopped by a restart.
    Stopped,
}

impl EngineState {
    /// Whether the engine accepts messages in this state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Initialized { .. })
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Initialized {
                routes_loaded: false,
            } => write!(f, "initialized(no routes)"),
            EngineState::Initialized {
                routes_loaded: true,
            } => write!(f, "initialized(routes loaded)"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

struct HolderInner {
    engine: Option<Arc<dyn PipelineEngine>>,
    state: EngineState,
    transitions: Vec<EngineState>,
}

impl HolderInner {
    fn transition(&mut self, to: EngineState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "Engine state transition");
            self.state = to;
            self.transitions.push(to);
        }
    }
}

/// Process-wide owner of the pipeline engine.
pub struct PipelineEngineHolder {
    factory: Arc<dyn EngineFactory>,
    store: Arc<dyn RouteStore>,
    inner: Mutex<HolderInner>,
}

impl PipelineEngineHolder {
    /// Create a holder. No engine is constructed until first access.
    pub fn new(factory: Arc<dyn EngineFactory>, store: Arc<dyn RouteStore>) -> Self {
        Self {
            factory,
            store,
            inner: Mutex::new(HolderInner {
                engine: None,
                state: EngineState::Uninitialized,
                transitions: vec![EngineState::Uninitialized],
            }),
        }
    }

    /// Get the engine, constructing, starting and loading it as needed.
    ///
    /// Concurrent first callers are serialized, so the engine is constructed
    /// and the routes are bulk-loaded exactly once.
    #[instrument(skip(self))]
    pub async fn engine(&self) -> PipelineResult<Arc<dyn PipelineEngine>> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await
    }

    /// Reload one route from the route store.
    ///
    /// Does nothing and returns `false` while no routes are loaded; they will
    /// be read from the store on the next bulk load anyway.
    #[instrument(skip(self))]
    pub async fn update_route(&self, key: &str) -> PipelineResult<bool> {
        let inner = self.inner.lock().await;

        let engine = match &inner.engine {
            Some(engine) if engine.route_count() > 0 => engine.clone(),
            _ => {
                debug!(route_key = key, "No routes loaded, skipping route update");
                return Ok(false);
            }
        };

        let route = self
            .store
            .find(key)
            .await?
            .ok_or_else(|| PipelineError::route_not_found(key))?;

        engine.load_routes(&RouteDocument::single(route))?;

        info!(route_key = key, "Route reloaded");
        Ok(true)
    }

    /// Replace one route with the supplied definition, regardless of what is
    /// persisted.
    #[instrument(skip(self, content))]
    pub async fn restore_route(&self, key: &str, content: &str) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        let engine = self.ensure_loaded(&mut inner).await?;

        engine.load_routes(&RouteDocument::single(Route::new(key, content)))?;

        inner.transition(EngineState::Initialized {
            routes_loaded: true,
        });
        info!(route_key = key, "Route restored");
        Ok(())
    }

    /// Stop and start the engine.
    ///
    /// Loaded routes are discarded; the next `engine()` call reloads them.
    /// Callers arriving during the restart wait for it to finish.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;

        let Some(engine) = inner.engine.clone() else {
            debug!("Engine not constructed yet, nothing to restart");
            return Ok(());
        };

        engine.stop().await?;
        inner.transition(EngineState::Stopped);
        info!("Pipeline engine stopped");

        engine.start().await?;
        inner.transition(EngineState::Initialized {
            routes_loaded: false,
        });
        info!("Pipeline engine restarted");
        Ok(())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> EngineState {
        self.inner.lock().await.state
    }

    /// Every state the holder has been in, oldest first.
    pub async fn transitions(&self) -> Vec<EngineState> {
        self.inner.lock().await.transitions.clone()
    }

    /// Keys of the routes currently loaded, without constructing the engine.
    pub async fn loaded_routes(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .engine
            .as_ref()
            .map(|engine| engine.route_keys())
            .unwrap_or_default()
    }

    async fn ensure_loaded(
        &self,
        inner: &mut HolderInner,
    ) -> PipelineResult<Arc<dyn PipelineEngine>> {
        let engine = self.ensure_started(inner).await?;

        if engine.route_count() == 0 {
            let routes = self.store.find_all().await?;
            let document = RouteDocument::combine(routes);

            if document.is_empty() {
                warn!("No persisted routes found");
            } else {
                let loaded = engine.load_routes(&document)?;
                info!(routes = loaded, "Loaded persisted routes");
                inner.transition(EngineState::Initialized {
                    routes_loaded: true,
                });
            }
        }

        Ok(engine)
    }

    async fn ensure_started(
        &self,
        inner: &mut HolderInner,
    ) -> PipelineResult<Arc<dyn PipelineEngine>> {
        let engine = match &inner.engine {
            Some(engine) => engine.clone(),
            None => {
                let engine = self.factory.create()?;
                info!("Pipeline engine constructed");
                inner.engine = Some(engine.clone());
                engine
            }
        };

        if !engine.is_started() {
            engine.start().await?;
            inner.transition(EngineState::Initialized {
                routes_loaded: engine.route_count() > 0,
            });
            info!("Pipeline engine started");
        }

        Ok(engine)
    }
}
