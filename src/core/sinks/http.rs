//! Dashboard sink: keeps samples in a [`MemoryCache`] and serves them over HTTP.
//!
//! | Route             | Response                                              |
//! |-------------------|-------------------------------------------------------|
//! | `GET /`           | HTML page charting the retained records               |
//! | `GET /api/v1/current` | latest sample as JSON, `null` before the first one |
//! | `GET /api/v1/data`    | retained records, ascending by `ts`               |

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::sinks::HttpConfig,
    core::{
        cache::{CacheReader, MemoryCache, TS_FIELD},
        error::{ComponentError, ComponentResult},
        traits::{project_default, to_json, Converter, Entry, Projector, Sample, Sink},
    },
};

const INDEX_TEMPLATE: &str = include_str!("../../../templates/index.html");

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Component(#[from] ComponentError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        error!("Dashboard request failed: {}", self);
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

struct DashboardState<S> {
    reader: CacheReader<S>,
    converter: Converter<S>,
    projector: Projector<S>,
    templates: Arc<Tera>,
    name: Arc<str>,
    marks: Arc<[String]>,
}

impl<S> Clone for DashboardState<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            converter: self.converter,
            projector: self.projector,
            templates: self.templates.clone(),
            name: self.name.clone(),
            marks: self.marks.clone(),
        }
    }
}

async fn current<S: Sample>(
    State(state): State<DashboardState<S>>,
) -> Result<Json<Value>, HttpError> {
    let value = match state.reader.last() {
        Some(sample) => (state.converter)(&sample)?,
        None => Value::Null,
    };
    Ok(Json(value))
}

async fn data<S: Sample>(
    State(state): State<DashboardState<S>>,
) -> Result<Json<Vec<Entry>>, HttpError> {
    Ok(Json(state.reader.data(state.projector)?))
}

async fn index<S: Sample>(State(state): State<DashboardState<S>>) -> Result<Html<String>, HttpError> {
    let mut context = Context::new();
    context.insert("name", state.name.as_ref());
    context.insert("name_json", &script_json(state.name.as_ref())?);
    context.insert("marks_json", &script_json(state.marks.as_ref())?);
    context.insert("ts_json", &script_json(TS_FIELD)?);
    Ok(Html(state.templates.render("index.html", &context)?))
}

/// JSON safe to inline in a `<script>` block: no value can close the block.
fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HttpError> {
    let json = serde_json::to_string(value).map_err(ComponentError::from)?;
    Ok(json.replace('<', "\\u003c"))
}

struct Server {
    cancel: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
    local_addr: SocketAddr,
}

pub struct DashboardSink<S> {
    config: HttpConfig,
    name: String,
    cache: MemoryCache<S>,
    converter: Converter<S>,
    projector: Projector<S>,
    server: Option<Server>,
}

impl<S: Sample> DashboardSink<S> {
    pub fn new(config: HttpConfig, cache: MemoryCache<S>) -> Self {
        Self {
            config,
            name: String::new(),
            cache,
            converter: to_json::<S>,
            projector: project_default::<S>,
            server: None,
        }
    }

    pub fn with_converter(mut self, converter: Converter<S>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_projector(mut self, projector: Projector<S>) -> Self {
        self.projector = projector;
        self
    }

    pub fn cache(&self) -> &MemoryCache<S> {
        &self.cache
    }

    /// Address the server listens on, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    pub fn router(&self) -> Result<Router, HttpError> {
        let mut templates = Tera::default();
        templates.add_raw_template("index.html", INDEX_TEMPLATE)?;

        let state = DashboardState {
            reader: self.cache.reader(),
            converter: self.converter,
            projector: self.projector,
            templates: Arc::new(templates),
            name: Arc::from(self.name.as_str()),
            marks: Arc::from(self.config.y_axis.clone()),
        };

        Ok(Router::new()
            .route("/", get(index::<S>))
            .route("/api/v1/current", get(current::<S>))
            .route("/api/v1/data", get(data::<S>))
            .with_state(state))
    }

    async fn stop_server(&mut self) -> ComponentResult<()> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };
        server.cancel.cancel();
        match server.handle.await {
            Ok(result) => result.map_err(ComponentError::Io),
            Err(join) => Err(ComponentError::Other(format!(
                "Dashboard server task failed: {join}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl<S: Sample> Sink<S> for DashboardSink<S> {
    fn setup(&mut self, name: &str) {
        self.name = name.to_string();
        self.cache.setup(name);
    }

    /// Binds the listener; a taken port fails startup.
    async fn init(&mut self, debug: bool) -> ComponentResult<()> {
        let router = self
            .router()
            .map_err(|e| ComponentError::Other(e.to_string()))?;
        let listener = TcpListener::bind(&self.config.bind).await?;
        let local_addr = listener.local_addr()?;

        self.cache.init(debug).await?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        });

        info!("Dashboard listening on http://{}", local_addr);
        self.server = Some(Server {
            cancel,
            handle,
            local_addr,
        });
        Ok(())
    }

    async fn consume(&mut self, sample: &S) -> ComponentResult<()> {
        self.cache.consume(sample).await
    }

    /// Stops the server, then the cache sweep. Idempotent.
    async fn close(&mut self) -> ComponentResult<()> {
        let server = self.stop_server().await;
        if let Err(e) = &server {
            warn!("Dashboard server stopped with error: {}", e);
        } else {
            debug!("Dashboard server stopped");
        }
        self.cache.close().await?;
        server
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
