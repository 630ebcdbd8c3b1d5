//! Servidor web Axum para o NER em khmer: API JSON, health check e WebSocket com eventos do pipeline
//!
//! Variáveis de ambiente:
//! - `NER_MODEL_DIR`: diretório dos artefatos (padrão `artifacts`)
//! - `NER_BIND_ADDR`: endereço de escuta (padrão `0.0.0.0:3000`)
//! - `RUST_LOG`: filtro do tracing (padrão `info`)

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use khmer_ner_core::{EntitySpan, NerError, NerPipeline, NerResult, PipelineEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Configuração do servidor lida do ambiente.
struct ServerConfig {
    model_dir: PathBuf,
    bind_addr: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            model_dir: std::env::var("NER_MODEL_DIR")
                .unwrap_or_else(|_| "artifacts".to_string())
                .into(),
            bind_addr: std::env::var("NER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        }
    }
}

/// Estado compartilhado da aplicação.
///
/// O pipeline é definido uma única vez (sucesso ou falha da carga). Enquanto a
/// célula está vazia o modelo ainda está carregando.
#[derive(Default)]
struct AppState {
    model: OnceLock<Result<Arc<NerPipeline>, String>>,
}

impl AppState {
    fn ready(pipeline: NerPipeline) -> Self {
        let state = Self::default();
        state.finish_loading(Ok(pipeline));
        state
    }

    fn finish_loading(&self, result: NerResult<NerPipeline>) {
        let outcome = match result {
            Ok(pipeline) => {
                info!("Modelo NER pronto");
                Ok(Arc::new(pipeline))
            }
            Err(e) => {
                error!("Falha ao carregar artefatos do NER: {e}");
                Err(e.to_string())
            }
        };
        if self.model.set(outcome).is_err() {
            warn!("Carga do modelo concluída mais de uma vez; resultado ignorado");
        }
    }

    fn pipeline(&self) -> Result<Arc<NerPipeline>, ApiError> {
        match self.model.get() {
            Some(Ok(pipeline)) => Ok(Arc::clone(pipeline)),
            Some(Err(reason)) => Err(ApiError::NotReady(format!(
                "Modelo NER não carregado: {reason}"
            ))),
            None => Err(ApiError::NotReady("Modelo NER ainda carregando".to_string())),
        }
    }
}

/// Erros da API com o status HTTP correspondente.
#[derive(Debug)]
enum ApiError {
    InvalidInput(String),
    NotReady(String),
    Internal(String),
}

impl From<NerError> for ApiError {
    fn from(e: NerError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotReady(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
struct NerRequest {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct NerResponse {
    text: String,
    entities: Vec<EntitySpan>,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    model_loaded: bool,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let state = Arc::new(AppState::default());

    // A carga roda em paralelo; o servidor já responde /health com model_loaded=false
    let loader = Arc::clone(&state);
    let model_dir = config.model_dir.clone();
    tokio::task::spawn_blocking(move || {
        info!("Carregando artefatos de {}", model_dir.display());
        loader.finish_loading(NerPipeline::load(&model_dir));
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("🚀 Servidor NER khmer iniciado em http://{}", config.bind_addr);
    axum::serve(listener, router(state)).await
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ner", post(ner_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check: o processo está vivo mesmo que o modelo não tenha carregado.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (model_loaded, error) = match state.model.get() {
        Some(Ok(_)) => (true, None),
        Some(Err(reason)) => (false, Some(reason.clone())),
        None => (false, None),
    };
    Json(HealthResponse {
        ok: true,
        model_loaded,
        error,
    })
}

/// Análise NER via HTTP POST
async fn ner_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NerRequest>,
) -> Result<Json<NerResponse>, ApiError> {
    if req.text.is_empty() {
        return Err(ApiError::InvalidInput("text is required".to_string()));
    }
    let pipeline = state.pipeline()?;

    info!("Analisando via HTTP: {} chars", req.text.chars().count());
    let analysis = tokio::task::spawn_blocking(move || pipeline.analyze(&req.text))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(NerResponse {
        text: analysis.text,
        entities: analysis.entities,
    }))
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Mensagem WebSocket recebida do cliente
#[derive(Deserialize)]
struct WsRequest {
    text: String,
}

/// Executa o pipeline para uma mensagem WebSocket e devolve todos os eventos.
///
/// Toda mensagem recebe resposta: texto vazio ou modelo indisponível viram um
/// único `Error`; texto só com espaços termina em `Done` sem entidades.
async fn collect_events(state: &AppState, text: String) -> Vec<PipelineEvent> {
    if text.is_empty() {
        return vec![PipelineEvent::Error {
            message: "text is required".to_string(),
        }];
    }
    let pipeline = match state.pipeline() {
        Ok(pipeline) => pipeline,
        Err(ApiError::NotReady(message)) => return vec![PipelineEvent::Error { message }],
        Err(other) => {
            return vec![PipelineEvent::Error {
                message: format!("{other:?}"),
            }]
        }
    };

    info!("Analisando via WebSocket: {} chars", text.chars().count());
    // O pipeline é síncrono: roda fora do runtime e devolve os eventos coletados
    tokio::task::spawn_blocking(move || {
        let (tx, rx) = std::sync::mpsc::channel();
        pipeline.analyze_streaming(&text, tx);
        rx.try_iter().collect::<Vec<PipelineEvent>>()
    })
    .await
    .unwrap_or_else(|e| {
        vec![PipelineEvent::Error {
            message: e.to_string(),
        }]
    })
}

/// Lógica do WebSocket: recebe texto, executa o pipeline e envia os eventos
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                // Tenta parsear como JSON {text}; senão usa como texto puro
                let text = serde_json::from_str::<WsRequest>(&text)
                    .map(|req| req.text)
                    .unwrap_or(text);
                let events = collect_events(&state, text).await;
                for event in &events {
                    if let Ok(json) = serde_json::to_string(event) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            return; // cliente desconectou
                        }
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}
