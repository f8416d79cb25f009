//! ==============================================================================
//! main.rs - soil monitor host entry point
//! ==============================================================================
//!
//! purpose:
//!     small web host for a 7-in-1 modbus rtu soil probe (moisture,
//!     temperature, ec, ph, n/p/k) hanging off a usb rs-485 adapter.
//!
//! responsibilities:
//!     - load configuration (serial line, listen address, advisor)
//!     - serve the dashboard page
//!     - GET  /api/data -> one fresh sensor acquisition per request
//!     - POST /api/ai   -> sensor values + question forwarded to the advisor
//!     - `--once`: read the probe a single time, print json, exit
//!
//! relationships:
//!     - uses: sensor.rs (acquisition), advisor.rs (language model call)
//!     - uses: config.rs (soil-monitor.toml)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                  rust host (this file)                    │
//!     │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//!     │  │ GET /        │   │ GET /api/data│   │ POST /api/ai │  │
//!     │  │ (dashboard)  │   │              │   │              │  │
//!     │  └──────────────┘   └──────┬───────┘   └──────┬───────┘  │
//!     │                            │ spawn_blocking   │          │
//!     │                     ┌──────┴──────┐    ┌──────┴──────┐   │
//!     │                     │ SensorReader│    │  Advisor    │   │
//!     │                     └──────┬──────┘    └──────┬──────┘   │
//!     └────────────────────────────┼──────────────────┼──────────┘
//!                                  │ modbus rtu       │ https
//!                           ┌──────┴──────┐    ┌──────┴──────┐
//!                           │ soil probe  │    │   gemini    │
//!                           └─────────────┘    └─────────────┘
//!
//! sensor failures are reported inside a 200 response as {"error": "..."};
//! the dashboard checks for that key.
//!
//! ==============================================================================

mod advisor;
mod config;
mod domain;
mod hal;
mod ports;
mod sensor;

use crate::advisor::{build_prompt, Advisor, GeminiAdvisor};
use crate::domain::{DataResponse, ReadError, ReadErrorKind};
use crate::sensor::SensorReader;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Soil sensor web host
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (default: config/soil-monitor.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read the sensor once, print the result as json and exit
    #[arg(long)]
    once: bool,
}

// ==============================================================================
// shared state
// ==============================================================================
// handed to every handler. nothing here changes after startup; each request
// to /api/data performs its own open/read/close on the serial line.

#[derive(Clone)]
pub struct AppState {
    pub sensor: Arc<SensorReader>,
    pub advisor: Arc<dyn Advisor>,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // startup banner
    println!("===========================================================");
    println!("  Soil Monitor Host");
    println!("  Modbus RTU soil probe -> JSON api");
    println!("===========================================================");

    // step 1: load configuration
    let config = match &args.config {
        Some(path) => config::HostConfig::load(path)?,
        None => config::HostConfig::load_or_default(),
    };

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.print_summary();

    // step 3: sensor reader on the real serial ports
    let sensor = Arc::new(
        SensorReader::with_hardware(config.serial.clone())
            .show_sensor_data(config.logging.show_sensor_data),
    );

    if args.once {
        let result = tokio::task::spawn_blocking(move || sensor.read_sensor()).await?;
        let failed = result.is_err();
        println!("{}", serde_json::to_string_pretty(&DataResponse::from(result))?);
        if failed {
            std::process::exit(1);
        }
        return Ok(());
    }

    // step 4: advisor and web server
    let advisor: Arc<dyn Advisor> = Arc::new(GeminiAdvisor::new(config.advisor.clone())?);
    let state = AppState { sensor, advisor };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("[STARTUP] ✓ Dashboard live at http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// web server
// ==============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/data", get(data_handler))
        .route("/api/ai", post(advice_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn dashboard_handler() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// json api endpoint for the current soil reading
/// always 200; failures come back as {"error": "..."}
async fn data_handler(State(state): State<AppState>) -> Json<DataResponse> {
    info!("GET /api/data: reading sensor");
    let sensor = state.sensor.clone();

    // offload blocking serial io to dedicated thread
    let result = tokio::task::spawn_blocking(move || sensor.read_sensor())
        .await
        .unwrap_or_else(|e| {
            Err(ReadError::new(
                ReadErrorKind::UnexpectedError,
                format!("sensor task failed: {}", e),
            ))
        });

    Json(DataResponse::from(result))
}

/// body of POST /api/ai
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdviceRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    sensor_data: Value,
}

async fn advice_handler(
    State(state): State<AppState>,
    Json(request): Json<AdviceRequest>,
) -> (StatusCode, Json<Value>) {
    let question = request.question.unwrap_or_default();
    let prompt = build_prompt(&question, &request.sensor_data);
    info!(prompt_len = prompt.chars().count(), "POST /api/ai: calling advisor");

    match state.advisor.advise(&prompt).await {
        Ok(text) => {
            info!(response_len = text.chars().count(), "advisor answered");
            (StatusCode::OK, Json(json!({ "result": text })))
        }
        Err(e) => {
            error!("advisor call failed: {}", e);
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "result": e.user_message() })))
        }
    }
}
