// Herd Ledger - Web Server
// REST API over the record store, one shared SQLite connection

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::{get, put},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use herd_ledger::{
    db, get_all_records, setup_database, FormInput, Ledger, Record, RecomputeEngine,
    ValidationError,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn err(data: T, message: String) -> Self {
        Self {
            success: false,
            data,
            error: Some(message),
        }
    }
}

/// Record response (derived fields included, freight divisor spelled out)
#[derive(Serialize)]
struct RecordResponse {
    id: String,
    partner: String,
    date: String,
    entries: i64,
    exits: i64,
    balance: i64,
    total_kg: f64,
    price_per_kg: f64,
    freight: f64,
    commission: f64,
    value_per_animal: f64,
    settlement: f64,
}

impl From<Record> for RecordResponse {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            partner: record.partner,
            date: record.date.format("%Y-%m-%d").to_string(),
            entries: record.entries,
            exits: record.exits,
            balance: record.balance,
            total_kg: record.total_kg,
            price_per_kg: record.price_per_kg,
            freight: record.freight,
            commission: record.commission,
            value_per_animal: record.value_per_animal,
            settlement: record.settlement,
        }
    }
}

/// Form payload: fields arrive as strings, exactly like the form inputs.
/// Unparseable numbers count as zero; only partner and date can reject.
#[derive(Deserialize, Default)]
#[serde(default)]
struct FormRequest {
    partner: String,
    date: String,
    entries: String,
    exits: String,
    total_kg: String,
    price_per_kg: String,
    freight: String,
    commission: String,
}

impl From<FormRequest> for FormInput {
    fn from(req: FormRequest) -> Self {
        FormInput {
            partner: req.partner,
            date: req.date,
            entries: req.entries,
            exits: req.exits,
            total_kg: req.total_kg,
            price_per_kg: req.price_per_kg,
            freight: req.freight,
            commission: req.commission,
        }
    }
}

#[derive(Serialize)]
struct SubmissionResponse {
    record: RecordResponse,
    needs_exit_reasons: bool,
}

#[derive(Deserialize)]
struct ExitReasonsRequest {
    reasons: Vec<ExitReasonEntry>,
}

#[derive(Deserialize)]
struct ExitReasonEntry {
    reason: String,
    quantity: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/records - All records, recomputed
async fn list_records(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match load_recomputed(&conn) {
        Ok(records) => {
            let response: Vec<RecordResponse> = records.into_iter().map(|r| r.into()).collect();

            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            eprintln!("Error listing records: {:#}", e);
            internal_error(Vec::<RecordResponse>::new())
        }
    }
}

/// POST /api/records - Submit a new record through the form controller
async fn create_record(
    State(state): State<AppState>,
    Json(request): Json<FormRequest>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let mut ledger = Ledger::new();
    if let Err(e) = ledger.load(&conn) {
        eprintln!("Error loading records: {:#}", e);
        return internal_error(());
    }

    match ledger.submit(&conn, &request.into()) {
        Ok(submission) => {
            let response = SubmissionResponse {
                record: submission.record.into(),
                needs_exit_reasons: submission.needs_exit_reasons,
            };

            (StatusCode::CREATED, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => match e.downcast_ref::<ValidationError>() {
            Some(v) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err((), v.to_string())),
            )
                .into_response(),
            None => {
                eprintln!("Error saving record: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::err((), "Failed to save record".to_string())),
                )
                    .into_response()
            }
        },
    }
}

/// PUT /api/records/:id - Overwrite raw fields, then recompute everything
async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FormRequest>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let mut ledger = Ledger::new();
    if let Err(e) = ledger.load(&conn) {
        eprintln!("Error loading records: {:#}", e);
        return internal_error(());
    }

    match ledger.save_edit(&conn, &id, &request.into()) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))).into_response(),
        Err(e) => match e.downcast_ref::<ValidationError>() {
            Some(v) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err((), v.to_string())),
            )
                .into_response(),
            None => {
                eprintln!("Error updating record {}: {:#}", id, e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::err((), "Failed to update record".to_string())),
                )
                    .into_response()
            }
        },
    }
}

/// DELETE /api/records - Bulk wipe
async fn wipe_records(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match db::delete_all(&conn) {
        Ok((records, details)) => (
            StatusCode::OK,
            Json(ApiResponse::ok(serde_json::json!({
                "records_deleted": records,
                "exit_details_deleted": details,
            }))),
        )
            .into_response(),
        Err(e) => {
            eprintln!("Error wiping records: {:#}", e);
            internal_error(())
        }
    }
}

/// GET /api/partners - Distinct partner names
async fn list_partners(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match db::list_partners(&conn) {
        Ok(partners) => (StatusCode::OK, Json(ApiResponse::ok(partners))).into_response(),
        Err(e) => {
            eprintln!("Error listing partners: {:#}", e);
            internal_error(Vec::<String>::new())
        }
    }
}

/// GET /api/partners/:name/records - One partner's history
async fn partner_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();
    let partner = decode_partner(&name);

    // Recompute over the full set first; divisors cross partner pages
    if let Err(e) = load_recomputed(&conn) {
        eprintln!("Error recomputing records: {:#}", e);
        return internal_error(Vec::<RecordResponse>::new());
    }

    match db::get_records_for_partner(&conn, &partner) {
        Ok(records) => {
            let response: Vec<RecordResponse> = records.into_iter().map(|r| r.into()).collect();

            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            eprintln!("Error getting records for {}: {:#}", partner, e);
            internal_error(Vec::<RecordResponse>::new())
        }
    }
}

/// GET /api/partners/:name/stats - Aggregates for one partner
async fn partner_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();
    let partner = decode_partner(&name);

    match db::get_partner_stats(&conn, &partner) {
        Ok(stats) => (StatusCode::OK, Json(ApiResponse::ok(stats))).into_response(),
        Err(e) => {
            eprintln!("Error getting stats for {}: {:#}", partner, e);
            internal_error(())
        }
    }
}

/// GET /api/records/:id/exits - Exit details for one record
async fn list_exit_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    match db::get_exit_details(&conn, &id) {
        Ok(details) => (StatusCode::OK, Json(ApiResponse::ok(details))).into_response(),
        Err(e) => {
            eprintln!("Error getting exit details for {}: {:#}", id, e);
            internal_error(())
        }
    }
}

/// POST /api/records/:id/exits - Record exit reasons collected by the client
async fn create_exit_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExitReasonsRequest>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let reasons: Vec<(String, i64)> = request
        .reasons
        .into_iter()
        .map(|r| (r.reason, r.quantity))
        .collect();

    match db::insert_exit_details(&conn, &id, &reasons) {
        Ok(inserted) => (
            StatusCode::CREATED,
            Json(ApiResponse::ok(serde_json::json!({ "inserted": inserted }))),
        )
            .into_response(),
        Err(e) => {
            eprintln!("Error saving exit details for {}: {:#}", id, e);
            internal_error(())
        }
    }
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

fn load_recomputed(conn: &Connection) -> anyhow::Result<Vec<Record>> {
    let records = get_all_records(conn)?;
    let outcome = RecomputeEngine::new().run(conn, &records);

    Ok(outcome.records)
}

fn decode_partner(name: &str) -> String {
    urlencoding::decode(name)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| name.to_string())
}

fn internal_error<T: Serialize>(data: T) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::err(data, "Internal error".to_string())),
    )
        .into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🐂 Herd Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("HERD_LEDGER_DB").unwrap_or_else(|_| "herd-ledger.db".to_string());

    let conn = Connection::open(&db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to set up database");
    println!("✓ Database opened: {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route(
            "/records",
            get(list_records).post(create_record).delete(wipe_records),
        )
        .route("/records/:id", put(update_record))
        .route(
            "/records/:id/exits",
            get(list_exit_details).post(create_exit_details),
        )
        .route("/partners", get(list_partners))
        .route("/partners/:name/records", get(partner_records))
        .route("/partners/:name/stats", get(partner_stats))
        .with_state(state.clone());

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/records");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
