use axum::{
    extract::{Json, Path, Query},
    http::StatusCode,
    routing::{get, post},
    Extension, Router,
};
use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::engine::{QueryEngine, QueryOutput, DEFAULT_K, DEFAULT_YEAR};
use crate::error::{QueryError, Result};
use crate::parser::parse_query;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DateParams {
    day: u32,
    month: u32,
    year: Option<i32>,
    k: Option<usize>,
}

impl DateParams {
    fn year(&self) -> i32 {
        self.year.unwrap_or(DEFAULT_YEAR)
    }
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::UnknownDate(_) | QueryError::UnknownRegion(_) => StatusCode::NOT_FOUND,
        QueryError::AmbiguousRegion { .. } | QueryError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        QueryError::SourceUnavailable(_) | QueryError::MalformedSource(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn respond(result: Result<QueryOutput>) -> ApiResult {
    match result {
        Ok(output) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: None,
                data: serde_json::to_value(output).ok(),
            }),
        ),
        Err(e) => {
            tracing::debug!("Query failed: {}", e);
            (
                status_for(&e),
                Json(ApiResponse {
                    success: false,
                    message: Some(e.to_string()),
                    data: None,
                }),
            )
        }
    }
}

async fn health_check() -> Json<ApiResponse> {
    Json(ApiResponse {
        success: true,
        message: Some("Service is healthy".to_string()),
        data: None,
    })
}

async fn table_dates(Extension(engine): Extension<Arc<QueryEngine>>) -> Json<ApiResponse> {
    let table = engine.get_table();

    Json(ApiResponse {
        success: true,
        message: None,
        data: Some(serde_json::json!({
            "rows": table.num_rows(),
            "first": table.first_date().map(|d| d.column_name()),
            "last": table.last_date().map(|d| d.column_name()),
        })),
    })
}

async fn cases_on_date(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Path(country): Path<String>,
    Query(params): Query<DateParams>,
) -> ApiResult {
    increment_counter!("covid_ql_requests_total", "operation" => "cases");

    respond(
        engine
            .cases_on_date(&country, params.day, params.month, params.year())
            .map(QueryOutput::Cases),
    )
}

async fn total_cases_on_date(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Path(country): Path<String>,
    Query(params): Query<DateParams>,
) -> ApiResult {
    increment_counter!("covid_ql_requests_total", "operation" => "total");

    respond(
        engine
            .total_cases_on_date(&country, params.day, params.month, params.year())
            .map(QueryOutput::Cases),
    )
}

async fn top_countries(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Query(params): Query<DateParams>,
) -> ApiResult {
    increment_counter!("covid_ql_requests_total", "operation" => "top");

    respond(
        engine
            .top_k_countries_by_date(
                params.day,
                params.month,
                params.year(),
                params.k.unwrap_or(DEFAULT_K),
            )
            .map(QueryOutput::Countries),
    )
}

async fn changed_count(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Query(params): Query<DateParams>,
) -> ApiResult {
    increment_counter!("covid_ql_requests_total", "operation" => "changed");

    respond(
        engine
            .changed_count_by_date(params.day, params.month, params.year())
            .map(QueryOutput::Count),
    )
}

async fn execute_query(
    Extension(engine): Extension<Arc<QueryEngine>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    increment_counter!("covid_ql_requests_total", "operation" => "query");

    respond(parse_query(&request.query).and_then(|query| engine.execute(&query)))
}

pub fn router(engine: QueryEngine) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/dates", get(table_dates))
        .route("/cases/:country", get(cases_on_date))
        .route("/total/:country", get(total_cases_on_date))
        .route("/top", get(top_countries))
        .route("/changed", get(changed_count))
        .route("/query", post(execute_query))
        .layer(Extension(Arc::new(engine)))
}

pub async fn serve(engine: QueryEngine, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(engine);

    tracing::info!("Starting server on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
