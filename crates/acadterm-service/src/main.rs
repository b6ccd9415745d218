use std::net::SocketAddr;
use std::path::PathBuf;

use acadterm_api::{
    CreateCourseRequest, TenantScopeRequest, TermRegistryApi, API_CONTRACT_VERSION,
};
use acadterm_core::{DepartmentId, SchoolId, UniversityId};
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: TermRegistryApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TermCurrentRequest {
    #[serde(flatten)]
    scope: TenantScopeRequest,
}

#[derive(Debug, Clone, Deserialize)]
struct TermSwitchRequest {
    #[serde(flatten)]
    scope: TenantScopeRequest,
    new_term: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CourseCreateRequest {
    #[serde(flatten)]
    scope: TenantScopeRequest,
    name: String,
    code: String,
    #[serde(default)]
    active_terms: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RosterEditRequest {
    #[serde(flatten)]
    scope: TenantScopeRequest,
    course_id: String,
    faculty_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoveTermRequest {
    #[serde(flatten)]
    scope: TenantScopeRequest,
    course_id: String,
    term_id: Option<serde_json::Value>,
}

/// Tenant scope and term as they arrive on GET query strings; everything is
/// a string there, so ids are parsed explicitly.
#[derive(Debug, Clone, Deserialize)]
struct ScopedTermQuery {
    term_id: Option<String>,
    university_id: Option<String>,
    school_id: Option<String>,
    department_id: Option<String>,
    department_name: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "acadterm-service")]
#[command(about = "Local HTTP service for the academic term registry")]
struct Args {
    #[arg(long, default_value = "./acadterm.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/term/current", post(term_current))
        .route("/v1/term/switch", post(term_switch))
        .route("/v1/course/create", post(course_create))
        .route("/v1/course/roster/assign", post(course_roster_assign))
        .route("/v1/course/coordinator", post(course_coordinator))
        .route("/v1/courses", get(courses_list))
        .route("/v1/course/:course_id/roster", get(course_roster))
        .route("/v1/faculty/:faculty_id/courses", get(faculty_courses))
        .route("/v1/course/remove-term", post(course_remove_term))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let state = ServiceState { api: TermRegistryApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "acadterm service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<acadterm_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn term_current(
    State(state): State<ServiceState>,
    Json(request): Json<TermCurrentRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_core::TermId>>, ServiceError> {
    let term = state
        .api
        .current_term(&request.scope)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(term)))
}

async fn term_switch(
    State(state): State<ServiceState>,
    Json(request): Json<TermSwitchRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_api::TransitionReport>>, ServiceError> {
    let report = state
        .api
        .transition_term(&request.scope, &request.new_term)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

async fn course_create(
    State(state): State<ServiceState>,
    Json(request): Json<CourseCreateRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_core::Course>>, ServiceError> {
    let course = state
        .api
        .create_course(
            &request.scope,
            CreateCourseRequest {
                name: request.name,
                code: request.code,
                active_terms: request.active_terms,
            },
        )
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(course)))
}

async fn course_roster_assign(
    State(state): State<ServiceState>,
    Json(request): Json<RosterEditRequest>,
) -> Result<Json<ServiceEnvelope<serde_json::Value>>, ServiceError> {
    let course_id = acadterm_api::parse_course_id(&request.course_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let faculty_id = acadterm_api::parse_faculty_id(&request.faculty_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    state
        .api
        .assign_faculty(&request.scope, course_id, faculty_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(serde_json::json!({ "assigned": true }))))
}

async fn course_coordinator(
    State(state): State<ServiceState>,
    Json(request): Json<RosterEditRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_core::Course>>, ServiceError> {
    let course_id = acadterm_api::parse_course_id(&request.course_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let faculty_id = acadterm_api::parse_faculty_id(&request.faculty_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let course = state
        .api
        .appoint_coordinator(&request.scope, course_id, faculty_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(course)))
}

async fn courses_list(
    State(state): State<ServiceState>,
    Query(query): Query<ScopedTermQuery>,
) -> Result<Json<ServiceEnvelope<acadterm_api::TermCourses>>, ServiceError> {
    let scope = scope_from_query(&query)?;
    let term = query.term_id.clone().map(serde_json::Value::String);
    let courses = state
        .api
        .resolve_department_courses(&scope, term.as_ref())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(courses)))
}

async fn course_roster(
    State(state): State<ServiceState>,
    Path(course_id): Path<String>,
    Query(query): Query<ScopedTermQuery>,
) -> Result<Json<ServiceEnvelope<acadterm_api::RosterView>>, ServiceError> {
    let course_id = acadterm_api::parse_course_id(&course_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let scope = scope_from_query(&query)?;
    let term = query.term_id.clone().map(serde_json::Value::String);
    let roster = state
        .api
        .resolve_course_roster(&scope, course_id, term.as_ref())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(roster)))
}

async fn faculty_courses(
    State(state): State<ServiceState>,
    Path(faculty_id): Path<String>,
    Query(query): Query<ScopedTermQuery>,
) -> Result<Json<ServiceEnvelope<acadterm_api::FacultyCourses>>, ServiceError> {
    let faculty_id = acadterm_api::parse_faculty_id(&faculty_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let scope = scope_from_query(&query)?;
    let term = query.term_id.clone().map(serde_json::Value::String);
    let courses = state
        .api
        .resolve_faculty_courses(&scope, faculty_id, term.as_ref())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(courses)))
}

async fn course_remove_term(
    State(state): State<ServiceState>,
    Json(request): Json<RemoveTermRequest>,
) -> Result<Json<ServiceEnvelope<acadterm_api::CascadeReport>>, ServiceError> {
    let course_id = acadterm_api::parse_course_id(&request.course_id)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    let report = state
        .api
        .remove_course_from_term(&request.scope, course_id, request.term_id.as_ref())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

fn scope_from_query(query: &ScopedTermQuery) -> Result<TenantScopeRequest, ServiceError> {
    Ok(TenantScopeRequest {
        university_id: parse_query_id(query.university_id.as_deref(), "university_id")?
            .map(UniversityId),
        school_id: parse_query_id(query.school_id.as_deref(), "school_id")?.map(SchoolId),
        department_id: parse_query_id(query.department_id.as_deref(), "department_id")?
            .map(DepartmentId),
        department_name: query.department_name.clone(),
    })
}

fn parse_query_id(raw: Option<&str>, field: &str) -> Result<Option<Ulid>, ServiceError> {
    match raw {
        None => Ok(None),
        Some(value) => Ulid::from_string(value)
            .map(Some)
            .map_err(|err| ServiceState::error(format!("invalid {field} value {value}: {err}"))),
    }
}
