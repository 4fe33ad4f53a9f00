use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use encounter_submit_core::assembly;
use encounter_submit_core::config::{form_namespace_from_env_value, utc_offset_from_env_value};
use encounter_submit_core::{
    Clock, CoreConfig, CoreError, EncounterContext, EncounterSettings, EnrollmentPlan,
    FormFields, SessionMode, SystemClock,
};
use openmrs::{Encounter, PatientIdentifier, PatientProgram, ProgramEnrollmentPayload};

/// Application state shared across REST API handlers
#[derive(Clone)]
struct AppState {
    cfg: Arc<CoreConfig>,
}

#[derive(Serialize, ToSchema)]
struct HealthRes {
    ok: bool,
    message: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PrepareEncounterReq {
    #[schema(value_type = Vec<Object>)]
    fields: Value,
    #[schema(value_type = Object)]
    context: EncounterContext,
    #[schema(value_type = Object)]
    settings: EncounterSettings,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PrepareIdentifiersReq {
    #[schema(value_type = Vec<Object>)]
    fields: Value,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PrepareEnrollmentReq {
    #[schema(value_type = Vec<Object>)]
    fields: Value,
    patient: String,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PlanEnrollmentReq {
    #[schema(value_type = Object)]
    payload: ProgramEnrollmentPayload,
    #[serde(default)]
    #[schema(value_type = String)]
    session_mode: SessionMode,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    enrollments: Vec<PatientProgram>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        prepare_encounter,
        prepare_identifiers,
        prepare_enrollment,
        plan_enrollment
    ),
    components(schemas(
        HealthRes,
        PrepareEncounterReq,
        PrepareIdentifiersReq,
        PrepareEnrollmentReq,
        PlanEnrollmentReq
    ))
)]
struct ApiDoc;

/// Main entry point for the encounter submission preview service
///
/// Serves REST endpoints that assemble submission payloads from posted form state. Nothing
/// is persisted: the caller receives the payloads it would send to the backend.
///
/// # Environment Variables
/// - `ESUB_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `ESUB_FORM_NAMESPACE`: namespace for group observation form paths (default: "rfe-forms")
/// - `ESUB_UTC_OFFSET`: offset used to render date-times (default: UTC)
/// - `ESUB_ENCOUNTER_ROLE`: encounter role uuid used when a request names none
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("encounter_submit=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("ESUB_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let cfg = Arc::new(CoreConfig::new(
        form_namespace_from_env_value(std::env::var("ESUB_FORM_NAMESPACE").ok())?,
        utc_offset_from_env_value(std::env::var("ESUB_UTC_OFFSET").ok())?,
        std::env::var("ESUB_ENCOUNTER_ROLE").ok(),
    )?);

    tracing::info!("++ Starting encounter submission REST on {}", addr);
    tracing::info!(
        namespace = cfg.form_namespace(),
        offset = %cfg.utc_offset(),
        "resolved core configuration"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(AppState { cfg })).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/encounters/prepare", post(prepare_encounter))
        .route("/patient-identifiers/prepare", post(prepare_identifiers))
        .route("/program-enrollments/prepare", post(prepare_enrollment))
        .route("/program-enrollments/plan", post(plan_enrollment))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a core error onto an HTTP status and message.
///
/// Precondition violations are conflicts; malformed input is the caller's fault.
fn error_response(err: CoreError) -> (StatusCode, String) {
    let status = match &err {
        CoreError::AlreadyEnrolled { .. } | CoreError::MultipleActiveEnrollments { .. } => {
            StatusCode::CONFLICT
        }
        CoreError::InvalidInput(_)
        | CoreError::InvalidField { .. }
        | CoreError::FieldTree(_)
        | CoreError::OpenMrs(_) => StatusCode::BAD_REQUEST,
        CoreError::Store(_)
        | CoreError::EnrollmentCloseOut(_)
        | CoreError::PartialEnrollmentTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("Request failed: {:?}", err);
    } else {
        tracing::warn!("Request rejected: {}", err);
    }
    (status, err.to_string())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "encounter submission service is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/encounters/prepare",
    request_body = PrepareEncounterReq,
    responses(
        (status = 200, description = "Assembled encounter payload"),
        (status = 400, description = "Malformed field tree")
    )
)]
/// Assemble the encounter payload for the posted form state
///
/// Editing is signalled by an `encounter` in the context; its observations and orders are
/// replaced by the ones assembled from `fields`.
async fn prepare_encounter(
    State(state): State<AppState>,
    Json(req): Json<PrepareEncounterReq>,
) -> ApiResult<Encounter> {
    let fields = FormFields::from_value(req.fields).map_err(error_response)?;
    Ok(Json(assembly::prepare_encounter(
        &fields,
        &req.context,
        &req.settings,
        &state.cfg,
    )))
}

#[utoipa::path(
    post,
    path = "/patient-identifiers/prepare",
    request_body = PrepareIdentifiersReq,
    responses(
        (status = 200, description = "Submitted patient identifiers"),
        (status = 400, description = "Malformed field tree")
    )
)]
async fn prepare_identifiers(
    Json(req): Json<PrepareIdentifiersReq>,
) -> ApiResult<Vec<PatientIdentifier>> {
    let fields = FormFields::from_value(req.fields).map_err(error_response)?;
    Ok(Json(assembly::prepare_patient_identifiers(&fields)))
}

#[utoipa::path(
    post,
    path = "/program-enrollments/prepare",
    request_body = PrepareEnrollmentReq,
    responses(
        (status = 200, description = "Program enrollment payload"),
        (status = 400, description = "Malformed field tree")
    )
)]
async fn prepare_enrollment(
    State(state): State<AppState>,
    Json(req): Json<PrepareEnrollmentReq>,
) -> ApiResult<ProgramEnrollmentPayload> {
    let fields = FormFields::from_value(req.fields).map_err(error_response)?;
    Ok(Json(assembly::prepare_program_enrollment(
        &fields,
        Some(req.patient.as_str()),
        req.program.as_deref(),
        req.location.as_deref(),
        SystemClock.now(),
        &state.cfg,
    )))
}

#[utoipa::path(
    post,
    path = "/program-enrollments/plan",
    request_body = PlanEnrollmentReq,
    responses(
        (status = 200, description = "What committing the payload would persist"),
        (status = 409, description = "Enrollment precondition violated")
    )
)]
/// Decide how an enrollment payload would be committed, without committing it
async fn plan_enrollment(
    State(state): State<AppState>,
    Json(req): Json<PlanEnrollmentReq>,
) -> ApiResult<EnrollmentPlan> {
    let plan = assembly::plan_program_enrollment(
        &req.payload,
        req.session_mode,
        &req.enrollments,
        SystemClock.now(),
        &state.cfg,
    )
    .map_err(error_response)?;
    Ok(Json(plan))
}
