//! json api over the enclave operations

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metrics::{counter, gauge, histogram};
use qkey::{
    AttestationDocument, DerivedSecret, Enclave, Error as QkeyError, ExportedKey, GenesisOutput,
    ManifestEnvelope, Measurement, Namespace, Phase, QuorumConfiguration, QuorumMember, SoftwareAttestor,
    Status, SubmittedShare, Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

/// app state shared across handlers
pub struct AppState {
    pub enclave: Enclave<SoftwareAttestor>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

// === request/response types ===

#[derive(Deserialize)]
pub struct GenesisRequest {
    pub namespace_name: String,
    pub namespace_nonce: u64,
    pub members: Vec<QuorumMember>,
    pub threshold: u8,
}

#[derive(Deserialize)]
pub struct SharesRequest {
    pub namespace_name: String,
    pub namespace_nonce: u64,
    pub shares: Vec<SubmittedShare>,
}

/// body of /boot/standard and /manifest
#[derive(Deserialize)]
pub struct ManifestRequest {
    pub manifest_envelope: ManifestEnvelope,
}

#[derive(Deserialize)]
pub struct AttestationRequest {
    #[serde(with = "qkey::hex_serde::array")]
    pub manifest_hash: [u8; 32],
    /// defaults to this instance's configured measurements
    #[serde(default)]
    pub measurements: Option<Vec<Measurement>>,
}

#[derive(Deserialize)]
pub struct ExportRequest {
    pub manifest_envelope: ManifestEnvelope,
    pub attestation_document: AttestationDocument,
}

#[derive(Serialize)]
pub struct AttestationResponse {
    pub attestation_document: AttestationDocument,
}

/// reply of the state changing calls; the new phase is read from /status
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Deserialize)]
pub struct DeriveRequest {
    #[serde(default = "default_strength")]
    pub strength_bits: u32,
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_strength() -> u32 {
    256
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    #[serde(with = "qkey::hex_serde::bytes")]
    pub sealed_secret: Vec<u8>,
}

#[derive(Serialize)]
pub struct NodeInfoResponse {
    version: String,
    attestor: String,
    phase: Phase,
    measurements: Vec<Measurement>,
}

// === error mapping ===

fn status_code(e: &QkeyError) -> StatusCode {
    use QkeyError::*;
    match e {
        InvalidParameters(_) => StatusCode::BAD_REQUEST,
        InsufficientShares { .. } | InconsistentShares => StatusCode::UNPROCESSABLE_ENTITY,
        IllegalStateTransition { .. } | AlreadyBooted | AlreadyInitialized | NotProvisioned => {
            StatusCode::CONFLICT
        }
        ManifestMismatch(_) | SignatureInvalid | DecryptionFailed | AuthenticationFailed => {
            StatusCode::FORBIDDEN
        }
        EncryptionFailed | KeyDerivationFailed | AttestationFailed(_) | StatePoisoned => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// count, log and map an enclave error
fn reject(endpoint: &'static str, e: QkeyError) -> (StatusCode, String) {
    counter!("qkey_errors_total", "endpoint" => endpoint, "error" => e.kind()).increment(1);
    if e.is_integrity_violation() {
        warn!(endpoint, kind = e.kind(), "integrity check failed");
    }
    (status_code(&e), e.to_string())
}

/// run one enclave call with request metrics and the phase gauge
fn observe<T>(
    state: &AppState,
    endpoint: &'static str,
    op: impl FnOnce(&Enclave<SoftwareAttestor>) -> qkey::Result<T>,
) -> ApiResult<T> {
    let start = Instant::now();
    counter!("qkey_requests_total", "endpoint" => endpoint).increment(1);

    let result = op(&state.enclave);

    if let Ok(status) = state.enclave.status() {
        record_phase(status.phase);
    }
    histogram!("qkey_request_duration_seconds", "endpoint" => endpoint).record(start.elapsed().as_secs_f64());
    result.map(Json).map_err(|e| reject(endpoint, e))
}

pub fn record_phase(phase: Phase) {
    let index = Phase::ALL.iter().position(|p| *p == phase).unwrap_or_default();
    gauge!("qkey_phase").set(index as f64);
}

// === handlers ===

async fn genesis(State(state): State<Arc<AppState>>, Json(req): Json<GenesisRequest>) -> ApiResult<GenesisOutput> {
    let quorum = QuorumConfiguration { members: req.members, threshold: req.threshold };
    let namespace = Namespace::new(req.namespace_name, req.namespace_nonce);
    observe(&state, "genesis", |enclave| enclave.genesis_boot(quorum, namespace))
}

async fn boot_standard(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManifestRequest>,
) -> ApiResult<SuccessResponse> {
    observe(&state, "boot_standard", |enclave| {
        enclave.boot_standard(req.manifest_envelope)?;
        Ok(SuccessResponse { success: true })
    })
}

async fn shares(State(state): State<Arc<AppState>>, Json(req): Json<SharesRequest>) -> ApiResult<SuccessResponse> {
    let namespace = Namespace::new(req.namespace_name, req.namespace_nonce);
    observe(&state, "shares", |enclave| {
        enclave.inject_shares(&namespace, &req.shares)?;
        Ok(SuccessResponse { success: true })
    })
}

async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Status> {
    state.enclave.status().map(Json).map_err(|e| reject("status", e))
}

async fn share_manifest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManifestRequest>,
) -> ApiResult<SuccessResponse> {
    observe(&state, "manifest", |enclave| {
        enclave.share_manifest(req.manifest_envelope)?;
        Ok(SuccessResponse { success: true })
    })
}

async fn attestation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AttestationRequest>,
) -> ApiResult<AttestationResponse> {
    observe(&state, "attestation", |enclave| {
        let measurements = req.measurements.unwrap_or_else(|| enclave.measurements().to_vec());
        let attestation_document = enclave.generate_attestation(&req.manifest_hash, &measurements)?;
        Ok(AttestationResponse { attestation_document })
    })
}

async fn export(State(state): State<Arc<AppState>>, Json(req): Json<ExportRequest>) -> ApiResult<ExportedKey> {
    observe(&state, "export", |enclave| {
        enclave.export_key(&req.manifest_envelope, &req.attestation_document)
    })
}

async fn inject(State(state): State<Arc<AppState>>, Json(exported): Json<ExportedKey>) -> ApiResult<SuccessResponse> {
    observe(&state, "inject", |enclave| {
        enclave.inject_key(&exported)?;
        Ok(SuccessResponse { success: true })
    })
}

async fn derive(State(state): State<Arc<AppState>>, Json(req): Json<DeriveRequest>) -> ApiResult<DerivedSecret> {
    observe(&state, "derive", |enclave| enclave.derive_and_seal(req.strength_bits, req.passphrase))
}

async fn validate(State(state): State<Arc<AppState>>, Json(req): Json<ValidateRequest>) -> ApiResult<Validation> {
    observe(&state, "validate", |enclave| enclave.validate(&req.sealed_secret))
}

async fn node_info(State(state): State<Arc<AppState>>) -> ApiResult<NodeInfoResponse> {
    let status = state.enclave.status().map_err(|e| reject("node_info", e))?;
    Ok(Json(NodeInfoResponse {
        version: env!("CARGO_PKG_VERSION").into(),
        attestor: hex::encode(qkey::Attestor::identity(state.enclave.attestor())),
        phase: status.phase,
        measurements: state.enclave.measurements().to_vec(),
    }))
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(node_info))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/genesis", post(genesis))
        .route("/boot/standard", post(boot_standard))
        .route("/shares", post(shares))
        .route("/manifest", post(share_manifest))
        .route("/attestation", post(attestation))
        .route("/export", post(export))
        .route("/inject", post(inject))
        .route("/derive", post(derive))
        .route("/validate", post(validate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
