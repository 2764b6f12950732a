//! HTTP control API.
//!
//! Three JSON endpoints over the engine's query facade:
//!
//! - `GET /v1/default-gateway` — current primary default gateway
//! - `GET /v1/interfaces` — per-interface health with timestamps
//! - `POST /v1/gateway` — force a new primary default gateway
//!
//! Engine outcomes map onto real HTTP codes; a forced gateway change
//! that fails reports its failure instead of a blanket 200.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use uplink_core::{ErrorCode, IfaceStatusReport, QueryFacade, Status};

pub fn router(facade: Arc<QueryFacade>) -> Router {
    Router::new()
        .route("/v1/default-gateway", get(get_default_gw))
        .route("/v1/interfaces", get(get_if_status))
        .route("/v1/gateway", post(force_new_gateway))
        .with_state(facade)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultGwResponse {
    pub default_gw_interface: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IfStatusResponse {
    pub interface_status: Vec<IfaceStatusReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForceNewGatewayRequest {
    pub if_name: String,
}

/// Engine outcome as rendered into response bodies.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub code: String,
    pub message: String,
}

impl From<&Status> for StatusBody {
    fn from(status: &Status) -> Self {
        StatusBody {
            code: status.code().as_str().to_string(),
            message: status.message().to_string(),
        }
    }
}

async fn get_default_gw(State(facade): State<Arc<QueryFacade>>) -> Response {
    match facade.default_gateway() {
        Some(gw) => (
            StatusCode::OK,
            Json(DefaultGwResponse {
                default_gw_interface: gw,
            }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusBody {
                code: ErrorCode::NotFound.as_str().to_string(),
                message: "could not identify default gateway".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn get_if_status(State(facade): State<Arc<QueryFacade>>) -> Json<IfStatusResponse> {
    Json(IfStatusResponse {
        interface_status: facade.interface_statuses(),
    })
}

async fn force_new_gateway(
    State(facade): State<Arc<QueryFacade>>,
    Json(request): Json<ForceNewGatewayRequest>,
) -> impl IntoResponse {
    let status = facade.force_new_gateway(&request.if_name);
    (http_code(status.code()), Json(StatusBody::from(&status)))
}

fn http_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Ok | ErrorCode::NoOp => StatusCode::OK,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidArguments => StatusCode::BAD_REQUEST,
        ErrorCode::PermissionError => StatusCode::FORBIDDEN,
        ErrorCode::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_http() {
        assert_eq!(http_code(ErrorCode::Ok), StatusCode::OK);
        assert_eq!(http_code(ErrorCode::NoOp), StatusCode::OK);
        assert_eq!(http_code(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            http_code(ErrorCode::InvalidArguments),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_code(ErrorCode::UnknownError),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
