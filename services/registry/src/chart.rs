//! Helm repository routes

use axum::Router;
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::json;

use crate::error::{RegistryError, RegistryResult};
use crate::helm::ChartGroup;
use crate::registry::Registry;

const CHART_FIELD: &str = "chart";
const CHART_CONTENT_TYPE: &str = "application/gzip";

/// Router for the Helm chart repository
pub fn router() -> Router<Registry> {
    Router::new()
        .route("/index.yaml", get(get_index))
        .route("/chart", post(upload_chart))
        .route("/chart/{name}/{version}", get(get_chart).delete(delete_chart))
        .route("/charts", get(list_charts))
        .route("/charts/{filename}", get(get_chart_file))
}

async fn get_index(State(registry): State<Registry>) -> RegistryResult<Response> {
    let index = registry.charts().index().load_or_rebuild().await?;
    Ok(([(header::CONTENT_TYPE, "application/x-yaml")], index).into_response())
}

fn tarball(data: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, CHART_CONTENT_TYPE)], data).into_response()
}

async fn get_chart(
    State(registry): State<Registry>,
    Path((name, version)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let data = registry.charts().get_chart(&name, &version).await?;
    Ok(tarball(data))
}

async fn get_chart_file(
    State(registry): State<Registry>,
    Path(filename): Path<String>,
) -> RegistryResult<Response> {
    let data = registry.charts().get_chart_file(&filename).await?;
    Ok(tarball(data))
}

/// Upload a chart as the multipart field `chart`
async fn upload_chart(
    State(registry): State<Registry>,
    mut multipart: Multipart,
) -> RegistryResult<Response> {
    let invalid = |err: axum::extract::multipart::MultipartError| {
        RegistryError::InvalidChart(format!("reading upload: {err}"))
    };

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        if field.name() != Some(CHART_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(invalid)?;
        let metadata = registry.charts().save_chart(&data, &filename).await?;

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "Chart uploaded successfully",
                "name": metadata.name,
                "version": metadata.version,
            })),
        )
            .into_response());
    }

    Err(RegistryError::InvalidChart("no chart file provided".into()))
}

async fn delete_chart(
    State(registry): State<Registry>,
    Path((name, version)): Path<(String, String)>,
) -> RegistryResult<Json<serde_json::Value>> {
    registry.charts().delete_chart(&name, &version).await?;
    Ok(Json(json!({ "message": "Chart deleted successfully" })))
}

async fn list_charts(State(registry): State<Registry>) -> RegistryResult<Json<Vec<ChartGroup>>> {
    Ok(Json(registry.charts().list_charts().await?))
}
