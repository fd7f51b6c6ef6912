//! Integration tests for the chart registry

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine as _;
use bytes::Bytes;
use chart_registry::{AuthConfig, RegistryBuilder, User};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use storage::{LocalDriver, MemoryStorage};
use tower::ServiceExt;

const BOUNDARY: &str = "chart-registry-test-boundary";

/// Helper to create a test registry
fn test_registry() -> axum::Router {
    let storage = MemoryStorage::with_buckets(&["test-registry"]);
    RegistryBuilder::new()
        .storage(storage.into())
        .bucket("test-registry")
        .base_url("http://charts.test")
        .with_stored_images()
        .build()
}

fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn chart(name: &str, version: &str) -> Vec<u8> {
    let chart_yaml = format!("apiVersion: v2\nname: {name}\nversion: {version}\ndescription: Test chart\n");
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(chart_yaml.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, format!("{name}/Chart.yaml"), chart_yaml.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn multipart_upload(filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"chart\"; filename=\"{filename}\"\r\nContent-Type: application/gzip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/chart")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'r>(response: &'r Response<Body>, name: &str) -> &'r str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

/// Push blobs and a manifest the way `helm push` does.
async fn helm_push(app: &axum::Router, repository: &str, archive: &[u8], tag: &str) -> Response<Body> {
    let config = br#"{"name":"demo","version":"1.0.0"}"#;
    for blob in [&config[..], archive] {
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/v2/{repository}/blobs/uploads/?digest={}", sha256(blob)),
                blob.to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.cncf.helm.config.v1+json",
            "digest": sha256(config),
            "size": config.len()
        },
        "layers": [{
            "mediaType": "application/vnd.cncf.helm.chart.content.v1.tar+gzip",
            "digest": sha256(archive),
            "size": archive.len()
        }]
    });

    app.clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/v2/{repository}/manifests/{tag}"))
                .header(header::CONTENT_TYPE, "application/vnd.oci.image.manifest.v1+json")
                .body(Body::from(serde_json::to_vec(&manifest).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_api_version_check() {
    let app = test_registry();

    let response = app.oneshot(request("GET", "/v2/", Body::empty())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
    let body = body_json(response).await;
    assert_eq!(body["apiVersion"], "2.0");
}

#[tokio::test]
async fn test_health() {
    let app = test_registry();
    let response = app.oneshot(request("GET", "/health", Body::empty())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, "OK");
}

#[tokio::test]
async fn test_chart_upload_updates_index() {
    let app = test_registry();
    let archive = chart("demo", "1.0.0");

    let response = app
        .clone()
        .oneshot(multipart_upload("demo-1.0.0.tgz", &archive))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(request("GET", "/index.yaml", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let index: serde_yaml::Value = serde_yaml::from_slice(&body_bytes(response).await).unwrap();
    let versions = index["entries"]["demo"].as_sequence().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["version"].as_str(), Some("1.0.0"));
    assert_eq!(
        versions[0]["digest"].as_str(),
        Some(hex::encode(Sha256::digest(&archive)).as_str())
    );
    assert_eq!(
        versions[0]["urls"][0].as_str(),
        Some("http://charts.test/charts/demo-1.0.0.tgz")
    );

    let response = app
        .clone()
        .oneshot(request("GET", "/charts/demo-1.0.0.tgz", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, archive);
}

#[tokio::test]
async fn test_duplicate_chart_upload_has_one_entry() {
    let app = test_registry();
    let archive = chart("demo", "1.0.0");

    for filename in ["demo-1.0.0.tgz", "renamed.tgz"] {
        let response = app
            .clone()
            .oneshot(multipart_upload(filename, &archive))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/index.yaml", Body::empty()))
        .await
        .unwrap();
    let index: serde_yaml::Value = serde_yaml::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(index["entries"]["demo"].as_sequence().unwrap().len(), 1);
}

#[tokio::test]
async fn test_chart_upload_rejections() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(multipart_upload("demo.zip", &chart("demo", "1.0.0")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(multipart_upload("demo-1.0.0.tgz", b"not a chart"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["code"], "MANIFEST_INVALID");

    let response = app
        .clone()
        .oneshot(request("GET", "/charts", Body::empty()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_chart_download_list_and_delete() {
    let app = test_registry();
    let archive = chart("demo", "1.0.0");
    app.clone()
        .oneshot(multipart_upload("demo-1.0.0.tgz", &archive))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request("GET", "/chart/demo/1.0.0", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, archive);

    let response = app
        .clone()
        .oneshot(request("GET", "/charts", Body::empty()))
        .await
        .unwrap();
    let charts = body_json(response).await;
    assert_eq!(charts[0]["name"], "demo");
    assert_eq!(charts[0]["versions"][0]["version"], "1.0.0");

    let response = app
        .clone()
        .oneshot(request("DELETE", "/chart/demo/1.0.0", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(request("GET", "/chart/demo/1.0.0", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(request("GET", "/index.yaml", Body::empty()))
        .await
        .unwrap();
    let index: serde_yaml::Value = serde_yaml::from_slice(&body_bytes(response).await).unwrap();
    assert!(index["entries"].as_mapping().unwrap().is_empty());
}

#[tokio::test]
async fn test_chunked_blob_upload() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request("POST", "/v2/demo/blobs/uploads/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = header_str(&response, "location").to_string();
    let uuid = header_str(&response, "docker-upload-uuid").to_string();
    assert!(location.contains(&uuid));

    let response = app
        .clone()
        .oneshot(request("PATCH", &location, "abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(header_str(&response, "range"), "0-2");

    let response = app
        .clone()
        .oneshot(request("GET", &location, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header_str(&response, "range"), "0-2");

    let digest = sha256(b"abc");
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("{location}?digest={digest}"),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header_str(&response, "docker-content-digest"), digest);

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/v2/demo/blobs/{digest}"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, "abc");

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("{location}?digest={digest}"),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_multi_chunk_upload_with_tail() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request("POST", "/v2/demo/blobs/uploads/", Body::empty()))
        .await
        .unwrap();
    let location = header_str(&response, "location").to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "0-4")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(header_str(&response, "range"), "0-4");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .header(header::CONTENT_RANGE, "0-4")
                .body(Body::from("again"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);

    let digest = sha256(b"hello, world");
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("{location}?digest={digest}"),
            ", world",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(request("HEAD", &format!("/v2/demo/blobs/{digest}"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-length"), "12");
}

#[tokio::test]
async fn test_finalize_digest_mismatch() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request("POST", "/v2/demo/blobs/uploads/", Body::empty()))
        .await
        .unwrap();
    let location = header_str(&response, "location").to_string();

    app.clone()
        .oneshot(request("PATCH", &location, "abc"))
        .await
        .unwrap();

    let wrong = sha256(b"abd");
    let response = app
        .clone()
        .oneshot(request("PUT", &format!("{location}?digest={wrong}"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errors"][0]["code"], "DIGEST_INVALID");

    let response = app
        .clone()
        .oneshot(request("HEAD", &format!("/v2/demo/blobs/{wrong}"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(request("DELETE", &location, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_finalize_unknown_upload_conflicts() {
    let app = test_registry();
    let digest = sha256(b"abc");

    for upload in [uuid::Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/v2/demo/blobs/uploads/{upload}?digest={digest}"),
                "abc",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await["errors"][0]["code"],
            "BLOB_UPLOAD_UNKNOWN"
        );
    }
}

#[tokio::test]
async fn test_monolithic_blob_put() {
    let app = test_registry();
    let data = b"Hello, OCI Registry!";
    let digest = sha256(data);

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/v2/demo/blobs/{digest}"),
            Bytes::from_static(data),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(request("GET", &format!("/v2/demo/blobs/{digest}"), Body::empty()))
        .await
        .unwrap();
    assert_eq!(header_str(&response, "docker-content-digest"), digest);
    assert_eq!(body_bytes(response).await, &data[..]);
}

#[tokio::test]
async fn test_manifest_not_found() {
    let app = test_registry();

    for method in ["GET", "HEAD"] {
        let response = app
            .clone()
            .oneshot(request(method, "/v2/missing/manifests/1.0.0", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_blob_not_found_and_invalid_digest() {
    let app = test_registry();

    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/v2/demo/blobs/{}", sha256(b"missing")),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["errors"][0]["code"], "BLOB_UNKNOWN");

    let response = app
        .clone()
        .oneshot(request("GET", "/v2/demo/blobs/md5:abc", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_helm_push_flow() {
    let app = test_registry();
    let archive = chart("demo", "1.0.0");

    let response = helm_push(&app, "demo", &archive, "1.0.0").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = header_str(&response, "docker-content-digest").to_string();

    let response = app
        .clone()
        .oneshot(request("GET", "/index.yaml", Body::empty()))
        .await
        .unwrap();
    let index: serde_yaml::Value = serde_yaml::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(index["entries"]["demo"][0]["version"].as_str(), Some("1.0.0"));

    for reference in ["1.0.0", digest.as_str()] {
        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/v2/demo/manifests/{reference}"),
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "docker-content-digest"), digest);
        assert_eq!(
            header_str(&response, "content-type"),
            "application/vnd.oci.image.manifest.v1+json"
        );
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/v2/demo/tags/list", Body::empty()))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "name": "demo", "tags": ["1.0.0"] })
    );
}

#[tokio::test]
async fn test_helm_push_missing_layer() {
    let app = test_registry();
    let archive = chart("demo", "1.0.0");

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.cncf.helm.config.v1+json",
            "digest": sha256(b"{}"),
            "size": 2
        },
        "layers": [{
            "mediaType": "application/vnd.cncf.helm.chart.content.v1.tar+gzip",
            "digest": sha256(&archive),
            "size": archive.len()
        }]
    });

    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/v2/demo/manifests/1.0.0",
            serde_json::to_vec(&manifest).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["errors"][0]["code"],
        "MANIFEST_BLOB_UNKNOWN"
    );
}

#[tokio::test]
async fn test_image_manifest_catalog_and_delete() {
    let app = test_registry();
    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": sha256(b"config"),
            "size": 6
        },
        "layers": []
    }))
    .unwrap();

    for tag in ["latest", "1.25"] {
        let response = app
            .clone()
            .oneshot(request("PUT", &format!("/v2/nginx/manifests/{tag}"), manifest.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    app.clone()
        .oneshot(multipart_upload("demo-1.0.0.tgz", &chart("demo", "1.0.0")))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(request("GET", "/v2/_catalog", Body::empty()))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        serde_json::json!({ "repositories": ["demo", "nginx"] })
    );

    let response = app
        .clone()
        .oneshot(request("GET", "/v2/nginx/tags/list", Body::empty()))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["tags"], serde_json::json!(["1.25", "latest"]));

    let response = app
        .clone()
        .oneshot(request("DELETE", "/v2/nginx/manifests/latest", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(request("DELETE", "/v2/nginx/manifests/latest", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generic_artifact_manifests_are_stored() {
    let app = test_registry();
    let artifacts = [
        (
            "v1",
            "application/vnd.oci.artifact.manifest.v1+json",
            br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.artifact.manifest.v1+json","layers":[]}"#.to_vec(),
        ),
        (
            "v2",
            "application/vnd.oci.image.manifest.v1+json",
            br#"{"schemaVersion":2,"config":{"mediaType":"application/vnd.example.config"},"layers":[]}"#.to_vec(),
        ),
    ];

    for (tag, content_type, manifest) in &artifacts {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/v2/misc/manifests/{tag}"))
                    .header(header::CONTENT_TYPE, *content_type)
                    .body(Body::from(manifest.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header_str(&response, "docker-content-digest"), sha256(manifest));

        let response = app
            .clone()
            .oneshot(request("GET", &format!("/v2/misc/manifests/{tag}"), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, manifest.as_slice());
    }

    let response = app
        .clone()
        .oneshot(request("PUT", "/v2/misc/manifests/v3", "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errors"][0]["code"], "MANIFEST_INVALID");
}

#[tokio::test]
async fn test_basic_auth_gate() {
    let app = RegistryBuilder::new()
        .auth(AuthConfig::basic(vec![User::new("admin", "secret")]))
        .build();

    let response = app
        .clone()
        .oneshot(request("GET", "/v2/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header_str(&response, "www-authenticate"),
        r#"Basic realm="Helm Registry""#
    );
    assert_eq!(body_json(response).await["errors"][0]["code"], "UNAUTHORIZED");

    let credentials = base64::engine::general_purpose::STANDARD.encode("admin:wrong");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = base64::engine::general_purpose::STANDARD.encode("admin:secret");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v2/")
                .header(header::AUTHORIZATION, format!("Basic {credentials}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The Helm repository routes are not gated.
    let response = app
        .clone()
        .oneshot(request("GET", "/index.yaml", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_local_storage_backend() {
    let dir = tempfile::tempdir().unwrap();
    let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let app = RegistryBuilder::new()
        .storage(LocalDriver::new(root.clone()).into())
        .bucket("registry")
        .build();

    let archive = chart("demo", "2.0.0");
    let response = app
        .clone()
        .oneshot(multipart_upload("demo-2.0.0.tgz", &archive))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    assert!(root.join("registry/charts/demo-2.0.0.tgz").exists());
    assert!(root.join("registry/index.yaml").exists());
}
