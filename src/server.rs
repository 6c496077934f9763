use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::encoder::{to_cents, Estimator, PredictionRequest, RawRequest};
use crate::error::EstimateError;
use crate::store::ArtifactStore;

// ---------- Response types ----------

#[derive(Serialize, Debug, PartialEq)]
pub struct BrandsOut {
    pub brands: Vec<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct FuelTypesOut {
    pub fuel_types: Vec<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct TransmissionTypesOut {
    pub transmission_types: Vec<String>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct EstimateOut {
    pub estimated_price: f64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ReloadOut {
    pub status: &'static str,
    pub columns: usize,
    pub scaler: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct HealthOut {
    pub status: &'static str,
    pub columns: usize,
}

type ApiError = (StatusCode, Json<Value>);

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub estimator: Estimator,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Arc<ArtifactStore>, config: ServerConfig) -> Self {
        Self {
            estimator: Estimator::new(store),
            config: Arc::new(config),
        }
    }

    fn store(&self) -> &ArtifactStore {
        self.estimator.store()
    }
}

fn error_response(e: EstimateError) -> ApiError {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!("request failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn bad_form(reason: impl std::fmt::Display) -> ApiError {
    form_rejected(StatusCode::BAD_REQUEST, reason)
}

fn form_rejected(status: StatusCode, reason: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(json!({ "error": format!("invalid form body: {reason}") })),
    )
}

// ---------- Extractors ----------

/// Estimate form fields, sent either urlencoded or as `multipart/form-data`.
pub struct PriceForm(pub RawRequest);

#[async_trait]
impl<S> FromRequest<S> for PriceForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(raw) = Form::<RawRequest>::from_request(req, state)
                .await
                .map_err(|e| form_rejected(e.status(), e.body_text()))?;
            return Ok(PriceForm(raw));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| form_rejected(e.status(), e.body_text()))?;
        let mut fields = serde_json::Map::new();
        while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let text = field.text().await.map_err(bad_form)?;
            fields.entry(name).or_insert(Value::String(text));
        }
        let raw = serde_json::from_value(Value::Object(fields)).map_err(bad_form)?;
        Ok(PriceForm(raw))
    }
}

// ---------- Handlers ----------

pub async fn brand_names(State(state): State<AppState>) -> Result<Json<BrandsOut>, ApiError> {
    let brands = state.store().list_brands().map_err(error_response)?;
    Ok(Json(BrandsOut { brands }))
}

pub async fn fuel_types(State(state): State<AppState>) -> Result<Json<FuelTypesOut>, ApiError> {
    let fuel_types = state.store().list_fuel_types().map_err(error_response)?;
    Ok(Json(FuelTypesOut { fuel_types }))
}

pub async fn transmission_types(
    State(state): State<AppState>,
) -> Result<Json<TransmissionTypesOut>, ApiError> {
    let transmission_types = state
        .store()
        .list_transmission_types()
        .map_err(error_response)?;
    Ok(Json(TransmissionTypesOut { transmission_types }))
}

pub async fn predict_car_price(
    State(state): State<AppState>,
    PriceForm(raw): PriceForm,
) -> Result<Json<EstimateOut>, ApiError> {
    let req = PredictionRequest::try_from(&raw).map_err(|e| error_response(e.into()))?;
    let snap = state.store().snapshot().map_err(error_response)?;
    let v = snap.prepare(&req);

    // Debug signal so we can see what the model is actually fed
    if state.config.log_predictions {
        let sample: Vec<String> = snap
            .schema()
            .columns()
            .iter()
            .zip(v.as_slice())
            .filter(|(_, x)| **x != 0.0)
            .map(|(name, x)| format!("{}={:.3}", name, x))
            .collect();
        tracing::info!(
            "recv brand={} year={} in_dim={} nonzero={} features=[{}]",
            req.brand,
            req.year,
            v.len(),
            v.nonzero(),
            sample.join(", ")
        );
    }

    let estimated_price = snap
        .predict(&v)
        .and_then(to_cents)
        .map_err(error_response)?;
    Ok(Json(EstimateOut { estimated_price }))
}

pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadOut>, ApiError> {
    let snap = state
        .store()
        .load(&state.config.artifacts)
        .map_err(error_response)?;
    tracing::info!("artifacts reloaded on request");
    Ok(Json(ReloadOut {
        status: "reloaded",
        columns: snap.schema().len(),
        scaler: snap.has_scaler(),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    let out = match state.store().snapshot() {
        Ok(snap) => HealthOut {
            status: "ok",
            columns: snap.schema().len(),
        },
        Err(_) => HealthOut {
            status: "not_loaded",
            columns: 0,
        },
    };
    Json(out)
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get_brand_names", get(brand_names))
        .route("/get_fuel_types", get(fuel_types))
        .route("/get_transmission_types", get(transmission_types))
        .route("/predict_car_price", post(predict_car_price))
        .route("/reload", post(reload))
        .route("/health", get(health))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearModel;
    use crate::schema::ColumnSchema;
    use crate::store::{ArtifactPaths, Artifacts};
    use axum::body::Body;
    use tower::ServiceExt;

    fn state(loaded: bool) -> AppState {
        let store = Arc::new(ArtifactStore::new());
        if loaded {
            let schema = ColumnSchema::new(
                ["brand_audi", "fuel_diesel", "year", "km_driven", "owner"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            )
            .unwrap();
            let model = LinearModel {
                coefficients: vec![1000.0, 500.0, 1.0, -0.01, -100.0],
                intercept: 0.0,
                target_transform: Default::default(),
            };
            store.install(Artifacts::new(schema, Box::new(model), None).unwrap());
        }
        let config = ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            artifacts: ArtifactPaths::in_dir("/nonexistent"),
            log_predictions: true,
        };
        AppState::new(store, config)
    }

    fn form(fields: &[(&str, &str)]) -> RawRequest {
        let map: serde_json::Map<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        serde_json::from_value(Value::Object(map)).unwrap()
    }

    #[tokio::test]
    async fn lists_catalog_options() {
        let s = state(true);
        let Json(b) = brand_names(State(s.clone())).await.unwrap();
        assert_eq!(b.brands, vec!["audi"]);
        let Json(f) = fuel_types(State(s.clone())).await.unwrap();
        assert_eq!(f.fuel_types, vec!["diesel"]);
        let Json(t) = transmission_types(State(s)).await.unwrap();
        assert_eq!(t.transmission_types, vec!["manual", "automatic"]);
    }

    #[tokio::test]
    async fn predicts_and_rounds() {
        let raw = form(&[
            ("brand", "Audi"),
            ("year", "2018"),
            ("fuel_type", "diesel"),
            ("transmission", "automatic"),
            ("km_driven", "1234"),
            ("owner", "1"),
        ]);
        let Json(out) = predict_car_price(State(state(true)), PriceForm(raw)).await.unwrap();
        // 1000 + 500 + 2018 - 12.34 - 100
        assert_eq!(out.estimated_price, 3405.66);
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let raw = form(&[("brand", "audi"), ("year", "twenty")]);
        let (status, Json(body)) = predict_car_price(State(state(true)), PriceForm(raw))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("fuel_type"));
    }

    async fn post_form(content_type: &str, body: String) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/predict_car_price")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        let res = router(state(true)).oneshot(req).await.unwrap();
        let status = res.status();
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn router_accepts_multipart_forms() {
        let fields = [
            ("brand", "Audi"),
            ("year", "2018"),
            ("fuel type", "diesel"),
            ("transmission", "automatic"),
            ("km_driven", "1234"),
            ("owner", "1"),
        ];
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--XX\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str("--XX--\r\n");

        let (status, out) = post_form("multipart/form-data; boundary=XX", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["estimated_price"], 3405.66);
    }

    #[tokio::test]
    async fn router_accepts_urlencoded_forms() {
        let body = "brand=Audi&year=2018&fuel_type=diesel&transmission=automatic&km_driven=1234&owner=1";
        let (status, out) =
            post_form("application/x-www-form-urlencoded", body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out["estimated_price"], 3405.66);

        let (status, out) = post_form(
            "multipart/form-data; boundary=XX",
            "--XX\r\nContent-Disposition: form-data; name=\"brand\"\r\n\r\naudi\r\n--XX--\r\n".into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(out["error"].as_str().unwrap().contains("year"));
    }

    #[tokio::test]
    async fn unloaded_store_is_a_server_error() {
        let (status, _) = brand_names(State(state(false))).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let Json(h) = health(State(state(false))).await;
        assert_eq!(h.status, "not_loaded");
    }

    #[tokio::test]
    async fn failed_reload_reports_and_keeps_serving() {
        let s = state(true);
        let (status, Json(body)) = reload(State(s.clone())).await.unwrap_err();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let Json(h) = health(State(s)).await;
        assert_eq!(h, HealthOut { status: "ok", columns: 5 });
    }
}
