use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::display::Display;
use crate::display::DisplayAction;
use crate::display::DisplayError;
use crate::engine::EngineHandle;
use crate::engine::LightStatus;
use crate::engine::Preset;
use crate::engine::Rgb;
use crate::engine::MAX_BRIGHTNESS;
use crate::error::ControlError;
use crate::weather::WeatherClient;
use crate::weather::WeatherError;
use crate::weather::WeatherReport;

/// Response for the /ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    lights: usize,
    presets: usize,
}

#[derive(Deserialize)]
struct BrightnessRequest {
    brightness: i64,
}

#[derive(Deserialize)]
struct ColorRequest {
    r: u8,
    g: u8,
    b: u8,
}

#[derive(Deserialize)]
struct DisplayRequest {
    action: DisplayAction,
}

#[derive(Debug, Deserialize)]
struct UpdatesQuery {
    #[serde(default)]
    since: u64,
}

/// Shared application state
pub struct AppState {
    pub engine: EngineHandle,
    pub weather: WeatherClient,
    pub display: Display,
    pub version: &'static str,
}

impl AppState {
    pub fn new(engine: EngineHandle, weather: WeatherClient, display: Display) -> Self {
        Self {
            engine,
            weather,
            display,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Every way a request can fail, rendered as `{"error", "kind"}`
#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Weather(#[from] WeatherError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Control(e) => match e {
                ControlError::LightNotFound(_) | ControlError::PresetNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ControlError::UnsupportedCapability { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ControlError::Vendor { .. } | ControlError::PartialFailure { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                ControlError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Weather(WeatherError::Disabled) => StatusCode::NOT_FOUND,
            ApiError::Weather(_) => StatusCode::BAD_GATEWAY,
            ApiError::Display(DisplayError::NotConfigured(_)) => StatusCode::NOT_FOUND,
            ApiError::Display(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Control(e) => e.kind(),
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Weather(WeatherError::Disabled) => "not_found",
            ApiError::Weather(_) => "weather_error",
            ApiError::Display(DisplayError::NotConfigured(_)) => "not_found",
            ApiError::Display(_) => "display_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let ApiError::Control(ControlError::PartialFailure { failures, .. }) = &self {
            body["failures"] = failures
                .iter()
                .map(|(light, error)| json!({"light": light, "error": error.to_string()}))
                .collect();
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Handler for GET /ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> Result<Json<InfoResponse>, ApiError> {
    tracing::debug!("Handling /info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let counts = state.engine.info().await?;

    Ok(Json(InfoResponse {
        version: state.version.to_string(),
        hostname,
        lights: counts.lights,
        presets: counts.presets,
    }))
}

#[tracing::instrument(skip(state))]
async fn list_lights(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LightStatus>>, ApiError> {
    Ok(Json(state.engine.list_lights().await?))
}

#[tracing::instrument(skip(state, payload))]
async fn set_brightness(
    State(state): State<Arc<AppState>>,
    Path(light): Path<String>,
    payload: Result<Json<BrightnessRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let brightness = u8::try_from(request.brightness)
        .ok()
        .filter(|b| *b <= MAX_BRIGHTNESS)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "brightness must be between 0 and {}, got {}",
                MAX_BRIGHTNESS, request.brightness
            ))
        })?;

    let applied = state.engine.set_brightness(&light, brightness).await?;
    Ok(Json(json!({
        "status": "ok",
        "light": light,
        "brightness": applied.brightness,
    })))
}

#[tracing::instrument(skip(state, payload))]
async fn set_color(
    State(state): State<Arc<AppState>>,
    Path(light): Path<String>,
    payload: Result<Json<ColorRequest>, JsonRejection>,
) -> ApiResult {
    let Json(ColorRequest { r, g, b }) = payload?;
    let color = Rgb::new(r, g, b);

    state.engine.set_color(&light, color).await?;
    Ok(Json(json!({
        "status": "ok",
        "light": light,
        "color": color,
    })))
}

#[tracing::instrument(skip(state))]
async fn list_presets(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Preset>>, ApiError> {
    Ok(Json(state.engine.list_presets().await?))
}

#[tracing::instrument(skip(state))]
async fn apply_preset(State(state): State<Arc<AppState>>, Path(preset): Path<String>) -> ApiResult {
    state.engine.apply_preset(&preset).await?;
    Ok(Json(json!({"status": "ok", "preset": preset})))
}

#[tracing::instrument(skip(state, payload))]
async fn score_update(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = payload?;
    let Value::Object(alert) = payload else {
        return Err(ApiError::BadRequest(
            "score update must be a JSON object".to_string(),
        ));
    };

    let alert_id = state.engine.score_update(alert).await?;
    Ok(Json(json!({"status": "ok", "alert_id": alert_id})))
}

#[tracing::instrument(skip(state))]
async fn updates(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UpdatesQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let alerts = state.engine.alerts_since(query.since).await?;
    Ok(Json(json!({"alerts": alerts})))
}

#[tracing::instrument(skip(state))]
async fn test_alert(State(state): State<Arc<AppState>>) -> ApiResult {
    let alert_id = state.engine.test_alert().await?;
    Ok(Json(json!({"status": "ok", "alert_id": alert_id})))
}

#[tracing::instrument(skip(state))]
async fn weather(State(state): State<Arc<AppState>>) -> Result<Json<WeatherReport>, ApiError> {
    Ok(Json(state.weather.report().await?))
}

#[tracing::instrument(skip(state, payload))]
async fn display(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DisplayRequest>, JsonRejection>,
) -> ApiResult {
    let Json(DisplayRequest { action }) = payload?;
    state.display.set(action).await?;
    Ok(Json(json!({"status": "ok", "display": action.to_string()})))
}

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/info", get(info))
        .route("/lights", get(list_lights))
        .route("/lights/:id", post(set_brightness))
        .route("/lights/:id/color", post(set_color))
        .route("/presets", get(list_presets))
        .route("/presets/:id", post(apply_preset))
        .route("/score-update", post(score_update))
        .route("/updates", get(updates))
        .route("/test-alert", post(test_alert))
        .route("/weather", get(weather))
        .route("/display", post(display))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Serves until `shutdown_rx` fires, then finishes in-flight requests and
/// returns.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let app = create_router(Arc::new(state));

    tracing::info!("Starting HTTP API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::adapters::mock::Call;
    use crate::config::DisplayConfig;
    use crate::config::ScoresConfig;
    use crate::config::WeatherConfig;
    use crate::engine::tests::fixture;
    use crate::engine::tests::Fixture;
    use crate::engine::LightState;

    struct TestApp {
        router: Router,
        caseta: crate::adapters::mock::MockAdapter,
        tuya: crate::adapters::mock::MockAdapter,
    }

    fn app() -> TestApp {
        let Fixture {
            engine,
            caseta,
            tuya,
        } = fixture(ScoresConfig::default());
        let (handle, _task) = engine.spawn();
        let weather = WeatherClient::new(
            WeatherConfig {
                enabled: false,
                ..WeatherConfig::default()
            },
            None,
        )
        .unwrap();
        let state = AppState::new(handle, weather, Display::new(DisplayConfig::default()));

        TestApp {
            router: create_router(Arc::new(state)),
            caseta,
            tuya,
        }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_ping() {
        let app = app();
        let (status, body) = call(&app.router, "GET", "/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_info_counts() {
        let app = app();
        let (status, body) = call(&app.router, "GET", "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["lights"], 3);
        assert_eq!(body["presets"], 2);
        assert!(body["hostname"].is_string());
    }

    #[tokio::test]
    async fn test_set_brightness_then_list() {
        let app = app();
        let (status, body) =
            call(&app.router, "POST", "/lights/parlor", Some(r#"{"brightness": 40}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "ok", "light": "parlor", "brightness": 40})
        );

        let (status, body) = call(&app.router, "GET", "/lights", None).await;
        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(body[0], @r#"
        {
          "brightness": 40,
          "capabilities": [
            "brightness"
          ],
          "id": "parlor",
          "name": "Dimmer parlor",
          "on": true,
          "vendor": "caseta"
        }
        "#);
    }

    #[tokio::test]
    async fn test_brightness_out_of_range() {
        let app = app();
        for body in [r#"{"brightness": 101}"#, r#"{"brightness": -1}"#, r#"{"level": 5}"#, "nope"] {
            let (status, reply) = call(&app.router, "POST", "/lights/parlor", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
            assert_eq!(reply["kind"], "bad_request");
        }
        assert!(app.caseta.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_light() {
        let app = app();
        let (status, body) =
            call(&app.router, "POST", "/lights/porch", Some(r#"{"brightness": 40}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({"error": "Unknown light: porch", "kind": "not_found"})
        );

        let (status, _) = call(
            &app.router,
            "POST",
            "/lights/porch/color",
            Some(r#"{"r": 1, "g": 2, "b": 3}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(app.caseta.calls().is_empty());
        assert!(app.tuya.calls().is_empty());
    }

    #[tokio::test]
    async fn test_color_on_dimmer() {
        let app = app();
        let (status, body) = call(
            &app.router,
            "POST",
            "/lights/parlor/color",
            Some(r#"{"r": 255, "g": 0, "b": 0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "unsupported_capability");
        assert!(app.caseta.calls().is_empty());
    }

    #[tokio::test]
    async fn test_color_on_bulb() {
        let app = app();
        let (status, body) = call(
            &app.router,
            "POST",
            "/lights/kitchen_left/color",
            Some(r#"{"r": 255, "g": 147, "b": 41}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "ok", "light": "kitchen_left", "color": [255, 147, 41]})
        );
        assert_eq!(
            app.tuya.commands(),
            vec![Call::SetColor {
                light: "kitchen_left".to_string(),
                color: Rgb::new(255, 147, 41),
                brightness: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_apply_preset() {
        let app = app();
        let (status, body) = call(&app.router, "POST", "/presets/off", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "preset": "off"}));
        assert_eq!(app.caseta.device("parlor"), Some(LightState::off()));
        assert_eq!(app.tuya.device("kitchen_left"), Some(LightState::off()));

        let (status, body) = call(&app.router, "POST", "/presets/party", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_preset_partial_failure() {
        let app = app();
        app.tuya.fail("kitchen_left");

        let (status, body) = call(&app.router, "POST", "/presets/movie", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        insta::assert_json_snapshot!(body, @r#"
        {
          "error": "Preset 'movie' failed on 1 light(s)",
          "failures": [
            {
              "error": "Light 'kitchen_left': connection failed: kitchen_left unreachable",
              "light": "kitchen_left"
            }
          ],
          "kind": "partial_failure"
        }
        "#);
    }

    #[tokio::test]
    async fn test_list_presets() {
        let app = app();
        let (status, body) = call(&app.router, "GET", "/presets", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["movie", "off"]);
    }

    #[tokio::test]
    async fn test_score_updates() {
        let app = app();
        let (status, body) = call(&app.router, "POST", "/score-update", Some("[1, 2]")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");

        let alert = r#"{"game_id": "g1", "home": "DUKE", "away": "UNC", "home_score": 3, "away_score": 0}"#;
        let (status, body) = call(&app.router, "POST", "/score-update", Some(alert)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "alert_id": 1}));

        let (status, body) = call(&app.router, "POST", "/test-alert", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alert_id"], 2);

        let (_, body) = call(&app.router, "GET", "/updates?since=1", None).await;
        let alerts = body["alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["alert_id"], 2);

        let (_, body) = call(&app.router, "GET", "/updates", None).await;
        assert_eq!(body["alerts"].as_array().unwrap().len(), 2);

        let (status, _) = call(&app.router, "GET", "/updates?since=soon", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_weather_disabled() {
        let app = app();
        let (status, body) = call(&app.router, "GET", "/weather", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_display_not_configured() {
        let app = app();
        let (status, body) = call(&app.router, "POST", "/display", Some(r#"{"action": "on"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "no command configured for display on");

        let (status, _) = call(&app.router, "POST", "/display", Some(r#"{"action": "dim"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
