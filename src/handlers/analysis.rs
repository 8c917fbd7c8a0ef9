//! Risk analysis, narration and chat history endpoints.
//!
//! `/analyze` accepts the raw scanner-editor text. Valid JSON of any shape is
//! forwarded to the model (the model itself explains what is missing); only text
//! that is not JSON at all is rejected here.

use crate::analysis::{EthosTier, RiskLevel, TransactionInput};
use crate::audio::pcm::{pcm_mime_type, PLAYBACK_SAMPLE_RATE};
use crate::error::{AppError, AppResult};
use crate::state::{AppState, ChatMessage};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
}

/// Analyze one transaction scan.
///
/// ## Returns:
/// `{ analysis, report, ethos_tier?, scanner_risk_level? }`. The last two are present
/// only when the input had the full transaction shape. Model failures still return 200
/// with the protocol-error verdict.
pub async fn analyze(state: web::Data<AppState>, body: String) -> AppResult<HttpResponse> {
    let input: Value = serde_json::from_str(body.trim())?;
    let scan = serde_json::from_value::<TransactionInput>(input.clone()).ok();
    if scan.is_none() {
        warn!("Scanner input does not match the transaction shape, forwarding as-is");
    }

    let config = state.get_config();
    let analysis = state.gemini.analyze(&config.gemini, &input).await;

    let ethos_score = scan.as_ref().map(|s| s.ethos_score);
    let scanner_risk_level = scan.as_ref().map(|s| RiskLevel::from_risk_score(s.risk_score));
    let tier = ethos_score.map(EthosTier::from_score);
    let report = analysis.report_text(ethos_score);

    state.append_messages([
        ChatMessage::scan_request(scan),
        ChatMessage::verdict(analysis.clone()),
    ]);

    info!(risk_level = ?analysis.risk_level, "Scan analyzed");

    Ok(HttpResponse::Ok().json(json!({
        "analysis": analysis,
        "report": report,
        "ethos_tier": tier.map(|t| json!({ "tier": t, "label": t.label() })),
        "scanner_risk_level": scanner_risk_level,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Synthesize narration as base64 PCM16.
pub async fn synthesize_speech(
    state: web::Data<AppState>,
    request: web::Json<SpeechRequest>,
) -> AppResult<HttpResponse> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(AppError::ValidationError("Narration text must not be empty".to_string()));
    }

    let config = state.get_config();
    let audio = state
        .gemini
        .synthesize_speech(&config.gemini, text)
        .await
        .ok_or_else(|| AppError::Upstream("Speech model returned no audio".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "audio": audio,
        "sample_rate": PLAYBACK_SAMPLE_RATE,
        "mime_type": pcm_mime_type(PLAYBACK_SAMPLE_RATE)
    })))
}

pub async fn list_messages(state: web::Data<AppState>) -> HttpResponse {
    let messages = state.messages();
    HttpResponse::Ok().json(json!({
        "count": messages.len(),
        "messages": messages
    }))
}

pub async fn clear_messages(state: web::Data<AppState>) -> HttpResponse {
    let removed = state.clear_messages();
    info!(removed, "Chat history cleared");
    HttpResponse::Ok().json(json!({
        "status": "success",
        "removed": removed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/analyze", web::post().to(analyze))
            .route("/speech", web::post().to(synthesize_speech))
            .route("/messages", web::get().to(list_messages))
            .route("/messages", web::delete().to(clear_messages));
    }

    // No API key is configured, so the model call fails fast without touching the network.
    #[actix_web::test]
    async fn test_analyze_falls_back_and_records_history() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_payload(r#"{"transaction_type": "ERC20_APPROVAL", "asset": "USDC", "ethos_score": 320, "risk_score": 78, "flags": []}"#)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["analysis"]["recommendation"], "CAUTION");
        assert_eq!(body["ethos_tier"]["tier"], "low_trust");
        assert_eq!(body["scanner_risk_level"], "HIGH");
        assert!(body["report"].as_str().unwrap().contains("ETHOS SCORE: 320"));

        let req = test::TestRequest::get().uri("/messages").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["messages"][0]["content"], "Analyzing ERC20_APPROVAL for USDC...");
        assert_eq!(body["messages"][1]["role"], "assistant");

        let req = test::TestRequest::delete().uri("/messages").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["removed"], 2);
        assert!(state.messages().is_empty());
    }

    #[actix_web::test]
    async fn test_analyze_partial_json_is_forwarded() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_payload(r#"{"asset": "USDC"}"#)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert!(body["ethos_tier"].is_null());
        assert!(body["report"].as_str().unwrap().contains("ETHOS SCORE: N/A"));
        assert_eq!(state.messages()[0].content, "Analyzing scanner input...");
    }

    #[actix_web::test]
    async fn test_analyze_rejects_non_json() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(routes)).await;

        let req = test::TestRequest::post().uri("/analyze").set_payload("not json").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.messages().is_empty());
    }

    #[actix_web::test]
    async fn test_speech_validation_and_upstream_failure() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/speech")
            .set_json(json!({"text": "   "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/speech")
            .set_json(json!({"text": "Do not sign this approval."}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_GATEWAY);
    }
}
