//! Bot screening for registration and login via reCAPTCHA Enterprise.
//!
//! Like the payment providers, the verifier sits behind a trait object on
//! `AppState`. When no verifier is configured the check is skipped.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::RecaptchaConfig;
use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::payments::{ProviderFuture, bounded, error_for_status, http_client, transport_error};

const PROVIDER: &str = "reCAPTCHA";

pub const ACTION_REGISTER: &str = "register";
pub const ACTION_LOGIN: &str = "login";

/// What the provider concluded about a client token.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub valid: bool,
    pub invalid_reason: Option<String>,
    pub action: Option<String>,
    /// 0.0 (likely bot) to 1.0 (likely human)
    pub score: f32,
}

pub trait CaptchaVerifier: Send + Sync {
    fn assess<'a>(&'a self, token: &'a str, expected_action: &'a str) -> ProviderFuture<'a, Assessment>;

    /// Lowest score accepted as human.
    fn min_score(&self) -> f32;
}

/// Reject the request unless `token` passes assessment for `action`.
/// A no-op when no verifier is configured.
pub async fn check(state: &AppState, token: Option<&str>, action: &str) -> Result<()> {
    let Some(verifier) = state.captcha.as_deref() else {
        return Ok(());
    };

    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest(msg::CAPTCHA_REQUIRED.into()))?;

    let assessment = bounded(state.provider_timeout, verifier.assess(token, action)).await?;

    if !assessment.valid {
        tracing::info!(
            reason = assessment.invalid_reason.as_deref().unwrap_or("unknown"),
            action,
            "Rejected invalid captcha token"
        );
        return Err(AppError::BadRequest(msg::CAPTCHA_FAILED.into()));
    }
    if assessment.action.as_deref() != Some(action) {
        tracing::info!(
            expected = action,
            got = assessment.action.as_deref().unwrap_or(""),
            "Rejected captcha token for another action"
        );
        return Err(AppError::BadRequest(msg::CAPTCHA_FAILED.into()));
    }
    if assessment.score < verifier.min_score() {
        tracing::info!(score = assessment.score, action, "Rejected low captcha score");
        return Err(AppError::BadRequest(msg::CAPTCHA_LOW_SCORE.into()));
    }
    Ok(())
}

// ============ reCAPTCHA Enterprise REST ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentRequest<'a> {
    event: Event<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Event<'a> {
    token: &'a str,
    site_key: &'a str,
    expected_action: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentResponse {
    #[serde(default)]
    token_properties: Option<TokenProperties>,
    #[serde(default)]
    risk_analysis: Option<RiskAnalysis>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenProperties {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RiskAnalysis {
    #[serde(default)]
    score: f32,
}

impl AssessmentResponse {
    fn into_assessment(self) -> Assessment {
        let props = self.token_properties;
        Assessment {
            valid: props.as_ref().is_some_and(|p| p.valid),
            invalid_reason: props.as_ref().and_then(|p| p.invalid_reason.clone()),
            action: props.and_then(|p| p.action),
            score: self.risk_analysis.map(|r| r.score).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecaptchaClient {
    client: Client,
    project_id: String,
    site_key: String,
    api_key: String,
    api_base: String,
    min_score: f32,
}

impl RecaptchaClient {
    pub fn new(config: &RecaptchaConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            project_id: config.project_id.clone(),
            site_key: config.site_key.clone(),
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            min_score: config.min_score,
        })
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Option<Arc<dyn CaptchaVerifier>>> {
        match &config.recaptcha {
            Some(c) => Ok(Some(Arc::new(Self::new(c, config.provider_timeout)?) as Arc<dyn CaptchaVerifier>)),
            None => Ok(None),
        }
    }

    pub async fn create_assessment(&self, token: &str, expected_action: &str) -> Result<Assessment> {
        let body = AssessmentRequest {
            event: Event {
                token,
                site_key: &self.site_key,
                expected_action,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/projects/{}/assessments?key={}",
                self.api_base,
                urlencoding::encode(&self.project_id),
                urlencoding::encode(&self.api_key)
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(error_for_status(PROVIDER, response).await);
        }

        let assessment: AssessmentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse reCAPTCHA response: {}", e)))?;
        Ok(assessment.into_assessment())
    }
}

impl CaptchaVerifier for RecaptchaClient {
    fn assess<'a>(&'a self, token: &'a str, expected_action: &'a str) -> ProviderFuture<'a, Assessment> {
        Box::pin(self.create_assessment(token, expected_action))
    }

    fn min_score(&self) -> f32 {
        self.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_reads_token_properties_and_score() {
        let response: AssessmentResponse = serde_json::from_value(serde_json::json!({
            "name": "projects/123/assessments/abc",
            "tokenProperties": { "valid": true, "action": "login", "hostname": "shop.example.com" },
            "riskAnalysis": { "score": 0.9, "reasons": [] }
        }))
        .unwrap();

        let assessment = response.into_assessment();
        assert!(assessment.valid);
        assert_eq!(assessment.action.as_deref(), Some("login"));
        assert!((assessment.score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_properties_read_as_invalid() {
        let response: AssessmentResponse = serde_json::from_value(serde_json::json!({
            "tokenProperties": { "valid": false, "invalidReason": "EXPIRED" }
        }))
        .unwrap();

        let assessment = response.into_assessment();
        assert!(!assessment.valid);
        assert_eq!(assessment.invalid_reason.as_deref(), Some("EXPIRED"));
        assert_eq!(assessment.score, 0.0);
    }
}
