//! Outbound operator notifications
//!
//! Alerts are fire-and-forget: every caller logs a delivery failure and
//! carries on.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

/// Alert categories understood by the notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NewBridgeEvent,
    SuccessfulRelay,
    SystemError,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::NewBridgeEvent => "new_bridge_event",
            AlertType::SuccessfulRelay => "successful_relay",
            AlertType::SystemError => "system_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
    pub data: serde_json::Value,
}

impl Alert {
    pub fn new(alert_type: AlertType, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            alert_type,
            message: message.into(),
            data,
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: Alert) -> Result<()>;
}

/// Writes alerts to the log only
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        match alert.alert_type {
            AlertType::SystemError => error!(
                alert_type = alert.alert_type.as_str(),
                data = %alert.data,
                "{}", alert.message
            ),
            _ => info!(
                alert_type = alert.alert_type.as_str(),
                data = %alert.data,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook
pub struct WebhookAlertSink {
    url: String,
    client: Client,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("Failed to build webhook HTTP client")?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send_alert(&self, alert: Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&alert)
            .send()
            .await
            .wrap_err_with(|| format!("Failed to deliver {} alert", alert.alert_type.as_str()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!(
                "Alert webhook rejected {} alert with status {}",
                alert.alert_type.as_str(),
                status
            ));
        }

        Ok(())
    }
}
