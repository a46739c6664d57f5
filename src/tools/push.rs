//! Push 工具：通过 Pushover 向用户手机发送通知
//!
//! 凭据来自环境变量 PUSHOVER_TOKEN / PUSHOVER_USER；未配置时不注册该工具。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::PushSection;
use crate::tools::registry::args_schema;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PushArgs {
    /// The text of the notification
    pub text: String,
}

pub struct PushNotificationTool {
    client: Client,
    endpoint: String,
    token: String,
    user: String,
}

impl PushNotificationTool {
    pub fn new(token: impl Into<String>, user: impl Into<String>, section: &PushSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: section.endpoint.clone(),
            token: token.into(),
            user: user.into(),
        }
    }

    pub fn from_env(section: &PushSection) -> Option<Self> {
        let token = std::env::var("PUSHOVER_TOKEN").ok().filter(|s| !s.is_empty())?;
        let user = std::env::var("PUSHOVER_USER").ok().filter(|s| !s.is_empty())?;
        Some(Self::new(token, user, section))
    }
}

#[async_trait]
impl Tool for PushNotificationTool {
    fn name(&self) -> &str {
        "send_push_notification"
    }

    fn description(&self) -> &str {
        "Use this tool when you want to send a push notification"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<PushArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: PushArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        tracing::info!(chars = args.text.chars().count(), "sending push notification");
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&[
                ("token", self.token.as_str()),
                ("user", self.user.as_str()),
                ("message", args.text.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        Ok("success".to_string())
    }
}
