use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use crate::domain::entities::PurchaseNotification;
use crate::domain::errors::GatewayError;
use crate::domain::ports::Notifier;
use crate::interface_adapters::protocol::WebhookPayload;

// Posts purchase notifications to the operators' chat webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &PurchaseNotification) -> Result<(), GatewayError> {
        let res = self
            .http
            .post(&self.url)
            .json(&WebhookPayload::purchase(notification))
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.ok().filter(|body| !body.is_empty());
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        info!(item = %notification.item_name, "purchase notification delivered");
        Ok(())
    }
}
