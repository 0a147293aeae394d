// functions/src/queue/service_bus.rs

use std::sync::Arc;

use azure_core::{HttpClient, StatusCode};
use azure_messaging_servicebus::service_bus::{PeekLockResponse, QueueClient};

use super::{Delivery, MessageSource, QueueError};
use crate::config::QueueCredentials;

/// Peek-lock receiver on an Azure Service Bus queue.
///
/// Messages are locked rather than removed on receive, so a nacked or
/// expired message becomes visible again.
pub struct ServiceBusSource {
    client: QueueClient,
}

impl ServiceBusSource {
    pub fn new(namespace: &str, queue: &str, credentials: &QueueCredentials) -> Result<Self, QueueError> {
        Self::with_http_client(azure_core::new_http_client(), namespace, queue, credentials)
    }

    pub fn with_http_client(
        http_client: Arc<dyn HttpClient>,
        namespace: &str,
        queue: &str,
        credentials: &QueueCredentials,
    ) -> Result<Self, QueueError> {
        let client = QueueClient::new(
            http_client,
            namespace.to_owned(),
            queue.to_owned(),
            credentials.policy_name.clone(),
            credentials.policy_key.clone(),
        )?;

        tracing::debug!(namespace, queue, "service bus client created");

        Ok(Self { client })
    }
}

pub struct ServiceBusDelivery {
    data: Vec<u8>,
    response: PeekLockResponse,
}

impl MessageSource for ServiceBusSource {
    type Delivery = ServiceBusDelivery;

    async fn receive(&self) -> Result<Option<ServiceBusDelivery>, QueueError> {
        let response = self.client.peek_lock_message2(None).await?;

        // the client hands back error responses as ordinary responses
        let status = *response.status();
        if status == StatusCode::NoContent {
            return Ok(None);
        }
        if !status.is_success() {
            tracing::debug!(body = %response.body(), "service bus error response");
            return Err(QueueError::Status(status));
        }

        // an empty body means nothing was waiting
        let body = response.body();
        if body.is_empty() {
            return Ok(None);
        }

        Ok(Some(ServiceBusDelivery {
            data: body.into_bytes(),
            response,
        }))
    }
}

impl Delivery for ServiceBusDelivery {
    fn data(&self) -> &[u8] {
        &self.data
    }

    async fn ack(self) -> Result<(), QueueError> {
        self.response.delete_message().await?;
        Ok(())
    }

    async fn nack(self) -> Result<(), QueueError> {
        self.response.unlock_message().await?;
        Ok(())
    }

    async fn renew(&self) -> Result<(), QueueError> {
        self.response.renew_message_lock().await?;
        Ok(())
    }
}
