use crate::features::im_provider::repo::{DeliveredMessage, ImDeliveryRepository, ImTarget};
use crate::retry::with_retry;
use chrono::Utc;
use cloudrt_core::domain::im::{ImContent, SendImRequest, SendImResponse};
use cloudrt_core::{RawError, RetryPolicy};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_MAX_RECEIVERS: usize = 100;

pub struct ImDeliveryService {
    repo: Arc<dyn ImDeliveryRepository>,
    retry: RetryPolicy,
    max_receivers: usize,
}

impl ImDeliveryService {
    pub fn new(repo: Arc<dyn ImDeliveryRepository>) -> Self {
        Self::with_policy(repo, RetryPolicy::never(), DEFAULT_MAX_RECEIVERS)
    }

    pub fn with_policy(
        repo: Arc<dyn ImDeliveryRepository>,
        retry: RetryPolicy,
        max_receivers: usize,
    ) -> Self {
        Self {
            repo,
            retry,
            max_receivers,
        }
    }

    /// Deliver one message to every receiver and the channel of `request`.
    ///
    /// Each delivery is retried on its own; the first permanent failure aborts
    /// the remaining targets.
    pub async fn send(
        &self,
        service_name: &str,
        setting_id: &str,
        request: &SendImRequest,
        metadata: &BTreeMap<String, String>,
    ) -> Result<SendImResponse, RawError> {
        let targets = collect_targets(request);
        if targets.is_empty() {
            return Err(RawError::rejected("no receiver or channel to deliver to"));
        }
        let receiver_count = targets
            .iter()
            .filter(|t| matches!(t, ImTarget::Receiver(_)))
            .count();
        if receiver_count > self.max_receivers {
            return Err(RawError::http(
                413,
                format!(
                    "{receiver_count} receivers exceed the limit of {}",
                    self.max_receivers
                ),
            ));
        }

        let body = render_body(&request.content)
            .ok_or_else(|| RawError::rejected("IM content has neither text nor template"))?;
        let message_id = Uuid::new_v4().to_string();
        let sent_at = Utc::now();

        let mut merged_metadata = request.metadata.clone();
        merged_metadata.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut accepted_receivers = Vec::new();
        for target in targets {
            let message = DeliveredMessage {
                message_id: message_id.clone(),
                service_name: service_name.to_string(),
                setting_id: setting_id.to_string(),
                target,
                body: body.clone(),
                metadata: merged_metadata.clone(),
                sent_at,
            };

            let repo = &self.repo;
            let delivery = &message;
            with_retry(&self.retry, "im.deliver", move || async move {
                repo.deliver(delivery)
            })
            .await?;

            debug!(
                message_id = %message_id,
                target = message.target.name(),
                "Delivered IM message"
            );
            if let ImTarget::Receiver(name) = message.target {
                accepted_receivers.push(name);
            }
        }

        Ok(SendImResponse {
            message_id,
            service_name: service_name.to_string(),
            accepted_receivers,
            sent_at,
        })
    }

    pub fn inbox(&self, target: &ImTarget) -> Result<Vec<DeliveredMessage>, RawError> {
        self.repo.delivered_to(target)
    }
}

/// Receivers in request order without blanks or repeats, then the channel.
fn collect_targets(request: &SendImRequest) -> Vec<ImTarget> {
    let mut seen = HashSet::new();
    let mut targets: Vec<ImTarget> = request
        .address
        .receivers
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty() && seen.insert(r.to_string()))
        .map(|r| ImTarget::Receiver(r.to_string()))
        .collect();

    if let Some(channel) = request
        .address
        .channel
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        targets.push(ImTarget::Channel(channel.to_string()));
    }
    targets
}

/// Plain text wins; otherwise `[template] k=v, ...` with params in key order.
fn render_body(content: &ImContent) -> Option<String> {
    if let Some(text) = content.text.as_deref().filter(|t| !t.trim().is_empty()) {
        return Some(text.to_string());
    }
    let template = content
        .template
        .as_ref()
        .filter(|t| !t.template_id.trim().is_empty())?;
    if template.params.is_empty() {
        return Some(format!("[{}]", template.template_id));
    }
    let params: Vec<String> = template
        .params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    Some(format!("[{}] {}", template.template_id, params.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::im_provider::repo::{InMemoryImRepository, MockImDeliveryRepository};
    use cloudrt_core::domain::im::ImAddress;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(receivers: &[&str]) -> SendImRequest {
        SendImRequest::new(
            "dingtalk",
            ImContent::text("build green"),
            ImAddress::receivers(receivers.iter().copied()),
        )
    }

    #[tokio::test]
    async fn test_send_delivers_to_each_receiver_once() {
        let repo = Arc::new(InMemoryImRepository::new());
        let service = ImDeliveryService::new(repo.clone());

        let response = service
            .send("dingtalk", "", &request(&["alice", "bob", "alice", " "]), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(response.accepted_receivers, vec!["alice", "bob"]);
        assert_eq!(response.service_name, "dingtalk");
        assert_eq!(repo.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_send_to_channel_and_metadata_merge() {
        let repo = Arc::new(InMemoryImRepository::new());
        let service = ImDeliveryService::new(repo.clone());
        let mut req = request(&[]).with_metadata("priority", "low");
        req.address.channel = Some("ops".to_string());

        let mut envelope_metadata = BTreeMap::new();
        envelope_metadata.insert("priority".to_string(), "high".to_string());
        envelope_metadata.insert("trace_id".to_string(), "t-1".to_string());

        let response = service
            .send("dingtalk", "tenant-a", &req, &envelope_metadata)
            .await
            .unwrap();
        assert!(response.accepted_receivers.is_empty());

        let inbox = service.inbox(&ImTarget::Channel("ops".to_string())).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].setting_id, "tenant-a");
        assert_eq!(inbox[0].metadata.get("priority").map(String::as_str), Some("high"));
        assert_eq!(inbox[0].metadata.get("trace_id").map(String::as_str), Some("t-1"));
    }

    #[tokio::test]
    async fn test_send_rejects_too_many_receivers_without_delivering() {
        let mut repo = MockImDeliveryRepository::new();
        repo.expect_deliver().times(0);
        let service = ImDeliveryService::with_policy(Arc::new(repo), RetryPolicy::never(), 1);

        let err = service
            .send("dingtalk", "", &request(&["alice", "bob"]), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err.signal, cloudrt_core::FailureSignal::HttpStatus(413)));
    }

    #[tokio::test]
    async fn test_send_retries_transient_repo_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let mut repo = MockImDeliveryRepository::new();
        repo.expect_deliver().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RawError::http(503, "mailbox busy"))
            } else {
                Ok(())
            }
        });
        let service = ImDeliveryService::with_policy(
            Arc::new(repo),
            RetryPolicy::fixed(2, 0),
            DEFAULT_MAX_RECEIVERS,
        );

        let response = service
            .send("dingtalk", "", &request(&["alice"]), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(response.accepted_receivers, vec!["alice"]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_surfaces_permanent_repo_failure() {
        let mut repo = MockImDeliveryRepository::new();
        repo.expect_deliver()
            .times(1)
            .returning(|_| Err(RawError::vendor("InvalidParameter", "unknown receiver")));
        let service = ImDeliveryService::with_policy(
            Arc::new(repo),
            RetryPolicy::fixed(3, 0),
            DEFAULT_MAX_RECEIVERS,
        );

        let err = service
            .send("dingtalk", "", &request(&["ghost"]), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.message, "unknown receiver");
    }

    #[test]
    fn test_render_body() {
        assert_eq!(render_body(&ImContent::text("hi")).as_deref(), Some("hi"));

        let mut params = BTreeMap::new();
        params.insert("version".to_string(), "1.4".to_string());
        params.insert("env".to_string(), "prod".to_string());
        assert_eq!(
            render_body(&ImContent::template("deploy_done", params)).as_deref(),
            Some("[deploy_done] env=prod, version=1.4")
        );
        assert_eq!(render_body(&ImContent::default()), None);
    }
}
