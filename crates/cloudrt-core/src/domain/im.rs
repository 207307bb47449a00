use crate::capability::{Capability, CapabilityKind, ProviderIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `Messaging.SendIM`
pub struct SendIm;

impl Capability for SendIm {
    const KIND: CapabilityKind = CapabilityKind::SEND_IM;
    type Request = SendImRequest;
    type Response = SendImResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImTemplate {
    pub template_id: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Message body. Provider-specific beyond the text/template split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template: Option<ImTemplate>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ImContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn template(template_id: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Self {
            template: Some(ImTemplate {
                template_id: template_id.into(),
                params,
            }),
            ..Self::default()
        }
    }

    fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn has_template(&self) -> bool {
        self.template
            .as_ref()
            .is_some_and(|t| !t.template_id.trim().is_empty())
    }
}

/// Destination. Receivers are user ids, phone numbers, open ids... whatever the backend speaks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImAddress {
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ImAddress {
    pub fn receivers<I, S>(receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            receivers: receivers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendImRequest {
    /// The saas service name, like `dingtalk` or `wechat`.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub setting_id: String,
    pub content: ImContent,
    pub address: ImAddress,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SendImRequest {
    pub fn new(service_name: impl Into<String>, content: ImContent, address: ImAddress) -> Self {
        Self {
            service_name: service_name.into(),
            content,
            address,
            ..Self::default()
        }
    }

    pub fn with_setting_id(mut self, setting_id: impl Into<String>) -> Self {
        self.setting_id = setting_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn provider_identity(&self) -> ProviderIdentity {
        ProviderIdentity::new(self.service_name.clone(), self.setting_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendImResponse {
    pub message_id: String,
    pub service_name: String,
    pub accepted_receivers: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

/// Default payload check for [`SendIm`]: some content and somewhere to send it.
pub fn validate_send_im(request: &SendImRequest) -> Result<(), String> {
    if !request.content.has_text() && !request.content.has_template() {
        return Err("IM content requires either text or a template".to_string());
    }
    let has_receiver = request
        .address
        .receivers
        .iter()
        .any(|r| !r.trim().is_empty());
    let has_channel = request
        .address
        .channel
        .as_deref()
        .is_some_and(|c| !c.trim().is_empty());
    if !has_receiver && !has_channel {
        return Err("IM address requires at least one receiver or a channel".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: ImContent, address: ImAddress) -> SendImRequest {
        SendImRequest::new("dingtalk", content, address)
    }

    #[test]
    fn test_validate_send_im_text() {
        let req = request(ImContent::text("hello"), ImAddress::receivers(["u-1"]));
        assert!(validate_send_im(&req).is_ok());
    }

    #[test]
    fn test_validate_send_im_template() {
        let req = request(
            ImContent::template("order-shipped", BTreeMap::new()),
            ImAddress::channel("ops"),
        );
        assert!(validate_send_im(&req).is_ok());
    }

    #[test]
    fn test_validate_send_im_missing_content() {
        let req = request(ImContent::default(), ImAddress::receivers(["u-1"]));
        let err = validate_send_im(&req).unwrap_err();
        assert!(err.contains("text or a template"));

        let blank = request(ImContent::text("   "), ImAddress::receivers(["u-1"]));
        assert!(validate_send_im(&blank).is_err());

        let blank_template = request(
            ImContent::template("", BTreeMap::new()),
            ImAddress::receivers(["u-1"]),
        );
        assert!(validate_send_im(&blank_template).is_err());
    }

    #[test]
    fn test_validate_send_im_missing_address() {
        let req = request(ImContent::text("hello"), ImAddress::default());
        let err = validate_send_im(&req).unwrap_err();
        assert!(err.contains("receiver"));

        let blank = request(ImContent::text("hello"), ImAddress::receivers([" "]));
        assert!(validate_send_im(&blank).is_err());
    }

    #[test]
    fn test_provider_identity_from_request() {
        let req = request(ImContent::text("hi"), ImAddress::receivers(["u-1"]))
            .with_setting_id("tenant-a");
        assert_eq!(
            req.provider_identity(),
            ProviderIdentity::new("dingtalk", "tenant-a")
        );
    }

    #[test]
    fn test_send_im_request_deserialize_minimal() {
        let req: SendImRequest = serde_json::from_str(
            r#"{"service_name":"wechat","content":{"text":"hi"},"address":{"receivers":["a"]}}"#,
        )
        .unwrap();
        assert_eq!(req.service_name, "wechat");
        assert!(req.setting_id.is_empty());
        assert!(req.metadata.is_empty());
        assert!(validate_send_im(&req).is_ok());
    }
}
