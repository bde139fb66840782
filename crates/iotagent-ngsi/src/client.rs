//! Context broker client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use iotagent_core::{AgentConfig, Attribute, BrokerConfig, ContextEntity, Device};

use crate::error::{BrokerError, Result};
use crate::messages::{
    ContextElement, ContextRegistration, EntityId, RegisterContextRequest,
    RegisterContextResponse, RegistrationAttribute, UpdateContextRequest, UpdateContextResponse,
};

/// Tenant headers sent on every request.
pub mod headers {
    pub const SERVICE: &str = "fiware-service";
    pub const SERVICE_PATH: &str = "fiware-servicepath";
}

const REGISTER_CONTEXT_PATH: &str = "/NGSI9/registerContext";
const UPDATE_CONTEXT_PATH: &str = "/v1/updateContext";

/// Duration used to cancel a registration.
const CANCEL_DURATION: &str = "PT1S";

/// North-bound operations the agent needs from a context broker.
#[async_trait]
pub trait ContextBroker: Send + Sync {
    /// Register the device as context provider for its lazy attributes and
    /// commands.
    ///
    /// A device already holding a registration id is re-registered under that
    /// id with the recomputed attribute list. Returns `None` when the device
    /// provides nothing, in which case no registration is sent. The entity
    /// itself is left untouched.
    async fn register_device(&self, device: &Device) -> Result<Option<String>>;

    /// Create the device entity with its active attributes (empty values) and
    /// static attributes. Sends nothing when the device has neither.
    async fn create_entity(&self, device: &Device) -> Result<()> {
        let attributes = initial_attributes(device);
        if attributes.is_empty() {
            return Ok(());
        }
        self.push_update(&device.entity(), &attributes).await
    }

    /// Cancel the device's registration. Succeeds when there is nothing to
    /// cancel.
    async fn deregister_device(&self, device: &Device) -> Result<()>;

    /// Append attribute values to an entity.
    async fn push_update(&self, entity: &ContextEntity, attributes: &[Attribute]) -> Result<()>;
}

/// Initial attributes of a device entity: active with empty values, static
/// with their fixed values.
pub fn initial_attributes(device: &Device) -> Vec<Attribute> {
    device
        .active
        .iter()
        .map(Attribute::empty)
        .chain(device.static_attributes.iter().map(Attribute::from))
        .collect()
}

/// NGSIv1 HTTP client.
#[derive(Debug, Clone)]
pub struct NgsiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    provider_url: String,
    registration_duration: String,
}

impl NgsiClient {
    pub fn new(
        broker: &BrokerConfig,
        provider_url: impl Into<String>,
        registration_duration: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| BrokerError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: broker.base_url(),
            timeout: broker.timeout(),
            provider_url: provider_url.into(),
            registration_duration: registration_duration.into(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Self::new(
            &config.context_broker,
            &config.provider_url,
            &config.device_registration_duration,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the registration for a device. The attribute list is always
    /// recomputed from the device's current lazy attributes and commands.
    pub fn registration_request(&self, device: &Device, duration: &str) -> RegisterContextRequest {
        let attributes = device
            .lazy
            .iter()
            .chain(device.commands.iter())
            .map(RegistrationAttribute::from)
            .collect();

        RegisterContextRequest {
            context_registrations: vec![ContextRegistration {
                entities: vec![EntityId::from(&device.entity())],
                attributes,
                providing_application: self.provider_url.clone(),
            }],
            duration: duration.to_string(),
            registration_id: device.registration_id.clone(),
        }
    }

    async fn send_registration(
        &self,
        device: &Device,
        request: &RegisterContextRequest,
    ) -> Result<String> {
        let response: RegisterContextResponse = self
            .post(
                REGISTER_CONTEXT_PATH,
                &device.service,
                &device.subservice,
                request,
            )
            .await?;

        if let Some(error) = response.error_code {
            return Err(BrokerError::rejected(error.code, error.reason_phrase));
        }

        response.registration_id.ok_or_else(|| {
            BrokerError::InvalidResponse("registration response without registrationId".into())
        })
    }

    async fn post<Req, Resp>(
        &self,
        path: &str,
        service: &str,
        subservice: &str,
        body: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(headers::SERVICE, service)
            .header(headers::SERVICE_PATH, subservice)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            // Brokers usually explain the failure in an NGSI errorCode body.
            let reason = serde_json::from_str::<RegisterContextResponse>(&text)
                .ok()
                .and_then(|r| r.error_code)
                .map(|e| e.reason_phrase)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
            return Err(BrokerError::rejected(status.as_str(), reason));
        }

        serde_json::from_str(&text).map_err(|e| {
            BrokerError::InvalidResponse(format!("{} answered with invalid body: {}", path, e))
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout(self.timeout)
        } else {
            BrokerError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ContextBroker for NgsiClient {
    async fn register_device(&self, device: &Device) -> Result<Option<String>> {
        let request = self.registration_request(device, &self.registration_duration);
        if request.context_registrations[0].attributes.is_empty() {
            tracing::debug!(device_id = %device.id, "Device provides no attributes, skipping registration");
            return Ok(device.registration_id.clone());
        }

        let id = self.send_registration(device, &request).await?;
        tracing::info!(
            device_id = %device.id,
            entity = %device.name,
            registration_id = %id,
            "Device registered as context provider"
        );
        Ok(Some(id))
    }

    async fn deregister_device(&self, device: &Device) -> Result<()> {
        let Some(registration_id) = &device.registration_id else {
            return Ok(());
        };

        let request = self.registration_request(device, CANCEL_DURATION);
        match self.send_registration(device, &request).await {
            Ok(_) => {
                tracing::info!(device_id = %device.id, %registration_id, "Device registration cancelled");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(
                    device_id = %device.id,
                    %registration_id,
                    "Registration already gone at the broker"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn push_update(&self, entity: &ContextEntity, attributes: &[Attribute]) -> Result<()> {
        let request =
            UpdateContextRequest::append(ContextElement::for_entity(entity, attributes.to_vec()));

        let response: UpdateContextResponse = self
            .post(
                UPDATE_CONTEXT_PATH,
                &entity.service,
                &entity.subservice,
                &request,
            )
            .await?;

        if let Some(error) = response.error_code {
            return Err(BrokerError::rejected(error.code, error.reason_phrase));
        }
        if let Some(failed) = response
            .context_responses
            .iter()
            .find(|r| !r.status_code.is_ok())
        {
            return Err(BrokerError::rejected(
                failed.status_code.code.clone(),
                failed.status_code.reason_phrase.clone(),
            ));
        }
        if response.context_responses.is_empty() {
            return Err(BrokerError::InvalidResponse(
                "update response without contextResponses".into(),
            ));
        }

        tracing::debug!(
            entity = %entity.id,
            attributes = attributes.len(),
            "Context updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotagent_core::{AttributeDefinition, StaticAttribute};

    fn client() -> NgsiClient {
        NgsiClient::new(&BrokerConfig::default(), "http://smartGondor.com", "P1M").unwrap()
    }

    #[test]
    fn test_registration_lists_lazy_and_commands() {
        let mut device = Device::new("r2d2", "Robot")
            .with_lazy(AttributeDefinition::new("temperature", "centigrades"))
            .with_command(AttributeDefinition::new("position", "Array"))
            .with_active(AttributeDefinition::new("pressure", "Hgmm"));
        device.resolve_entity();

        let request = client().registration_request(&device, "P1M");
        let registration = &request.context_registrations[0];
        let names: Vec<_> = registration.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["temperature", "position"]);
        assert_eq!(registration.entities[0].id, "r2d2:Robot");
        assert_eq!(registration.providing_application, "http://smartGondor.com");
        assert!(request.registration_id.is_none());
    }

    #[test]
    fn test_registration_reuses_existing_id() {
        let mut device = Device::new("r2d2", "Robot");
        device.resolve_entity();
        device.registration_id = Some("6319a7f5254b05844116584d".into());

        let request = client().registration_request(&device, CANCEL_DURATION);
        assert_eq!(request.duration, "PT1S");
        assert_eq!(
            request.registration_id.as_deref(),
            Some("6319a7f5254b05844116584d")
        );
    }

    #[test]
    fn test_initial_attributes() {
        let device = Device::new("light1", "Light")
            .with_active(AttributeDefinition::new("pressure", "Hgmm"))
            .with_static(StaticAttribute::new("location", "Vector", "(123,523)"));

        let attributes = initial_attributes(&device);
        assert_eq!(attributes[0], Attribute::new("pressure", "Hgmm", ""));
        assert_eq!(attributes[1], Attribute::new("location", "Vector", "(123,523)"));
    }

    #[test]
    fn test_base_url_from_config() {
        assert_eq!(client().base_url(), "http://localhost:1026");
    }
}
