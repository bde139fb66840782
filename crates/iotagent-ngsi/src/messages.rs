//! NGSIv1 request and response bodies.

use serde::{Deserialize, Serialize};

use iotagent_core::{Attribute, AttributeDefinition, ContextEntity};

/// Declared type of every `<command>_status` attribute.
pub const COMMAND_STATUS_TYPE: &str = "commandStatus";

/// Attribute as carried inside a context element.
pub type ContextAttribute = Attribute;

/// Entity reference in a registration or context element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default = "not_pattern")]
    pub is_pattern: String,
    pub id: String,
}

impl From<&ContextEntity> for EntityId {
    fn from(entity: &ContextEntity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            is_pattern: not_pattern(),
            id: entity.id.clone(),
        }
    }
}

fn not_pattern() -> String {
    "false".to_string()
}

/// Attribute the agent declares itself provider for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default = "not_pattern")]
    pub is_domain: String,
}

impl From<&AttributeDefinition> for RegistrationAttribute {
    fn from(definition: &AttributeDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            attr_type: definition.attr_type.clone(),
            is_domain: not_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextRegistration {
    pub entities: Vec<EntityId>,
    pub attributes: Vec<RegistrationAttribute>,
    pub providing_application: String,
}

/// `POST /NGSI9/registerContext` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContextRequest {
    pub context_registrations: Vec<ContextRegistration>,
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContextResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<StatusCode>,
}

/// NGSIv1 status: `{"code": "200", "reasonPhrase": "OK"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCode {
    pub code: String,
    #[serde(default)]
    pub reason_phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StatusCode {
    pub fn ok() -> Self {
        Self {
            code: "200".to_string(),
            reason_phrase: "OK".to_string(),
            details: None,
        }
    }

    pub fn new(code: impl Into<String>, reason_phrase: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason_phrase: reason_phrase.into(),
            details: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == "200"
    }
}

/// An entity with attribute values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextElement {
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default = "not_pattern")]
    pub is_pattern: String,
    pub id: String,
    #[serde(default)]
    pub attributes: Vec<ContextAttribute>,
}

impl ContextElement {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            is_pattern: not_pattern(),
            id: id.into(),
            attributes: Vec::new(),
        }
    }

    pub fn for_entity(entity: &ContextEntity, attributes: Vec<ContextAttribute>) -> Self {
        Self {
            attributes,
            ..Self::new(&entity.id, &entity.entity_type)
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&ContextAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateAction {
    #[default]
    Append,
    Update,
    Delete,
}

/// `POST /v1/updateContext` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContextRequest {
    pub context_elements: Vec<ContextElement>,
    pub update_action: UpdateAction,
}

impl UpdateContextRequest {
    pub fn append(element: ContextElement) -> Self {
        Self {
            context_elements: vec![element],
            update_action: UpdateAction::Append,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextElementResponse {
    pub context_element: ContextElement,
    pub status_code: StatusCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContextResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_responses: Vec<ContextElementResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<StatusCode>,
}

impl UpdateContextResponse {
    /// Echo every element of a request back with status 200.
    pub fn accepted(request: &UpdateContextRequest) -> Self {
        Self {
            context_responses: request
                .context_elements
                .iter()
                .map(|element| ContextElementResponse {
                    context_element: element.clone(),
                    status_code: StatusCode::ok(),
                })
                .collect(),
            error_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_wire_shape() {
        let request = RegisterContextRequest {
            context_registrations: vec![ContextRegistration {
                entities: vec![EntityId {
                    entity_type: "Light".into(),
                    is_pattern: "false".into(),
                    id: "light1:Light".into(),
                }],
                attributes: vec![RegistrationAttribute::from(&AttributeDefinition::new(
                    "temperature",
                    "centigrades",
                ))],
                providing_application: "http://smartGondor.com".into(),
            }],
            duration: "P1M".into(),
            registration_id: None,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contextRegistrations": [{
                    "entities": [{"type": "Light", "isPattern": "false", "id": "light1:Light"}],
                    "attributes": [{"name": "temperature", "type": "centigrades", "isDomain": "false"}],
                    "providingApplication": "http://smartGondor.com"
                }],
                "duration": "P1M"
            })
        );
    }

    #[test]
    fn test_update_wire_shape() {
        let mut element = ContextElement::new("r2d2:Robot", "Robot");
        element
            .attributes
            .push(Attribute::new("position_status", COMMAND_STATUS_TYPE, "PENDING"));
        let request = UpdateContextRequest::append(element);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["updateAction"], "APPEND");
        assert_eq!(value["contextElements"][0]["isPattern"], "false");
        assert_eq!(
            value["contextElements"][0]["attributes"][0],
            json!({"name": "position_status", "type": "commandStatus", "value": "PENDING"})
        );
    }

    #[test]
    fn test_error_response_parses() {
        let response: RegisterContextResponse = serde_json::from_value(json!({
            "errorCode": {"code": "500", "reasonPhrase": "Internal Server Error"}
        }))
        .unwrap();
        assert_eq!(response.error_code.unwrap().code, "500");
        assert!(response.registration_id.is_none());
    }
}
