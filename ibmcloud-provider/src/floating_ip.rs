//! VPC floating IP client
//!
//! Floating IPs are reserved either in a zone or directly on a network
//! interface (the target). Renames and retargeting are applied by a
//! synchronous PATCH; zone and resource group cannot change in place.

use ibmcloud_core::{
    Attributes, BoxFuture, ClientError, ClientResult, Observation, RemoteClient, ResourceKind,
    StatusVocabulary, UpdateMode,
};
use serde_json::{Map, Value, json};

use crate::http::{IbmHttpClient, required_str, str_at};
use crate::resources::FLOATING_IP;
use crate::session::IbmSession;

pub const ATTR_ADDRESS: &str = "address";
pub const ATTR_CRN: &str = "crn";
pub const ATTR_NAME: &str = "name";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_ZONE: &str = "zone";
pub const ATTR_TARGET: &str = "target";
pub const ATTR_RESOURCE_GROUP: &str = "resource_group";
pub const ATTR_RESOURCE_GROUP_NAME: &str = "resource_group_name";
pub const ATTR_CONTROLLER_URL: &str = "resource_controller_url";

const CONTROLLER_URL: &str = "https://cloud.ibm.com/vpc-ext/network/floatingIPs";

/// Client for `/v1/floating_ips`
pub struct FloatingIpClient {
    http: IbmHttpClient,
    endpoint: String,
    version: String,
}

impl FloatingIpClient {
    pub fn new(http: IbmHttpClient, session: &IbmSession) -> Self {
        Self {
            http,
            endpoint: session.vpc_endpoint(),
            version: session.vpc_api_version.clone(),
        }
    }

    fn url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/v1/floating_ips/{}", self.endpoint, id),
            None => format!("{}/v1/floating_ips", self.endpoint),
        }
    }

    fn query(&self) -> [(&str, &str); 2] {
        [("version", self.version.as_str()), ("generation", "2")]
    }

    /// Build the creation prototype; exactly one of zone and target is allowed
    pub fn prototype(spec: &Attributes) -> ClientResult<Value> {
        let name = spec
            .require::<String>(ATTR_NAME)
            .map_err(|e| ClientError::permanent(e.to_string()))?;
        let zone = spec.get::<String>(ATTR_ZONE).filter(|z| !z.is_empty());
        let target = spec.get::<String>(ATTR_TARGET).filter(|t| !t.is_empty());

        let mut prototype = Map::new();
        prototype.insert("name".to_string(), json!(name));
        match (zone, target) {
            (Some(_), Some(_)) => {
                return Err(ClientError::permanent(format!(
                    "{} conflicts with {}",
                    ATTR_ZONE, ATTR_TARGET
                )));
            }
            (None, None) => {
                return Err(ClientError::permanent(format!(
                    "{} or {} need to be provided",
                    ATTR_ZONE, ATTR_TARGET
                )));
            }
            (Some(zone), None) => {
                prototype.insert("zone".to_string(), json!({ "name": zone }));
            }
            (None, Some(target)) => {
                prototype.insert("target".to_string(), json!({ "id": target }));
            }
        }
        if let Some(group) = spec.get::<String>(ATTR_RESOURCE_GROUP) {
            prototype.insert("resource_group".to_string(), json!({ "id": group }));
        }
        Ok(Value::Object(prototype))
    }

    /// Build the merge patch; only name and target are mutable
    pub fn patch_document(patch: &Attributes) -> ClientResult<Value> {
        let mut document = Map::new();
        for (key, value) in patch.iter() {
            match key.as_str() {
                ATTR_NAME => {
                    let name = value.as_str().ok_or_else(|| {
                        ClientError::permanent(format!("{} must be a string", ATTR_NAME))
                    })?;
                    document.insert("name".to_string(), json!(name));
                }
                ATTR_TARGET => {
                    let target = value.as_str().ok_or_else(|| {
                        ClientError::permanent(format!("{} must be a string", ATTR_TARGET))
                    })?;
                    document.insert("target".to_string(), json!({ "id": target }));
                }
                other => {
                    return Err(ClientError::permanent(format!(
                        "{} cannot be changed in place, recreate the floating IP",
                        other
                    )));
                }
            }
        }
        Ok(Value::Object(document))
    }

    /// Flatten a floating IP response into attributes
    pub fn flatten(body: &Value) -> ClientResult<Observation> {
        let status = required_str(body, "status", "floating IP")?;
        let mut attrs = Attributes::new();
        for (attr, path) in [
            ("id", "id"),
            (ATTR_NAME, "name"),
            (ATTR_ADDRESS, "address"),
            (ATTR_STATUS, "status"),
            (ATTR_ZONE, "zone.name"),
            (ATTR_CRN, "crn"),
            (ATTR_RESOURCE_GROUP, "resource_group.id"),
            (ATTR_RESOURCE_GROUP_NAME, "resource_group.name"),
        ] {
            if let Some(value) = str_at(body, path) {
                attrs.insert(attr, value);
            }
        }
        attrs.insert(ATTR_TARGET, str_at(body, "target.id").unwrap_or(""));
        attrs.insert(ATTR_CONTROLLER_URL, CONTROLLER_URL);
        Ok(Observation::new(status, attrs))
    }

    pub async fn create_floating_ip(&self, spec: Attributes) -> ClientResult<String> {
        let prototype = Self::prototype(&spec)?;
        let created = self.http.post(&self.url(None), &self.query(), &prototype).await?;
        let id = required_str(&created, "id", "floating IP")?;
        tracing::info!(
            id,
            address = str_at(&created, "address").unwrap_or(""),
            "floating IP reserved"
        );
        Ok(id.to_string())
    }

    pub async fn get_floating_ip(&self, id: String) -> ClientResult<Observation> {
        let body = self.http.get(&self.url(Some(&id)), &self.query()).await?;
        Self::flatten(&body)
    }

    pub async fn update_floating_ip(&self, id: String, patch: Attributes) -> ClientResult<()> {
        let document = Self::patch_document(&patch)?;
        self.http
            .patch(&self.url(Some(&id)), &self.query(), &document)
            .await?;
        Ok(())
    }

    pub async fn delete_floating_ip(&self, id: String) -> ClientResult<()> {
        self.http
            .delete(&self.url(Some(&id)), &self.query(), None)
            .await?;
        Ok(())
    }
}

impl RemoteClient for FloatingIpClient {
    fn kind(&self) -> ResourceKind {
        FLOATING_IP
    }

    fn vocabulary(&self) -> StatusVocabulary {
        StatusVocabulary {
            pending: vec!["pending".to_string()],
            available: vec!["available".to_string()],
            updating: vec![],
            deleting: vec!["deleting".to_string()],
            deleted: vec![],
            failed: vec!["failed".to_string()],
        }
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Synchronous
    }

    fn create(&self, spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
        let spec = spec.clone();
        Box::pin(async move { self.create_floating_ip(spec).await })
    }

    fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
        let id = id.to_string();
        Box::pin(async move { self.get_floating_ip(id).await })
    }

    fn update(&self, id: &str, patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
        let id = id.to_string();
        let patch = patch.clone();
        Box::pin(async move { self.update_floating_ip(id, patch).await })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, ClientResult<()>> {
        let id = id.to_string();
        Box::pin(async move { self.delete_floating_ip(id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prototype_needs_exactly_one_of_zone_and_target() {
        let base = Attributes::new().with(ATTR_NAME, "fip-1");

        let err = FloatingIpClient::prototype(&base).unwrap_err();
        assert_eq!(
            err,
            ClientError::permanent("zone or target need to be provided")
        );

        let both = base
            .clone()
            .with(ATTR_ZONE, "us-south-1")
            .with(ATTR_TARGET, "0717-nic");
        assert!(FloatingIpClient::prototype(&both).is_err());

        let zoned = base
            .with(ATTR_ZONE, "us-south-1")
            .with(ATTR_RESOURCE_GROUP, "rg-1");
        let prototype = FloatingIpClient::prototype(&zoned).unwrap();
        assert_eq!(
            prototype,
            json!({"name": "fip-1", "zone": {"name": "us-south-1"}, "resource_group": {"id": "rg-1"}})
        );
    }

    #[test]
    fn prototype_requires_name() {
        let spec = Attributes::new().with(ATTR_ZONE, "us-south-1");
        let err = FloatingIpClient::prototype(&spec).unwrap_err();
        assert_eq!(err, ClientError::permanent("attribute 'name' is required"));
    }

    #[test]
    fn patch_rejects_immutable_attributes() {
        let patch = Attributes::new()
            .with(ATTR_NAME, "renamed")
            .with(ATTR_TARGET, "0717-nic");
        assert_eq!(
            FloatingIpClient::patch_document(&patch).unwrap(),
            json!({"name": "renamed", "target": {"id": "0717-nic"}})
        );

        let patch = Attributes::new().with(ATTR_ZONE, "us-south-2");
        assert!(FloatingIpClient::patch_document(&patch).is_err());
    }

    #[test]
    fn flatten_unbound_floating_ip() {
        let body = json!({
            "id": "r006-f45e0d90",
            "name": "fip-1",
            "address": "169.48.1.2",
            "status": "available",
            "crn": "crn:v1:bluemix:public:is:us-south-1:a/123::floating-ip:r006-f45e0d90",
            "zone": {"name": "us-south-1"},
            "resource_group": {"id": "rg-1", "name": "default"}
        });
        let observation = FloatingIpClient::flatten(&body).unwrap();
        let attrs = &observation.attributes;
        assert_eq!(observation.status, "available");
        assert_eq!(attrs.get::<String>(ATTR_ZONE).as_deref(), Some("us-south-1"));
        assert_eq!(attrs.get::<String>(ATTR_TARGET).as_deref(), Some(""));
        assert_eq!(
            attrs.get::<String>(ATTR_RESOURCE_GROUP_NAME).as_deref(),
            Some("default")
        );
    }
}
