//! Power Systems VPN connection client
//!
//! Connections live inside a cloud instance, so the identifier handed to the
//! reconciler is `<cloud_instance_id>/<vpn_connection_id>`. Attached networks
//! and peer subnets are separate sub-collections; an update adds and removes
//! members one at a time after the main PUT.

use std::collections::BTreeSet;

use ibmcloud_core::{
    Attributes, BoxFuture, ClientError, ClientResult, Observation, RemoteClient, ResourceKind,
    StatusVocabulary, UpdateMode,
};
use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::http::{IbmHttpClient, required_str, str_at, strings_at};
use crate::resources::PI_VPN_CONNECTION;
use crate::session::IbmSession;

pub const ATTR_CLOUD_INSTANCE_ID: &str = "pi_cloud_instance_id";
pub const ATTR_NAME: &str = "pi_vpn_connection_name";
pub const ATTR_IKE_POLICY_ID: &str = "pi_ike_policy_id";
pub const ATTR_IPSEC_POLICY_ID: &str = "pi_ipsec_policy_id";
pub const ATTR_MODE: &str = "pi_vpn_connection_mode";
pub const ATTR_NETWORKS: &str = "pi_networks";
pub const ATTR_PEER_GATEWAY_ADDRESS: &str = "pi_peer_gateway_address";
pub const ATTR_PEER_SUBNETS: &str = "pi_peer_subnets";
pub const ATTR_CONNECTION_ID: &str = "connection_id";
pub const ATTR_CONNECTION_STATUS: &str = "connection_status";
pub const ATTR_LOCAL_GATEWAY_ADDRESS: &str = "local_gateway_address";
pub const ATTR_GATEWAY_ADDRESS: &str = "gateway_address";

const MODES: [&str; 2] = ["policy", "route"];

/// Split a `<cloud_instance_id>/<vpn_connection_id>` identifier
pub fn id_parts(id: &str) -> ClientResult<(&str, &str)> {
    match id.split_once('/') {
        Some((cloud, connection))
            if !cloud.is_empty() && !connection.is_empty() && !connection.contains('/') =>
        {
            Ok((cloud, connection))
        }
        _ => Err(ClientError::permanent(format!(
            "invalid VPN connection id '{}', expected <cloud_instance_id>/<vpn_connection_id>",
            id
        ))),
    }
}

/// Members to add and remove to turn `current` into `desired`
fn membership_changes(current: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let current: BTreeSet<&String> = current.iter().collect();
    let desired: BTreeSet<&String> = desired.iter().collect();
    let add = desired.difference(&current).map(|s| s.to_string()).collect();
    let remove = current.difference(&desired).map(|s| s.to_string()).collect();
    (add, remove)
}

/// Desired members of a sub-collection, if the patch touches it
fn member_list(patch: &Attributes, key: &str) -> ClientResult<Option<Vec<String>>> {
    if !patch.contains_key(key) {
        return Ok(None);
    }
    patch.require::<Vec<String>>(key).map(Some).map_err(permanent)
}

fn permanent(err: impl std::fmt::Display) -> ClientError {
    ClientError::permanent(err.to_string())
}

/// Client for `/pcloud/v1/cloud-instances/{id}/vpn/vpn-connections`
pub struct VpnConnectionClient {
    http: IbmHttpClient,
    endpoint: String,
    crn: Option<String>,
}

impl VpnConnectionClient {
    pub fn new(http: IbmHttpClient, session: &IbmSession) -> Self {
        Self {
            http,
            endpoint: session.power_endpoint(),
            crn: session.power_crn.clone(),
        }
    }

    fn collection_url(&self, cloud_instance_id: &str) -> String {
        format!(
            "{}/pcloud/v1/cloud-instances/{}/vpn/vpn-connections",
            self.endpoint, cloud_instance_id
        )
    }

    fn connection_url(&self, cloud_instance_id: &str, connection_id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(cloud_instance_id),
            connection_id
        )
    }

    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> ClientResult<Value> {
        let mut request = self.http.request(method, url);
        if let Some(crn) = &self.crn {
            request = request.header("CRN", crn);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        self.http.send(request).await
    }

    /// Build the creation body from a spec
    pub fn create_body(spec: &Attributes) -> ClientResult<Value> {
        let mode = spec.require::<String>(ATTR_MODE).map_err(permanent)?;
        if !MODES.contains(&mode.as_str()) {
            return Err(ClientError::permanent(format!(
                "{} must be one of {:?}, got '{}'",
                ATTR_MODE, MODES, mode
            )));
        }
        Ok(json!({
            "name": spec.require::<String>(ATTR_NAME).map_err(permanent)?,
            "ikePolicy": spec.require::<String>(ATTR_IKE_POLICY_ID).map_err(permanent)?,
            "ipSecPolicy": spec.require::<String>(ATTR_IPSEC_POLICY_ID).map_err(permanent)?,
            "mode": mode,
            "networks": spec.require::<Vec<String>>(ATTR_NETWORKS).map_err(permanent)?,
            "peerGatewayAddress": spec
                .require::<String>(ATTR_PEER_GATEWAY_ADDRESS)
                .map_err(permanent)?,
            "peerSubnets": spec.require::<Vec<String>>(ATTR_PEER_SUBNETS).map_err(permanent)?,
        }))
    }

    /// Build the PUT body for the scalar attributes of a patch
    pub fn update_body(patch: &Attributes) -> ClientResult<Option<Value>> {
        let mut body = Map::new();
        for (key, value) in patch.iter() {
            let field = match key.as_str() {
                ATTR_NAME => "name",
                ATTR_IKE_POLICY_ID => "ikePolicy",
                ATTR_IPSEC_POLICY_ID => "ipSecPolicy",
                ATTR_PEER_GATEWAY_ADDRESS => "peerGatewayAddress",
                ATTR_NETWORKS | ATTR_PEER_SUBNETS => continue,
                other => {
                    return Err(ClientError::permanent(format!(
                        "{} cannot be changed in place, recreate the VPN connection",
                        other
                    )));
                }
            };
            let value = value
                .as_str()
                .ok_or_else(|| ClientError::permanent(format!("{} must be a string", key)))?;
            body.insert(field.to_string(), json!(value));
        }
        Ok((!body.is_empty()).then_some(Value::Object(body)))
    }

    /// Flatten a VPN connection response into attributes
    pub fn flatten(cloud_instance_id: &str, body: &Value) -> ClientResult<Observation> {
        let connection_id = required_str(body, "id", "VPN connection")?;
        let status = required_str(body, "status", "VPN connection")?;

        let mut attrs = Attributes::new()
            .with(ATTR_CLOUD_INSTANCE_ID, cloud_instance_id)
            .with(ATTR_CONNECTION_ID, connection_id)
            .with(ATTR_CONNECTION_STATUS, status)
            .with(ATTR_NETWORKS, strings_at(body, "networkIDs"))
            .with(ATTR_PEER_SUBNETS, strings_at(body, "peerSubnets"));
        for (attr, path) in [
            (ATTR_NAME, "name"),
            (ATTR_IKE_POLICY_ID, "ikePolicy.id"),
            (ATTR_IPSEC_POLICY_ID, "ipSecPolicy.id"),
            (ATTR_MODE, "mode"),
            (ATTR_PEER_GATEWAY_ADDRESS, "peerGatewayAddress"),
            (ATTR_LOCAL_GATEWAY_ADDRESS, "localGatewayAddress"),
            (ATTR_GATEWAY_ADDRESS, "vpnGatewayAddress"),
        ] {
            if let Some(value) = str_at(body, path) {
                attrs.insert(attr, value);
            }
        }
        Ok(Observation::new(status, attrs))
    }

    pub async fn create_connection(&self, spec: Attributes) -> ClientResult<String> {
        let cloud_instance_id = spec
            .require::<String>(ATTR_CLOUD_INSTANCE_ID)
            .map_err(permanent)?;
        let body = Self::create_body(&spec)?;
        let created = self
            .call(
                Method::POST,
                &self.collection_url(&cloud_instance_id),
                Some(&body),
            )
            .await?;
        let connection_id = required_str(&created, "id", "VPN connection")?;
        tracing::info!(cloud_instance_id, connection_id, "VPN connection requested");
        Ok(format!("{}/{}", cloud_instance_id, connection_id))
    }

    pub async fn get_connection(&self, id: String) -> ClientResult<Observation> {
        let (cloud, connection) = id_parts(&id)?;
        let body = self
            .call(Method::GET, &self.connection_url(cloud, connection), None)
            .await?;
        Self::flatten(cloud, &body)
    }

    pub async fn update_connection(&self, id: String, patch: Attributes) -> ClientResult<()> {
        let (cloud, connection) = id_parts(&id)?;
        let url = self.connection_url(cloud, connection);

        let body = Self::update_body(&patch)?;
        let networks = member_list(&patch, ATTR_NETWORKS)?;
        let subnets = member_list(&patch, ATTR_PEER_SUBNETS)?;

        if let Some(body) = body {
            self.call(Method::PUT, &url, Some(&body)).await?;
        }
        if networks.is_none() && subnets.is_none() {
            return Ok(());
        }

        let current = self.call(Method::GET, &url, None).await?;
        if let Some(desired) = networks {
            let (add, remove) = membership_changes(&strings_at(&current, "networkIDs"), &desired);
            let members = format!("{}/networks", url);
            for network in add {
                tracing::debug!(id, network, "attaching network");
                let body = json!({ "networkID": network });
                self.call(Method::PUT, &members, Some(&body)).await?;
            }
            for network in remove {
                tracing::debug!(id, network, "detaching network");
                let body = json!({ "networkID": network });
                self.call(Method::DELETE, &members, Some(&body)).await?;
            }
        }
        if let Some(desired) = subnets {
            let (add, remove) = membership_changes(&strings_at(&current, "peerSubnets"), &desired);
            let members = format!("{}/peer-subnets", url);
            for cidr in add {
                tracing::debug!(id, cidr, "adding peer subnet");
                let body = json!({ "cidr": cidr });
                self.call(Method::PUT, &members, Some(&body)).await?;
            }
            for cidr in remove {
                tracing::debug!(id, cidr, "removing peer subnet");
                let body = json!({ "cidr": cidr });
                self.call(Method::DELETE, &members, Some(&body)).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_connection(&self, id: String) -> ClientResult<()> {
        let (cloud, connection) = id_parts(&id)?;
        self.call(Method::DELETE, &self.connection_url(cloud, connection), None)
            .await?;
        Ok(())
    }
}

impl RemoteClient for VpnConnectionClient {
    fn kind(&self) -> ResourceKind {
        PI_VPN_CONNECTION
    }

    fn vocabulary(&self) -> StatusVocabulary {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        StatusVocabulary {
            pending: strings(&["pending", "provisioning", "creating"]),
            available: strings(&["active", "available"]),
            updating: strings(&["updating"]),
            deleting: strings(&["deleting", "removing"]),
            deleted: vec![],
            failed: strings(&["failed", "error"]),
        }
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Asynchronous
    }

    fn create(&self, spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
        let spec = spec.clone();
        Box::pin(async move { self.create_connection(spec).await })
    }

    fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
        let id = id.to_string();
        Box::pin(async move { self.get_connection(id).await })
    }

    fn update(&self, id: &str, patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
        let id = id.to_string();
        let patch = patch.clone();
        Box::pin(async move { self.update_connection(id, patch).await })
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, ClientResult<()>> {
        let id = id.to_string();
        Box::pin(async move { self.delete_connection(id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> Attributes {
        Attributes::new()
            .with(ATTR_CLOUD_INSTANCE_ID, "cloud-1")
            .with(ATTR_NAME, "tf-pi-vpn-42")
            .with(ATTR_IKE_POLICY_ID, "ike-1")
            .with(ATTR_IPSEC_POLICY_ID, "ipsec-1")
            .with(ATTR_MODE, "policy")
            .with(ATTR_NETWORKS, vec!["net-1"])
            .with(ATTR_PEER_GATEWAY_ADDRESS, "1.22.124.1")
            .with(ATTR_PEER_SUBNETS, vec!["107.0.0.0/24"])
    }

    #[test]
    fn id_parts_splits_composite_id() {
        assert_eq!(id_parts("cloud-1/conn-1").unwrap(), ("cloud-1", "conn-1"));
        assert!(id_parts("conn-1").is_err());
        assert!(id_parts("/conn-1").is_err());
        assert!(id_parts("a/b/c").is_err());
    }

    #[test]
    fn create_body_maps_attributes() {
        let body = VpnConnectionClient::create_body(&spec()).unwrap();
        assert_eq!(body["ikePolicy"], "ike-1");
        assert_eq!(body["networks"], json!(["net-1"]));
        assert_eq!(body["peerSubnets"], json!(["107.0.0.0/24"]));
    }

    #[test]
    fn create_body_rejects_unknown_mode() {
        let spec = spec().with(ATTR_MODE, "tunnel");
        assert!(VpnConnectionClient::create_body(&spec).is_err());
    }

    #[test]
    fn update_body_skips_member_lists() {
        let patch = Attributes::new()
            .with(ATTR_PEER_GATEWAY_ADDRESS, "1.22.124.2")
            .with(ATTR_NETWORKS, vec!["net-1", "net-2"]);
        assert_eq!(
            VpnConnectionClient::update_body(&patch).unwrap(),
            Some(json!({"peerGatewayAddress": "1.22.124.2"}))
        );

        let patch = Attributes::new().with(ATTR_PEER_SUBNETS, vec!["199.166.0.0/24"]);
        assert_eq!(VpnConnectionClient::update_body(&patch).unwrap(), None);

        let patch = Attributes::new().with(ATTR_MODE, "route");
        assert!(VpnConnectionClient::update_body(&patch).is_err());
    }

    #[test]
    fn member_list_rejects_non_list_values() {
        let patch = Attributes::new().with(ATTR_NETWORKS, "net-3");
        let err = member_list(&patch, ATTR_NETWORKS).unwrap_err();
        assert!(matches!(err, ClientError::Permanent(ref m) if m.contains(ATTR_NETWORKS)));

        let patch = Attributes::new().with(ATTR_PEER_SUBNETS, vec!["10.0.0.0/24"]);
        assert_eq!(
            member_list(&patch, ATTR_PEER_SUBNETS).unwrap(),
            Some(vec!["10.0.0.0/24".to_string()])
        );
        assert_eq!(member_list(&patch, ATTR_NETWORKS).unwrap(), None);
    }

    #[test]
    fn membership_changes_computes_both_directions() {
        let current = vec!["net-1".to_string(), "net-2".to_string()];
        let desired = vec!["net-2".to_string(), "net-3".to_string()];
        let (add, remove) = membership_changes(&current, &desired);
        assert_eq!(add, vec!["net-3"]);
        assert_eq!(remove, vec!["net-1"]);
    }
}
