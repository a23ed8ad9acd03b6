//! IAM service policy data source
//!
//! Lists the access policies granted to a service ID (or any IAM ID).
//! A service ID is first resolved to its IAM ID through the Identity API.

use std::collections::BTreeMap;

use ibmcloud_core::{
    Attributes, BoxFuture, ClientError, ClientResult, DataSource, ResourceKind, Value,
};
use serde_json::Value as Json;

use crate::http::{IbmHttpClient, required_str, str_at};
use crate::resources::IAM_SERVICE_POLICY;
use crate::session::IbmSession;

pub const ATTR_IAM_SERVICE_ID: &str = "iam_service_id";
pub const ATTR_IAM_ID: &str = "iam_id";
pub const ATTR_SORT: &str = "sort";
pub const ATTR_POLICIES: &str = "policies";

/// Policy resource attribute names and the keys they are exposed under
const RESOURCE_ATTRIBUTES: [(&str, &str); 7] = [
    ("serviceName", "service"),
    ("serviceInstance", "resource_instance_id"),
    ("region", "region"),
    ("resourceType", "resource_type"),
    ("resource", "resource"),
    ("resourceGroupId", "resource_group_id"),
    ("serviceType", "service_type"),
];

/// Which principal the policies are looked up for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOwner {
    ServiceId(String),
    IamId(String),
}

impl PolicyOwner {
    /// Exactly one of `iam_service_id` and `iam_id` must be set
    pub fn from_query(query: &Attributes) -> ClientResult<Self> {
        let service_id = query
            .get::<String>(ATTR_IAM_SERVICE_ID)
            .filter(|s| !s.is_empty());
        let iam_id = query.get::<String>(ATTR_IAM_ID).filter(|s| !s.is_empty());
        match (service_id, iam_id) {
            (Some(id), None) => Ok(Self::ServiceId(id)),
            (None, Some(id)) => Ok(Self::IamId(id)),
            (Some(_), Some(_)) => Err(ClientError::permanent(format!(
                "{} conflicts with {}",
                ATTR_IAM_SERVICE_ID, ATTR_IAM_ID
            ))),
            (None, None) => Err(ClientError::permanent(format!(
                "one of {} or {} is required",
                ATTR_IAM_SERVICE_ID, ATTR_IAM_ID
            ))),
        }
    }

    /// The identifier given by the caller, used to prefix policy ids
    pub fn id(&self) -> &str {
        match self {
            Self::ServiceId(id) | Self::IamId(id) => id,
        }
    }
}

/// Flatten the resources of one policy
pub fn flatten_resources(policy: &Json) -> Vec<Value> {
    let Some(resources) = policy.get("resources").and_then(Json::as_array) else {
        return vec![];
    };
    resources
        .iter()
        .map(|resource| {
            let mut flat = BTreeMap::new();
            let mut extra = BTreeMap::new();
            for attribute in resource
                .get("attributes")
                .and_then(Json::as_array)
                .into_iter()
                .flatten()
            {
                let (Some(name), Some(value)) = (str_at(attribute, "name"), str_at(attribute, "value"))
                else {
                    continue;
                };
                match RESOURCE_ATTRIBUTES.iter().find(|(api, _)| *api == name) {
                    Some((_, key)) => {
                        flat.insert(key.to_string(), Value::from(value));
                    }
                    None if name != "accountId" => {
                        extra.insert(name.to_string(), Value::from(value));
                    }
                    None => {}
                }
            }
            if !extra.is_empty() {
                flat.insert("attributes".to_string(), Value::Map(extra));
            }
            Value::Map(flat)
        })
        .collect()
}

/// Flatten one policy, prefixing its id with the owner
pub fn flatten_policy(owner: &PolicyOwner, policy: &Json) -> ClientResult<Value> {
    let policy_id = required_str(policy, "id", "policy")?;
    let roles: Vec<Value> = policy
        .get("roles")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(|role| str_at(role, "display_name"))
        .map(Value::from)
        .collect();

    let mut flat = BTreeMap::new();
    flat.insert(
        "id".to_string(),
        Value::from(format!("{}/{}", owner.id(), policy_id)),
    );
    flat.insert("roles".to_string(), Value::List(roles));
    flat.insert(
        "resources".to_string(),
        Value::List(flatten_resources(policy)),
    );
    if let Some(description) = str_at(policy, "description") {
        flat.insert("description".to_string(), Value::from(description));
    }
    Ok(Value::Map(flat))
}

/// Data source for `ibm_iam_service_policy`
pub struct ServicePolicyDataSource {
    http: IbmHttpClient,
    identity_endpoint: String,
    policy_endpoint: String,
    account_id: Option<String>,
}

impl ServicePolicyDataSource {
    pub fn new(http: IbmHttpClient, session: &IbmSession) -> Self {
        Self {
            http,
            identity_endpoint: session.iam_identity_endpoint(),
            policy_endpoint: session.iam_policy_endpoint(),
            account_id: session.account_id.clone(),
        }
    }

    async fn resolve_iam_id(&self, owner: &PolicyOwner) -> ClientResult<String> {
        match owner {
            PolicyOwner::IamId(id) => Ok(id.clone()),
            PolicyOwner::ServiceId(id) => {
                let url = format!("{}/v1/serviceids/{}", self.identity_endpoint, id);
                let service_id = self.http.get(&url, &[]).await?;
                Ok(required_str(&service_id, "iam_id", "service ID")?.to_string())
            }
        }
    }

    pub async fn read_policies(&self, query: Attributes) -> ClientResult<Attributes> {
        let owner = PolicyOwner::from_query(&query)?;
        let account_id = self
            .account_id
            .as_deref()
            .ok_or_else(|| ClientError::permanent("an account id is required to list policies"))?;
        let iam_id = self.resolve_iam_id(&owner).await?;

        let mut params = vec![
            ("account_id", account_id),
            ("iam_id", iam_id.as_str()),
            ("type", "access"),
        ];
        let sort = query.get::<String>(ATTR_SORT).filter(|s| !s.is_empty());
        if let Some(sort) = sort.as_deref() {
            params.push(("sort", sort));
        }

        let url = format!("{}/v1/policies", self.policy_endpoint);
        let body = self.http.get(&url, &params).await?;
        let policies = body
            .get("policies")
            .and_then(Json::as_array)
            .into_iter()
            .flatten()
            .map(|policy| flatten_policy(&owner, policy))
            .collect::<ClientResult<Vec<_>>>()?;
        tracing::debug!(owner = owner.id(), count = policies.len(), "policies listed");

        let mut result = query;
        result.insert("id", owner.id());
        result.insert(ATTR_POLICIES, Value::List(policies));
        Ok(result)
    }
}

impl DataSource for ServicePolicyDataSource {
    fn kind(&self) -> ResourceKind {
        IAM_SERVICE_POLICY
    }

    fn read(&self, query: &Attributes) -> BoxFuture<'_, ClientResult<Attributes>> {
        let query = query.clone();
        Box::pin(async move { self.read_policies(query).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn owner_requires_exactly_one_identifier() {
        let query = Attributes::new().with(ATTR_IAM_SERVICE_ID, "ServiceId-1");
        assert_eq!(
            PolicyOwner::from_query(&query).unwrap(),
            PolicyOwner::ServiceId("ServiceId-1".to_string())
        );

        let both = query.clone().with(ATTR_IAM_ID, "iam-ServiceId-1");
        assert!(PolicyOwner::from_query(&both).is_err());
        assert!(PolicyOwner::from_query(&Attributes::new()).is_err());
    }

    #[test]
    fn flatten_policy_prefixes_owner_and_maps_resources() {
        let policy = json!({
            "id": "pol-1",
            "description": "reader on kms",
            "roles": [{"role_id": "crn:v1:bluemix:public:iam::::role:Viewer", "display_name": "Viewer"}],
            "resources": [{
                "attributes": [
                    {"name": "accountId", "value": "acc-1", "operator": "stringEquals"},
                    {"name": "serviceName", "value": "kms", "operator": "stringEquals"},
                    {"name": "resourceGroupId", "value": "rg-1", "operator": "stringEquals"},
                    {"name": "vpcId", "value": "vpc-1", "operator": "stringEquals"}
                ]
            }]
        });
        let owner = PolicyOwner::ServiceId("ServiceId-1".to_string());
        let flat = flatten_policy(&owner, &policy).unwrap().to_json();
        assert_eq!(flat["id"], "ServiceId-1/pol-1");
        assert_eq!(flat["roles"], json!(["Viewer"]));
        assert_eq!(flat["description"], "reader on kms");
        assert_eq!(
            flat["resources"],
            json!([{
                "service": "kms",
                "resource_group_id": "rg-1",
                "attributes": {"vpcId": "vpc-1"}
            }])
        );
    }

    #[test]
    fn flatten_policy_requires_id() {
        let owner = PolicyOwner::IamId("iam-1".to_string());
        assert!(flatten_policy(&owner, &json!({"roles": []})).is_err());
    }
}
