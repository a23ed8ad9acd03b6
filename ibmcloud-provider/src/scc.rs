//! Security and Compliance Center admin data sources

use ibmcloud_core::{
    Attributes, BoxFuture, ClientError, ClientResult, DataSource, ResourceKind, Value,
};
use serde_json::Value as Json;

use crate::http::{IbmHttpClient, str_at};
use crate::resources::{SCC_ACCOUNT_LOCATION_SETTINGS, SCC_ACCOUNT_LOCATIONS};
use crate::session::IbmSession;

pub const ATTR_LOCATIONS: &str = "locations";

/// Identifier reported for the location list, which has no id of its own
const LOCATIONS_ID: &str = "scc_account_locations";

/// Location id from a settings response; older responses use `location_id`
pub fn settings_location(body: &Json) -> ClientResult<&str> {
    str_at(body, "location.id")
        .or_else(|| str_at(body, "location.location_id"))
        .ok_or_else(|| ClientError::permanent("settings response has no location"))
}

/// Flatten the `locations` array of a list response
pub fn flatten_locations(body: &Json) -> Vec<Value> {
    body.get("locations")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::from_json)
        .collect()
}

/// Data source for `ibm_scc_account_location_settings`
pub struct LocationSettingsDataSource {
    http: IbmHttpClient,
    endpoint: String,
    account_id: Option<String>,
}

impl LocationSettingsDataSource {
    pub fn new(http: IbmHttpClient, session: &IbmSession) -> Self {
        Self {
            http,
            endpoint: session.scc_admin_endpoint(),
            account_id: session.account_id.clone(),
        }
    }

    pub async fn read_settings(&self) -> ClientResult<Attributes> {
        let account_id = self
            .account_id
            .as_deref()
            .ok_or_else(|| ClientError::permanent("an account id is required to read settings"))?;
        let url = format!("{}/admin/v1/accounts/{}/settings", self.endpoint, account_id);
        let body = self.http.get(&url, &[]).await?;
        let location = settings_location(&body)?;
        Ok(Attributes::new().with("id", location))
    }
}

impl DataSource for LocationSettingsDataSource {
    fn kind(&self) -> ResourceKind {
        SCC_ACCOUNT_LOCATION_SETTINGS
    }

    fn read(&self, _query: &Attributes) -> BoxFuture<'_, ClientResult<Attributes>> {
        Box::pin(self.read_settings())
    }
}

/// Data source for `ibm_scc_account_locations`
pub struct LocationsDataSource {
    http: IbmHttpClient,
    endpoint: String,
}

impl LocationsDataSource {
    pub fn new(http: IbmHttpClient, session: &IbmSession) -> Self {
        Self {
            http,
            endpoint: session.scc_admin_endpoint(),
        }
    }

    pub async fn read_locations(&self) -> ClientResult<Attributes> {
        let url = format!("{}/admin/v1/locations", self.endpoint);
        let body = self.http.get(&url, &[]).await?;
        Ok(Attributes::new()
            .with("id", LOCATIONS_ID)
            .with(ATTR_LOCATIONS, Value::List(flatten_locations(&body))))
    }
}

impl DataSource for LocationsDataSource {
    fn kind(&self) -> ResourceKind {
        SCC_ACCOUNT_LOCATIONS
    }

    fn read(&self, _query: &Attributes) -> BoxFuture<'_, ClientResult<Attributes>> {
        Box::pin(self.read_locations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_location_falls_back_to_location_id() {
        let current = json!({"location": {"id": "us"}});
        assert_eq!(settings_location(&current).unwrap(), "us");

        let legacy = json!({"location": {"location_id": "eu"}});
        assert_eq!(settings_location(&legacy).unwrap(), "eu");

        assert!(settings_location(&json!({})).is_err());
    }

    #[test]
    fn flatten_locations_keeps_objects() {
        let body = json!({"locations": [
            {"id": "us", "main_location": "us-south", "governing_locations": ["us-south"]},
            {"id": "eu", "main_location": "eu-de", "analytics_endpoint": null}
        ]});
        let locations = flatten_locations(&body);
        assert_eq!(locations.len(), 2);
        assert_eq!(
            locations[1].to_json(),
            json!({"id": "eu", "main_location": "eu-de"})
        );
        assert!(flatten_locations(&json!({})).is_empty());
    }
}
