//! IBM Cloud provider
//!
//! HTTP/JSON clients for the resource and data source kinds in [`resources`].
//!
//! ## Module Structure
//!
//! - `session` - Endpoints and credentials shared by every client
//! - `http` - Request plumbing and error classification
//! - `floating_ip` - VPC floating IPs
//! - `vpn_connection` - Power Systems VPN connections
//! - `iam_policy` - IAM service policy lookup
//! - `scc` - Security and Compliance Center settings and locations

pub mod floating_ip;
pub mod http;
pub mod iam_policy;
pub mod resources;
pub mod scc;
pub mod session;
pub mod vpn_connection;

pub use floating_ip::FloatingIpClient;
pub use http::IbmHttpClient;
pub use iam_policy::ServicePolicyDataSource;
pub use scc::{LocationSettingsDataSource, LocationsDataSource};
pub use session::{Endpoints, IbmSession, SessionError};
pub use vpn_connection::VpnConnectionClient;

use ibmcloud_core::{ClientResult, DataSource, RemoteClient, ResourceKind};

/// Builds clients for every supported kind from one session
pub struct IbmProvider {
    session: IbmSession,
    http: IbmHttpClient,
}

impl IbmProvider {
    pub fn new(session: IbmSession) -> ClientResult<Self> {
        let http = IbmHttpClient::new(&session)?;
        Ok(Self { session, http })
    }

    pub fn session(&self) -> &IbmSession {
        &self.session
    }

    pub fn resource_kinds(&self) -> Vec<ResourceKind> {
        resources::resource_kinds()
    }

    pub fn data_source_kinds(&self) -> Vec<ResourceKind> {
        resources::data_source_kinds()
    }

    /// Look up a kind by name among resources and data sources
    pub fn kind(&self, name: &str) -> Option<ResourceKind> {
        self.resource_kinds()
            .into_iter()
            .chain(self.data_source_kinds())
            .find(|kind| kind.name == name)
    }

    /// Client for a managed resource kind
    pub fn client(&self, kind: &str) -> Option<Box<dyn RemoteClient>> {
        let http = self.http.clone();
        match kind {
            name if name == resources::FLOATING_IP.name => {
                Some(Box::new(FloatingIpClient::new(http, &self.session)))
            }
            name if name == resources::PI_VPN_CONNECTION.name => {
                Some(Box::new(VpnConnectionClient::new(http, &self.session)))
            }
            _ => None,
        }
    }

    /// Data source for a read-only kind
    pub fn data_source(&self, kind: &str) -> Option<Box<dyn DataSource>> {
        let http = self.http.clone();
        match kind {
            name if name == resources::IAM_SERVICE_POLICY.name => {
                Some(Box::new(ServicePolicyDataSource::new(http, &self.session)))
            }
            name if name == resources::SCC_ACCOUNT_LOCATION_SETTINGS.name => {
                Some(Box::new(LocationSettingsDataSource::new(http, &self.session)))
            }
            name if name == resources::SCC_ACCOUNT_LOCATIONS.name => {
                Some(Box::new(LocationsDataSource::new(http, &self.session)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_an_implementation() {
        let provider = IbmProvider::new(IbmSession::new("us-south", "token")).unwrap();
        for kind in provider.resource_kinds() {
            let client = provider.client(kind.name).unwrap();
            assert_eq!(client.kind().name, kind.name);
        }
        for kind in provider.data_source_kinds() {
            let source = provider.data_source(kind.name).unwrap();
            assert_eq!(source.kind().name, kind.name);
        }
        assert!(provider.client("ibm_is_vpc").is_none());
        assert!(provider.data_source(resources::FLOATING_IP.name).is_none());
        assert_eq!(
            provider.kind("ibm_scc_account_locations").map(|k| k.name),
            Some("ibm_scc_account_locations")
        );
    }
}
