//! Resource and data source kinds served by this provider

use std::time::Duration;

use ibmcloud_core::{ResourceKind, Timeouts};

const TEN_MINUTES: Duration = Duration::from_secs(600);

pub const FLOATING_IP: ResourceKind = ResourceKind {
    name: "ibm_is_floating_ip",
    description: "VPC floating IP",
    timeouts: Timeouts {
        create: TEN_MINUTES,
        update: TEN_MINUTES,
        delete: TEN_MINUTES,
    },
};

pub const PI_VPN_CONNECTION: ResourceKind = ResourceKind {
    name: "ibm_pi_vpn_connection",
    description: "Power Systems VPN connection",
    timeouts: Timeouts {
        create: Duration::from_secs(20 * 60),
        update: Duration::from_secs(20 * 60),
        delete: TEN_MINUTES,
    },
};

pub const IAM_SERVICE_POLICY: ResourceKind = ResourceKind {
    name: "ibm_iam_service_policy",
    description: "Access policies of a service ID",
    timeouts: Timeouts {
        create: TEN_MINUTES,
        update: TEN_MINUTES,
        delete: TEN_MINUTES,
    },
};

pub const SCC_ACCOUNT_LOCATION_SETTINGS: ResourceKind = ResourceKind {
    name: "ibm_scc_account_location_settings",
    description: "Security and Compliance Center location of the account",
    timeouts: Timeouts {
        create: TEN_MINUTES,
        update: TEN_MINUTES,
        delete: TEN_MINUTES,
    },
};

pub const SCC_ACCOUNT_LOCATIONS: ResourceKind = ResourceKind {
    name: "ibm_scc_account_locations",
    description: "Locations offered by the Security and Compliance Center",
    timeouts: Timeouts {
        create: TEN_MINUTES,
        update: TEN_MINUTES,
        delete: TEN_MINUTES,
    },
};

/// Returns all managed resource kinds
pub fn resource_kinds() -> Vec<ResourceKind> {
    vec![FLOATING_IP, PI_VPN_CONNECTION]
}

/// Returns all data source kinds
pub fn data_source_kinds() -> Vec<ResourceKind> {
    vec![
        IAM_SERVICE_POLICY,
        SCC_ACCOUNT_LOCATION_SETTINGS,
        SCC_ACCOUNT_LOCATIONS,
    ]
}
