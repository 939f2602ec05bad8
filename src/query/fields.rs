//! Field Mapping Registry
//!
//! Static lookup tables mapping human-readable sensor names and group aliases to
//! canonical record columns and types. All lookups are case-insensitive and
//! ignore surrounding whitespace.

use crate::query::ast::FilterOperator;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Date => write!(f, "date"),
        }
    }
}

/// Mapping of a human field name to its storage column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    pub key: &'static str,
    pub field_type: FieldType,
    pub db_column: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

const fn mapping(
    key: &'static str,
    field_type: FieldType,
    description: &'static str,
    category: &'static str,
) -> FieldMapping {
    FieldMapping {
        key,
        field_type,
        db_column: key,
        description,
        category,
    }
}

use FieldType::{Date, Number, Text};

static FIELD_MAPPINGS: Lazy<HashMap<&'static str, FieldMapping>> = Lazy::new(|| {
    HashMap::from([
        // Identification
        ("computer name", mapping("computer_name", Text, "Endpoint hostname", "Core")),
        ("hostname", mapping("computer_name", Text, "Endpoint hostname (alias)", "Core")),
        ("computer role", mapping("role", Text, "Computer role (Workstation, Server, etc.)", "Core")),
        ("role", mapping("role", Text, "Computer role (alias)", "Core")),
        // Operating system
        ("operating system", mapping("os_platform", Text, "Operating system platform", "Core")),
        ("os platform", mapping("os_platform", Text, "OS platform (Windows, macOS, Linux)", "Core")),
        ("os version", mapping("os_version", Text, "Operating system version", "Core")),
        // Hardware resources
        ("disk free gb", mapping("disk_free_gb", Number, "Available disk space in GB", "Performance")),
        ("disk space", mapping("disk_free_gb", Number, "Available disk space (alias)", "Performance")),
        ("memory gb", mapping("memory_gb", Number, "Physical memory in GB", "Performance")),
        ("ram", mapping("memory_gb", Number, "RAM in GB (alias)", "Performance")),
        ("cpu percent", mapping("cpu_percent", Number, "CPU utilization percentage", "Performance")),
        ("cpu usage", mapping("cpu_percent", Number, "CPU usage percentage (alias)", "Performance")),
        // Compliance
        ("compliance score", mapping("compliance_score", Number, "Compliance score (0-1)", "Governance")),
        ("compliance", mapping("compliance_score", Number, "Compliance score (alias)", "Governance")),
        // Grouping and location
        ("group", mapping("group_name", Text, "Computer group membership", "Metadata")),
        ("group name", mapping("group_name", Text, "Computer group name", "Metadata")),
        ("location", mapping("location", Text, "Geographic or network location", "Metadata")),
        // Timestamps
        ("last reboot", mapping("last_reboot", Date, "Last system reboot timestamp", "Core")),
        ("last seen", mapping("last_seen", Date, "Last time endpoint was seen", "Core")),
        // Network
        ("ip address", mapping("ip_address", Text, "Primary IP address", "Network")),
        ("mac address", mapping("mac_address", Text, "Primary MAC address", "Network")),
        // Asset information
        ("serial number", mapping("serial_number", Text, "Hardware serial number", "Asset")),
        ("manufacturer", mapping("manufacturer", Text, "Hardware manufacturer", "Asset")),
        ("model", mapping("model", Text, "Hardware model", "Asset")),
    ])
});

static GROUP_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("laptops", "Laptops"),
        ("servers", "Data Center Servers"),
        ("data center servers", "Data Center Servers"),
        ("finance", "Finance Workstations"),
        ("finance workstations", "Finance Workstations"),
        ("canary", "Canary Cohort"),
        ("canary cohort", "Canary Cohort"),
        ("engineering", "Engineering Lab"),
        ("engineering lab", "Engineering Lab"),
        ("operations", "Operations"),
        ("ops", "Operations"),
        ("production", "Production Servers"),
        ("prod", "Production Servers"),
        ("development", "Development Workstations"),
        ("dev", "Development Workstations"),
        ("staging", "Staging Servers"),
        ("test", "Test Environment"),
    ])
});

/// A sensor as presented in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sensor {
    pub name: &'static str,
    pub key: &'static str,
    pub category: &'static str,
    pub field_type: FieldType,
    pub description: &'static str,
}

const fn sensor(
    name: &'static str,
    key: &'static str,
    category: &'static str,
    field_type: FieldType,
    description: &'static str,
) -> Sensor {
    Sensor {
        name,
        key,
        category,
        field_type,
        description,
    }
}

/// Sensor catalog with display names
pub static SENSORS_CATALOG: &[Sensor] = &[
    sensor("Computer Name", "computer_name", "Core", Text, "Returns the endpoint hostname"),
    sensor("Operating System", "os_platform", "Core", Text, "Human-readable OS platform string"),
    sensor("OS Platform", "os_platform", "Core", Text, "Normalized OS platform (Windows, macOS, Linux)"),
    sensor("OS Version", "os_version", "Core", Text, "Version information for the current OS"),
    sensor("CPU Percent", "cpu_percent", "Performance", Number, "Current CPU utilization percentage"),
    sensor("Memory GB", "memory_gb", "Performance", Number, "Physical memory in gigabytes"),
    sensor("Disk Free GB", "disk_free_gb", "Performance", Number, "Available disk capacity in gigabytes"),
    sensor("Compliance Score", "compliance_score", "Governance", Number, "Composite score for patching and configuration compliance"),
    sensor("Last Reboot", "last_reboot", "Core", Date, "Timestamp of the last reboot"),
    sensor("Last Seen", "last_seen", "Core", Date, "Timestamp of the last check-in"),
    sensor("Group", "group_name", "Metadata", Text, "Logical group membership for the endpoint"),
    sensor("Location", "location", "Metadata", Text, "Geographic or network zone indicator"),
];

/// Aggregate functions available in the query language
pub const AGGREGATE_FUNCTIONS: [&str; 5] = ["count()", "min()", "max()", "avg()", "sum()"];

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Look up the mapping for a field name
pub fn field_mapping(name: &str) -> Option<&'static FieldMapping> {
    FIELD_MAPPINGS.get(normalize(name).as_str())
}

/// Storage column for a field name
pub fn db_column(name: &str) -> Option<&'static str> {
    field_mapping(name).map(|m| m.db_column)
}

/// Value type of a field name
pub fn field_type(name: &str) -> Option<FieldType> {
    field_mapping(name).map(|m| m.field_type)
}

/// Whether a name (possibly multi-word) is a known field
pub fn is_known_field(name: &str) -> bool {
    FIELD_MAPPINGS.contains_key(normalize(name).as_str())
}

/// Resolve a human-friendly group name to its canonical stored name.
///
/// Unknown names are returned unchanged (trimmed).
pub fn resolve_group_alias(name: &str) -> String {
    GROUP_ALIASES
        .get(normalize(name).as_str())
        .map(|g| g.to_string())
        .unwrap_or_else(|| name.trim().to_string())
}

/// Check operator/type compatibility for a field.
///
/// `equals` and `not_equals` work on every field, ordering operators need a
/// numeric field and substring operators need a text field. Unknown fields are
/// never compatible.
pub fn validate_field_operator(name: &str, operator: FilterOperator) -> bool {
    let Some(field_type) = field_type(name) else {
        return false;
    };

    match operator {
        FilterOperator::Equals | FilterOperator::NotEquals => true,
        FilterOperator::GreaterThan
        | FilterOperator::LessThan
        | FilterOperator::GreaterOrEqual
        | FilterOperator::LessOrEqual => field_type == FieldType::Number,
        FilterOperator::Contains
        | FilterOperator::DoesNotContain
        | FilterOperator::StartsWith
        | FilterOperator::EndsWith => field_type == FieldType::Text,
    }
}

/// All known field names, sorted, for autocomplete
pub fn all_field_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FIELD_MAPPINGS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Sensors in a catalog category
pub fn sensors_by_category(category: &str) -> Vec<&'static Sensor> {
    SENSORS_CATALOG
        .iter()
        .filter(|s| s.category.eq_ignore_ascii_case(category))
        .collect()
}
