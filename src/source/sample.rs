//! Built-in sample fleet
//!
//! Eleven hand-written machines used when no other source is configured, and
//! as the fallback when a configured source fails to load.

use super::*;

/// The built-in sample fleet
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleSource;

#[async_trait]
impl RecordSource for SampleSource {
    fn name(&self) -> &str {
        "sample"
    }

    async fn load(&self) -> Result<Vec<MachineRecord>, SourceError> {
        Ok(sample_records())
    }
}

#[allow(clippy::too_many_arguments)]
fn machine(
    name: &str,
    role: &str,
    os: (&str, &str),
    group: &str,
    location: &str,
    disk_free_gb: f64,
    memory_gb: f64,
    cpu_percent: f64,
    compliance_score: f64,
    last_reboot: (u32, u32),
    last_seen: (u32, u32),
) -> MachineRecord {
    MachineRecord {
        computer_name: name.to_string(),
        role: Some(role.to_string()),
        os_platform: Some(os.0.to_string()),
        os_version: Some(os.1.to_string()),
        group_name: Some(group.to_string()),
        location: Some(location.to_string()),
        disk_free_gb: Some(disk_free_gb),
        memory_gb: Some(memory_gb),
        cpu_percent: Some(cpu_percent),
        compliance_score: Some(compliance_score),
        last_reboot: NaiveDate::from_ymd_opt(2024, last_reboot.0, last_reboot.1),
        last_seen: NaiveDate::from_ymd_opt(2024, last_seen.0, last_seen.1),
        ..Default::default()
    }
}

/// Records of the built-in sample fleet
pub fn sample_records() -> Vec<MachineRecord> {
    vec![
        machine("LAPTOP-001", "Workstation", ("Windows 11", "22H2"), "Laptops", "NA-US", 68.2, 16.0, 32.5, 0.87, (5, 18), (5, 20)),
        machine("LAPTOP-002", "Workstation", ("Windows 10", "21H2"), "Laptops", "NA-US", 45.4, 8.0, 74.3, 0.62, (5, 16), (5, 19)),
        machine("LAPTOP-003", "Workstation", ("Windows 11", "23H1"), "Finance Workstations", "NA-US", 120.1, 16.0, 18.9, 0.92, (5, 14), (5, 18)),
        machine("SERVER-API-01", "Server", ("Windows Server 2019", "2019"), "Data Center Servers", "NA-US", 512.4, 64.0, 42.1, 0.95, (5, 12), (5, 17)),
        machine("SERVER-SQL-01", "Server", ("Windows Server 2022", "2022"), "Data Center Servers", "NA-US", 312.9, 128.0, 55.3, 0.89, (5, 13), (5, 17)),
        machine("SRV-LNX-01", "Server", ("Linux", "RHEL 9"), "Data Center Servers", "EU-DE", 212.5, 32.0, 21.7, 0.91, (5, 11), (5, 15)),
        machine("MAC-OPS-01", "Workstation", ("macOS", "14.4"), "Operations", "NA-US", 180.7, 32.0, 23.4, 0.88, (5, 18), (5, 20)),
        machine("MAC-FIN-02", "Workstation", ("macOS", "13.6"), "Finance Workstations", "NA-US", 102.6, 16.0, 26.1, 0.93, (5, 15), (5, 18)),
        machine("ENG-LAB-01", "Workstation", ("Windows 11", "22H2"), "Engineering Lab", "NA-US", 250.8, 32.0, 65.2, 0.77, (5, 15), (5, 18)),
        machine("ENG-LAB-02", "Workstation", ("Windows 11", "22H2"), "Engineering Lab", "NA-US", 198.4, 32.0, 58.4, 0.75, (5, 15), (5, 18)),
        machine("CANARY-EDGE", "Workstation", ("Windows 11", "23H1"), "Canary Cohort", "NA-US", 156.4, 16.0, 12.4, 0.98, (5, 19), (5, 20)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_source() {
        let records = SampleSource.load().await.unwrap();

        assert_eq!(records.len(), 11);
        assert_eq!(SampleSource.name(), "sample");
        assert!(records.iter().all(|r| r.last_seen.is_some()));

        let servers = records
            .iter()
            .filter(|r| r.group_name.as_deref() == Some("Data Center Servers"))
            .count();
        assert_eq!(servers, 3);
    }
}
