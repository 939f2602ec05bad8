//! Randomized fleet generator
//!
//! Produces realistic, varied machines from weighted distributions of OS
//! platforms, locations and groups. Seeding makes the output reproducible.

use super::*;
use chrono::{Duration, Local};
use rand::prelude::*;

const OS_PLATFORMS: &[(&str, &[&str], u32)] = &[
    ("Windows 11", &["22H2", "23H1", "23H2"], 30),
    ("Windows 10", &["21H2", "22H1", "22H2"], 25),
    ("Windows Server 2022", &["2022"], 8),
    ("Windows Server 2019", &["2019"], 8),
    ("Windows Server 2016", &["2016"], 4),
    ("macOS", &["13.6", "14.0", "14.1", "14.2", "14.3", "14.4"], 15),
    ("Linux", &["RHEL 8", "RHEL 9", "Ubuntu 22.04", "Ubuntu 20.04"], 10),
];

const LOCATIONS: &[(&str, u32)] = &[
    ("NA-US", 40),
    ("NA-CA", 10),
    ("EU-DE", 15),
    ("EU-UK", 12),
    ("APAC-JP", 10),
    ("APAC-AU", 8),
    ("SA-BR", 5),
];

/// (group, role, weight)
const GROUPS: &[(&str, &str, u32)] = &[
    ("Laptops", "Workstation", 25),
    ("Engineering Lab", "Workstation", 15),
    ("Finance Workstations", "Workstation", 12),
    ("Operations", "Workstation", 10),
    ("Sales", "Workstation", 8),
    ("Marketing", "Workstation", 8),
    ("HR Systems", "Workstation", 5),
    ("Executive Suite", "Workstation", 3),
    ("Data Center Servers", "Server", 8),
    ("Edge Servers", "Server", 3),
    ("Development Servers", "Server", 2),
    ("Canary Cohort", "Workstation", 1),
];

const SERVER_TYPES: &[&str] = &["API", "SQL", "WEB", "APP", "FILE", "DNS", "DC", "MAIL", "LNX"];
const WORKSTATION_PREFIXES: &[&str] = &["LAPTOP", "DESKTOP", "WKS", "MAC", "ENG", "FIN", "OPS", "EXEC"];

/// Fleet generator
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    count: usize,
    seed: Option<u64>,
    scenarios: bool,
    reference_date: NaiveDate,
}

impl GeneratedSource {
    /// Generate `count` random machines
    pub fn new(count: usize) -> Self {
        Self {
            count,
            seed: None,
            scenarios: false,
            reference_date: Local::now().date_naive(),
        }
    }

    /// Use a fixed seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Append the edge-case scenario machines
    pub fn with_scenarios(mut self, scenarios: bool) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Date that "days ago" timestamps are counted back from
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = date;
        self
    }

    /// Generate the fleet synchronously
    pub fn generate(&self) -> Vec<MachineRecord> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut machines: Vec<MachineRecord> = (1..=self.count)
            .map(|index| self.machine(&mut rng, index))
            .collect();

        if self.scenarios {
            machines.extend(self.scenario_machines(&mut rng));
        }

        machines
    }

    fn machine(&self, rng: &mut StdRng, index: usize) -> MachineRecord {
        let (group, role, _) = weighted_choice(rng, GROUPS, |g| g.2);
        let (os_name, os_versions, _) = weighted_choice(rng, OS_PLATFORMS, |o| o.2);
        let (location, _) = weighted_choice(rng, LOCATIONS, |l| l.1);
        let is_server = role == "Server";

        let computer_name = if is_server {
            let kind = SERVER_TYPES.choose(rng).copied().unwrap_or("SRV");
            format!("SRV-{}-{:02}", kind, index)
        } else {
            let prefix = WORKSTATION_PREFIXES.choose(rng).copied().unwrap_or("WKS");
            format!("{}-{:03}", prefix, index)
        };

        let (memory_gb, disk_free_gb, cpu_percent) = if is_server {
            let memory = [32.0, 64.0, 128.0, 256.0].choose(rng).copied().unwrap_or(64.0);
            (memory, rng.random_range(100.0..800.0), rng.random_range(15.0..75.0))
        } else {
            let memory = [8.0, 16.0, 32.0].choose(rng).copied().unwrap_or(16.0);
            (memory, rng.random_range(20.0..300.0), rng.random_range(5.0..90.0))
        };

        // Newer systems and servers score higher
        let mut compliance_base: f64 = 0.70;
        if os_name.contains("2022") || os_name.contains("11") || os_name == "macOS" {
            compliance_base = 0.85;
        }
        if is_server {
            compliance_base += 0.05;
        }
        let compliance = (compliance_base + rng.random_range(-0.15..0.15)).clamp(0.50, 0.99);

        MachineRecord {
            computer_name,
            role: Some(role.to_string()),
            os_platform: Some(os_name.to_string()),
            os_version: os_versions.choose(rng).map(|v| v.to_string()),
            group_name: Some(group.to_string()),
            location: Some(location.to_string()),
            disk_free_gb: Some(round1(disk_free_gb)),
            memory_gb: Some(memory_gb),
            cpu_percent: Some(round1(cpu_percent)),
            compliance_score: Some((compliance * 100.0).round() / 100.0),
            last_reboot: Some(self.days_ago(rng, 30)),
            last_seen: Some(self.days_ago(rng, 7)),
            ..Default::default()
        }
    }

    fn days_ago(&self, rng: &mut StdRng, max_days: i64) -> NaiveDate {
        self.reference_date - Duration::days(rng.random_range(0..max_days.max(1)))
    }

    /// Ten fixed machines covering alerting edge cases
    fn scenario_machines(&self, rng: &mut StdRng) -> Vec<MachineRecord> {
        #[allow(clippy::type_complexity)]
        let scenarios: [(&str, &str, &str, &str, &str, &str, f64, f64, f64, f64, i64, i64); 10] = [
            ("CRITICAL-HIGH-CPU", "Server", "Windows Server 2019", "2019", "Data Center Servers", "NA-US", 45.2, 64.0, 98.7, 0.72, 45, 1),
            ("LOW-DISK-ALERT", "Workstation", "Windows 10", "21H2", "Finance Workstations", "EU-UK", 2.1, 8.0, 34.2, 0.58, 60, 2),
            ("OFFLINE-MACHINE", "Workstation", "Windows 11", "22H2", "Laptops", "NA-US", 125.4, 16.0, 12.3, 0.81, 90, 30),
            ("PERFECT-COMPLIANCE", "Server", "Windows Server 2022", "2022", "Data Center Servers", "NA-US", 450.8, 128.0, 25.1, 0.99, 3, 1),
            ("LOW-COMPLIANCE-WKS", "Workstation", "Windows 10", "21H2", "Sales", "APAC-JP", 78.3, 8.0, 45.6, 0.52, 75, 5),
            ("HIGH-MEMORY-SERVER", "Server", "Linux", "RHEL 9", "Data Center Servers", "EU-DE", 680.5, 256.0, 42.8, 0.94, 10, 1),
            ("EDGE-CANARY-001", "Workstation", "Windows 11", "23H2", "Canary Cohort", "NA-US", 210.7, 32.0, 8.2, 0.98, 1, 1),
            ("LEGACY-SERVER-01", "Server", "Windows Server 2016", "2016", "Edge Servers", "SA-BR", 125.6, 32.0, 67.4, 0.61, 120, 7),
            ("MAC-EXEC-VIP", "Workstation", "macOS", "14.4", "Executive Suite", "NA-US", 450.2, 32.0, 15.3, 0.96, 5, 1),
            ("DEV-BUILD-SERVER", "Server", "Linux", "Ubuntu 22.04", "Development Servers", "NA-CA", 850.4, 128.0, 82.1, 0.87, 7, 1),
        ];

        scenarios
            .iter()
            .map(
                |&(name, role, os, version, group, location, disk, memory, cpu, compliance, reboot, seen)| {
                    MachineRecord {
                        computer_name: name.to_string(),
                        role: Some(role.to_string()),
                        os_platform: Some(os.to_string()),
                        os_version: Some(version.to_string()),
                        group_name: Some(group.to_string()),
                        location: Some(location.to_string()),
                        disk_free_gb: Some(disk),
                        memory_gb: Some(memory),
                        cpu_percent: Some(cpu),
                        compliance_score: Some(compliance),
                        last_reboot: Some(self.days_ago(rng, reboot)),
                        last_seen: Some(self.days_ago(rng, seen)),
                        ..Default::default()
                    }
                },
            )
            .collect()
    }
}

#[async_trait]
impl RecordSource for GeneratedSource {
    fn name(&self) -> &str {
        "generated"
    }

    async fn load(&self) -> Result<Vec<MachineRecord>, SourceError> {
        Ok(self.generate())
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Selects an item based on weights.
fn weighted_choice<T: Copy>(rng: &mut impl Rng, items: &[T], weight: impl Fn(&T) -> u32) -> T {
    let total: u32 = items.iter().map(&weight).sum();
    let mut choice = rng.random_range(0..total.max(1));

    for item in items {
        let w = weight(item);
        if choice < w {
            return *item;
        }
        choice -= w;
    }

    items[0]
}
