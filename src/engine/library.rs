//! Saved queries and query templates

use crate::query::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}"));

/// A named query kept for reuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub id: String,
    pub name: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_time_ms: Option<f64>,
}

impl SavedQuery {
    pub fn new(name: impl Into<String>, question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            question: question.into(),
            description: None,
            tags: Vec::new(),
            owner: None,
            created_at: now,
            updated_at: now,
            execution_count: 0,
            last_executed: None,
            average_time_ms: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Record one execution and fold its time into the running average
    pub fn record_execution(&mut self, time_ms: f64) {
        self.execution_count += 1;
        self.last_executed = Some(Utc::now());
        let n = self.execution_count as f64;
        self.average_time_ms = Some(match self.average_time_ms {
            Some(avg) => avg + (time_ms - avg) / n,
            None => time_ms,
        });
    }
}

/// Value type of a template parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    Text,
    Number,
    Date,
    Select,
}

/// A `${name}` placeholder in a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Allowed values of a `select` parameter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl TemplateParameter {
    pub fn number(name: &str, default: f64) -> Self {
        Self {
            name: name.to_string(),
            param_type: ParameterType::Number,
            required: true,
            default: Some(default.to_string()),
            options: Vec::new(),
        }
    }

    fn check(&self, value: &str) -> QueryResult<()> {
        match self.param_type {
            ParameterType::Number if value.trim().parse::<f64>().is_err() => Err(
                QueryError::query(format!("Parameter {} must be a number: {}", self.name, value)),
            ),
            ParameterType::Select
                if !self.options.is_empty() && !self.options.iter().any(|o| o == value) =>
            {
                Err(QueryError::query(format!(
                    "Parameter {} must be one of: {}",
                    self.name,
                    self.options.join(", ")
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A parameterised query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub template: String,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
    pub category: String,
    /// 1 (basic) to 5 (advanced)
    pub difficulty: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl QueryTemplate {
    /// Substitute parameters into the template text.
    ///
    /// Each parameter takes the supplied value or its default. A required
    /// parameter with neither is an error. Placeholders with no matching
    /// parameter are left as written.
    pub fn apply(&self, params: &HashMap<String, String>) -> QueryResult<String> {
        let mut values: HashMap<&str, String> = HashMap::new();
        for param in &self.parameters {
            let value = params
                .get(&param.name)
                .cloned()
                .or_else(|| param.default.clone());

            match value {
                Some(value) => {
                    param.check(&value)?;
                    values.insert(param.name.as_str(), value);
                }
                None if param.required => {
                    return Err(QueryError::query(format!(
                        "Required parameter missing: {}",
                        param.name
                    )));
                }
                None => {}
            }
        }

        let placeholder = PLACEHOLDER
            .as_ref()
            .map_err(|e| QueryError::query(format!("Invalid placeholder pattern: {}", e)))?;

        Ok(placeholder
            .replace_all(&self.template, |caps: &Captures| {
                values
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned())
    }
}

/// Templates every engine starts with
pub fn default_templates() -> Vec<QueryTemplate> {
    vec![
        QueryTemplate {
            id: "all-machines".to_string(),
            name: "All Machines".to_string(),
            description: "List all machines".to_string(),
            template: "Get Computer Name, OS Platform, Group from all machines".to_string(),
            parameters: Vec::new(),
            category: "Basic".to_string(),
            difficulty: 1,
            examples: Vec::new(),
        },
        QueryTemplate {
            id: "high-cpu".to_string(),
            name: "High CPU Usage".to_string(),
            description: "Find machines with high CPU usage".to_string(),
            template: "Get Computer Name, CPU Percent from all machines where CPU Percent is greater than \"${threshold}\" order by CPU Percent desc".to_string(),
            parameters: vec![TemplateParameter::number("threshold", 80.0)],
            category: "Performance".to_string(),
            difficulty: 2,
            examples: Vec::new(),
        },
        QueryTemplate {
            id: "low-disk".to_string(),
            name: "Low Disk Space".to_string(),
            description: "Find machines with low disk space".to_string(),
            template: "Get Computer Name, Disk Free GB from all machines where Disk Free GB is less than \"${threshold}\" order by Disk Free GB".to_string(),
            parameters: vec![TemplateParameter::number("threshold", 50.0)],
            category: "Performance".to_string(),
            difficulty: 2,
            examples: Vec::new(),
        },
        QueryTemplate {
            id: "compliance-check".to_string(),
            name: "Compliance Check".to_string(),
            description: "Check compliance scores by group".to_string(),
            template: "Get avg(Compliance Score), min(Compliance Score), count() from all machines group by Group".to_string(),
            parameters: Vec::new(),
            category: "Governance".to_string(),
            difficulty: 3,
            examples: Vec::new(),
        },
    ]
}

/// Serialized form of a library
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryExport {
    #[serde(default)]
    saved_queries: Option<Vec<SavedQuery>>,
    #[serde(default)]
    templates: Option<Vec<QueryTemplate>>,
}

/// Saved queries and templates, in insertion order
#[derive(Debug, Clone)]
pub struct QueryLibrary {
    saved: Vec<SavedQuery>,
    templates: Vec<QueryTemplate>,
}

impl Default for QueryLibrary {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            templates: default_templates(),
        }
    }
}

impl QueryLibrary {
    /// Library with no templates
    pub fn empty() -> Self {
        Self {
            saved: Vec::new(),
            templates: Vec::new(),
        }
    }

    fn saved_index(&self, name: &str) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.saved.iter().position(|s| s.name.to_lowercase() == name)
    }

    /// Save a query under a case-insensitive name, replacing any query with
    /// the same name but keeping its id, creation time and statistics
    pub fn save(&mut self, query: SavedQuery) -> SavedQuery {
        match self.saved_index(&query.name) {
            Some(i) => {
                let existing = &mut self.saved[i];
                existing.name = query.name;
                existing.question = query.question;
                existing.description = query.description;
                existing.tags = query.tags;
                existing.owner = query.owner;
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                self.saved.push(query.clone());
                query
            }
        }
    }

    pub fn get_saved(&self, name: &str) -> Option<&SavedQuery> {
        self.saved_index(name).map(|i| &self.saved[i])
    }

    pub fn get_saved_mut(&mut self, name: &str) -> Option<&mut SavedQuery> {
        self.saved_index(name).map(|i| &mut self.saved[i])
    }

    pub fn list_saved(&self) -> &[SavedQuery] {
        &self.saved
    }

    pub fn delete_saved(&mut self, name: &str) -> Option<SavedQuery> {
        self.saved_index(name).map(|i| self.saved.remove(i))
    }

    /// Add a template, replacing one with the same id
    pub fn add_template(&mut self, template: QueryTemplate) {
        match self.templates.iter_mut().find(|t| t.id == template.id) {
            Some(existing) => *existing = template,
            None => self.templates.push(template),
        }
    }

    pub fn get_template(&self, id: &str) -> Option<&QueryTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn list_templates(&self) -> &[QueryTemplate] {
        &self.templates
    }

    /// Query text for a template with parameters substituted
    pub fn apply_template(&self, id: &str, params: &HashMap<String, String>) -> QueryResult<String> {
        self.get_template(id)
            .ok_or_else(|| QueryError::query(format!("Template not found: {}", id)))?
            .apply(params)
    }

    /// Serialize saved queries and templates as pretty JSON
    pub fn export(&self) -> QueryResult<String> {
        serde_json::to_string_pretty(&LibraryExport {
            saved_queries: Some(self.saved.clone()),
            templates: Some(self.templates.clone()),
        })
        .map_err(|e| QueryError::query(format!("Failed to export library: {}", e)))
    }

    /// Replace the sections present in exported JSON
    pub fn import(&mut self, data: &str) -> QueryResult<()> {
        let parsed: LibraryExport = serde_json::from_str(data)
            .map_err(|e| QueryError::query(format!("Failed to import library: {}", e)))?;

        if let Some(saved) = parsed.saved_queries {
            self.saved = saved;
        }
        if let Some(templates) = parsed.templates {
            self.templates = templates;
        }
        Ok(())
    }
}
