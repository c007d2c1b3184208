use serde_json::{Map, Value};

/// A lead built from a MarkMail form submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CrmLead {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: String,
    pub company: String,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub website: Option<String>,
    pub lead_source: String,
    pub status: String,
    pub description: Option<String>,
    /// Extra Salesforce API fields, passed through as-is.
    pub custom_fields: Map<String, Value>,
}

const UNKNOWN: &str = "Unknown";

impl CrmLead {
    /// Map a flat form submission onto lead fields.
    ///
    /// `email` is the only required key. A single `name` is split on its first
    /// space when `first_name`/`last_name` are absent. Keys ending in `__c`
    /// become custom fields; any other unrecognised key is appended to the
    /// description as a `key: value` line.
    pub fn from_submission(form_name: &str, data: &Map<String, Value>) -> Option<Self> {
        let email = text(data, "email")?;

        let mut first_name = text(data, "first_name");
        let mut last_name = text(data, "last_name");
        if first_name.is_none() && last_name.is_none() {
            if let Some(name) = text(data, "name") {
                match name.split_once(' ') {
                    Some((first, last)) => {
                        first_name = Some(first.to_string());
                        last_name = Some(last.trim().to_string());
                    }
                    None => last_name = Some(name),
                }
            }
        }

        let mut custom_fields = Map::new();
        let mut notes = Vec::new();
        for (key, value) in data {
            if KNOWN_KEYS.contains(&key.as_str()) || value.is_null() {
                continue;
            }
            if key.ends_with("__c") {
                custom_fields.insert(key.clone(), value.clone());
            } else {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                notes.push(format!("{key}: {rendered}"));
            }
        }

        Some(Self {
            email,
            first_name,
            last_name: last_name
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            company: text(data, "company").unwrap_or_else(|| UNKNOWN.to_string()),
            phone: text(data, "phone"),
            title: text(data, "title"),
            website: text(data, "website"),
            lead_source: format!("MarkMail Form: {form_name}"),
            status: "New".to_string(),
            description: (!notes.is_empty()).then(|| notes.join("\n")),
            custom_fields,
        })
    }

    /// Request body for `POST sobjects/Lead`, using Salesforce API field names.
    pub fn to_salesforce_fields(&self) -> Value {
        let mut fields = Map::new();
        fields.insert("Email".into(), Value::String(self.email.clone()));
        fields.insert("LastName".into(), Value::String(self.last_name.clone()));
        fields.insert("Company".into(), Value::String(self.company.clone()));
        fields.insert("LeadSource".into(), Value::String(self.lead_source.clone()));
        fields.insert("Status".into(), Value::String(self.status.clone()));

        let optional = [
            ("FirstName", &self.first_name),
            ("Phone", &self.phone),
            ("Title", &self.title),
            ("Website", &self.website),
            ("Description", &self.description),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                fields.insert(name.into(), Value::String(v.clone()));
            }
        }

        for (key, value) in &self.custom_fields {
            fields.insert(key.clone(), value.clone());
        }

        Value::Object(fields)
    }
}

const KNOWN_KEYS: &[&str] = &[
    "email",
    "first_name",
    "last_name",
    "name",
    "company",
    "phone",
    "title",
    "website",
];

/// Trimmed, non-empty string value for `key`.
fn text(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
