//! Extraction of the analysis request from an alert document.
//!
//! Alert documents are loose: fields may be nested objects or flattened
//! dotted keys (`"kibana.alert.rule.name"`), and any of them may be missing or
//! of the wrong type. Each accessor below owns one field and falls back to
//! [`NOT_AVAILABLE`] instead of failing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::alerts::AlertRecord;

/// Placeholder rendered for any field absent from the alert.
pub const NOT_AVAILABLE: &str = "N/A";

const RULE: &[&str] = &["kibana", "alert", "rule"];
const RULE_PARAMETERS: &[&str] = &["kibana", "alert", "rule", "parameters"];
const THREAT: &[&str] = &["kibana", "alert", "rule", "parameters", "threat"];
const PROCESS: &[&str] = &["process"];
const PARENT_PROCESS: &[&str] = &["process", "parent"];
const USER: &[&str] = &["user"];
const HOST: &[&str] = &["host"];

/// One MITRE ATT&CK technique mapped by the detection rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Technique {
    /// Tactic, e.g. `TA0002 Execution`.
    pub tactic: String,
    /// Technique, e.g. `T1059 Command and Scripting Interpreter`.
    pub technique: String,
    /// Sub-techniques, e.g. `T1059.001 PowerShell`.
    pub subtechniques: Vec<String>,
}

/// Flat, fully-defaulted view of an alert, ready for prompting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    /// Id of the alert this request was built from. Not rendered.
    #[serde(skip)]
    pub alert_id: String,
    /// Timestamp of the alert record. Not rendered.
    #[serde(skip)]
    pub source_timestamp: Option<DateTime<Utc>>,

    pub rule_name: String,
    pub severity: String,
    pub risk_score: String,
    pub description: String,
    pub timestamp: String,

    pub process_name: String,
    pub process_command_line: String,
    pub process_working_directory: String,
    pub parent_process_name: String,
    pub parent_command_line: String,

    pub user_name: String,
    pub user_domain: String,

    pub host_name: String,
    pub host_os: String,

    pub techniques: Vec<Technique>,
}

impl AnalysisRequest {
    /// Build a request from an alert. Never fails.
    #[must_use]
    pub fn from_alert(alert: &AlertRecord) -> Self {
        let raw = &alert.raw;
        Self {
            alert_id: alert.id.clone(),
            source_timestamp: alert.timestamp,
            rule_name: rule_name(raw),
            severity: severity(raw),
            risk_score: risk_score(raw),
            description: description(raw),
            timestamp: event_timestamp(raw),
            process_name: process_name(raw),
            process_command_line: process_command_line(raw),
            process_working_directory: process_working_directory(raw),
            parent_process_name: parent_process_name(raw),
            parent_command_line: parent_command_line(raw),
            user_name: user_name(raw),
            user_domain: user_domain(raw),
            host_name: host_name(raw),
            host_os: host_os(raw),
            techniques: techniques(raw),
        }
    }
}

pub fn rule_name(raw: &Value) -> String {
    text_at(raw, RULE, &["name"])
}

pub fn severity(raw: &Value) -> String {
    text_at(raw, RULE_PARAMETERS, &["severity"])
}

pub fn risk_score(raw: &Value) -> String {
    text_at(raw, RULE_PARAMETERS, &["risk_score"])
}

pub fn description(raw: &Value) -> String {
    text_at(raw, RULE_PARAMETERS, &["description"])
}

pub fn event_timestamp(raw: &Value) -> String {
    text_at(raw, &[], &["@timestamp"])
}

pub fn process_name(raw: &Value) -> String {
    text_at(raw, PROCESS, &["name"])
}

pub fn process_command_line(raw: &Value) -> String {
    text_at(raw, PROCESS, &["command_line"])
}

pub fn process_working_directory(raw: &Value) -> String {
    text_at(raw, PROCESS, &["working_directory"])
}

pub fn parent_process_name(raw: &Value) -> String {
    text_at(raw, PARENT_PROCESS, &["name"])
}

pub fn parent_command_line(raw: &Value) -> String {
    text_at(raw, PARENT_PROCESS, &["command_line"])
}

pub fn user_name(raw: &Value) -> String {
    text_at(raw, USER, &["name"])
}

pub fn user_domain(raw: &Value) -> String {
    text_at(raw, USER, &["domain"])
}

pub fn host_name(raw: &Value) -> String {
    text_at(raw, HOST, &["hostname"])
}

pub fn host_os(raw: &Value) -> String {
    text_at(raw, HOST, &["os", "name"])
}

/// MITRE mapping from the rule parameters. Empty when absent or malformed.
pub fn techniques(raw: &Value) -> Vec<Technique> {
    let Some(Value::Array(threats)) = lookup(raw, THREAT) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for threat in threats {
        let tactic = labelled(threat.get("tactic"));
        let techniques = threat
            .get("technique")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if techniques.is_empty() {
            if tactic != NOT_AVAILABLE {
                out.push(Technique {
                    tactic,
                    technique: NOT_AVAILABLE.to_string(),
                    subtechniques: Vec::new(),
                });
            }
            continue;
        }

        for technique in techniques {
            let subtechniques = technique
                .get("subtechnique")
                .and_then(Value::as_array)
                .map(|subs| subs.iter().map(|s| labelled(Some(s))).collect())
                .unwrap_or_default();
            out.push(Technique {
                tactic: tactic.clone(),
                technique: labelled(Some(technique)),
                subtechniques,
            });
        }
    }
    out
}

/// `"<id> <name>"` from an ATT&CK object, whichever parts exist.
fn labelled(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return NOT_AVAILABLE.to_string();
    };
    let id = value.get("id").and_then(scalar_text);
    let name = value.get("name").and_then(scalar_text);
    match (id, name) {
        (Some(id), Some(name)) => format!("{id} {name}"),
        (Some(part), None) | (None, Some(part)) => part,
        (None, None) => NOT_AVAILABLE.to_string(),
    }
}

fn text_at(raw: &Value, prefix: &[&str], field: &[&str]) -> String {
    let path = [prefix, field].concat();
    lookup(raw, &path)
        .and_then(scalar_text)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Render a scalar; objects, arrays, nulls and blank strings don't count.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Resolve a path where any run of segments may be stored as one dotted key.
fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let object = value.as_object()?;
    // Longest dotted key first: "kibana.alert.rule.name" beats "kibana"
    (1..=path.len()).rev().find_map(|take| {
        let key = path[..take].join(".");
        object
            .get(&key)
            .and_then(|child| lookup(child, &path[take..]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert(raw: Value) -> AlertRecord {
        AlertRecord::new("a1", None, raw)
    }

    fn sample_raw() -> Value {
        json!({
            "@timestamp": "2024-05-01T10:00:00.000Z",
            "kibana": {
                "alert": {
                    "rule": {
                        "name": "Suspicious PowerShell",
                        "parameters": {
                            "severity": "high",
                            "risk_score": 73,
                            "description": "Encoded PowerShell command",
                            "threat": [{
                                "framework": "MITRE ATT&CK",
                                "tactic": { "id": "TA0002", "name": "Execution" },
                                "technique": [{
                                    "id": "T1059",
                                    "name": "Command and Scripting Interpreter",
                                    "subtechnique": [{ "id": "T1059.001", "name": "PowerShell" }]
                                }]
                            }]
                        }
                    }
                }
            },
            "process": {
                "name": "powershell.exe",
                "command_line": "powershell.exe -enc SQBFAFgA",
                "working_directory": "C:\\Users\\bob",
                "parent": { "name": "winword.exe", "command_line": "WINWORD.EXE /n doc.docm" }
            },
            "user": { "name": "bob", "domain": "CORP" },
            "host": { "hostname": "ws-042", "os": { "name": "Windows" } }
        })
    }

    #[test]
    fn test_empty_document_yields_sentinels() {
        let request = AnalysisRequest::from_alert(&alert(json!({})));

        for field in [
            &request.rule_name,
            &request.severity,
            &request.risk_score,
            &request.description,
            &request.timestamp,
            &request.process_name,
            &request.process_command_line,
            &request.process_working_directory,
            &request.parent_process_name,
            &request.parent_command_line,
            &request.user_name,
            &request.user_domain,
            &request.host_name,
            &request.host_os,
        ] {
            assert_eq!(field, NOT_AVAILABLE);
        }
        assert!(request.techniques.is_empty());
        assert_eq!(request.alert_id, "a1");
    }

    #[test]
    fn test_non_object_document_yields_sentinels() {
        for raw in [json!(null), json!("text"), json!([1, 2]), json!(7)] {
            let request = AnalysisRequest::from_alert(&alert(raw));
            assert_eq!(request.rule_name, NOT_AVAILABLE);
            assert_eq!(request.host_os, NOT_AVAILABLE);
            assert!(request.techniques.is_empty());
        }
    }

    #[test]
    fn test_full_document() {
        let request = AnalysisRequest::from_alert(&alert(sample_raw()));

        assert_eq!(request.rule_name, "Suspicious PowerShell");
        assert_eq!(request.severity, "high");
        assert_eq!(request.risk_score, "73");
        assert_eq!(request.timestamp, "2024-05-01T10:00:00.000Z");
        assert_eq!(request.process_name, "powershell.exe");
        assert_eq!(request.parent_process_name, "winword.exe");
        assert_eq!(request.parent_command_line, "WINWORD.EXE /n doc.docm");
        assert_eq!(request.user_domain, "CORP");
        assert_eq!(request.host_name, "ws-042");
        assert_eq!(request.host_os, "Windows");
        assert_eq!(
            request.techniques,
            vec![Technique {
                tactic: "TA0002 Execution".to_string(),
                technique: "T1059 Command and Scripting Interpreter".to_string(),
                subtechniques: vec!["T1059.001 PowerShell".to_string()],
            }]
        );
    }

    #[test]
    fn test_flattened_keys() {
        let raw = json!({
            "kibana.alert.rule.name": "Flattened Rule",
            "kibana.alert.rule.parameters": { "severity": "low" },
            "process.name": "cmd.exe",
            "host": { "os.name": "Linux" }
        });

        assert_eq!(rule_name(&raw), "Flattened Rule");
        assert_eq!(severity(&raw), "low");
        assert_eq!(process_name(&raw), "cmd.exe");
        assert_eq!(host_os(&raw), "Linux");
    }

    #[test]
    fn test_wrong_shapes_fall_back() {
        let raw = json!({
            "process": "not-an-object",
            "user": { "name": { "first": "bob" }, "domain": "" },
            "host": { "hostname": null, "os": ["Windows"] },
            "kibana": { "alert": { "rule": { "parameters": { "threat": { "not": "a list" } } } } }
        });

        assert_eq!(process_name(&raw), NOT_AVAILABLE);
        assert_eq!(user_name(&raw), NOT_AVAILABLE);
        assert_eq!(user_domain(&raw), NOT_AVAILABLE);
        assert_eq!(host_name(&raw), NOT_AVAILABLE);
        assert_eq!(host_os(&raw), NOT_AVAILABLE);
        assert!(techniques(&raw).is_empty());
    }

    #[test]
    fn test_partial_threat_entries() {
        let raw = json!({
            "kibana": { "alert": { "rule": { "parameters": { "threat": [
                { "tactic": { "name": "Persistence" } },
                { "technique": [ { "id": "T1053" } ] },
                { "framework": "MITRE ATT&CK" }
            ] } } } }
        });

        let found = techniques(&raw);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tactic, "Persistence");
        assert_eq!(found[0].technique, NOT_AVAILABLE);
        assert_eq!(found[1].tactic, NOT_AVAILABLE);
        assert_eq!(found[1].technique, "T1053");
    }

    #[test]
    fn test_request_is_deterministic() {
        let record = alert(sample_raw());
        assert_eq!(
            AnalysisRequest::from_alert(&record),
            AnalysisRequest::from_alert(&record)
        );
    }
}
