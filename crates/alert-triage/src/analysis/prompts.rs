//! Prompt templates for alert triage.

use handlebars::Handlebars;
use serde::Serialize;

use super::request::{AnalysisRequest, Technique, NOT_AVAILABLE};
use crate::error::{TriageError, TriageResult};

/// Instruction sent as the system message with every request.
pub const SYSTEM_PROMPT: &str = "You are an expert security analyst. Analyze the security alert and provide concise, actionable insights.";

const TRIAGE_TEMPLATE_NAME: &str = "triage";

/// Per-alert user prompt. Field order is fixed.
const TRIAGE_TEMPLATE: &str = r"Analyze the following security alert and provide a triage assessment:

Alert Details:
- Rule Name: {{rule_name}}
- Severity: {{severity}}
- Risk Score: {{risk_score}}
- Description: {{description}}
- Timestamp: {{timestamp}}

Process Information:
- Name: {{process_name}}
- Command Line: {{process_command_line}}
- Working Directory: {{process_working_directory}}
- Parent Process: {{parent_process_name}}
- Parent Command Line: {{parent_command_line}}

User Context:
- Username: {{user_name}}
- Domain: {{user_domain}}

Host Information:
- Hostname: {{host_name}}
- OS: {{host_os}}

MITRE ATT&CK:
{{mitre}}

Please provide:
1. Severity Assessment (Critical/High/Medium/Low) with short explanation
2. Short description of the rule and its purpose
3. Short summary of host and user context in a table
4. Detailed analysis of the alert with highlighting key fields and explaining what that key data mean (like explaining process with arguments, files and registry)
5. Recommended immediate actions

Use markdown formatting for the response.
";

/// Template context: the request plus its pre-rendered MITRE lines.
#[derive(Serialize)]
struct PromptContext<'a> {
    #[serde(flatten)]
    request: &'a AnalysisRequest,
    mitre: String,
}

/// One line per technique: `- tactic / technique [sub, sub]`.
fn mitre_lines(techniques: &[Technique]) -> String {
    if techniques.is_empty() {
        return format!("- {NOT_AVAILABLE}");
    }
    techniques
        .iter()
        .map(|t| {
            if t.subtechniques.is_empty() {
                format!("- {} / {}", t.tactic, t.technique)
            } else {
                format!(
                    "- {} / {} [{}]",
                    t.tactic,
                    t.technique,
                    t.subtechniques.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders analysis requests into prompt text.
pub struct PromptManager {
    handlebars: Handlebars<'static>,
}

impl PromptManager {
    /// Create a prompt manager with the embedded triage template.
    pub fn new() -> TriageResult<Self> {
        let mut handlebars = Handlebars::new();
        // Command lines and paths must reach the model verbatim
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);
        handlebars
            .register_template_string(TRIAGE_TEMPLATE_NAME, TRIAGE_TEMPLATE)
            .map_err(|e| TriageError::Configuration(format!("invalid triage template: {e}")))?;

        Ok(Self { handlebars })
    }

    /// Render the user prompt for one alert.
    pub fn render(&self, request: &AnalysisRequest) -> TriageResult<String> {
        let context = PromptContext {
            request,
            mitre: mitre_lines(&request.techniques),
        };
        self.handlebars
            .render(TRIAGE_TEMPLATE_NAME, &context)
            .map_err(|e| TriageError::analysis(format!("failed to render prompt: {e}")))
    }
}
