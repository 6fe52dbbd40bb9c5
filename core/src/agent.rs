use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AgentError;

/// Where an agent sits in the three-step build flow.
///
/// The step number is monotonically non-decreasing over the agent's
/// lifetime. Each update operation is gated on the predecessor state:
/// a transition whose precondition doesn't match is rejected, so steps
/// can be neither skipped nor replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(into = "u8", try_from = "u8")]
pub enum BuildStep {
    StepOneComplete,
    StepTwoComplete,
    StepThreeComplete,
}

impl BuildStep {
    pub fn number(self) -> u8 {
        match self {
            BuildStep::StepOneComplete => 1,
            BuildStep::StepTwoComplete => 2,
            BuildStep::StepThreeComplete => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(BuildStep::StepOneComplete),
            2 => Some(BuildStep::StepTwoComplete),
            3 => Some(BuildStep::StepThreeComplete),
            _ => None,
        }
    }

    /// The state an agent must be in before this step may complete.
    /// `None` for step one, which creates the agent.
    pub fn predecessor(self) -> Option<BuildStep> {
        match self {
            BuildStep::StepOneComplete => None,
            BuildStep::StepTwoComplete => Some(BuildStep::StepOneComplete),
            BuildStep::StepThreeComplete => Some(BuildStep::StepTwoComplete),
        }
    }
}

impl From<BuildStep> for u8 {
    fn from(step: BuildStep) -> u8 {
        step.number()
    }
}

impl TryFrom<u8> for BuildStep {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        BuildStep::from_number(n).ok_or_else(|| format!("invalid build step {n}"))
    }
}

/// Conversational tone. Matched case-insensitively on input, stored and
/// serialized lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Formal,
    Informal,
    Friendly,
    Professional,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Formal => "formal",
            Tone::Informal => "informal",
            Tone::Friendly => "friendly",
            Tone::Professional => "professional",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "formal" => Some(Tone::Formal),
            "informal" => Some(Tone::Informal),
            "friendly" => Some(Tone::Friendly),
            "professional" => Some(Tone::Professional),
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        Self::from_label(raw).ok_or_else(|| {
            AgentError::validation(
                "tone",
                "tone must be one of: formal, informal, friendly, professional",
            )
        })
    }
}

/// A manually entered question/answer pair. Each pair gets its own
/// sub-identifier when the step-3 submission is accepted; identifiers are
/// never reused across submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ManualEntry {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
}

/// A question/answer pair as submitted, before an id is assigned.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ManualEntryInput {
    pub question: String,
    pub answer: String,
}

/// One configurable agent. Exactly one exists per owning identity; the
/// slug is globally unique and immutable once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub domain_expertise: String,
    pub color_theme: String,
    pub logo_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_file: Option<String>,
    pub current_step: BuildStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_starters: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_free_text: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_branching_logic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_entries: Option<Vec<ManualEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Merge step-2 fields and advance the gate. Only supplied fields are
    /// written; `Some("")` and `Some(false)` count as supplied.
    pub fn apply_step_two(&mut self, patch: &StepTwoPatch) {
        if let Some(v) = &patch.greeting {
            self.greeting = Some(v.clone());
        }
        if let Some(v) = patch.tone {
            self.tone = Some(v);
        }
        if let Some(v) = &patch.custom_rules {
            self.custom_rules = Some(v.clone());
        }
        if let Some(v) = &patch.conversation_starters {
            self.conversation_starters = Some(v.clone());
        }
        if let Some(v) = &patch.languages {
            self.languages = Some(v.clone());
        }
        if let Some(v) = patch.enable_free_text {
            self.enable_free_text = Some(v);
        }
        if let Some(v) = patch.enable_branching_logic {
            self.enable_branching_logic = Some(v);
        }
        if let Some(v) = &patch.conversation_flow {
            self.conversation_flow = Some(v.clone());
        }
        if let Some(v) = &patch.config_file {
            self.config_file = Some(v.clone());
        }
        self.current_step = BuildStep::StepTwoComplete;
    }

    /// Merge step-3 fields and advance the gate.
    pub fn apply_step_three(&mut self, patch: &StepThreePatch) {
        if let Some(v) = &patch.manual_entries {
            self.manual_entries = Some(v.clone());
        }
        if let Some(v) = &patch.csv_file {
            self.csv_file = Some(v.clone());
        }
        if let Some(v) = &patch.doc_files {
            self.doc_files = v.clone();
        }
        self.current_step = BuildStep::StepThreeComplete;
    }
}

/// Required step-1 fields. All four must be non-empty; `color_theme` must
/// be a `#RGB` or `#RRGGBB` hex color.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepOneInput {
    pub name: String,
    pub description: String,
    pub domain_expertise: String,
    pub color_theme: String,
}

/// Step-2 fields as submitted. `None` means "not supplied" — the store
/// leaves that column untouched. Tone arrives as a raw string and is
/// validated case-insensitively by the builder.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepTwoInput {
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub custom_rules: Option<String>,
    #[serde(default)]
    pub conversation_starters: Option<Vec<String>>,
    #[serde(default)]
    pub languages: Option<String>,
    #[serde(default)]
    pub enable_free_text: Option<bool>,
    #[serde(default)]
    pub enable_branching_logic: Option<bool>,
    #[serde(default)]
    pub conversation_flow: Option<String>,
}

/// Validated step-2 merge handed to the store. Produced only by the
/// builder so a raw tone string can never reach persistence.
#[derive(Debug, Clone, Default)]
pub struct StepTwoPatch {
    pub greeting: Option<String>,
    pub tone: Option<Tone>,
    pub custom_rules: Option<String>,
    pub conversation_starters: Option<Vec<String>>,
    pub languages: Option<String>,
    pub enable_free_text: Option<bool>,
    pub enable_branching_logic: Option<bool>,
    pub conversation_flow: Option<String>,
    pub config_file: Option<String>,
}

/// Step-3 fields as submitted.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepThreeInput {
    #[serde(default)]
    pub manual_entry: Option<Vec<ManualEntryInput>>,
}

/// Validated step-3 merge handed to the store. Entries already carry
/// their freshly assigned sub-identifiers.
#[derive(Debug, Clone, Default)]
pub struct StepThreePatch {
    pub manual_entries: Option<Vec<ManualEntry>>,
    pub csv_file: Option<String>,
    pub doc_files: Option<Vec<String>>,
}

/// `#RGB` or `#RRGGBB`.
pub fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    (digits.len() == 3 || digits.len() == 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse the serialized textual form of `manualEntry` (a JSON-encoded
/// array of question/answer objects).
pub fn parse_manual_entries(raw: &str) -> Result<Vec<ManualEntryInput>, AgentError> {
    serde_json::from_str(raw).map_err(|_| {
        AgentError::validation(
            "manualEntry",
            "manualEntry must be a valid JSON array of question/answer pairs",
        )
    })
}

/// Validate submitted pairs and assign each a fresh sub-identifier.
/// Identifiers from earlier submissions are never preserved.
pub fn assign_entry_ids(entries: Vec<ManualEntryInput>) -> Result<Vec<ManualEntry>, AgentError> {
    entries
        .into_iter()
        .map(|entry| {
            if entry.question.trim().is_empty() || entry.answer.trim().is_empty() {
                return Err(AgentError::validation(
                    "manualEntry",
                    "each manualEntry must have both question and answer fields",
                ));
            }
            Ok(ManualEntry {
                id: Uuid::now_v7(),
                question: entry.question,
                answer: entry.answer,
            })
        })
        .collect()
}
