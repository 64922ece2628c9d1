//! Structured response contract between the kiosk and the dialogue model.
//!
//! The model is asked for a single JSON object. Its raw output goes through three
//! stages: [`extract`] the object from whatever text surrounds it, [`parse`] it, then
//! [`validate_schema`] it into a [`StructuredResponse`]. [`decode`] chains the three.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Why a raw model output was rejected.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("no JSON object found in model output")]
    Extraction,

    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid field `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl ContractError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ContractError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Brochure colours printed on the kiosk dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Couleur {
    Rouge,
    Bleu,
    Vert,
    Jaune,
}

impl Couleur {
    pub const ALL: [Couleur; 4] = [Couleur::Rouge, Couleur::Bleu, Couleur::Vert, Couleur::Jaune];

    pub fn as_str(&self) -> &'static str {
        match self {
            Couleur::Rouge => "rouge",
            Couleur::Bleu => "bleu",
            Couleur::Vert => "vert",
            Couleur::Jaune => "jaune",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// The closed set of formations the kiosk can recommend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formation {
    #[serde(rename = "Programme Grande Ecole")]
    ProgrammeGrandeEcole,
    #[serde(rename = "Bachelor De Specialite")]
    BachelorDeSpecialite,
    #[serde(rename = "Programme Executive")]
    ProgrammeExecutive,
    #[serde(rename = "Master Professionnel", alias = "Master Spécialisé")]
    MasterProfessionnel,
}

/// Older prompt wording the model still produces for [`Formation::MasterProfessionnel`].
const MASTER_ALIAS: &str = "Master Spécialisé";

impl Formation {
    pub const ALL: [Formation; 4] = [
        Formation::ProgrammeGrandeEcole,
        Formation::BachelorDeSpecialite,
        Formation::ProgrammeExecutive,
        Formation::MasterProfessionnel,
    ];

    /// Stable id reported to the caller on DONE.
    pub fn id(&self) -> u8 {
        match self {
            Formation::ProgrammeGrandeEcole => 1,
            Formation::BachelorDeSpecialite => 2,
            Formation::ProgrammeExecutive => 3,
            Formation::MasterProfessionnel => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Formation::ProgrammeGrandeEcole => "Programme Grande Ecole",
            Formation::BachelorDeSpecialite => "Bachelor De Specialite",
            Formation::ProgrammeExecutive => "Programme Executive",
            Formation::MasterProfessionnel => "Master Professionnel",
        }
    }

    pub fn couleur(&self) -> Couleur {
        match self {
            Formation::ProgrammeGrandeEcole => Couleur::Jaune,
            Formation::BachelorDeSpecialite => Couleur::Bleu,
            Formation::ProgrammeExecutive => Couleur::Vert,
            Formation::MasterProfessionnel => Couleur::Rouge,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.id() == id)
    }

    /// Exact label match, including the accepted alias.
    pub fn from_label(label: &str) -> Option<Self> {
        if label == MASTER_ALIAS {
            return Some(Formation::MasterProfessionnel);
        }
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

impl std::fmt::Display for Formation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposed {
    pub label: Formation,
    pub couleur: Couleur,
}

impl From<Formation> for Proposed {
    fn from(formation: Formation) -> Self {
        Self {
            label: formation,
            couleur: formation.couleur(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub couleur: Couleur,
    pub quantite: u32,
}

/// One validated kiosk answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub say: String,
    pub done: bool,
    pub ask_confirmation: bool,
    pub proposed: Option<Proposed>,
    pub dataset: Option<Dataset>,
    pub handoff: bool,
}

impl StructuredResponse {
    /// Plain non-terminal answer.
    pub fn message(say: impl Into<String>) -> Self {
        Self {
            say: say.into(),
            done: false,
            ask_confirmation: false,
            proposed: None,
            dataset: None,
            handoff: false,
        }
    }

    /// Topic redirection produced without consulting the model.
    pub fn handoff(say: impl Into<String>) -> Self {
        Self {
            handoff: true,
            ..Self::message(say)
        }
    }

    /// Recommendation awaiting the visitor's confirmation.
    pub fn proposal(formation: Formation, say: impl Into<String>) -> Self {
        Self {
            ask_confirmation: true,
            proposed: Some(formation.into()),
            ..Self::message(say)
        }
    }

    /// Terminal answer: one brochure of the formation's colour.
    pub fn closing(formation: Formation, say: impl Into<String>) -> Self {
        Self {
            done: true,
            proposed: Some(formation.into()),
            dataset: Some(Dataset {
                couleur: formation.couleur(),
                quantite: 1,
            }),
            ..Self::message(say)
        }
    }
}

/// Locate the JSON object inside a raw model output.
///
/// Trimmed text that is already one JSON object is returned as is. Otherwise the
/// first balanced `{...}` span is returned; braces inside string literals are ignored.
pub fn extract(text: &str) -> Result<&str, ContractError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{')
        && trimmed.ends_with('}')
        && serde_json::from_str::<Value>(trimmed).map(|v| v.is_object()).unwrap_or(false)
    {
        return Ok(trimmed);
    }

    for (start, _) in trimmed.match_indices('{') {
        if let Some(end) = balanced_end(&trimmed[start..]) {
            return Ok(&trimmed[start..start + end]);
        }
    }
    Err(ContractError::Extraction)
}

/// Byte length of the balanced object starting at `s[0] == '{'`, if it closes.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse(json: &str) -> Result<Value, ContractError> {
    Ok(serde_json::from_str(json)?)
}

/// Check a parsed value against the response schema. Extra fields are ignored.
pub fn validate_schema(value: &Value) -> Result<StructuredResponse, ContractError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ContractError::invalid("$", "expected a JSON object"))?;

    let say = match field(obj, "say")? {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::String(_) => return Err(ContractError::invalid("say", "must not be empty")),
        _ => return Err(ContractError::invalid("say", "expected a string")),
    };
    let done = boolean(obj, "done")?;
    let ask_confirmation = boolean(obj, "ask_confirmation")?;
    let handoff = boolean(obj, "handoff")?;

    let proposed = match field(obj, "proposed")? {
        Value::Null => None,
        Value::Object(p) => Some(proposed_from(p)?),
        _ => return Err(ContractError::invalid("proposed", "expected null or an object")),
    };

    let dataset = match field(obj, "dataset")? {
        Value::Null => None,
        Value::Object(d) => Some(dataset_from(d)?),
        _ => return Err(ContractError::invalid("dataset", "expected null or an object")),
    };

    if done {
        if proposed.is_none() {
            return Err(ContractError::invalid("proposed", "required when done is true"));
        }
        match dataset {
            None => return Err(ContractError::invalid("dataset", "required when done is true")),
            Some(d) if d.quantite != 1 => {
                return Err(ContractError::invalid(
                    "dataset.quantite",
                    format!("must be 1, got {}", d.quantite),
                ))
            }
            Some(_) => {}
        }
    } else if dataset.is_some() {
        return Err(ContractError::invalid("dataset", "must be null unless done is true"));
    }

    Ok(StructuredResponse {
        say,
        done,
        ask_confirmation,
        proposed,
        dataset,
        handoff,
    })
}

/// `validate_schema(parse(extract(text)))`, logging the raw text on failure.
pub fn decode(text: &str) -> Result<StructuredResponse, ContractError> {
    let result = extract(text).and_then(parse).and_then(|v| validate_schema(&v));
    if let Err(e) = &result {
        warn!(raw = %text, "Rejected model output: {}", e);
    }
    result
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value, ContractError> {
    obj.get(name).ok_or_else(|| ContractError::invalid(name, "missing"))
}

fn boolean(obj: &Map<String, Value>, name: &'static str) -> Result<bool, ContractError> {
    field(obj, name)?
        .as_bool()
        .ok_or_else(|| ContractError::invalid(name, "expected a boolean"))
}

fn couleur_at(value: Option<&Value>, field: &'static str) -> Result<Couleur, ContractError> {
    let name = value
        .and_then(Value::as_str)
        .ok_or_else(|| ContractError::invalid(field, "expected a colour string"))?;
    Couleur::from_name(name).ok_or_else(|| ContractError::invalid(field, format!("unknown colour '{name}'")))
}

fn proposed_from(p: &Map<String, Value>) -> Result<Proposed, ContractError> {
    let label = p
        .get("label")
        .and_then(Value::as_str)
        .ok_or_else(|| ContractError::invalid("proposed.label", "expected a string"))?;
    let label = Formation::from_label(label)
        .ok_or_else(|| ContractError::invalid("proposed.label", format!("unknown label '{label}'")))?;
    let couleur = couleur_at(p.get("couleur"), "proposed.couleur")?;
    Ok(Proposed { label, couleur })
}

fn dataset_from(d: &Map<String, Value>) -> Result<Dataset, ContractError> {
    let couleur = couleur_at(d.get("couleur"), "dataset.couleur")?;
    let quantite = d
        .get("quantite")
        .and_then(Value::as_u64)
        .ok_or_else(|| ContractError::invalid("dataset.quantite", "expected a non-negative integer"))?;
    let quantite = u32::try_from(quantite)
        .map_err(|_| ContractError::invalid("dataset.quantite", "out of range"))?;
    Ok(Dataset { couleur, quantite })
}
