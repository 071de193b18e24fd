//! Subjects and the named templates they are built from.
//!
//! A subject is a dot-delimited topic such as `chat.say.room.library`.
//! A template is the same shape with whole-segment placeholders:
//! `chat.say.room.{room_id}`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::SubjectError;

/// Maximum length of a literal subject.
pub const MAX_SUBJECT_LEN: usize = 256;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// Whether a segment (or parameter value) uses only the allowed charset.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A validated, literal (wildcard-free) subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Parses and validates a literal subject.
    pub fn parse(subject: impl Into<String>) -> Result<Self, SubjectError> {
        let subject = subject.into();
        if subject.is_empty() {
            return Err(SubjectError::invalid_subject(&subject, "empty subject"));
        }
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(SubjectError::invalid_subject(
                &subject,
                format!("longer than {} characters", MAX_SUBJECT_LEN),
            ));
        }
        for segment in subject.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(SubjectError::invalid_subject(&subject, "empty segment"));
            }
            if !is_valid_segment(segment) {
                return Err(SubjectError::invalid_subject(
                    &subject,
                    format!("segment '{}' contains characters outside [A-Za-z0-9_-]", segment),
                ));
            }
        }
        Ok(Self(subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Subject {
    type Error = SubjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

/// One segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

/// A named subject template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    name: String,
    template: String,
    segments: Vec<TemplateSegment>,
    required_params: Vec<String>,
    description: String,
}

impl SubjectPattern {
    /// Parses a template and checks that its placeholders are exactly the
    /// required parameters.
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        required_params: &[&str],
        description: impl Into<String>,
    ) -> Result<Self, SubjectError> {
        let name = name.into();
        let template = template.into();

        if name.trim().is_empty() {
            return Err(SubjectError::invalid_template(&template, "pattern name is empty"));
        }
        if template.is_empty() {
            return Err(SubjectError::invalid_template(&template, "empty template"));
        }

        let mut segments = Vec::new();
        let mut placeholders = Vec::new();
        for raw in template.split(SEPARATOR) {
            if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                if !is_valid_param_name(inner) {
                    return Err(SubjectError::invalid_template(
                        &template,
                        format!("invalid placeholder name '{}'", inner),
                    ));
                }
                if placeholders.iter().any(|p| p == inner) {
                    return Err(SubjectError::invalid_template(
                        &template,
                        format!("placeholder '{}' appears twice", inner),
                    ));
                }
                placeholders.push(inner.to_string());
                segments.push(TemplateSegment::Param(inner.to_string()));
            } else if is_valid_segment(raw) {
                segments.push(TemplateSegment::Literal(raw.to_string()));
            } else {
                return Err(SubjectError::invalid_template(
                    &template,
                    format!("invalid segment '{}'", raw),
                ));
            }
        }

        if placeholders.is_empty() {
            return Err(SubjectError::invalid_template(
                &template,
                "template has no parameter placeholders",
            ));
        }

        let declared: BTreeSet<&str> = placeholders.iter().map(String::as_str).collect();
        let required: BTreeSet<&str> = required_params.iter().copied().collect();
        if declared != required || required.len() != required_params.len() {
            return Err(SubjectError::ParameterMismatch {
                placeholders,
                required: required_params.iter().map(|s| s.to_string()).collect(),
            });
        }

        Ok(Self {
            name,
            template,
            segments,
            required_params: required_params.iter().map(|s| s.to_string()).collect(),
            description: description.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn required_params(&self) -> &[String] {
        &self.required_params
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Substitutes parameters into the template.
    ///
    /// Every required parameter must be present, no unknown parameter may be
    /// passed, and every value must be a single valid segment.
    pub fn build(&self, params: &[(&str, &str)]) -> Result<Subject, SubjectError> {
        let mut values: HashMap<&str, &str> = HashMap::with_capacity(params.len());
        for (key, value) in params {
            if !self.required_params.iter().any(|p| p == key) {
                return Err(SubjectError::UnexpectedParameter {
                    pattern: self.name.clone(),
                    param: key.to_string(),
                });
            }
            values.insert(key, value);
        }

        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(lit) => parts.push(lit.as_str()),
                TemplateSegment::Param(param) => {
                    let value = values.get(param.as_str()).copied().ok_or_else(|| {
                        SubjectError::MissingParameter {
                            pattern: self.name.clone(),
                            param: param.clone(),
                        }
                    })?;
                    if !is_valid_segment(value) {
                        return Err(SubjectError::InvalidParameter {
                            param: param.clone(),
                            value: value.to_string(),
                            reason: "allowed characters are [A-Za-z0-9_-], non-empty".to_string(),
                        });
                    }
                    parts.push(value);
                }
            }
        }

        Subject::parse(parts.join("."))
    }

    /// Whether a literal subject fits this template.
    pub fn matches(&self, subject: &Subject) -> bool {
        let mut subject_segments = subject.segments();
        for template_segment in &self.segments {
            let Some(actual) = subject_segments.next() else {
                return false;
            };
            if let TemplateSegment::Literal(lit) = template_segment {
                if lit != actual {
                    return false;
                }
            }
        }
        subject_segments.next().is_none()
    }

    /// Extracts parameter values from a subject built from this template.
    pub fn extract(&self, subject: &Subject) -> Option<HashMap<String, String>> {
        if !self.matches(subject) {
            return None;
        }
        let params = self
            .segments
            .iter()
            .zip(subject.segments())
            .filter_map(|(segment, actual)| match segment {
                TemplateSegment::Param(name) => Some((name.clone(), actual.to_string())),
                TemplateSegment::Literal(_) => None,
            })
            .collect();
        Some(params)
    }

    /// Renders the template with placeholders as `*` wildcards.
    pub fn as_subscription_pattern(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                TemplateSegment::Literal(lit) => lit.as_str(),
                TemplateSegment::Param(_) => "*",
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}
