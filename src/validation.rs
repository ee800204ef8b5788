use serde::Serialize;
use tracing::error;

use crate::labels::LabelsToml;
use crate::member::Member;

/// A check a member must pass before it is published.
pub trait MemberValidator {
    fn name(&self) -> &'static str;

    /// `Err` carries a human readable reason.
    fn validate(&self, member: &Member) -> Result<(), String>;
}

/// `group` must be one of the vocabulary categories.
pub struct ValidCategory<'a> {
    vocabulary: &'a LabelsToml,
}

impl<'a> ValidCategory<'a> {
    pub fn new(vocabulary: &'a LabelsToml) -> Self {
        Self { vocabulary }
    }
}

impl MemberValidator for ValidCategory<'_> {
    fn name(&self) -> &'static str {
        "labels.ValidCategory"
    }

    fn validate(&self, member: &Member) -> Result<(), String> {
        let group = member.group.as_deref().unwrap_or_default();
        if self.vocabulary.category_names().contains(&group) {
            Ok(())
        } else {
            Err(format!("{}: '{group}' is not a valid category", member.name_id()))
        }
    }
}

/// Every label must be in the vocabulary.
pub struct ValidLabels<'a> {
    vocabulary: &'a LabelsToml,
}

impl<'a> ValidLabels<'a> {
    pub fn new(vocabulary: &'a LabelsToml) -> Self {
        Self { vocabulary }
    }
}

impl MemberValidator for ValidLabels<'_> {
    fn name(&self) -> &'static str {
        "labels.ValidLabel"
    }

    fn validate(&self, member: &Member) -> Result<(), String> {
        let known = self.vocabulary.label_names();
        let missing: Vec<&str> = member
            .labels
            .iter()
            .map(String::as_str)
            .filter(|label| !known.contains(label))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("{}: {missing:?} missing from set", member.name_id()))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationFailure {
    pub validator: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub name_id: String,
    pub passing: Vec<String>,
    pub failing: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failing.is_empty()
    }
}

pub fn default_validators(vocabulary: &LabelsToml) -> Vec<Box<dyn MemberValidator + '_>> {
    vec![
        Box::new(ValidCategory::new(vocabulary)),
        Box::new(ValidLabels::new(vocabulary)),
    ]
}

pub fn validate_member(member: &Member, validators: &[Box<dyn MemberValidator + '_>]) -> ValidationReport {
    let mut report = ValidationReport {
        name_id: member.name_id().to_string(),
        ..ValidationReport::default()
    };
    for validator in validators {
        match validator.validate(member) {
            Ok(()) => report.passing.push(validator.name().to_string()),
            Err(reason) => {
                error!(validator = validator.name(), "{reason}");
                report.failing.push(ValidationFailure {
                    validator: validator.name().to_string(),
                    reason,
                });
            }
        }
    }
    report
}
