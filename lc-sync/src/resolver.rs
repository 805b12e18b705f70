use std::time;

use lc_common::records::CellValue;
use tracing::{debug, info, warn};

use crate::client::{ClientError, ClinicalDataApi, StudySubject};

/// Enrollment date sent along with identity checks. The check ignores it but the schema
/// requires one.
pub const CHECK_ENROLLMENT_DATE: &str = "1900-01-01";

/// Outcome of resolving a label to a study subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    /// The subject was created but its OID was not visible within the allowed rechecks.
    Pending,
    /// The create call was refused; carries the remote error.
    CreateFailed(String),
}

impl Resolution {
    /// The OID, or an empty string when none was obtained.
    pub fn into_oid(self) -> String {
        match self {
            Resolution::Found(oid) => oid,
            Resolution::Pending | Resolution::CreateFailed(_) => String::new(),
        }
    }
}

/// Map the source gender coding onto LibreClinica's. 1 and 2 are male and female; other values
/// are passed through as text and missing values omit the gender entirely.
pub fn normalize_gender(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Missing => None,
        CellValue::Integer(1) => Some("m".to_owned()),
        CellValue::Integer(2) => Some("f".to_owned()),
        CellValue::Float(x) if *x == 1.0 => Some("m".to_owned()),
        CellValue::Float(x) if *x == 2.0 => Some("f".to_owned()),
        other => Some(other.to_string()),
    }
}

enum State {
    Check,
    NeedsCreate,
    PendingAfterCreate { remaining: u32 },
}

/// Finds the OID of a study subject by label, creating the subject when it does not exist yet.
pub struct IdentityResolver<'a, A: ClinicalDataApi + ?Sized> {
    api: &'a A,
    max_rechecks: u32,
    recheck_interval: time::Duration,
}

impl<'a, A: ClinicalDataApi + ?Sized> IdentityResolver<'a, A> {
    pub fn new(api: &'a A, max_rechecks: u32, recheck_interval: time::Duration) -> Self {
        Self {
            api,
            max_rechecks,
            recheck_interval,
        }
    }

    async fn check(&self, study_identifier: &str, label: &str) -> Result<Option<String>, ClientError> {
        let subject = StudySubject {
            label,
            study_identifier,
            enrollment_date: CHECK_ENROLLMENT_DATE,
            gender: None,
        };

        let result = self.api.is_study_subject(&subject).await?;
        if !result.is_success() {
            debug!(%label, error = result.error(), "study subject not found");
            return Ok(None);
        }

        Ok(result
            .last_extra()
            .filter(|oid| !oid.is_empty())
            .map(str::to_owned))
    }

    /// Resolve `label` within the study, creating the subject if needed.
    ///
    /// Transport errors and SOAP faults are returned as `Err`. A refused create is not an error
    /// here: it is reported as [`Resolution::CreateFailed`] so the caller can log it and move on.
    pub async fn resolve_or_create(
        &self,
        study_identifier: &str,
        label: &str,
        gender: &CellValue,
    ) -> Result<Resolution, ClientError> {
        let mut state = State::Check;

        loop {
            state = match state {
                State::Check => match self.check(study_identifier, label).await? {
                    Some(oid) => return Ok(Resolution::Found(oid)),
                    None => State::NeedsCreate,
                },
                State::NeedsCreate => {
                    let gender = normalize_gender(gender);
                    let enrollment_date = chrono::Local::now().format("%Y-%m-%d").to_string();
                    let subject = StudySubject {
                        label,
                        study_identifier,
                        enrollment_date: &enrollment_date,
                        gender: gender.as_deref(),
                    };

                    let result = self.api.create_study_subject(&subject).await?;
                    if !result.is_success() {
                        let error = result
                            .error()
                            .or(result.result())
                            .unwrap_or_default()
                            .to_owned();
                        warn!(%label, %error, "failed to create study subject");
                        return Ok(Resolution::CreateFailed(error));
                    }

                    info!(%label, "created study subject");
                    State::PendingAfterCreate {
                        remaining: self.max_rechecks,
                    }
                }
                State::PendingAfterCreate { remaining: 0 } => {
                    warn!(%label, "study subject created but its OID is not available yet");
                    return Ok(Resolution::Pending);
                }
                State::PendingAfterCreate { remaining } => {
                    // The OID is assigned asynchronously; give the remote time before each recheck.
                    if !self.recheck_interval.is_zero() {
                        tokio::time::sleep(self.recheck_interval).await;
                    }

                    match self.check(study_identifier, label).await? {
                        Some(oid) => return Ok(Resolution::Found(oid)),
                        None => State::PendingAfterCreate {
                            remaining: remaining - 1,
                        },
                    }
                }
            };
        }
    }
}
