use lc_common::odm::{ItemData, SubjectData};
use lc_common::records::{CellValue, Record, TypedRecordSet};
use lc_common::soap::SoapResult;
use lc_common::transliterate::to_ascii;
use tracing::{info, info_span, warn, Instrument};

use crate::client::{ClinicalDataApi, EventSchedule};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::resolver::{IdentityResolver, Resolution};

/// A subject that could not be uploaded, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSubject {
    pub label: String,
    pub error: String,
}

impl FailedSubject {
    fn new(label: &str, error: impl ToString) -> Self {
        Self {
            label: label.to_owned(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    Failed(FailedSubject),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub expected: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedSubject>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Render an identifier cell as a subject label. Integer identifiers are written in decimal.
fn subject_label(value: &CellValue) -> Option<String> {
    if value.is_missing() {
        return None;
    }

    Some(value.to_string()).filter(|label| !label.is_empty())
}

/// Decide what an import response means for the subject. A response that carries neither a
/// result nor an error cannot be interpreted, and nothing further should be sent.
pub fn interpret_import_response(label: &str, body: &str) -> Result<UploadOutcome, SyncError> {
    let violation = || SyncError::ProtocolViolation {
        label: label.to_owned(),
        body: body.to_owned(),
    };

    let response = SoapResult::parse(body).map_err(|_| violation())?;

    if response.is_success() {
        return Ok(UploadOutcome::Uploaded);
    }

    match response.error() {
        Some(error) => Ok(UploadOutcome::Failed(FailedSubject::new(label, error))),
        None => Err(violation()),
    }
}

/// Pushes a batch of records into LibreClinica, one subject at a time.
pub struct Uploader<'a, A: ClinicalDataApi + ?Sized> {
    api: &'a A,
    config: &'a SyncConfig,
}

impl<'a, A: ClinicalDataApi + ?Sized> Uploader<'a, A> {
    pub fn new(api: &'a A, config: &'a SyncConfig) -> Self {
        Self { api, config }
    }

    /// Upload every record in query order. Failures confined to one subject are collected in
    /// the summary; only a protocol violation stops the batch early.
    pub async fn run_batch(&self, records: &TypedRecordSet) -> Result<BatchSummary, SyncError> {
        if records.is_empty() {
            return Err(SyncError::NoRecords);
        }

        let mut summary = BatchSummary {
            expected: records.len(),
            ..Default::default()
        };
        let labels = [("study", self.config.study_identifier.clone())];

        for (index, record) in records.rows().iter().enumerate() {
            metrics::counter!("lc_sync_subjects_total", &labels).increment(1);

            let outcome = self
                .upload_record(index, records, record)
                .instrument(info_span!("subject", iteration = index + 1))
                .await?;

            match outcome {
                UploadOutcome::Uploaded => {
                    metrics::counter!("lc_sync_subjects_uploaded", &labels).increment(1);
                    summary.succeeded += 1;
                }
                UploadOutcome::Failed(failure) => {
                    metrics::counter!("lc_sync_subjects_failed", &labels).increment(1);
                    warn!(label = %failure.label, error = %failure.error, "failed to upload subject");
                    summary.failures.push(failure);
                }
            }
        }

        if !summary.failures.is_empty() {
            warn!(failures = ?summary.failures, "some subjects were not uploaded");
        }
        info!("expected to upload {} subjects", summary.expected);
        info!("upload failed for {} subjects", summary.failed());

        Ok(summary)
    }

    async fn upload_record(
        &self,
        index: usize,
        records: &TypedRecordSet,
        record: &Record,
    ) -> Result<UploadOutcome, SyncError> {
        let config = self.config;

        let Some(label) = subject_label(record.get(&config.identifier_column)) else {
            return Ok(UploadOutcome::Failed(FailedSubject::new(
                &format!("<row {}>", index + 1),
                "record has no identifier",
            )));
        };

        info!(%label, "uploading subject");

        let resolver =
            IdentityResolver::new(self.api, config.max_rechecks, config.recheck_interval);
        let resolution = resolver
            .resolve_or_create(
                &config.study_identifier,
                &label,
                record.get(&config.gender_column),
            )
            .await;

        let oid = match resolution {
            Ok(Resolution::Found(oid)) => oid,
            Ok(Resolution::Pending) => {
                return Ok(UploadOutcome::Failed(FailedSubject::new(
                    &label,
                    "study subject was created but its OID is not yet available",
                )))
            }
            Ok(Resolution::CreateFailed(error)) => {
                return Ok(UploadOutcome::Failed(FailedSubject::new(&label, error)))
            }
            Err(error) => return Ok(UploadOutcome::Failed(FailedSubject::new(&label, error))),
        };

        let event = EventSchedule {
            label: &label,
            study_identifier: &config.study_identifier,
            event_definition_oid: &config.target.event_oid,
            start_date: &config.event_start_date,
            location: &config.event_location,
        };
        match self.api.schedule_event(&event).await {
            Ok(result) if !result.is_success() => {
                warn!(%label, error = result.error(), "event was not scheduled, uploading anyway");
            }
            Ok(_) => {}
            Err(error) => return Ok(UploadOutcome::Failed(FailedSubject::new(&label, error))),
        }

        let subject = SubjectData {
            target: &config.target,
            subject_key: &oid,
            items: self.items(records, record),
        };

        match self.api.import_data(&subject.to_odm_xml()).await {
            Ok(body) => interpret_import_response(&label, &body),
            Err(error) => Ok(UploadOutcome::Failed(FailedSubject::new(&label, error))),
        }
    }

    /// Every present value except the identifier, keyed by the prefixed column name.
    fn items(&self, records: &TypedRecordSet, record: &Record) -> Vec<ItemData> {
        records
            .columns()
            .iter()
            .filter(|column| **column != self.config.identifier_column)
            .filter_map(|column| {
                let value = record.get(column);
                if value.is_missing() {
                    return None;
                }

                let value = match value.as_str() {
                    Some(text) => to_ascii(text).into_owned(),
                    None => value.to_string(),
                };

                Some(ItemData {
                    item_oid: format!("{}{}", self.config.item_prefix, column),
                    value,
                })
            })
            .collect()
    }
}
