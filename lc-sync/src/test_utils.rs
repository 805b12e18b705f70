use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lc_common::soap::SoapResult;

use crate::client::{ClientError, ClinicalDataApi, EventSchedule, StudySubject};

pub const IMPORT_SUCCESS: &str =
    "<importDataResponse><result>Success</result></importDataResponse>";

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Check(String),
    Create {
        label: String,
        gender: Option<String>,
        enrollment_date: String,
    },
    Schedule(String),
    Import(String),
}

#[derive(Default)]
struct FakeState {
    subjects: HashMap<String, String>,
    create_failures: HashMap<String, String>,
    unreachable: HashSet<String>,
    hide_after_create: bool,
    schedule_fails: bool,
    import_responses: VecDeque<String>,
    calls: Vec<Call>,
}

/// In-memory stand-in for LibreClinica. Labels created through it are assigned the OID
/// `SS_<label>`, unless told to keep them hidden from subsequent checks.
#[derive(Clone, Default)]
pub struct FakeClinicalData {
    state: Arc<Mutex<FakeState>>,
}

fn response(xml: &str) -> SoapResult {
    SoapResult::parse(xml).unwrap()
}

/// Stands in for a broken connection; callers only look at the error variant.
fn transport_error(service: &'static str) -> ClientError {
    ClientError::MalformedResponse {
        service,
        error: SoapResult::parse("<a></b>").unwrap_err(),
    }
}

impl FakeClinicalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(self, label: &str, oid: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .subjects
            .insert(label.to_owned(), oid.to_owned());
        self
    }

    pub fn failing_create(self, label: &str, error: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(label.to_owned(), error.to_owned());
        self
    }

    pub fn unreachable_for(self, label: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(label.to_owned());
        self
    }

    pub fn hiding_created_subjects(self) -> Self {
        self.state.lock().unwrap().hide_after_create = true;
        self
    }

    pub fn failing_schedule(self) -> Self {
        self.state.lock().unwrap().schedule_fails = true;
        self
    }

    /// Queue the body returned by the next import. Once the queue is empty every import succeeds.
    pub fn with_import_response(self, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .import_responses
            .push_back(body.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }
}

#[async_trait]
impl ClinicalDataApi for FakeClinicalData {
    async fn is_study_subject(
        &self,
        subject: &StudySubject<'_>,
    ) -> Result<SoapResult, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Check(subject.label.to_owned()));

        if state.unreachable.contains(subject.label) {
            return Err(transport_error("studySubject"));
        }

        Ok(match state.subjects.get(subject.label) {
            Some(oid) => response(&format!(
                "<r><result>Success</result><studySubjectOID>{oid}</studySubjectOID></r>"
            )),
            None => response("<r><result>Fail</result><error>Subject not found</error></r>"),
        })
    }

    async fn create_study_subject(
        &self,
        subject: &StudySubject<'_>,
    ) -> Result<SoapResult, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create {
            label: subject.label.to_owned(),
            gender: subject.gender.map(str::to_owned),
            enrollment_date: subject.enrollment_date.to_owned(),
        });

        if let Some(error) = state.create_failures.get(subject.label) {
            return Ok(response(&format!(
                "<r><result>Fail</result><error>{error}</error></r>"
            )));
        }

        if !state.hide_after_create {
            let oid = format!("SS_{}", subject.label);
            state.subjects.insert(subject.label.to_owned(), oid);
        }

        Ok(response("<r><result>Success</result></r>"))
    }

    async fn schedule_event(&self, event: &EventSchedule<'_>) -> Result<SoapResult, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Schedule(event.label.to_owned()));

        Ok(if state.schedule_fails {
            response("<r><result>Fail</result><error>Event already scheduled</error></r>")
        } else {
            response("<r><result>Success</result><eventDefinitionOID>SE_BASELINE</eventDefinitionOID></r>")
        })
    }

    async fn import_data(&self, odm: &str) -> Result<String, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Import(odm.to_owned()));

        Ok(state
            .import_responses
            .pop_front()
            .unwrap_or_else(|| IMPORT_SUCCESS.to_owned()))
    }
}
