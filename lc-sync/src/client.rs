use std::time;

use async_trait::async_trait;
use lc_common::odm::OPENCLINICA_ODM_NS;
use lc_common::soap::{envelope, text_element, Credentials, SoapError, SoapResult};
use reqwest::header;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const BEANS_NS: &str = "http://openclinica.org/ws/beans";
pub const STUDY_SUBJECT_NS: &str = "http://openclinica.org/ws/studySubject/v1";
pub const EVENT_NS: &str = "http://openclinica.org/ws/event/v1";
pub const DATA_NS: &str = "http://openclinica.org/ws/data/v1";

const STUDY_SUBJECT_PATH: &str = "studySubject/v1/studySubjectWsdl.wsdl";
const EVENT_PATH: &str = "event/v1/eventWsdl.wsdl";
const DATA_PATH: &str = "data/v1/dataWsdl.wsdl";

/// Enumeration of errors raised by calls against the LibreClinica web services.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid LibreClinica endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("failed to build LibreClinica http client: {0}")]
    ClientBuildError(reqwest::Error),
    #[error("request to the {service} service could not be completed: {error}")]
    RequestError {
        service: &'static str,
        error: reqwest::Error,
    },
    #[error("the {service} service returned a SOAP fault: {message}")]
    Fault {
        service: &'static str,
        message: String,
    },
    #[error("the {service} service returned an unreadable response: {error}")]
    MalformedResponse {
        service: &'static str,
        error: SoapError,
    },
    #[error("the {service} service returned a response without a result: {body}")]
    UnexpectedResponse { service: &'static str, body: String },
}

/// A study subject as sent to the identity check and create operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudySubject<'a> {
    pub label: &'a str,
    pub study_identifier: &'a str,
    pub enrollment_date: &'a str,
    pub gender: Option<&'a str>,
}

impl StudySubject<'_> {
    fn to_xml(&self, operation: &str) -> String {
        let gender = self
            .gender
            .map(|gender| text_element("bean:gender", gender))
            .unwrap_or_default();

        format!(
            "<v1:{operation}><v1:studySubject>{}{}<bean:subject>{gender}</bean:subject><bean:studyRef>{}</bean:studyRef></v1:studySubject></v1:{operation}>",
            text_element("bean:label", self.label),
            text_element("bean:enrollmentDate", self.enrollment_date),
            text_element("bean:identifier", self.study_identifier),
        )
    }
}

/// An event to schedule for an existing study subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchedule<'a> {
    pub label: &'a str,
    pub study_identifier: &'a str,
    pub event_definition_oid: &'a str,
    pub start_date: &'a str,
    pub location: &'a str,
}

impl EventSchedule<'_> {
    fn to_xml(&self) -> String {
        format!(
            "<v1:scheduleRequest><v1:event><bean:studySubjectRef>{}</bean:studySubjectRef><bean:studyRef>{}</bean:studyRef>{}{}{}</v1:event></v1:scheduleRequest>",
            text_element("bean:label", self.label),
            text_element("bean:identifier", self.study_identifier),
            text_element("bean:eventDefinitionOID", self.event_definition_oid),
            text_element("bean:location", self.location),
            text_element("bean:startDate", self.start_date),
        )
    }
}

/// The remote operations a sync needs from the clinical data management system.
#[async_trait]
pub trait ClinicalDataApi {
    /// Look up a study subject by label. On success the assigned OID is carried as an extra
    /// element of the result.
    async fn is_study_subject(&self, subject: &StudySubject<'_>)
        -> Result<SoapResult, ClientError>;

    /// Create a study subject. The response does not carry the new OID.
    async fn create_study_subject(
        &self,
        subject: &StudySubject<'_>,
    ) -> Result<SoapResult, ClientError>;

    async fn schedule_event(&self, event: &EventSchedule<'_>) -> Result<SoapResult, ClientError>;

    /// Submit an `<ODM>` document and return the raw response body.
    async fn import_data(&self, odm: &str) -> Result<String, ClientError>;
}

/// SOAP client for the LibreClinica web services.
pub struct LibreClinicaClient {
    base_url: Url,
    credentials: Credentials,
    client: reqwest::Client,
}

impl LibreClinicaClient {
    pub fn new(
        endpoint: &str,
        credentials: Credentials,
        request_timeout: time::Duration,
    ) -> Result<Self, ClientError> {
        // Service paths are relative to the endpoint, which must therefore end in a slash.
        let base_url = if endpoint.ends_with('/') {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!("{endpoint}/"))?
        };

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/xml; charset=utf-8"),
        );
        headers.insert("SOAPAction", header::HeaderValue::from_static("\"\""));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("LibreClinica Sync")
            .timeout(request_timeout)
            .build()
            .map_err(ClientError::ClientBuildError)?;

        Ok(Self {
            base_url,
            credentials,
            client,
        })
    }

    /// POST a SOAP envelope and return the response body, whatever the status code.
    /// SOAP faults come back as 500s and are interpreted by the caller.
    async fn post(
        &self,
        service: &'static str,
        path: &str,
        namespaces: &[(&str, &str)],
        body: &str,
    ) -> Result<String, ClientError> {
        let url = self.base_url.join(path)?;
        let payload = envelope(&self.credentials, namespaces, body);

        let response = self
            .client
            .post(url)
            .body(payload)
            .send()
            .await
            .map_err(|error| ClientError::RequestError { service, error })?;

        debug!(service, status = response.status().as_u16(), "got SOAP response");

        response
            .text()
            .await
            .map_err(|error| ClientError::RequestError { service, error })
    }

    async fn call(
        &self,
        service: &'static str,
        path: &str,
        namespaces: &[(&str, &str)],
        body: &str,
    ) -> Result<SoapResult, ClientError> {
        let response = self.post(service, path, namespaces, body).await?;
        let result = SoapResult::parse(&response)
            .map_err(|error| ClientError::MalformedResponse { service, error })?;

        if let Some(message) = result.fault() {
            return Err(ClientError::Fault {
                service,
                message: message.to_owned(),
            });
        }

        // Anything without a result element did not come from the web service, e.g. an error
        // page served for a wrong endpoint.
        if result.result().is_none() {
            return Err(ClientError::UnexpectedResponse {
                service,
                body: response,
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl ClinicalDataApi for LibreClinicaClient {
    async fn is_study_subject(
        &self,
        subject: &StudySubject<'_>,
    ) -> Result<SoapResult, ClientError> {
        self.call(
            "studySubject",
            STUDY_SUBJECT_PATH,
            &[("v1", STUDY_SUBJECT_NS), ("bean", BEANS_NS)],
            &subject.to_xml("isStudySubjectRequest"),
        )
        .await
    }

    async fn create_study_subject(
        &self,
        subject: &StudySubject<'_>,
    ) -> Result<SoapResult, ClientError> {
        self.call(
            "studySubject",
            STUDY_SUBJECT_PATH,
            &[("v1", STUDY_SUBJECT_NS), ("bean", BEANS_NS)],
            &subject.to_xml("createRequest"),
        )
        .await
    }

    async fn schedule_event(&self, event: &EventSchedule<'_>) -> Result<SoapResult, ClientError> {
        self.call(
            "event",
            EVENT_PATH,
            &[("v1", EVENT_NS), ("bean", BEANS_NS)],
            &event.to_xml(),
        )
        .await
    }

    async fn import_data(&self, odm: &str) -> Result<String, ClientError> {
        self.post(
            "data",
            DATA_PATH,
            &[("v1", DATA_NS), ("OpenClinica", OPENCLINICA_ODM_NS)],
            &format!("<v1:importRequest><odm>{odm}</odm></v1:importRequest>"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method, MockServer};

    fn client(server: &MockServer) -> LibreClinicaClient {
        LibreClinicaClient::new(
            &server.url("/OpenClinica-ws/ws"),
            Credentials {
                username: "root".to_owned(),
                password: "hashed".to_owned(),
            },
            time::Duration::from_secs(5),
        )
        .unwrap()
    }

    fn subject() -> StudySubject<'static> {
        StudySubject {
            label: "P001",
            study_identifier: "DEMO-2024",
            enrollment_date: "1900-01-01",
            gender: None,
        }
    }

    #[test]
    fn test_study_subject_xml() {
        let mut subject = subject();
        subject.gender = Some("f");

        let xml = subject.to_xml("createRequest");

        assert_eq!(
            xml,
            "<v1:createRequest><v1:studySubject><bean:label>P001</bean:label><bean:enrollmentDate>1900-01-01</bean:enrollmentDate><bean:subject><bean:gender>f</bean:gender></bean:subject><bean:studyRef><bean:identifier>DEMO-2024</bean:identifier></bean:studyRef></v1:studySubject></v1:createRequest>"
        );
    }

    #[test]
    fn test_study_subject_xml_without_gender() {
        let xml = subject().to_xml("isStudySubjectRequest");

        assert!(xml.contains("<bean:subject></bean:subject>"));
    }

    #[test]
    fn test_schedule_xml() {
        let event = EventSchedule {
            label: "P&1",
            study_identifier: "DEMO-2024",
            event_definition_oid: "SE_BASELINE",
            start_date: "2000-01-01",
            location: "NL",
        };

        let xml = event.to_xml();

        assert!(xml.starts_with("<v1:scheduleRequest><v1:event>"));
        assert!(xml.contains("<bean:studySubjectRef><bean:label>P&amp;1</bean:label></bean:studySubjectRef>"));
        assert!(xml.contains("<bean:eventDefinitionOID>SE_BASELINE</bean:eventDefinitionOID>"));
        assert!(xml.contains("<bean:startDate>2000-01-01</bean:startDate>"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = LibreClinicaClient::new(
            "not a url",
            Credentials {
                username: String::new(),
                password: String::new(),
            },
            time::Duration::from_secs(1),
        );

        assert!(matches!(result, Err(ClientError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_is_study_subject_returns_oid() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/OpenClinica-ws/ws/studySubject/v1/studySubjectWsdl.wsdl")
                .header("content-type", "text/xml; charset=utf-8")
                .header("soapaction", "\"\"")
                .body_contains("<wsse:Username>root</wsse:Username>")
                .body_contains("<v1:isStudySubjectRequest>")
                .body_contains("<bean:label>P001</bean:label>");
            then.status(200).body(
                r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><isStudySubjectResponse xmlns="http://openclinica.org/ws/studySubject/v1"><result>Success</result><studySubjectOID>SS_P001</studySubjectOID></isStudySubjectResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            );
        });

        let result = client(&server).is_study_subject(&subject()).await.unwrap();

        mock.assert_hits(1);
        assert!(result.is_success());
        assert_eq!(result.last_extra(), Some("SS_P001"));
    }

    #[tokio::test]
    async fn test_fault_is_an_error() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/OpenClinica-ws/ws/event/v1/eventWsdl.wsdl");
            then.status(500).body(
                r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"><SOAP-ENV:Body><SOAP-ENV:Fault><faultcode>SOAP-ENV:Client</faultcode><faultstring>Invalid username or password</faultstring></SOAP-ENV:Fault></SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            );
        });

        let event = EventSchedule {
            label: "P001",
            study_identifier: "DEMO-2024",
            event_definition_oid: "SE_BASELINE",
            start_date: "2000-01-01",
            location: "NL",
        };

        match client(&server).schedule_event(&event).await {
            Err(ClientError::Fault { service, message }) => {
                assert_eq!(service, "event");
                assert_eq!(message, "Invalid username or password");
            }
            other => panic!("expected a fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreadable_response_is_an_error() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(Method::POST);
            then.status(502).body("<html><body>Bad Gateway</html>");
        });

        assert!(matches!(
            client(&server).create_study_subject(&subject()).await,
            Err(ClientError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_response_without_result_is_an_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST);
            then.status(404)
                .body("<html><body><h1>Not Found</h1></body></html>");
        });

        match client(&server).is_study_subject(&subject()).await {
            Err(ClientError::UnexpectedResponse { service, body }) => {
                assert_eq!(service, "studySubject");
                assert!(body.contains("Not Found"));
            }
            other => panic!("expected an unexpected response error, got {other:?}"),
        }
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_import_returns_raw_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/OpenClinica-ws/ws/data/v1/dataWsdl.wsdl")
                .body_contains(r#"xmlns:OpenClinica="http://www.openclinica.org/ns/odm_ext_v130/v3.1""#)
                .body_contains("<v1:importRequest><odm><ODM></ODM></odm></v1:importRequest>");
            then.status(200).body("<importDataResponse><result>Success</result></importDataResponse>");
        });

        let body = client(&server).import_data("<ODM></ODM>").await.unwrap();

        mock.assert_hits(1);
        assert!(body.contains("Success"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_request_error() {
        let client = LibreClinicaClient::new(
            "http://127.0.0.1:1/ws/",
            Credentials {
                username: String::new(),
                password: String::new(),
            },
            time::Duration::from_secs(1),
        )
        .unwrap();

        assert!(matches!(
            client.import_data("<ODM/>").await,
            Err(ClientError::RequestError { service: "data", .. })
        ));
    }
}
