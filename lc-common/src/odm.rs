//! CDISC ODM `ClinicalData` payloads in the shape LibreClinica's data import expects.
use quick_xml::escape::escape;

pub const OPENCLINICA_ODM_NS: &str = "http://www.openclinica.org/ns/odm_ext_v130/v3.1";
pub const METADATA_VERSION_OID: &str = "v1.0.0";
pub const INITIAL_DATA_ENTRY: &str = "initial data entry";

/// A single item value keyed by its destination item OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemData {
    pub item_oid: String,
    pub value: String,
}

/// The study-level identifiers every submission is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdmTarget {
    pub study_oid: String,
    pub event_oid: String,
    pub form_oid: String,
    pub item_group_oid: String,
}

/// One subject's data for one event/form/item group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectData<'a> {
    pub target: &'a OdmTarget,
    pub subject_key: &'a str,
    pub items: Vec<ItemData>,
}

impl SubjectData<'_> {
    /// Render the `<ODM>` document. Upserts are enabled for every data entry stage, and the item
    /// group is submitted as an insert transaction.
    ///
    /// The `OpenClinica` prefix must be declared by the enclosing document.
    pub fn to_odm_xml(&self) -> String {
        let target = self.target;
        let items: String = self
            .items
            .iter()
            .map(|item| {
                format!(
                    r#"<ItemData ItemOID="{}" Value="{}"/>"#,
                    escape(item.item_oid.as_str()),
                    escape(item.value.as_str())
                )
            })
            .collect();

        format!(
            concat!(
                r#"<ODM><ClinicalData StudyOID="{study}" MetaDataVersionOID="{version}">"#,
                r#"<UpsertOn NotStarted="true" DataEntryStarted="true" DataEntryComplete="true"/>"#,
                r#"<SubjectData SubjectKey="{subject}">"#,
                r#"<StudyEventData StudyEventOID="{event}" StudyEventRepeatKey="1">"#,
                r#"<FormData FormOID="{form}" OpenClinica:Status="{status}">"#,
                r#"<ItemGroupData ItemGroupOID="{group}" ItemGroupRepeatKey="1" TransactionType="Insert">"#,
                "{items}",
                "</ItemGroupData></FormData></StudyEventData></SubjectData></ClinicalData></ODM>"
            ),
            study = escape(target.study_oid.as_str()),
            version = METADATA_VERSION_OID,
            subject = escape(self.subject_key),
            event = escape(target.event_oid.as_str()),
            form = escape(target.form_oid.as_str()),
            status = INITIAL_DATA_ENTRY,
            group = escape(target.item_group_oid.as_str()),
            items = items,
        )
    }
}
