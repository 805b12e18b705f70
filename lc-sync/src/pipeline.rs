use lc_common::mapping::rename_columns;
use lc_common::records::materialize;
use lc_common::sparql::SparqlClient;
use tracing::{error, info};

use crate::client::LibreClinicaClient;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::uploader::{BatchSummary, Uploader};

/// Run one sync: query the SPARQL endpoint, type and rename the results, and push every
/// record into LibreClinica.
pub async fn run(config: &SyncConfig) -> Result<BatchSummary, SyncError> {
    if !config.perform_query {
        error!("perform_query is disabled, LibreClinica will not be updated");
        return Err(SyncError::Disabled);
    }

    let sparql = SparqlClient::new(
        &config.sparql_endpoint,
        config.sparql_auth.clone(),
        config.request_timeout,
    )?;
    let results = sparql.query(&config.query).await?;

    let records = materialize(results.columns(), results.rows(), &config.inference);
    let records = rename_columns(records, &config.item_oid_mapping);

    if records.is_empty() {
        error!("there is no patient data available at the SPARQL endpoint");
        return Err(SyncError::NoRecords);
    }

    info!(records = records.len(), "retrieved patient data");

    let client = LibreClinicaClient::new(
        &config.lc_endpoint,
        config.credentials.clone(),
        config.request_timeout,
    )?;

    Uploader::new(&client, config).run_batch(&records).await
}
