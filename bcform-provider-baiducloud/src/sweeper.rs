//! Cleanup of leftovers from test runs
//!
//! Every object whose name starts with the given prefix is deleted. Failures
//! are collected instead of aborting so one stuck object does not keep the
//! rest around.

use crate::connectivity::BaiduClient;
use crate::error::{BceError, BceResult};

/// Outcome of a sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// `kind id (name)` of every deleted object
    pub deleted: Vec<String>,
    pub skipped: usize,
    /// Objects that could not be deleted, with the reason
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    fn record(&mut self, label: String, result: BceResult<()>) {
        match result {
            Ok(()) => {
                log::info!("Deleted {}", label);
                self.deleted.push(label);
            }
            Err(e) if e.is_not_found() => {
                log::info!("{} is already gone", label);
            }
            Err(e) => {
                log::error!("Failed to delete {}: {}", label, e);
                self.failed.push((label, e.to_string()));
            }
        }
    }
}

/// Delete BLBs, certificates, ES clusters and deploy sets named `prefix*`
pub async fn sweep(client: &BaiduClient, prefix: &str) -> BceResult<SweepReport> {
    if prefix.is_empty() {
        return Err(BceError::InvalidArgument(
            "refusing to sweep with an empty prefix".to_string(),
        ));
    }
    let mut report = SweepReport::default();

    for blb in client.blb().list_blbs().await? {
        if !blb.name.starts_with(prefix) {
            report.skipped += 1;
            continue;
        }
        let result = client.blb().delete_blb(&blb.blb_id).await;
        report.record(format!("blb {} ({})", blb.blb_id, blb.name), result);
    }

    for cert in client.cert().list_certs().await? {
        if !cert.cert_name.starts_with(prefix) {
            report.skipped += 1;
            continue;
        }
        let result = client.cert().delete_cert(&cert.cert_id).await;
        report.record(format!("cert {} ({})", cert.cert_id, cert.cert_name), result);
    }

    for cluster in client.bes().list_clusters().await? {
        if !cluster.cluster_name.starts_with(prefix) || cluster.actual_status == "Deleted" {
            report.skipped += 1;
            continue;
        }
        let result = client.bes().delete_cluster(&cluster.cluster_id).await;
        report.record(
            format!("es_cluster {} ({})", cluster.cluster_id, cluster.cluster_name),
            result,
        );
    }

    for set in client.bcc().list_deploy_sets().await? {
        if !set.name.starts_with(prefix) {
            report.skipped += 1;
            continue;
        }
        let result = client.bcc().delete_deploy_set(&set.deploy_set_id).await;
        report.record(format!("deployset {} ({})", set.deploy_set_id, set.name), result);
    }

    Ok(report)
}
