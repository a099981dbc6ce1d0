use std::collections::HashSet;

use super::*;

impl TestRunService {
    /// Deletes many runs, reporting a result per id.
    ///
    /// Each run is deleted atomically on its own; a failing id never rolls back
    /// the runs already deleted. Repeated ids are processed once.
    pub async fn bulk_delete_test_runs(
        &self,
        actor: &UserIdentity,
        test_run_ids: &[u64],
    ) -> BulkDeleteReport {
        let mut report = BulkDeleteReport::default();
        let mut seen = HashSet::with_capacity(test_run_ids.len());

        for test_run_id in test_run_ids.iter().copied() {
            if !seen.insert(test_run_id) {
                continue;
            }

            match self.delete_test_run(actor, test_run_id).await {
                Ok(()) => report.deleted.push(test_run_id),
                Err(error) => {
                    warn!(
                        test_run_id,
                        actor = actor.subject(),
                        kind = error.kind(),
                        error = %error,
                        "bulk delete skipped test run"
                    );
                    report.failed.push(BulkDeleteFailure { test_run_id, error });
                }
            }
        }

        report
    }
}
