use std::time::Duration;

use tracing::{info, warn};

use colloquy_core::AccountService;

/// Background task that prunes refresh tokens past their expiry.
///
/// Expired tokens are already refused on use; this only keeps the table from
/// growing with tokens nobody presents again.
pub async fn run_cleanup_loop(accounts: AccountService, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match accounts.refresh_store().purge_expired().await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: purged {} expired refresh tokens", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {}", e);
            }
        }
    }
}
