use chrono::Utc;

use crate::commands::{run_db_command, CommandResult};
use cartwatch_jobs::detect_abandoned_carts;

pub fn run() -> CommandResult {
    run_db_command("detect", |config, pool| async move {
        let summary = detect_abandoned_carts(&pool, &config.detector, Utc::now())
            .await
            .map_err(|error| ("detection", error.to_string(), 5u8))?;
        Ok(summary.to_string())
    })
}
