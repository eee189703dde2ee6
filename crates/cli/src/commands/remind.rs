use chrono::Utc;

use crate::commands::{run_db_command, CommandResult};
use cartwatch_jobs::send_abandonment_reminders;

pub fn run() -> CommandResult {
    run_db_command("remind", |config, pool| async move {
        let summary = send_abandonment_reminders(&pool, &config.reminder, Utc::now())
            .await
            .map_err(|error| ("reminders", error.to_string(), 5u8))?;
        Ok(summary.to_string())
    })
}
