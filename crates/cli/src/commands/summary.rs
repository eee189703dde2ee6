use crate::commands::{run_db_command, CommandResult};
use cartwatch_jobs::score_summary;

pub fn run() -> CommandResult {
    run_db_command("summary", |_config, pool| async move {
        let summary = score_summary(&pool)
            .await
            .map_err(|error| ("summary", error.to_string(), 5u8))?;

        serde_json::to_string_pretty(&summary)
            .map_err(|error| ("serialization", error.to_string(), 6u8))
    })
}
