use chrono::Utc;

use crate::commands::{run_db_command, CommandResult};
use cartwatch_db::SeedDataset;

pub fn run() -> CommandResult {
    run_db_command("seed", |_config, pool| async move {
        let dataset = SeedDataset::new(Utc::now());
        let applied = dataset
            .apply(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verified = dataset
            .verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if applied != verified {
            return Err((
                "seed_verification",
                format!("seed verification mismatch: applied {applied:?}, found {verified:?}"),
                6u8,
            ));
        }

        Ok(format!(
            "seeded demo dataset: {} users, {} carts, {} items, {} events, {} abandonments",
            applied.users, applied.carts, applied.items, applied.events, applied.abandonments
        ))
    })
}
