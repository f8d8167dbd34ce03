//! `pendq endpoint <id>` – flip endpoint registry state.

use anyhow::{bail, Result};
use pendq_core::store::MessageDb;

pub async fn run_endpoint(db: &MessageDb, id: i64, active: bool, inactive: bool) -> Result<()> {
    if active == inactive {
        bail!("pass exactly one of --active or --inactive");
    }
    db.set_endpoint_active(id, active).await?;
    println!(
        "Endpoint {id} is now {}",
        if active { "active" } else { "inactive" }
    );
    Ok(())
}
