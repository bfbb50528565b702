use anyhow::Context;
use std::path::Path;
use tally_core::{Transaction, TransactionId};
use tally_import::Importer;
use tally_storage::SqliteGateway;

use crate::settings::Settings;

/// Import one uploaded file. With `atomic_import` the categories and
/// transactions are committed together or not at all; without it the
/// resolver's categories are committed before the transactions are written.
pub async fn import(
    settings: &Settings,
    gateway: &SqliteGateway,
    file: &Path,
) -> anyhow::Result<Vec<Transaction>> {
    let options = settings.import_options()?;
    let source = settings.resolve_source(file);
    tracing::info!("Importing {}", source.display());

    if !settings.atomic_import {
        let created = Importer::with_options(gateway, options)
            .import_file(&source)
            .await?;
        return Ok(created);
    }

    let uow = gateway.begin().await?;
    match Importer::with_options(&uow, options).import_file(&source).await {
        Ok(created) => {
            uow.commit().await.context("Failed to commit import")?;
            Ok(created)
        }
        Err(e) => {
            if let Err(rollback) = uow.rollback().await {
                tracing::warn!("Rollback after failed import also failed: {rollback}");
            }
            Err(e.into())
        }
    }
}

pub async fn delete(gateway: &SqliteGateway, id: TransactionId) -> anyhow::Result<()> {
    tally_import::delete_transaction(gateway, id).await?;
    Ok(())
}

pub async fn list(gateway: &SqliteGateway) -> anyhow::Result<Vec<Transaction>> {
    Ok(gateway.list_transactions().await?)
}
