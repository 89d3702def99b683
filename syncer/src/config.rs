use config::load_config;
use config::shared::SyncConfig;

use crate::error::{SyncerError, SyncerResult};

/// Destination overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct DestinationOverrides {
    pub dataset: Option<String>,
    pub table: Option<String>,
}

/// Loads the sync configuration, applies the command line overrides and validates the result.
pub fn load_sync_config(overrides: DestinationOverrides) -> SyncerResult<SyncConfig> {
    let config = load_config::<SyncConfig>().map_err(SyncerError::config)?;

    finalize(config, overrides)
}

fn finalize(mut config: SyncConfig, overrides: DestinationOverrides) -> SyncerResult<SyncConfig> {
    config
        .destination
        .apply_overrides(overrides.dataset, overrides.table)
        .map_err(SyncerError::config)?;
    config.validate().map_err(SyncerError::config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use config::shared::DestinationConfig;

    use super::*;

    fn sync_config(destination: serde_json::Value) -> SyncConfig {
        serde_json::from_value(serde_json::json!({
            "source": {
                "connection": {
                    "host": "localhost",
                    "port": 5432,
                    "name": "toko",
                    "username": "postgres",
                    "tls": { "enabled": false }
                }
            },
            "destination": destination,
            "pipeline": { "id": 1 }
        }))
        .unwrap()
    }

    #[test]
    fn overrides_take_precedence_over_files() {
        let config = sync_config(serde_json::json!({
            "big_query": {
                "project_id": "analytics",
                "dataset_id": "toko",
                "table_id": "produk"
            }
        }));

        let config = finalize(
            config,
            DestinationOverrides {
                dataset: Some("toko_backfill".to_string()),
                table: None,
            },
        )
        .unwrap();

        match config.destination {
            DestinationConfig::BigQuery {
                dataset_id,
                table_id,
                ..
            } => {
                assert_eq!(dataset_id, "toko_backfill");
                assert_eq!(table_id, "produk");
            }
            DestinationConfig::Memory { .. } => panic!("expected a BigQuery destination"),
        }
    }

    #[test]
    fn empty_table_override_is_rejected() {
        let config = sync_config(serde_json::json!({ "memory": { "table_id": "produk" } }));

        let err = finalize(
            config,
            DestinationOverrides {
                dataset: None,
                table: Some(String::new()),
            },
        )
        .unwrap_err();

        assert_eq!(err.category(), "configuration error");
    }
}
