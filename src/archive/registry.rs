use crate::archive::period::PeriodKey;
use crate::archive::report::RunContext;
use crate::archive::schema::FieldSchema;
use crate::archive::store::{CollectionRequest, DestinationApi, LedgerStore};
use crate::archive::util::progress;
use crate::archive::warn::{self, WarnEvent};
use crate::error::ArchiveError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One ledger row: the destination created for one partition. Written once,
/// never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    pub partition_key: String,
    pub destination_name: String,
    pub destination_id: String,
    pub workspace_id: String,
    pub link: String,
    #[serde(default)]
    pub primary_collection_id: String,
}

/// Where a partition's records get copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTarget {
    pub destination_id: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub workspace_id: String,
    pub table_name: String,
    pub link_base: String,
}

pub struct ArchiveRegistry<'a> {
    ledger: &'a dyn LedgerStore,
    destinations: &'a dyn DestinationApi,
    settings: RegistrySettings,
    index: BTreeMap<String, ArchiveDescriptor>,
}

impl<'a> ArchiveRegistry<'a> {
    /// Reads the whole ledger once and indexes it by partition key. If the
    /// ledger already holds duplicates, the earliest row wins.
    pub fn load(
        ledger: &'a dyn LedgerStore,
        destinations: &'a dyn DestinationApi,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let mut index = BTreeMap::new();
        for descriptor in ledger.load_all()? {
            index
                .entry(descriptor.partition_key.clone())
                .or_insert(descriptor);
        }
        Ok(Self {
            ledger,
            destinations,
            settings,
            index,
        })
    }

    pub fn resolve(&self, partition_key: &str) -> Option<&ArchiveDescriptor> {
        self.index.get(partition_key)
    }

    pub fn target_for(&self, descriptor: &ArchiveDescriptor) -> DestinationTarget {
        // Rows written before the primary table id was tracked address the
        // table by name.
        let table = if descriptor.primary_collection_id.trim().is_empty() {
            self.settings.table_name.clone()
        } else {
            descriptor.primary_collection_id.clone()
        };
        DestinationTarget {
            destination_id: descriptor.destination_id.clone(),
            table,
        }
    }

    /// Provision a destination for `period` and record it. Callers must have
    /// checked [`ArchiveRegistry::resolve`] first.
    pub fn create_and_register(
        &mut self,
        period: &PeriodKey,
        schema: &[FieldSchema],
    ) -> Result<ArchiveDescriptor, ArchiveError> {
        progress(&format!("creating destination `{}`", period.display_name));
        let request = CollectionRequest {
            name: &period.display_name,
            table_name: &self.settings.table_name,
            fields: schema,
            workspace_id: &self.settings.workspace_id,
        };
        let created = self
            .destinations
            .create_collection(&request)
            .map_err(|err| ArchiveError::CreationFailure {
                partition_key: period.key.clone(),
                display_name: period.display_name.clone(),
                cause: format!("{err:#}"),
            })?;

        let Some(primary) = created.tables.first() else {
            return Err(ArchiveError::CreationFailure {
                partition_key: period.key.clone(),
                display_name: period.display_name.clone(),
                cause: format!("destination {} came back without tables", created.id),
            });
        };

        let descriptor = ArchiveDescriptor {
            partition_key: period.key.clone(),
            destination_name: period.display_name.clone(),
            destination_id: created.id.clone(),
            workspace_id: self.settings.workspace_id.clone(),
            link: format!(
                "{}/{}",
                self.settings.link_base.trim_end_matches('/'),
                created.id
            ),
            primary_collection_id: primary.id.clone(),
        };

        self.ledger
            .append(&descriptor)
            .map_err(|err| ArchiveError::LedgerWriteFailure {
                partition_key: period.key.clone(),
                destination_id: created.id.clone(),
                cause: format!("{err:#}"),
            })?;

        self.index
            .insert(descriptor.partition_key.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// First pass of a run: every period gets resolved or created, one at a
    /// time, before any record is copied. Periods that fail stay out of the
    /// returned map and their records stay eligible.
    pub fn ensure_destinations(
        &mut self,
        periods: &[PeriodKey],
        schema: &[FieldSchema],
        ctx: &mut RunContext,
    ) -> BTreeMap<String, DestinationTarget> {
        let mut targets = BTreeMap::new();
        for period in periods {
            if let Some(existing) = self.resolve(&period.key) {
                progress(&format!(
                    "found existing destination {} for {}",
                    existing.destination_id, period.key
                ));
                targets.insert(period.key.clone(), self.target_for(existing));
                continue;
            }

            match self.create_and_register(period, schema) {
                Ok(descriptor) => {
                    ctx.record_created(&period.key);
                    targets.insert(period.key.clone(), self.target_for(&descriptor));
                }
                Err(err) => {
                    let destination = match &err {
                        ArchiveError::LedgerWriteFailure { destination_id, .. } => {
                            destination_id.clone()
                        }
                        _ => String::new(),
                    };
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "registry",
                        action: "create-destination",
                        partition: &period.key,
                        destination: &destination,
                        retry: "retry-next-run",
                        reason: "destination-unresolved",
                        err: &err.to_string(),
                    });
                    ctx.record_error(&err);
                }
            }
        }
        targets
    }
}
