use crate::config::Config;
use crate::error::Error;
use chrono::Utc;
use clap::ValueEnum;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::prelude::{DataFrame, ParquetReadOptions, SessionContext};
use log::{debug, info, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const CURRENT_POINTER: &str = "CURRENT";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum WriteMode {
    /// Add rows to whatever the destination already holds.
    Append,
    /// Discard the destination's contents and substitute the new table.
    Replace,
}

/// A three-part `project.dataset.table` warehouse name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl Destination {
    pub fn new(project: &str, dataset: &str, table: &str) -> Result<Self, Error> {
        let parts = [project, dataset, table];
        if let Some(bad) = parts
            .iter()
            .find(|p| p.trim().is_empty() || p.contains(['.', '/', '\\']))
        {
            return Err(Error::InvalidConfig {
                message: format!("invalid destination name part '{}'", bad),
            });
        }

        Ok(Destination {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [project, dataset, table] => Destination::new(project, dataset, table),
            _ => Err(Error::InvalidConfig {
                message: format!("destination '{}' is not project.dataset.table", s),
            }),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[async_trait::async_trait]
pub trait WarehouseLoader: Send + Sync + 'static {
    /// Writes a table to a warehouse destination.
    ///
    /// # Arguments
    /// * `df` - The table to write.
    /// * `destination` - The target table.
    /// * `mode` - Whether to append to or replace the destination's contents.
    ///
    /// # Returns
    /// The number of rows written once they are durably committed, or an
    /// [`Error::Load`] carrying the underlying cause.
    async fn load(&self, df: DataFrame, destination: &Destination, mode: WriteMode)
        -> Result<u64, Error>;
}

/// A warehouse kept as Parquet files under a root directory.
///
/// Each table lives in `<root>/<project>/<dataset>/<table>/` and holds one or
/// more generation directories of part files. The `CURRENT` file names the
/// live generation and is only ever swapped by an atomic rename.
#[derive(Clone)]
pub struct ParquetWarehouse {
    root: PathBuf,
}

impl ParquetWarehouse {
    pub fn new(config: &Config) -> Self {
        ParquetWarehouse {
            root: PathBuf::from(&config.warehouse_dir),
        }
    }

    #[cfg(test)]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        ParquetWarehouse { root: root.into() }
    }

    /// Reads the live contents of a table.
    pub async fn read_table(
        &self,
        ctx: &SessionContext,
        destination: &Destination,
    ) -> Result<DataFrame, Error> {
        let generation = self
            .current_generation(destination)?
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("table {} does not exist", destination),
            })?;

        let path = format!("{}/", generation.display());
        Ok(ctx.read_parquet(path, ParquetReadOptions::default()).await?)
    }

    fn table_dir(&self, destination: &Destination) -> PathBuf {
        self.root
            .join(&destination.project)
            .join(&destination.dataset)
            .join(&destination.table)
    }

    fn current_generation(&self, destination: &Destination) -> Result<Option<PathBuf>, Error> {
        let table_dir = self.table_dir(destination);
        match fs::read_to_string(table_dir.join(CURRENT_POINTER)) {
            Ok(name) => Ok(Some(table_dir.join(name.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace(
        &self,
        destination: &Destination,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<(), Error> {
        let table_dir = self.table_dir(destination);
        fs::create_dir_all(&table_dir)?;

        let previous = self.current_generation(destination)?;
        let generation_name = unique_name(&table_dir, "gen-", "");
        let generation = table_dir.join(&generation_name);
        fs::create_dir(&generation)?;

        let staged_pointer = table_dir.join(format!("{}.tmp", CURRENT_POINTER));
        let staged = stage_generation(&generation, &generation_name, &staged_pointer, schema, batches)
            .and_then(|()| {
                fs::rename(&staged_pointer, table_dir.join(CURRENT_POINTER)).map_err(Error::from)
            });
        if let Err(e) = staged {
            discard(&generation);
            discard(&staged_pointer);
            return Err(e);
        }
        sync_dir(&table_dir)?;

        // In-flight readers may still be scanning the previous generation, so
        // it survives until the next replace.
        prune_generations(&table_dir, &[Some(&generation), previous.as_ref()]);

        Ok(())
    }

    fn append(
        &self,
        destination: &Destination,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<(), Error> {
        let Some(generation) = self.current_generation(destination)? else {
            debug!("{} does not exist yet, creating it", destination);
            return self.replace(destination, schema, batches);
        };

        for existing in existing_schemas(&generation)? {
            check_compatible(&existing, &schema)?;
        }

        write_part(&generation, schema, batches)?;
        sync_dir(&generation)
    }
}

#[async_trait::async_trait]
impl WarehouseLoader for ParquetWarehouse {
    async fn load(
        &self,
        df: DataFrame,
        destination: &Destination,
        mode: WriteMode,
    ) -> Result<u64, Error> {
        let schema = df.schema().inner().clone();
        let batches = df
            .collect()
            .await
            .map_err(|e| Error::load(destination, e.into()))?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();

        let written = match mode {
            WriteMode::Replace => self.replace(destination, schema, &batches),
            WriteMode::Append => self.append(destination, schema, &batches),
        };
        written.map_err(|e| Error::load(destination, e))?;

        info!("Wrote {} rows to {} ({:?})", rows, destination, mode);
        Ok(rows as u64)
    }
}

fn stage_generation(
    generation: &Path,
    generation_name: &str,
    staged_pointer: &Path,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<(), Error> {
    write_part(generation, schema, batches)?;
    sync_dir(generation)?;

    let mut file = File::create(staged_pointer)?;
    file.write_all(generation_name.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Writes a part under a hidden staging name and renames it into place once
/// it is complete, so the generation never holds a partial `.parquet` file.
fn write_part(generation: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<(), Error> {
    let name = unique_name(generation, "part-", ".parquet");
    let staged = generation.join(format!(".{}.tmp", name));

    if let Err(e) = write_parquet(&staged, schema, batches) {
        discard(&staged);
        return Err(e);
    }
    fs::rename(&staged, generation.join(name))?;

    Ok(())
}

fn write_parquet(path: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<(), Error> {
    let file = File::create(path)?;

    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    let file = writer.into_inner()?;
    file.sync_all()?;

    Ok(())
}

fn prune_generations(table_dir: &Path, keep: &[Option<&PathBuf>]) {
    let entries = match fs::read_dir(table_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list {}: {}", table_dir.display(), e);
            return;
        }
    };

    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_generation = path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("gen-"));
        if is_generation && !keep.iter().flatten().any(|k| **k == path) {
            debug!("Removing old generation {}", path.display());
            discard(&path);
        }
    }
}

// Best-effort cleanup of files or directories left by a failed or superseded write.
fn discard(path: &Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

fn existing_schemas(generation: &Path) -> Result<Vec<SchemaRef>, Error> {
    let mut schemas = Vec::new();
    for entry in fs::read_dir(generation)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "parquet") {
            let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
            schemas.push(builder.schema().clone());
        }
    }
    Ok(schemas)
}

// New columns are fine; a column that changes type is not.
fn check_compatible(existing: &SchemaRef, incoming: &SchemaRef) -> Result<(), Error> {
    for field in incoming.fields() {
        if let Ok(old) = existing.field_with_name(field.name()) {
            if old.data_type() != field.data_type() {
                return Err(Error::SchemaConflict {
                    column: field.name().to_string(),
                    existing: old.data_type().to_string(),
                    incoming: field.data_type().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn unique_name(dir: &Path, prefix: &str, suffix: &str) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
    let mut name = format!("{}{}{}", prefix, stamp, suffix);
    let mut n = 1;
    while dir.join(&name).exists() {
        name = format!("{}{}-{}{}", prefix, stamp, n, suffix);
        n += 1;
    }
    name
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), Error> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), Error> {
    Ok(())
}
