// File Import Pipeline - fetch, load, transform, save, clean up
//
// Every operation is built through `construct`, so a job in test mode gets
// whatever substitutes its mock registry holds.

use std::marker::PhantomData;

use tracing::{info, warn};

use crate::application::importer::ImportSummary;
use crate::context::{step, step_with};
use crate::domain::{stream_rows, RowStream, TupleStream};
use crate::error::Result;
use crate::operations::transformers::{dicts_to_tuples, materialize, Transform, TupleShape};
use crate::operations::{
    construct, Destination, FetchOutcome, Fetcher, FileDeleter, LocalFile, Loader, Operation,
    Saver, SearchQuery,
};

/// Where the remote file names come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSet {
    Explicit(Vec<String>),
    Search(SearchQuery),
}

/// Row stages applied in order, then the reshape to tuples
#[derive(Debug, Clone)]
pub struct TransformChain {
    stages: Vec<Transform>,
    columns: TupleShape,
}

impl TransformChain {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            stages: Vec::new(),
            columns: dicts_to_tuples(columns),
        }
    }

    pub fn then(mut self, transform: Transform) -> Self {
        self.stages.push(transform);
        self
    }

    pub fn columns(&self) -> &[String] {
        self.columns.columns()
    }

    /// Run the row stages only
    pub fn rows(&self, mut rows: RowStream) -> Result<RowStream> {
        for stage in &self.stages {
            rows = stage.apply(rows)?;
        }
        Ok(rows)
    }

    pub fn apply(&self, rows: RowStream) -> Result<TupleStream> {
        self.columns.apply(self.rows(rows)?)
    }
}

/// A configured fetch/load/save import over operations `F`, `L`, `D`, `S`
pub struct FileImport<F, L, D, S>
where
    F: Operation<Interface = dyn Fetcher>,
    L: Operation<Interface = dyn Loader>,
    D: Operation<Interface = dyn FileDeleter>,
    S: Operation<Interface = dyn Saver, Args = Destination>,
{
    fetcher_args: F::Args,
    inputs: InputSet,
    loader_args: L::Args,
    deleter_args: D::Args,
    chain: TransformChain,
    destinations: Vec<Destination>,
    marker: Option<Destination>,
    skip_unavailable: bool,
    _operations: PhantomData<(F, L, D, S)>,
}

impl<F, L, D, S> FileImport<F, L, D, S>
where
    F: Operation<Interface = dyn Fetcher>,
    F::Args: Clone,
    L: Operation<Interface = dyn Loader>,
    L::Args: Clone + Default,
    D: Operation<Interface = dyn FileDeleter>,
    D::Args: Clone + Default,
    S: Operation<Interface = dyn Saver, Args = Destination>,
{
    pub fn new(fetcher_args: F::Args, inputs: InputSet, chain: TransformChain) -> Self {
        Self {
            fetcher_args,
            inputs,
            loader_args: L::Args::default(),
            deleter_args: D::Args::default(),
            chain,
            destinations: Vec::new(),
            marker: None,
            skip_unavailable: false,
            _operations: PhantomData,
        }
    }

    pub fn loader_args(mut self, args: L::Args) -> Self {
        self.loader_args = args;
        self
    }

    pub fn deleter_args(mut self, args: D::Args) -> Self {
        self.deleter_args = args;
        self
    }

    pub fn insert_into(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Run once without data after the rows are saved, even with no input
    pub fn with_marker(mut self, destination: Destination) -> Self {
        self.marker = Some(destination);
        self
    }

    /// Skip files the server refuses instead of failing the import
    pub fn skip_unavailable(mut self, skip: bool) -> Self {
        self.skip_unavailable = skip;
        self
    }

    pub fn run(&self) -> Result<ImportSummary> {
        step("file_import", || {
            let fetcher = construct::<F>(self.fetcher_args.clone())?;
            let mut cleanup = Cleanup::new(construct::<D>(self.deleter_args.clone())?);
            let mut summary = ImportSummary::default();

            let outcome = self
                .fetch(fetcher.as_ref(), &mut cleanup, &mut summary)
                .and_then(|()| self.import(&cleanup.files, &mut summary));
            match outcome {
                Ok(()) => cleanup.finish()?,
                Err(e) => {
                    if let Err(cleanup_error) = cleanup.finish() {
                        warn!(error = %cleanup_error, "Cleanup failed after import error");
                    }
                    return Err(e);
                }
            }

            info!(files = summary.files, rows = summary.rows, "Import finished");
            Ok(summary)
        })
    }

    /// Searched inputs are fetched in one call, so fetchers without per-name
    /// retrieval (mail) work too. `skip_unavailable` applies to explicit names.
    fn fetch(
        &self,
        fetcher: &dyn Fetcher,
        cleanup: &mut Cleanup,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        match &self.inputs {
            InputSet::Search(query) => {
                for file in fetcher.fetch_from_search(query)? {
                    cleanup.track(file);
                }
            }
            InputSet::Explicit(names) => {
                step_with("fetch", format!("{} files", names.len()), || {
                    for name in names {
                        if !self.skip_unavailable {
                            cleanup.track(fetcher.fetch_file(name)?);
                            continue;
                        }
                        match fetcher.fetch_file_if_exists(name)? {
                            FetchOutcome::Fetched(file) => cleanup.track(file),
                            FetchOutcome::Unavailable { remote, reason } => {
                                warn!(remote = %remote, reason = %reason, "Skipping unavailable file");
                                summary.unavailable.push(remote);
                            }
                        }
                    }
                    Ok(())
                })?;
            }
        }
        summary.files = cleanup.files.len();
        Ok(())
    }

    fn import(&self, files: &[LocalFile], summary: &mut ImportSummary) -> Result<()> {
        if files.is_empty() {
            info!("No input files, nothing to import");
            return self.run_marker();
        }

        let loader = construct::<L>(self.loader_args.clone())?;
        let savers = self
            .destinations
            .iter()
            .cloned()
            .map(construct::<S>)
            .collect::<Result<Vec<_>>>()?;

        for file in files {
            let rows = step_with("load", file.remote(), || loader.load(file))?;
            summary.rows += self.save(rows, &savers)?;
        }

        self.run_marker()
    }

    fn save(&self, rows: RowStream, savers: &[Box<dyn Saver>]) -> Result<usize> {
        match savers {
            [] => self.chain.apply(rows)?.try_fold(0, |count, tuple| tuple.map(|_| count + 1)),
            [saver] => saver.save(self.chain.apply(rows)?),
            _ => {
                // one-shot source, several destinations
                let rows = materialize(self.chain.rows(rows)?)?;
                for saver in savers {
                    saver.save(self.chain.columns.apply(stream_rows(rows.clone()))?)?;
                }
                Ok(rows.len())
            }
        }
    }

    fn run_marker(&self) -> Result<()> {
        match &self.marker {
            Some(destination) => construct::<S>(destination.clone())?.save_marker(),
            None => Ok(()),
        }
    }
}

/// Deletes every tracked file once, on `finish` or when dropped while armed
struct Cleanup {
    deleter: Box<dyn FileDeleter>,
    files: Vec<LocalFile>,
    armed: bool,
}

impl Cleanup {
    fn new(deleter: Box<dyn FileDeleter>) -> Self {
        Self {
            deleter,
            files: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, file: LocalFile) {
        self.files.push(file);
    }

    fn finish(mut self) -> Result<()> {
        self.armed = false;
        if self.files.is_empty() {
            return Ok(());
        }
        self.deleter.delete_files(&self.files)
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if !self.armed || self.files.is_empty() {
            return;
        }
        if let Err(e) = self.deleter.delete_files(&self.files) {
            warn!(error = %e, files = self.files.len(), "Cleanup during unwind failed");
        }
    }
}
