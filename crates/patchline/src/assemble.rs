//! Cumulative patch assembly.
//!
//! A run moves through `resolving -> directory_allocated -> files_copied ->
//! scripts_generated -> manifest_written -> persisted`. Once the output
//! directory exists it is owned by a [`DirectoryGuard`]; any failure,
//! cancellation or panic before the patch record is committed removes it
//! again, so the directory and the record exist together or not at all.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use patchline_category::{is_excluded_from_patch, target_path};
use patchline_store::Catalog;
use patchline_types::{
    AssemblyStage, Category, EventType, KnownSubCategory, PatchId, PatchRecord, ReleaseFile,
    ReleaseLine, SubCategory, Version,
};

use crate::error::{AssemblyError, CopyFailure, RangeError};
use crate::manifest::{MANIFEST_FILE, Manifest, ManifestVersion, render_manifest};
use crate::range;
use crate::reporter::Reporter;
use crate::script::{ScriptPlan, ScriptVersion, write_script};
use crate::session::Session;

/// What to assemble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub release_line: ReleaseLine,
    /// Customer code; required for CUSTOM ranges.
    pub customer: Option<String>,
    pub from: String,
    pub to: String,
    /// Output directory name; defaults to `{yyyyMMddHHmm}_{from}_{to}`.
    pub patch_name: Option<String>,
    pub comment: Option<String>,
    pub assignee_id: Option<String>,
}

impl PatchRequest {
    pub fn standard(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            release_line: ReleaseLine::Standard,
            customer: None,
            from: from.into(),
            to: to.into(),
            patch_name: None,
            comment: None,
            assignee_id: None,
        }
    }

    pub fn custom(
        customer: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            release_line: ReleaseLine::Custom,
            customer: Some(customer.into()),
            ..Self::standard(from, to)
        }
    }
}

/// Shared cancellation switch for a running assembly.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    /// Directory patch directories are created in.
    pub output_dir: PathBuf,
    /// Sub-category whose script always exists and records version history.
    pub bookkeeping_sub_category: SubCategory,
    pub history_table: String,
    pub copy_workers: usize,
    pub timeout: Option<Duration>,
    pub cancel: CancelFlag,
}

impl AssemblyOptions {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            bookkeeping_sub_category: SubCategory::Known(KnownSubCategory::MariaDb),
            history_table: "release_history".to_string(),
            copy_workers: 4,
            timeout: None,
            cancel: CancelFlag::new(),
        }
    }
}

/// A file placed into the patch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub version: String,
    pub storage_path: String,
    /// Path relative to the patch directory.
    pub target: String,
    pub size: u64,
}

/// A registered file whose stored bytes were gone at assembly time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub version: String,
    pub storage_path: String,
}

/// Result of one successful assembly.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub record: PatchRecord,
    pub patch_dir: PathBuf,
    /// Versions of the range, ascending.
    pub versions: Vec<String>,
    pub copied: Vec<CopiedFile>,
    pub missing: Vec<MissingFile>,
    pub scripts: Vec<PathBuf>,
    pub manifest: PathBuf,
}

/// Owns a freshly allocated patch directory until the run commits.
///
/// Dropping an armed guard removes what the run wrote.
#[derive(Debug)]
pub struct DirectoryGuard {
    path: PathBuf,
    /// The directory existed (empty) before the run; only its contents go.
    pre_existing: bool,
    armed: bool,
}

impl DirectoryGuard {
    /// Create `path`, accepting an existing empty directory.
    pub fn allocate(path: PathBuf) -> Result<Self, AssemblyError> {
        let io_err = |path: &Path, source: io::Error| AssemblyError::Io {
            stage: AssemblyStage::DirectoryAllocated,
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        match fs::create_dir(&path) {
            Ok(()) => Ok(Self {
                path,
                pre_existing: false,
                armed: true,
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let empty = path.is_dir()
                    && fs::read_dir(&path)
                        .map_err(|e| io_err(&path, e))?
                        .next()
                        .is_none();
                if !empty {
                    return Err(AssemblyError::DirectoryCollision { path });
                }
                Ok(Self {
                    path,
                    pre_existing: true,
                    armed: true,
                })
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory; the run committed.
    pub fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Remove what the run wrote, reporting whether that worked.
    pub fn rollback(mut self) -> io::Result<()> {
        self.armed = false;
        self.clean()
    }

    fn clean(&self) -> io::Result<()> {
        if !self.pre_existing {
            return match fs::remove_dir_all(&self.path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            };
        }
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl Drop for DirectoryGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.clean()
        {
            eprintln!(
                "[warn] failed to remove patch directory {}: {e}",
                self.path.display()
            );
        }
    }
}

/// Default output name: `{yyyyMMddHHmm}_{from}_{to}`.
pub fn default_patch_name(from: &str, to: &str) -> String {
    format!("{}_{}_{}", Utc::now().format("%Y%m%d%H%M"), from.trim(), to.trim())
}

fn check_patch_name(name: &str) -> Result<(), AssemblyError> {
    let valid = !name.trim().is_empty()
        && name == name.trim()
        && !name.contains(['/', '\\'])
        && name != "."
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(AssemblyError::InvalidPatchName(name.to_string()))
    }
}

struct Deadline {
    cancel: CancelFlag,
    at: Option<Instant>,
}

impl Deadline {
    fn check(&self, stage: AssemblyStage) -> Result<(), AssemblyError> {
        if self.cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled { stage });
        }
        if self.at.is_some_and(|at| Instant::now() >= at) {
            return Err(AssemblyError::TimedOut { stage });
        }
        Ok(())
    }
}

struct CopyJob<'c> {
    version: &'c Version,
    file: &'c ReleaseFile,
    target: String,
}

enum CopyResult {
    Copied(u64),
    Missing,
    Failed(String),
}

/// Non-excluded files of the range keyed by target path; a later version
/// replaces an earlier one at the same target.
fn plan_copies<'c>(
    catalog: &'c Catalog,
    versions: &[&'c Version],
    reporter: &mut dyn Reporter,
) -> Vec<CopyJob<'c>> {
    let mut jobs: Vec<CopyJob<'c>> = Vec::new();
    let mut by_target: HashMap<String, usize> = HashMap::new();
    for &version in versions {
        for file in catalog.files_of(version.id) {
            if is_excluded_from_patch(file.category) {
                continue;
            }
            let target = target_path(
                file.category,
                file.sub_category.as_ref(),
                &version.parts,
                &file.file_name,
            );
            let job = CopyJob {
                version,
                file,
                target: target.clone(),
            };
            match by_target.get(&target) {
                Some(&i) => {
                    reporter.warn(&format!(
                        "{target} from {} replaces the copy from {}",
                        version.full_version, jobs[i].version.full_version
                    ));
                    jobs[i] = job;
                }
                None => {
                    by_target.insert(target, jobs.len());
                    jobs.push(job);
                }
            }
        }
    }
    jobs
}

/// Top-level directories of the copied targets.
fn layout_of(copied: &[CopiedFile]) -> Vec<String> {
    copied
        .iter()
        .filter_map(|c| c.target.split('/').next())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Per-version file lists for each script: the bookkeeping sub-category
/// always, every other DATABASE sub-category only when it has files in the
/// range.
fn plan_scripts(
    versions: &[&Version],
    copied_files: &[(&Version, &ReleaseFile)],
    bookkeeping: &SubCategory,
) -> BTreeMap<SubCategory, Vec<ScriptVersion>> {
    let empty_versions = || -> Vec<ScriptVersion> {
        versions
            .iter()
            .map(|v| ScriptVersion {
                version: v.full_version.clone(),
                files: Vec::new(),
            })
            .collect()
    };
    let mut by_sub = BTreeMap::new();
    by_sub.insert(bookkeeping.clone(), empty_versions());

    for (version, file) in copied_files {
        let Some(sub) = file.sub_category.as_ref() else {
            continue;
        };
        if file.category != Category::Database {
            continue;
        }
        let entries = by_sub.entry(sub.clone()).or_insert_with(|| empty_versions());
        if let Some(entry) = entries.iter_mut().find(|e| e.version == version.full_version) {
            entry.files.push(file.file_name.clone());
        }
    }
    by_sub
}

/// A failed run, with the outcome of its rollback when a directory existed.
struct Failure {
    error: AssemblyError,
    rolled_back: Option<(PathBuf, bool)>,
}

impl From<AssemblyError> for Failure {
    fn from(error: AssemblyError) -> Self {
        Self {
            error,
            rolled_back: None,
        }
    }
}

impl From<RangeError> for Failure {
    fn from(error: RangeError) -> Self {
        AssemblyError::from(error).into()
    }
}

/// Remove the run's directory; a rollback problem is reported, never
/// returned in place of `error`.
fn roll_back(guard: DirectoryGuard, error: AssemblyError, reporter: &mut dyn Reporter) -> Failure {
    let path = guard.path().to_path_buf();
    let clean = match guard.rollback() {
        Ok(()) => true,
        Err(e) => {
            reporter.warn(&format!(
                "rollback could not remove {}: {e}",
                path.display()
            ));
            false
        }
    };
    Failure {
        error,
        rolled_back: Some((path, clean)),
    }
}

impl Session<'_> {
    /// Assemble a cumulative patch for `request` under `options.output_dir`.
    pub fn assemble_patch(
        &mut self,
        request: &PatchRequest,
        options: &AssemblyOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<PatchOutcome, AssemblyError> {
        let deadline = Deadline {
            cancel: options.cancel.clone(),
            at: options.timeout.map(|t| Instant::now() + t),
        };
        let patch_name = request
            .patch_name
            .clone()
            .unwrap_or_else(|| default_patch_name(&request.from, &request.to));

        self.emit(
            patch_name.clone(),
            EventType::AssemblyStarted {
                from: request.from.clone(),
                to: request.to.clone(),
            },
        );
        reporter.info(&format!(
            "assembling {patch_name} ({} -> {})",
            request.from, request.to
        ));

        match self.run_assembly(request, options, &patch_name, &deadline, reporter) {
            Ok(outcome) => Ok(outcome),
            Err(Failure { error, rolled_back }) => {
                reporter.error(&format!("assembly of {patch_name} failed: {error}"));
                self.emit(
                    patch_name.clone(),
                    EventType::AssemblyFailed {
                        stage: error.stage(),
                        message: error.to_string(),
                    },
                );
                if let Some((path, clean)) = rolled_back {
                    self.emit(patch_name, EventType::RolledBack { path, clean });
                }
                Err(error)
            }
        }
    }

    fn run_assembly(
        &mut self,
        request: &PatchRequest,
        options: &AssemblyOptions,
        patch_name: &str,
        deadline: &Deadline,
        reporter: &mut dyn Reporter,
    ) -> Result<PatchOutcome, Failure> {
        let catalog = self.snapshot().map_err(AssemblyError::Store)?;
        let customer_id = match request.customer.as_deref() {
            Some(code) => Some(
                catalog
                    .customer_by_code(code.trim())
                    .map(|c| c.id)
                    .ok_or_else(|| RangeError::UnknownCustomer(code.trim().to_string()))?,
            ),
            None => None,
        };
        let versions = range::resolve(
            &catalog,
            request.release_line,
            customer_id,
            &request.from,
            &request.to,
        )?;
        let version_names: Vec<String> = versions.iter().map(|v| v.full_version.clone()).collect();
        self.emit(
            patch_name,
            EventType::RangeResolved {
                versions: version_names.clone(),
            },
        );

        deadline.check(AssemblyStage::DirectoryAllocated)?;
        check_patch_name(patch_name)?;
        let guard = DirectoryGuard::allocate(options.output_dir.join(patch_name))?;
        self.stage_completed(patch_name, AssemblyStage::DirectoryAllocated);

        let staged = self.fill_directory(
            &catalog,
            &versions,
            request,
            options,
            patch_name,
            guard.path(),
            deadline,
            reporter,
        );
        let built = match staged {
            Ok(built) => built,
            Err(err) => return Err(roll_back(guard, err, reporter)),
        };

        let record = match self.persist(&catalog, request, customer_id, patch_name, guard.path()) {
            Ok(record) => record,
            Err(err) => return Err(roll_back(guard, err, reporter)),
        };
        let patch_dir = guard.disarm();
        self.emit(
            patch_name,
            EventType::PatchPersisted {
                patch_id: record.id,
            },
        );
        self.stage_completed(patch_name, AssemblyStage::Persisted);
        reporter.info(&format!(
            "patch {patch_name} written to {} ({} file(s), {} missing)",
            patch_dir.display(),
            built.copied.len(),
            built.missing.len()
        ));

        Ok(PatchOutcome {
            record,
            manifest: patch_dir.join(MANIFEST_FILE),
            patch_dir,
            versions: version_names,
            copied: built.copied,
            missing: built.missing,
            scripts: built.scripts,
        })
    }

    fn stage_completed(&mut self, patch_name: &str, stage: AssemblyStage) {
        self.emit(patch_name, EventType::StageCompleted { stage });
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_directory(
        &mut self,
        catalog: &Catalog,
        versions: &[&Version],
        request: &PatchRequest,
        options: &AssemblyOptions,
        patch_name: &str,
        dir: &Path,
        deadline: &Deadline,
        reporter: &mut dyn Reporter,
    ) -> Result<Built, AssemblyError> {
        deadline.check(AssemblyStage::FilesCopied)?;
        let jobs = plan_copies(catalog, versions, reporter);
        let results = self.copy_files(&jobs, dir, options.copy_workers, deadline)?;

        let mut copied = Vec::new();
        let mut copied_files = Vec::new();
        let mut missing = Vec::new();
        let mut failures = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            match result {
                CopyResult::Copied(size) => {
                    copied.push(CopiedFile {
                        version: job.version.full_version.clone(),
                        storage_path: job.file.storage_path.clone(),
                        target: job.target.clone(),
                        size,
                    });
                    copied_files.push((job.version, job.file));
                }
                CopyResult::Missing => {
                    reporter.warn(&format!(
                        "source file missing for {}: {}",
                        job.version.full_version, job.file.storage_path
                    ));
                    self.emit(
                        patch_name,
                        EventType::SourceFileMissing {
                            version: job.version.full_version.clone(),
                            storage_path: job.file.storage_path.clone(),
                        },
                    );
                    missing.push(MissingFile {
                        version: job.version.full_version.clone(),
                        storage_path: job.file.storage_path.clone(),
                    });
                }
                CopyResult::Failed(message) => failures.push(CopyFailure {
                    storage_path: job.file.storage_path.clone(),
                    message,
                }),
            }
        }
        if !failures.is_empty() {
            return Err(AssemblyError::CopyFailed { failures });
        }
        self.stage_completed(patch_name, AssemblyStage::FilesCopied);

        deadline.check(AssemblyStage::ScriptsGenerated)?;
        let from = request.from.trim();
        let to = request.to.trim();
        let mut scripts = Vec::new();
        let script_versions =
            plan_scripts(versions, &copied_files, &options.bookkeeping_sub_category);
        for (sub, script_versions) in script_versions {
            let bookkeeping = sub == options.bookkeeping_sub_category;
            let plan = ScriptPlan {
                sub_category: &sub,
                from,
                to,
                versions: script_versions,
                history_table: bookkeeping.then_some(options.history_table.as_str()),
            };
            let path = write_script(dir, &plan).map_err(|source| AssemblyError::Io {
                stage: AssemblyStage::ScriptsGenerated,
                path: dir.to_path_buf(),
                source,
            })?;
            self.emit(
                patch_name,
                EventType::ScriptGenerated {
                    sub_category: sub.to_string(),
                    path: path.clone(),
                },
            );
            scripts.push(path);
        }
        self.stage_completed(patch_name, AssemblyStage::ScriptsGenerated);

        deadline.check(AssemblyStage::ManifestWritten)?;
        let customer = request.customer.as_deref().map(str::trim);
        let manifest = Manifest {
            patch_name,
            release_line: request.release_line,
            customer,
            from,
            to,
            created_by: self.actor(),
            created_at: Utc::now(),
            comment: request.comment.as_deref(),
            versions: versions
                .iter()
                .map(|v| ManifestVersion {
                    version: v.full_version.clone(),
                    approved_by: v.approved_by().map(str::to_string),
                    file_count: copied.iter().filter(|c| c.version == v.full_version).count(),
                })
                .collect(),
            layout: layout_of(&copied),
            scripts: scripts
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
            missing: missing.iter().map(|m| m.storage_path.clone()).collect(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, render_manifest(&manifest)).map_err(|source| {
            AssemblyError::Io {
                stage: AssemblyStage::ManifestWritten,
                path: manifest_path.clone(),
                source,
            }
        })?;
        self.stage_completed(patch_name, AssemblyStage::ManifestWritten);

        deadline.check(AssemblyStage::Persisted)?;
        Ok(Built {
            copied,
            missing,
            scripts,
        })
    }

    /// Copy every job in chunks of `workers` threads, checking for
    /// cancellation between chunks.
    fn copy_files(
        &self,
        jobs: &[CopyJob<'_>],
        dir: &Path,
        workers: usize,
        deadline: &Deadline,
    ) -> Result<Vec<CopyResult>, AssemblyError> {
        let storage = self.storage();
        let mut results = Vec::with_capacity(jobs.len());
        for chunk in jobs.chunks(workers.max(1)) {
            deadline.check(AssemblyStage::FilesCopied)?;
            let chunk_results: Vec<CopyResult> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|job| {
                        let dest = dir.join(&job.target);
                        let source = job.file.storage_path.as_str();
                        scope.spawn(move || match storage.copy_to(source, &dest) {
                            Ok(size) => CopyResult::Copied(size),
                            Err(e) if e.is_not_found() => CopyResult::Missing,
                            Err(e) => CopyResult::Failed(e.to_string()),
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|_| CopyResult::Failed("copy thread panicked".to_string()))
                    })
                    .collect()
            });
            results.extend(chunk_results);
        }
        Ok(results)
    }

    fn persist(
        &self,
        catalog: &Catalog,
        request: &PatchRequest,
        customer_id: Option<patchline_types::CustomerId>,
        patch_name: &str,
        dir: &Path,
    ) -> Result<PatchRecord, AssemblyError> {
        let from = catalog
            .version_by_name(request.from.trim())
            .ok_or_else(|| RangeError::UnknownVersion(request.from.trim().to_string()))?;
        let to = catalog
            .version_by_name(request.to.trim())
            .ok_or_else(|| RangeError::UnknownVersion(request.to.trim().to_string()))?;
        let actor = self.actor().to_string();

        self.transact(|catalog| {
            for endpoint in [from, to] {
                if catalog.version(endpoint.id).is_none() {
                    return Err(patchline_store::StoreError::Rejected(format!(
                        "version {} was deleted during assembly",
                        endpoint.full_version
                    )));
                }
            }
            let id = PatchId(catalog.allocate_id());
            let record = PatchRecord {
                id,
                release_line: request.release_line,
                customer_id,
                from_version: from.full_version.clone(),
                to_version: to.full_version.clone(),
                from_version_id: from.id,
                to_version_id: to.id,
                patch_name: patch_name.to_string(),
                output_path: dir.to_path_buf(),
                created_by: actor.clone(),
                comment: request.comment.clone(),
                assignee_id: request.assignee_id.clone(),
                created_at: Utc::now(),
            };
            catalog.patches.insert(id, record.clone());
            Ok(record)
        })
        .map_err(AssemblyError::PersistFailure)
    }
}

struct Built {
    copied: Vec<CopiedFile>,
    missing: Vec<MissingFile>,
    scripts: Vec<PathBuf>,
}
