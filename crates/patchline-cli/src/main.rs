use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use patchline::assemble::{AssemblyOptions, PatchOutcome, PatchRequest};
use patchline::catalog::{self, version_tree};
use patchline::category::category_of;
use patchline::events::events_path;
use patchline::files::scan_upload_dir;
use patchline::hotfix::{hotfix_files, hotfixes_of};
use patchline::lineage::lineage_of;
use patchline::patches::{PatchFilter, list_patches};
use patchline::reporter::Reporter;
use patchline::storage::FileStorage;
use patchline::store::{Catalog, JsonFileStore};
use patchline::types::{LineScope, PatchId, ReleaseLine, Version};
use patchline::Session;
use patchline_config::{CliOverrides, PatchlineConfig, Settings, config_path, default_user};
use patchline_lock::WorkspaceLock;

#[derive(Parser, Debug)]
#[command(name = "patchline", version)]
#[command(about = "Version lineage and cumulative patch assembly for release catalogs")]
struct Cli {
    /// Workspace root (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Config file (default: <root>/.patchline.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name recorded as creator and approver (default: $PATCHLINE_USER, then $USER)
    #[arg(long)]
    user: Option<String>,

    /// Directory holding uploaded release files
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Directory patches are assembled in
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory for the catalog, event log and lock file
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Treat workspace locks older than this as stale (e.g. 30m)
    #[arg(long)]
    lock_timeout: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default .patchline.toml into the workspace root.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Manage customers and their base versions.
    #[command(subcommand)]
    Customer(CustomerCommand),
    /// Create, approve and inspect versions.
    #[command(subcommand)]
    Version(VersionCommand),
    /// Register release files.
    #[command(subcommand)]
    File(FileCommand),
    /// Create and inspect hotfixes.
    #[command(subcommand)]
    Hotfix(HotfixCommand),
    /// Print the ancestors of a version, nearest first.
    Lineage { version: String },
    /// Build, list and delete cumulative patches.
    #[command(subcommand)]
    Patch(PatchCommand),
}

#[derive(Subcommand, Debug)]
enum CustomerCommand {
    /// Register a customer.
    Add { code: String, name: String },
    /// Anchor a customer's custom line to a STANDARD version.
    Rebase { code: String, version: String },
    /// List customers.
    List,
}

#[derive(Subcommand, Debug)]
enum VersionCommand {
    /// Create `M.m.p`, or `{base}-{code}.M.m.p` with --customer.
    Create {
        version: String,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Approve a version as the current user.
    Approve { version: String },
    /// Replace (or clear, when omitted) a version's comment.
    Comment {
        version: String,
        comment: Option<String>,
    },
    /// Delete a version with its files and lineage.
    Delete { version: String },
    /// List versions of a line in order.
    List {
        #[arg(long)]
        customer: Option<String>,
    },
    /// Show versions grouped by M.m.x with hotfixes nested.
    Tree {
        #[arg(long)]
        customer: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum FileCommand {
    /// Register one file.
    Add {
        version: String,
        /// database, web, engine or install
        category: String,
        path: PathBuf,
        #[arg(long)]
        sub: Option<String>,
        /// Name to register under (default: the file's name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Register every file of an extracted upload directory.
    Import { version: String, dir: PathBuf },
}

#[derive(Subcommand, Debug)]
enum HotfixCommand {
    /// Create the next hotfix of a version.
    Create {
        parent: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List the hotfixes of a version.
    List { parent: String },
    /// List the files of one hotfix.
    Files { hotfix: String },
}

#[derive(Subcommand, Debug)]
enum PatchCommand {
    /// Assemble every approved version after FROM up to and including TO.
    Build {
        from: String,
        to: String,
        #[arg(long)]
        customer: Option<String>,
        /// Output directory name (default: {yyyyMMddHHmm}_{from}_{to})
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        /// Copy worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Abort the run after this long (e.g. 10m)
        #[arg(long)]
        timeout: Option<String>,
    },
    /// List patch records.
    List {
        #[arg(long)]
        customer: Option<String>,
        /// Only patches with this version as an endpoint
        #[arg(long)]
        version: Option<String>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a patch directory and its record.
    Delete { id: u64 },
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("failed to determine current directory")?,
    };

    if let Commands::Init { force } = cli.cmd {
        return run_init(&root, force);
    }

    let config = match &cli.config {
        Some(path) => PatchlineConfig::load_from_file(path)?,
        None => PatchlineConfig::load_from_workspace(&root)?.unwrap_or_default(),
    };
    config.validate()?;

    let lock_timeout = cli.lock_timeout.as_deref().map(parse_duration).transpose()?;
    let patch_overrides = match &cli.cmd {
        Commands::Patch(PatchCommand::Build {
            workers, timeout, ..
        }) => (*workers, timeout.as_deref().map(parse_duration).transpose()?),
        _ => (None, None),
    };
    let settings = config.build_settings(
        &root,
        CliOverrides {
            storage_dir: cli.storage_dir.clone(),
            output_dir: cli.output_dir.clone(),
            state_dir: cli.state_dir.clone(),
            copy_workers: patch_overrides.0,
            patch_timeout: patch_overrides.1,
            lock_timeout,
        },
    )?;

    let user = cli.user.clone().unwrap_or_else(default_user);
    let store = JsonFileStore::new(settings.state_dir.clone());
    let storage = FileStorage::new(settings.storage_dir.clone());
    let mut session = Session::new(&store, &storage, user);
    let mut reporter = CliReporter;

    let _lock = match mutation_name(&cli.cmd) {
        Some(operation) => Some(WorkspaceLock::acquire_with_timeout(
            &settings.state_dir,
            operation,
            settings.lock_timeout,
        )?),
        None => None,
    };

    let result = run_command(cli.cmd, &settings, &mut session, &mut reporter);

    let mut events = session.take_events();
    if !events.is_empty() {
        let path = events_path(&settings.state_dir);
        if let Err(e) = events.flush_to_file(&path) {
            reporter.warn(&format!("failed to write event log: {e:#}"));
        }
    }
    result
}

/// Lock operation name for commands that change the catalog.
fn mutation_name(cmd: &Commands) -> Option<&'static str> {
    match cmd {
        Commands::Customer(CustomerCommand::List)
        | Commands::Version(VersionCommand::List { .. } | VersionCommand::Tree { .. })
        | Commands::Hotfix(HotfixCommand::List { .. } | HotfixCommand::Files { .. })
        | Commands::Lineage { .. }
        | Commands::Patch(PatchCommand::List { .. })
        | Commands::Init { .. } => None,
        Commands::Customer(_) => Some("customer"),
        Commands::Version(_) => Some("version"),
        Commands::File(_) => Some("file"),
        Commands::Hotfix(_) => Some("hotfix"),
        Commands::Patch(_) => Some("patch"),
    }
}

fn run_init(root: &Path, force: bool) -> Result<()> {
    let path = config_path(root);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    fs::write(&path, PatchlineConfig::default_toml_template())
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn run_command(
    cmd: Commands,
    settings: &Settings,
    session: &mut Session<'_>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    match cmd {
        Commands::Init { .. } => Ok(()),
        Commands::Customer(cmd) => run_customer(cmd, session),
        Commands::Version(cmd) => run_version(cmd, session, reporter),
        Commands::File(cmd) => run_file(cmd, session, reporter),
        Commands::Hotfix(cmd) => run_hotfix(cmd, session),
        Commands::Lineage { version } => {
            let catalog = session.snapshot()?;
            let target = find_version(&catalog, &version)?;
            println!("{}", target.full_version);
            for (ancestor, distance) in lineage_of(&catalog, target.id) {
                println!("  {distance:>3}  {}", ancestor.full_version);
            }
            Ok(())
        }
        Commands::Patch(cmd) => run_patch(cmd, settings, session, reporter),
    }
}

fn run_customer(cmd: CustomerCommand, session: &mut Session<'_>) -> Result<()> {
    match cmd {
        CustomerCommand::Add { code, name } => {
            let customer = session.create_customer(&code, &name)?;
            println!("customer {} ({})", customer.code, customer.name);
        }
        CustomerCommand::Rebase { code, version } => {
            let customer = session.set_customer_base(&code, &version)?;
            println!("customer {} now based on {}", customer.code, version.trim());
        }
        CustomerCommand::List => {
            let catalog = session.snapshot()?;
            for customer in catalog.customers.values() {
                let base = customer
                    .base_version_id
                    .and_then(|id| catalog.version(id))
                    .map_or("-", |v| v.full_version.as_str());
                println!("{}  {}  base={base}", customer.code, customer.name);
            }
        }
    }
    Ok(())
}

fn scope_for(catalog: &Catalog, customer: Option<&str>) -> Result<LineScope> {
    Ok(match catalog::customer_id(catalog, customer)? {
        Some(id) => LineScope::custom(id),
        None => LineScope::standard(),
    })
}

fn find_version<'c>(catalog: &'c Catalog, name: &str) -> Result<&'c Version> {
    catalog
        .version_by_name(name.trim())
        .with_context(|| format!("unknown version `{}`", name.trim()))
}

fn status(version: &Version) -> String {
    match version.approved_by() {
        Some(by) => format!("approved by {by}"),
        None => "unapproved".to_string(),
    }
}

fn run_version(
    cmd: VersionCommand,
    session: &mut Session<'_>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    match cmd {
        VersionCommand::Create {
            version,
            customer,
            comment,
        } => {
            let created = match customer {
                Some(code) => session.create_custom_version(&code, &version, comment)?,
                None => session.create_standard_version(&version, comment)?,
            };
            println!("created {}", created.full_version);
        }
        VersionCommand::Approve { version } => {
            let approved = session.approve_version(&version)?;
            println!("approved {} ({})", approved.full_version, status(&approved));
        }
        VersionCommand::Comment { version, comment } => {
            let updated = session.update_comment(&version, comment)?;
            println!(
                "{}: {}",
                updated.full_version,
                updated.comment.as_deref().unwrap_or("(no comment)")
            );
        }
        VersionCommand::Delete { version } => {
            let removed = session.delete_version(&version, reporter)?;
            println!("deleted {}", removed.full_version);
        }
        VersionCommand::List { customer } => {
            let catalog = session.snapshot()?;
            let scope = scope_for(&catalog, customer.as_deref())?;
            for version in catalog::list_versions(&catalog, scope) {
                let files = catalog.files_of(version.id).len();
                println!("{}  {}  files={files}", version.full_version, status(version));
            }
        }
        VersionCommand::Tree { customer } => {
            let catalog = session.snapshot()?;
            let scope = scope_for(&catalog, customer.as_deref())?;
            for group in version_tree(&catalog, scope) {
                println!("{}", group.key);
                for node in group.versions {
                    println!("  {} [{}]", node.version.full_version, status(node.version));
                    for hotfix in node.hotfixes {
                        println!("    {} [{}]", hotfix.full_version, status(hotfix));
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_file(cmd: FileCommand, session: &mut Session<'_>, reporter: &mut dyn Reporter) -> Result<()> {
    match cmd {
        FileCommand::Add {
            version,
            category,
            path,
            sub,
            name,
        } => {
            let category = category_of(&category).with_context(|| {
                format!("unknown category `{category}` (expected database, web, engine or install)")
            })?;
            let file_name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("{} has no file name", path.display()))?,
            };
            let bytes =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let file = session.add_file(&version, category, sub.as_deref(), &file_name, &bytes)?;
            println!(
                "{} {} #{} ({} bytes)",
                file.category,
                file.storage_path,
                file.execution_order,
                file.size
            );
        }
        FileCommand::Import { version, dir } => {
            let entries = scan_upload_dir(&dir)?;
            let files = session.import_entries(&version, entries, reporter)?;
            for file in files {
                println!("{} #{}", file.storage_path, file.execution_order);
            }
        }
    }
    Ok(())
}

fn run_hotfix(cmd: HotfixCommand, session: &mut Session<'_>) -> Result<()> {
    match cmd {
        HotfixCommand::Create { parent, comment } => {
            let hotfix = session.create_hotfix(&parent, comment)?;
            println!("created {}", hotfix.full_version);
        }
        HotfixCommand::List { parent } => {
            let catalog = session.snapshot()?;
            let parent = find_version(&catalog, &parent)?;
            for hotfix in hotfixes_of(&catalog, parent.id) {
                println!("{}  {}", hotfix.full_version, status(hotfix));
            }
        }
        HotfixCommand::Files { hotfix } => {
            let catalog = session.snapshot()?;
            for file in hotfix_files(&catalog, &hotfix)? {
                println!("{} #{}", file.storage_path, file.execution_order);
            }
        }
    }
    Ok(())
}

fn run_patch(
    cmd: PatchCommand,
    settings: &Settings,
    session: &mut Session<'_>,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    match cmd {
        PatchCommand::Build {
            from,
            to,
            customer,
            name,
            comment,
            assignee,
            ..
        } => {
            let request = PatchRequest {
                release_line: if customer.is_some() {
                    ReleaseLine::Custom
                } else {
                    ReleaseLine::Standard
                },
                customer,
                from,
                to,
                patch_name: name,
                comment,
                assignee_id: assignee,
            };
            let mut options = AssemblyOptions::new(settings.output_dir.clone());
            options.bookkeeping_sub_category = settings.bookkeeping_sub_category.clone();
            options.history_table = settings.history_table.clone();
            options.copy_workers = settings.copy_workers;
            options.timeout = Some(settings.patch_timeout);

            let outcome = session.assemble_patch(&request, &options, reporter)?;
            print_outcome(&outcome);
        }
        PatchCommand::List {
            customer,
            version,
            json,
        } => {
            let catalog = session.snapshot()?;
            let filter = PatchFilter {
                release_line: customer.as_ref().map(|_| ReleaseLine::Custom),
                customer_id: catalog::customer_id(&catalog, customer.as_deref())?,
                version,
            };
            let records = list_patches(&catalog, &filter);
            if json {
                let out = serde_json::to_string_pretty(&records)
                    .context("failed to serialize patch records")?;
                println!("{out}");
            } else {
                for record in records {
                    println!(
                        "{:>4}  {}  {} -> {}  {}",
                        record.id,
                        record.patch_name,
                        record.from_version,
                        record.to_version,
                        record.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        PatchCommand::Delete { id } => {
            let record = session.delete_patch(PatchId(id), reporter)?;
            println!("deleted patch {} ({})", record.id, record.patch_name);
        }
    }
    Ok(())
}

fn print_outcome(outcome: &PatchOutcome) {
    println!("patch: {}", outcome.record.patch_name);
    println!("path: {}", outcome.patch_dir.display());
    println!("record: {}", outcome.record.id);
    println!("versions: {}", outcome.versions.join(", "));
    println!("copied: {}", outcome.copied.len());
    println!("missing: {}", outcome.missing.len());
    let scripts: Vec<String> = outcome
        .scripts
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    println!("scripts: {}", scripts.join(", "));
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}
