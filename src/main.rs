use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vpak::config::Config;
use vpak::package::{VersionMeta, VersionQuery};
use vpak::packer::{CleanReport, Packer};
use vpak::store::{create_blob_store, create_metadata_store};

/// vpak - versioned package coordinator
///
/// Manage named packages as ordered sequences of immutable versions, backed
/// by a metadata index and a blob store. Versions are referenced by id or by
/// the 'live' and 'latest' tags.
///
/// Examples:
///   vpak add prod topology ./topology.tar.gz -d "first cut"
///   vpak set-live prod topology 3
#[derive(Parser, Debug)]
#[command(author, version = env!("VPAK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store root directory (overrides defaults; also via VPAK_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "VPAK_ROOT",
        value_name = "PATH",
        global = true
    )]
    root: Option<PathBuf>,

    /// Print machine-readable JSON instead of formatted output
    #[arg(long = "raw", global = true)]
    raw: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Upload a file as a new version of a package
    Add(AddArgs),

    /// Download a version's content to a local path
    Download(DownloadArgs),

    /// Delete a version (metadata first, then its blob)
    Delete {
        role: String,
        package: String,
        version: u64,
    },

    /// List all packages under a role
    ListPackages { role: String },

    /// List all versions of a package
    ListVersions { role: String, package: String },

    /// Point the live tag at a version
    SetLive {
        role: String,
        package: String,
        version: u64,
    },

    /// Remove the live tag from a package
    UnsetLive { role: String, package: String },

    /// Show one version's metadata
    ShowVersion {
        role: String,
        package: String,
        /// Version id, 'live' or 'latest'
        version: VersionQuery,
    },

    /// Show the live version's metadata
    ShowLive { role: String, package: String },

    /// Show the latest version's metadata
    ShowLatest { role: String, package: String },

    /// Reconcile the metadata index against the blob store
    Clean {
        /// Restrict the broken-reference pass to one role
        #[arg(long)]
        role: Option<String>,

        /// Also remove records whose blob is missing (live versions are
        /// never removed)
        #[arg(long)]
        remove_broken: bool,
    },
}

#[derive(clap::Args, Debug)]
struct AddArgs {
    role: String,
    package: String,

    /// File to upload
    file: PathBuf,

    /// Human-readable description stored with the version
    #[arg(long, short = 'd', default_value = "")]
    description: String,

    /// Extra attributes stored with the version (repeatable)
    #[arg(long = "extra", short = 'x', value_name = "KEY=VALUE", value_parser = parse_key_val)]
    extra: Vec<(String, String)>,
}

#[derive(clap::Args, Debug)]
struct DownloadArgs {
    role: String,
    package: String,

    /// Version id, 'live' or 'latest'
    version: VersionQuery,

    /// Destination path for the downloaded content
    dest: PathBuf,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = Config::load(cli.root)?;
    let metastore = create_metadata_store(&config)?;
    let blobstore = create_blob_store(&config)?;
    let packer = Packer::new(metastore, blobstore);

    match cli.command {
        Commands::Add(args) => {
            let extra: BTreeMap<String, String> = args.extra.into_iter().collect();
            let uri = packer
                .add_version(&args.role, &args.package, &args.description, &extra, &args.file)
                .await?;
            println!("Uploaded package uri: {}", uri);
        }
        Commands::Download(args) => {
            packer
                .download(&args.role, &args.package, &args.version, &args.dest)
                .await?;
            println!(
                "Downloaded {}/{} {} to {}",
                args.role,
                args.package,
                args.version,
                args.dest.display()
            );
        }
        Commands::Delete {
            role,
            package,
            version,
        } => {
            packer.delete_version(&role, &package, version).await?;
            println!("Deleted {}/{} version {}", role, package, version);
        }
        Commands::ListPackages { role } => {
            let packages = packer.list_packages(&role).await?;
            print_list(&packages, cli.raw)?;
        }
        Commands::ListVersions { role, package } => {
            let versions = packer.list_versions(&role, &package).await?;
            let rendered: Vec<String> = versions.iter().map(u64::to_string).collect();
            print_list(&rendered, cli.raw)?;
        }
        Commands::SetLive {
            role,
            package,
            version,
        } => {
            packer.set_live(&role, &package, version).await?;
            println!("Set live on {}/{}/{}", role, package, version);
        }
        Commands::UnsetLive { role, package } => {
            if packer.unset_live(&role, &package).await? {
                println!("Unset live on {}/{}", role, package);
            } else {
                println!("No live version was set for {}/{}", role, package);
            }
        }
        Commands::ShowVersion {
            role,
            package,
            version,
        } => {
            let meta = packer.show_version(&role, &package, &version).await?;
            print_version(&meta, cli.raw)?;
        }
        Commands::ShowLive { role, package } => {
            let meta = packer.show_live(&role, &package).await?;
            print_version(&meta, cli.raw)?;
        }
        Commands::ShowLatest { role, package } => {
            let meta = packer.show_latest(&role, &package).await?;
            print_version(&meta, cli.raw)?;
        }
        Commands::Clean { role, remove_broken } => {
            let report = packer.clean(role.as_deref(), remove_broken).await?;
            print_clean_report(&report, cli.raw)?;
        }
    }
    Ok(())
}

fn print_list(items: &[String], raw: bool) -> Result<()> {
    if raw {
        println!("{}", serde_json::to_string(items)?);
    } else if items.is_empty() {
        println!("(none)");
    } else {
        for item in items {
            println!("{}", item);
        }
    }
    Ok(())
}

fn print_version(meta: &VersionMeta, raw: bool) -> Result<()> {
    if raw {
        println!("{}", serde_json::to_string(meta)?);
    } else {
        println!("version: {}", meta.version);
        println!("location: {}", meta.location);
        println!("description: {}", meta.description);
        for (key, value) in &meta.extra {
            println!("{}: {}", key, value);
        }
    }
    Ok(())
}

fn print_clean_report(report: &CleanReport, raw: bool) -> Result<()> {
    if raw {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!("Deleted {} orphan blob(s)", report.orphans_deleted.len());
    for (role, name, version) in &report.records_removed {
        println!("Removed broken record {}/{} version {}", role, name, version);
    }
    for broken in &report.broken_refs {
        let kept = report.records_removed.iter().all(|(role, name, version)| {
            (role, name, *version) != (&broken.role, &broken.name, broken.version)
        });
        if kept {
            eprintln!(
                "Warning: broken reference {}/{} version {} -> {}{}",
                broken.role,
                broken.name,
                broken.version,
                broken.location,
                if broken.live { " (live, kept)" } else { "" }
            );
        }
    }
    if report.is_clean() {
        println!("Stores are consistent");
    }
    Ok(())
}
