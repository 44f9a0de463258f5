use std::{
    io::{self, IsTerminal as _},
    path::PathBuf,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use revtree::{Database, HashKind, NodeReadTrx, NodeType, Options, ReadTransaction, Revisioning};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Inspect and create revtree databases.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty database.
    Create {
        #[arg(value_name = "DIR")]
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = RevisioningArg::Incremental)]
        revisioning: RevisioningArg,
        /// Every this many versions of a node page is a full dump.
        #[arg(long, default_value_t = 4)]
        milestone: u32,
        #[arg(long, value_enum, default_value_t = HashKindArg::Rolling)]
        hash_kind: HashKindArg,
    },
    /// Print the settings, the newest revision and the beacons of a database.
    Info {
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
    /// List every committed revision.
    History {
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
    /// Print the tree of a revision.
    Dump {
        #[arg(value_name = "DIR")]
        path: PathBuf,
        /// Defaults to the newest revision.
        #[arg(short, long)]
        revision: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RevisioningArg {
    FullDump,
    Differential,
    Incremental,
    SlidingSnapshot,
}

impl From<RevisioningArg> for Revisioning {
    fn from(arg: RevisioningArg) -> Self {
        match arg {
            RevisioningArg::FullDump => Revisioning::FullDump,
            RevisioningArg::Differential => Revisioning::Differential,
            RevisioningArg::Incremental => Revisioning::Incremental,
            RevisioningArg::SlidingSnapshot => Revisioning::SlidingSnapshot,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashKindArg {
    Rolling,
    Postorder,
    None,
}

impl From<HashKindArg> for HashKind {
    fn from(arg: HashKindArg) -> Self {
        match arg {
            HashKindArg::Rolling => HashKind::Rolling,
            HashKindArg::Postorder => HashKind::Postorder,
            HashKindArg::None => HashKind::None,
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .context("invalid RUST_LOG")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn open(path: PathBuf) -> anyhow::Result<Database> {
    let mut o = Options::new();
    o.path(path.clone());
    Database::open(o).with_context(|| format!("failed to open {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();

    match args.command {
        Command::Create {
            path,
            revisioning,
            milestone,
            hash_kind,
        } => {
            let mut o = Options::new();
            o.path(path.clone());
            o.revisioning(revisioning.into());
            o.milestone(milestone);
            o.hash_kind(hash_kind.into());
            Database::create(&o).with_context(|| format!("failed to create {}", path.display()))?;
            println!("created {}", path.display());
        }
        Command::Info { path } => {
            let page_file = path
                .join(revtree::store::DATA_DIR)
                .join(revtree::store::PAGE_FILE);
            let db = open(path)?;
            let settings = db.settings();
            let session = db.session()?;
            println!("path:         {}", db.path().display());
            println!("version:      {}", settings.version);
            println!("revisioning:  {:?}", settings.revisioning);
            println!("milestone:    {}", settings.milestone);
            println!("hash kind:    {:?}", settings.hash_kind);
            println!("revision:     {}", session.last_committed_revision());

            let (primary, trailing) = revtree::read_beacons(&page_file)?;
            println!(
                "beacons:      uber page at {} ({} bytes), {}",
                primary.offset,
                primary.size,
                if primary == trailing {
                    "consistent"
                } else {
                    "MISMATCH"
                }
            );
            db.close()?;
        }
        Command::History { path } => {
            let db = open(path)?;
            for info in db.revisions()? {
                println!(
                    "{:>8}  {:>15}  uber page at {}",
                    info.revision, info.timestamp, info.beacon.offset
                );
            }
            db.close()?;
        }
        Command::Dump { path, revision } => {
            let db = open(path)?;
            let session = db.session()?;
            let mut rtx = session.begin_read(revision)?;
            println!("revision {}", rtx.revision_number()?);
            dump(&mut rtx, 0)?;
            rtx.close();
            db.close()?;
        }
    }
    Ok(())
}

/// Print the subtree under the cursor. Leaves the cursor where it started.
fn dump(rtx: &mut ReadTransaction, depth: usize) -> anyhow::Result<()> {
    let node = rtx.node()?.clone();
    let indent = "  ".repeat(depth);
    match node.node_type() {
        NodeType::DocumentRoot => println!("{indent}/"),
        NodeType::Element => {
            let mut line = format!("{indent}<{}", rtx.name()?.unwrap_or_default());
            for i in 0..rtx.attribute_count()? {
                rtx.move_to_attribute(i)?;
                line.push_str(&format!(
                    " {}=\"{}\"",
                    rtx.name()?.unwrap_or_default(),
                    String::from_utf8_lossy(&rtx.value()?.unwrap_or_default())
                ));
                rtx.move_to(node.key)?;
            }
            println!("{line}> #{} hash={:x}", node.key, node.hash);
        }
        NodeType::Text => println!(
            "{indent}\"{}\" #{}",
            String::from_utf8_lossy(node.value().unwrap_or_default()),
            node.key
        ),
        _ => {}
    }

    if rtx.move_to_first_child()? {
        loop {
            dump(rtx, depth + 1)?;
            if !rtx.move_to_right_sibling()? {
                break;
            }
        }
        rtx.move_to(node.key)?;
    }
    Ok(())
}
