use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use quarry_core::{Artifact, ArtifactTree, BuildSession, KindRegistry, Project, META_DIR};
use std::path::PathBuf;

mod leaves;

/// Quarry incremental build tool.
///
/// Resolves a target name into a tree of declared dependencies, rebuilds
/// only the stale nodes and records per-artifact build state so that even
/// artifacts without an output file take part in incremental builds.
///
/// EXAMPLES:
///     quarry build sh:scripts/*.sh     Run changed shell scripts
///     quarry build touch:stamp         Touch a stamp file
///     quarry tree sh:scripts/*.sh      Show the dependency tree
///     quarry clean sh:scripts/*.sh     Forget recorded build state
#[derive(Parser)]
#[command(name = "quarry")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Project home directory; discovered by walking up from the current
    /// directory to the nearest one containing `.quarry/`
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Failure detail: repeat once for cause chains, twice to abort on the
    /// first failed build step
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a target and everything it depends on
    #[command(visible_alias = "b")]
    Build {
        /// Target name, e.g. `sh:scripts/*.sh`
        target: String,
    },

    /// Clean a target and expire its recorded build state
    Clean {
        /// Target name
        target: String,
    },

    /// Print the resolved dependency tree of a target
    Tree {
        /// Target name
        target: String,
    },
}

/// Walk up from the current directory to the nearest project home.
fn discover_home() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut dir = cwd.clone();
    loop {
        if dir.join(META_DIR).is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return cwd,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = cli.home.clone().unwrap_or_else(discover_home);

    let kinds = KindRegistry::with_builtins();
    leaves::register(&kinds);

    let (_project, registry) = Project::open(&home, kinds)?;
    registry.define_rule("touch:*", leaves::TOUCH)?;
    registry.define_rule("sh:**/*.sh", leaves::RUN_SHELL)?;

    let session = BuildSession::new(cli.verbose);
    match &cli.command {
        Commands::Build { target } => {
            registry.build_target(target, &session)?;
        }
        Commands::Clean { target } => {
            let art = registry.resolve_str(target)?;
            let result = art.borrow_mut().clean();
            result?;
        }
        Commands::Tree { target } => {
            let art = registry.resolve_str(target)?;
            let tree = ArtifactTree::resolve(&art)?;
            print!("{}", tree.render());
        }
    }
    Ok(())
}
