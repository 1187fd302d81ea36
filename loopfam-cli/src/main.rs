use clap::{Parser, Subcommand};
use loopfam_core::{
    consolidate, Denominator, DenominatorSet, MomentumLine, RuleStore,
};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo => run_demo(),
        Command::Consolidate { input } => run_consolidate(input),
        Command::Masters { store } => run_masters(store),
        Command::Merge {
            name,
            output,
            stores,
        } => run_merge(name, output, stores),
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "loopfam",
    about = "Integral-family consolidation and reduction-rule cache"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consolidate a small built-in example and print the families
    Demo,

    /// Consolidate denominator sets read from a JSON file
    Consolidate {
        /// JSON file: a list of denominator sets
        #[arg(long)]
        input: PathBuf,
    },

    /// Show the rules and masters of a saved rule store
    Masters {
        /// Path to a saved store
        #[arg(long)]
        store: PathBuf,
    },

    /// Fold a chain of saved stores into one, rewriting through the chain
    Merge {
        /// Name of the merged store
        #[arg(long, default_value = "merged")]
        name: String,

        /// Output path for the merged store
        #[arg(long)]
        output: PathBuf,

        /// Saved stores, earliest stage first
        #[arg(num_args = 1..)]
        stores: Vec<PathBuf>,
    },
}

fn run_demo() {
    // The six-set covering example: two families emerge, the first three
    // inputs and the singleton {2} land in {1,2,3}, the rest in {1,3,4}.
    let labeled = |labels: &[u32]| {
        DenominatorSet::normalize(
            labels
                .iter()
                .map(|l| Denominator::massless(MomentumLine::symbol(&format!("d{}", l)))),
        )
    };
    let sets = vec![
        labeled(&[3]),
        labeled(&[1, 2, 3]),
        labeled(&[2, 3, 1]),
        labeled(&[2]),
        labeled(&[1, 4, 3]),
        labeled(&[4]),
    ];
    let cons = consolidate(&sets);
    print_consolidation(&sets, &cons);
}

fn run_consolidate(input: PathBuf) {
    let text = match std::fs::read_to_string(&input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("cannot read {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };
    let raw: Vec<Vec<Denominator>> = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("malformed input {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };
    let sets: Vec<DenominatorSet> = raw.into_iter().map(DenominatorSet::normalize).collect();
    let cons = consolidate(&sets);
    print_consolidation(&sets, &cons);
}

fn print_consolidation(sets: &[DenominatorSet], cons: &loopfam_core::Consolidation) {
    println!(
        "{} input sets -> {} families",
        sets.len(),
        cons.family_count()
    );
    for (fid, rep) in cons.representatives.iter().enumerate() {
        println!("  family {}) {}", fid + 1, rep);
    }
    println!("Family index (1-based):");
    for (i, fid) in cons.family_index.iter().enumerate() {
        println!("  set {:>3}) {} -> family {}", i + 1, sets[i], fid + 1);
    }
}

fn run_masters(store_path: PathBuf) {
    let store = match RuleStore::load_from(&store_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot load store {}: {}", store_path.display(), e);
            std::process::exit(1);
        }
    };
    println!("store `{}`: {} rules", store.name(), store.len());
    for (key, value) in store.rules() {
        println!("  {} -> {}", key, value);
    }
    match store.masters_used() {
        Ok(used) => {
            println!("masters used ({}):", used.len());
            for key in &used {
                println!("  {}", key);
            }
        }
        Err(e) => {
            eprintln!("store is inconsistent: {}", e);
            std::process::exit(1);
        }
    }
    if let Err(e) = store.verify_masters() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_merge(name: String, output: PathBuf, store_paths: Vec<PathBuf>) {
    if store_paths.is_empty() {
        eprintln!("merge needs at least one store");
        std::process::exit(1);
    }
    let mut stores = Vec::new();
    for path in &store_paths {
        match RuleStore::load_from(path) {
            Ok(s) => stores.push(s),
            Err(e) => {
                eprintln!("cannot load store {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }
    let refs: Vec<&RuleStore> = stores.iter().collect();
    let merged = match RuleStore::merge(&name, &refs) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("merge failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = merged.save(&output) {
        eprintln!("cannot save {}: {}", output.display(), e);
        std::process::exit(1);
    }
    println!(
        "merged {} stores into `{}` ({} rules, {} masters) -> {}",
        stores.len(),
        merged.name(),
        merged.len(),
        merged.masters().count(),
        output.display()
    );
}
