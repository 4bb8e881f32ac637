use std::time::{Duration, Instant};

use onair::{novelty::MemNovelty, store::MemStore, BTree, Config};
use onair_utils::{dump, Sha256Digest};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use structopt::StructOpt;
use tracing::{info, Level};

pub type Result<T> = anyhow::Result<T>;

type Tree = BTree<Sha256Digest, MemStore<Sha256Digest>>;

#[derive(StructOpt)]
#[structopt(about = "CLI to build and inspect in-memory onair trees")]
struct Opts {
    #[structopt(short, parse(from_occurrences = set_log_level), global = true)]
    #[allow(dead_code)] // log level will be set in [`set_log_level`]
    /// Increase verbosity
    verbosity: u64,
    #[structopt(long, default_value = "32", global = true)]
    /// Maximum number of entries per leaf and children per branch
    order: usize,
    #[structopt(long, default_value = "1", global = true)]
    /// Seed for the generated keys
    seed: u64,
    #[structopt(subcommand)]
    cmd: Command,
}

fn set_log_level(verbosity: u64) -> u64 {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    verbosity
}

#[derive(StructOpt)]
enum Command {
    /// Benchmark insertion, commit, lookup, traversal and deletion
    Bench {
        #[structopt(long)]
        /// The number of entries
        count: u64,
    },
    /// Build a tree in batches, committing after each batch, and print its structure
    Build {
        #[structopt(long)]
        /// The number of entries per batch
        count: u64,
        #[structopt(long, default_value = "1")]
        /// The number of batches
        batches: u64,
        #[structopt(long)]
        /// Delete every n-th entry after building
        delete_every: Option<u64>,
    },
    /// Build a tree and dump its structure as dot. Can be piped directly:
    /// `onair-cli graph --count 100 | dot -Tpng -o output.png`.
    /// Branches are depicted as rectangles, leafs as circles. Committed nodes are
    /// greyed out.
    Graph {
        #[structopt(long)]
        /// The number of entries
        count: u64,
        #[structopt(long)]
        /// Change a single entry after committing, to show structural sharing
        touch: bool,
    },
}

fn key(i: u64) -> Vec<u8> {
    format!("{:016x}", i).into_bytes()
}

/// keys 0..count in a random order
fn shuffled(count: u64, seed: u64) -> Vec<u64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut keys = (0..count).collect::<Vec<_>>();
    keys.shuffle(&mut rng);
    keys
}

fn build_tree(
    novelty: &MemNovelty,
    store: &MemStore<Sha256Digest>,
    config: Config,
    batches: u64,
    count: u64,
    seed: u64,
) -> Result<Tree> {
    let mut tree = BTree::create(novelty, store.clone(), config)?;
    let mut offset = 0;
    for batch in 0..batches {
        for i in shuffled(count, seed + batch) {
            tree.put(novelty, key(offset + i), (offset + i).to_string())?;
        }
        offset += count;
        tree.assert_invariants(novelty)?;
        let link = tree.store(novelty)?;
        info!("batch {} committed as {}", batch, link);
    }
    Ok(tree)
}

fn seconds(d: Duration) -> f64 {
    (d.as_micros() as f64) / 1000000.0
}

fn main() -> Result<()> {
    let opts = Opts::from_args();
    let mut config = Config::new(opts.order);
    config.zstd_level = 1;
    config.validate()?;
    let novelty = MemNovelty::default();
    let store = MemStore::new(usize::max_value(), Sha256Digest::new);
    let mut stdout = std::io::stdout();
    match opts.cmd {
        Command::Build {
            count,
            batches,
            delete_every,
        } => {
            println!(
                "building a tree with {} batches of {} values, order {}",
                batches, count, config.order
            );
            let mut tree = build_tree(&novelty, &store, config, batches, count, opts.seed)?;
            if let Some(n) = delete_every.filter(|n| *n > 0) {
                for i in (0..count * batches).step_by(n as usize) {
                    tree.delete(&novelty, &key(i))?;
                }
                tree.assert_invariants(&novelty)?;
            }
            let link = tree.store(&novelty)?;
            tree.dump(&novelty, &mut stdout, |k, v| {
                format!(
                    "{} => {}",
                    String::from_utf8_lossy(k),
                    String::from_utf8_lossy(v)
                )
            })?;
            println!(
                "root {}, {} entries, height {}, {} blocks, {} bytes",
                link,
                tree.len(&novelty)?,
                tree.height(&novelty)?,
                store.len(),
                store.current_size()
            );
        }
        Command::Graph { count, touch } => {
            let mut tree = build_tree(&novelty, &store, config, 1, count, opts.seed)?;
            if touch && count > 0 {
                let i = rand::rngs::StdRng::seed_from_u64(opts.seed).gen_range(0..count);
                tree.put(&novelty, key(i), "touched")?;
            }
            dump::graph(&novelty, &tree, &mut stdout)?;
        }
        Command::Bench { count } => {
            let keys = shuffled(count, opts.seed);
            let mut tree = BTree::create(&novelty, store.clone(), config)?;

            let t0 = Instant::now();
            for i in &keys {
                tree.put(&novelty, key(*i), i.to_string())?;
            }
            let tinsert = t0.elapsed();
            let occupied = novelty.occupied_bytes();

            let t0 = Instant::now();
            let link = tree.store(&novelty)?;
            let tstore = t0.elapsed();

            let tree = BTree::load(store.clone(), config, link)?;
            let t0 = Instant::now();
            for i in &keys {
                anyhow::ensure!(tree.contains_key(&novelty, &key(*i))?);
            }
            let tget = t0.elapsed();

            let t0 = Instant::now();
            let n = tree.len(&novelty)?;
            let ttraverse = t0.elapsed();
            anyhow::ensure!(n as u64 == count);

            let mut tree = tree;
            let t0 = Instant::now();
            for i in keys.iter().step_by(2) {
                tree.delete(&novelty, &key(*i))?;
            }
            let tdelete = t0.elapsed();

            println!("arena bytes {}", occupied);
            println!("storage bytes {}", store.current_size());
            println!("insert {}", seconds(tinsert));
            println!("store {}", seconds(tstore));
            println!("get {}", seconds(tget));
            println!("traverse {}", seconds(ttraverse));
            println!("delete {}", seconds(tdelete));
        }
    }
    Ok(())
}
