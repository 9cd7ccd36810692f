//! tradeloop-engine CLI
//!
//! Discover barter loops in a trading pool from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Discover ranked loops for a pool file
//! tradeloop-engine discover --input pool.json
//!
//! # Only loops through one wallet, as JSON
//! tradeloop-engine discover --input pool.json --wallet alice --format json
//!
//! # List raw want-cycles
//! tradeloop-engine cycles --input pool.json --max-length 4
//!
//! # Generate a random pool for load-testing
//! tradeloop-engine generate --wallets 50 --seed 7
//! ```

use rust_decimal::Decimal;
use std::fs;
use std::process;
use std::sync::Arc;
use tradeloop_engine::api::PoolInput;
use tradeloop_engine::config::EngineConfig;
use tradeloop_engine::core::store::PreferenceStore;
use tradeloop_engine::engine::TradeLoopEngine;
use tradeloop_engine::graph::cycle_detection::{find_cycles, SearchGuard};
use tradeloop_engine::graph::want_graph::WantGraph;
use tradeloop_engine::session::result::DiscoveryQuery;
use tradeloop_engine::simulation::pool_generator::{generate_pool, PoolConfig};

fn print_usage() {
    eprintln!(
        r#"tradeloop-engine: multi-party barter loop discovery

USAGE:
    tradeloop-engine <COMMAND> [OPTIONS]

COMMANDS:
    discover    Find, balance and rank trade loops in a pool
    cycles      List want-cycles without balancing or scoring
    generate    Generate a random pool (for load-testing)
    help        Show this message

OPTIONS (discover, cycles):
    --input <FILE>       Path to JSON pool file
    --config <FILE>      TOML engine configuration
    --format <FORMAT>    Output format: text (default) or json

OPTIONS (discover):
    --wallet <ID>        Only loops involving this wallet
    --has <ITEM>         ...in which the wallet gives this item
    --wants <ITEM>       ...in which the wallet receives this item

OPTIONS (cycles):
    --max-length <N>     Longest cycle to search (default: from config)

OPTIONS (generate):
    --wallets <N>        Number of wallets (default: 20)
    --items <N>          Items owned per wallet (default: 2)
    --wanted <N>         Items wanted per wallet (default: 3)
    --seed <N>           Seed for a reproducible pool
    --output <FILE>      Write to file instead of stdout

EXAMPLES:
    tradeloop-engine discover --input pool.json
    tradeloop-engine discover --input pool.json --wallet alice --format json
    tradeloop-engine cycles --input pool.json --max-length 3
    tradeloop-engine generate --wallets 100 --wanted 4 --output pool.json"#
    );
}

/// Value following a flag, or exit.
fn flag_value(args: &[String], i: &mut usize, what: &str) -> String {
    *i += 1;
    args.get(*i).cloned().unwrap_or_else(|| {
        eprintln!("{} requires {}", args[*i - 1], what);
        process::exit(1);
    })
}

fn flag_number<T: std::str::FromStr>(args: &[String], i: &mut usize) -> T {
    let raw = flag_value(args, i, "a number");
    raw.parse().unwrap_or_else(|_| {
        eprintln!("{} requires a number, got '{}'", args[*i - 1], raw);
        process::exit(1);
    })
}

fn load_pool(path: &str) -> PoolInput {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });

    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing JSON: {}", e);
        eprintln!("Expected format:");
        eprintln!(
            r#"{{
  "items": [
    {{ "id": "mint-a", "value": 120.5, "liquidity": 0.8 }}
  ],
  "preferences": [
    {{ "walletAddress": "alice", "ownedItemOrItems": "mint-a", "wantedItemOrItems": ["mint-b"] }}
  ]
}}"#
        );
        process::exit(1);
    })
}

fn load_config(path: Option<&str>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error in config '{}': {}", path, e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    }
}

fn cmd_discover(args: &[String]) {
    let mut input_path = None;
    let mut config_path = None;
    let mut format = "text".to_string();
    let mut query = DiscoveryQuery::all();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => input_path = Some(flag_value(args, &mut i, "a file path")),
            "--config" => config_path = Some(flag_value(args, &mut i, "a file path")),
            "--format" => format = flag_value(args, &mut i, "'text' or 'json'"),
            "--wallet" => query.focus = Some(flag_value(args, &mut i, "a wallet id").into()),
            "--has" => query.has_item = Some(flag_value(args, &mut i, "an item id").into()),
            "--wants" => query.wants_item = Some(flag_value(args, &mut i, "an item id").into()),
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    let pool = load_pool(&path);
    let config = load_config(config_path.as_deref());

    let valuations = pool.valuation_table().unwrap_or_else(|e| {
        eprintln!("Invalid valuation: {}", e);
        process::exit(1);
    });
    let engine = TradeLoopEngine::new(config, Arc::new(valuations)).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        process::exit(1);
    });
    for input in pool.preferences {
        let wallet = input.wallet_address.clone();
        if let Err(e) = engine.submit_preference(input) {
            eprintln!("Rejected declaration for '{}': {}", wallet, e);
            process::exit(1);
        }
    }

    let result = engine.discover(&query).unwrap_or_else(|e| {
        eprintln!("Discovery failed: {}", e);
        process::exit(1);
    });

    if format == "json" {
        match serde_json::to_string_pretty(result.as_ref()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("=== Discovery Result ===");
    println!("Store version:  {}", result.store_version);
    println!(
        "Pool:           {} wallets, {} items",
        result.pool_state.wallet_count, result.pool_state.item_count
    );
    println!(
        "Cycles:         {} found, {} balanced, {} rejected",
        result.stats.cycles_found,
        result.stats.loops_balanced,
        result.stats.rejected()
    );
    if result.partial {
        println!("Search budget exhausted: results are partial.");
    }
    if result.loops.is_empty() {
        println!("\nNo trade loops found.");
        return;
    }
    for (n, trade) in result.loops.iter().enumerate() {
        println!(
            "\nLoop {} ({} participants, efficiency {:.2}, value {})",
            n + 1,
            trade.total_participants(),
            trade.efficiency(),
            trade.estimated_value()
        );
        for step in trade.steps() {
            let items: Vec<String> = step.items.iter().map(|i| i.to_string()).collect();
            let adjustment = match &step.value_adjustment {
                Some(adj) => format!("  [{:?} {}]", adj.direction, adj.amount),
                None => String::new(),
            };
            println!("  {} → {}: {}{}", step.from, step.to, items.join(", "), adjustment);
        }
    }
}

fn cmd_cycles(args: &[String]) {
    let mut input_path = None;
    let mut config_path = None;
    let mut format = "text".to_string();
    let mut max_length: Option<usize> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => input_path = Some(flag_value(args, &mut i, "a file path")),
            "--config" => config_path = Some(flag_value(args, &mut i, "a file path")),
            "--format" => format = flag_value(args, &mut i, "'text' or 'json'"),
            "--max-length" => max_length = Some(flag_number(args, &mut i)),
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    let pool = load_pool(&path);
    let config = load_config(config_path.as_deref());
    let max_length = max_length.unwrap_or(config.discovery.max_cycle_length);

    let valuations = pool.valuation_table().unwrap_or_else(|e| {
        eprintln!("Invalid valuation: {}", e);
        process::exit(1);
    });
    let store = PreferenceStore::new();
    for input in pool.preferences {
        let result = input
            .into_preference()
            .and_then(|preference| store.upsert_preference(preference));
        if let Err(e) = result {
            eprintln!("Rejected declaration: {}", e);
            process::exit(1);
        }
    }

    let graph = WantGraph::build(&store.snapshot(), &valuations);
    let guard = SearchGuard::new(config.discovery.search_budget());
    let search = find_cycles(&graph, max_length, &guard);

    if format == "json" {
        let cycles: Vec<Vec<String>> = search
            .cycles
            .iter()
            .map(|c| c.wallets().iter().map(|w| w.to_string()).collect())
            .collect();
        match serde_json::to_string_pretty(&cycles) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing cycles: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if search.cycles.is_empty() {
        println!("No cycles detected.");
    }
    for (n, cycle) in search.cycles.iter().enumerate() {
        let wallets: Vec<String> = cycle.wallets().iter().map(|w| w.to_string()).collect();
        let value: Decimal = graph
            .candidate_loop(cycle, config.discovery.max_items_per_step)
            .items()
            .map(|item| graph.value_of(item))
            .sum();
        println!("  Cycle {}: {} → (back to start)", n, wallets.join(" wants from "));
        println!("    Traded value: {}", value);
    }
    println!(
        "\nTotal cycles: {} ({} paths explored, {:?})",
        search.cycles.len(),
        search.explored_paths,
        search.outcome
    );
}

fn cmd_generate(args: &[String]) {
    let mut config = PoolConfig::default();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--wallets" => config.wallet_count = flag_number(args, &mut i),
            "--items" => config.items_per_wallet = flag_number(args, &mut i),
            "--wanted" => config.wants_per_wallet = flag_number(args, &mut i),
            "--seed" => config.seed = Some(flag_number(args, &mut i)),
            "--output" => output_path = Some(flag_value(args, &mut i, "a file path")),
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let pool = generate_pool(&config);
    let json = serde_json::to_string_pretty(&pool.to_input()).unwrap_or_else(|e| {
        eprintln!("Error serializing pool: {}", e);
        process::exit(1);
    });

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!(
            "Generated {} wallets with {} items → {}",
            pool.preferences.len(),
            pool.valuations.len(),
            path
        );
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "discover" => cmd_discover(rest),
        "cycles" => cmd_cycles(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
