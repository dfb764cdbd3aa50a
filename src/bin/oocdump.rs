//! Inspect an oocmap store file without modifying it.
//!
//! Usage:
//!   oocdump data.ooc stats
//!   oocdump data.ooc list 3
//!   oocdump --json data.ooc dict 0
//!   oocdump data.ooc check

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser as ClapParser, Subcommand, command};
use nanoserde::SerJson;
use oocmap::{CollectionId, OocMap, StoreOptions};

#[derive(ClapParser, Debug, Clone)]
#[command(version, about = "Inspect an oocmap store file", long_about = None)]
#[command(name = "oocdump")]
struct CommandLineArguments {
    /// Store image to open (read-only)
    file: PathBuf,
    /// Print JSON instead of text
    #[clap(long, default_value = "false")]
    json: bool,
    /// Trace transactions to stderr
    #[clap(long, default_value = "false")]
    trace: bool,
    #[command(subcommand)]
    command: DumpCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum DumpCommand {
    /// Entry counts per table and the number of collections
    Stats,
    /// Print every element of a list
    List { id: CollectionId },
    /// Print every entry of a dict
    Dict { id: CollectionId },
    /// Verify every list and dict
    Check,
}

#[derive(SerJson)]
struct TableDoc {
    name: String,
    entries: usize,
}

#[derive(SerJson)]
struct StatsDoc {
    tables: Vec<TableDoc>,
    lists: usize,
    dicts: usize,
}

#[derive(SerJson)]
struct ListDoc {
    id: u32,
    length: usize,
    /// Element reprs in position order
    items: Vec<String>,
}

#[derive(SerJson)]
struct EntryDoc {
    key: String,
    value: String,
}

#[derive(SerJson)]
struct DictDoc {
    id: u32,
    length: usize,
    entries: Vec<EntryDoc>,
}

#[derive(SerJson)]
struct CheckDoc {
    ok: bool,
    lists: usize,
    dicts: usize,
    error: Option<String>,
}

fn stats(map: &OocMap, json: bool) -> Result<(), Box<dyn Error>> {
    let stats = map.store().stats();
    let lists = map.list_ids()?.len();
    let dicts = map.dict_ids()?.len();
    if json {
        let doc = StatsDoc {
            tables: stats
                .tables
                .iter()
                .map(|(name, entries)| TableDoc {
                    name: name.to_string(),
                    entries: *entries,
                })
                .collect(),
            lists,
            dicts,
        };
        println!("{}", doc.serialize_json());
        return Ok(());
    }
    for (name, entries) in &stats.tables {
        println!("{:<14}{}", name, entries);
    }
    println!("lists         {}", lists);
    println!("dicts         {}", dicts);
    Ok(())
}

fn dump_list(map: &OocMap, id: CollectionId, json: bool) -> Result<(), Box<dyn Error>> {
    let items = map.list(id).to_vec()?;
    if json {
        let doc = ListDoc {
            id,
            length: items.len(),
            items: items.iter().map(|item| item.to_string()).collect(),
        };
        println!("{}", doc.serialize_json());
        return Ok(());
    }
    for (position, item) in items.iter().enumerate() {
        println!("{}: {}", position, item);
    }
    Ok(())
}

fn dump_dict(map: &OocMap, id: CollectionId, json: bool) -> Result<(), Box<dyn Error>> {
    let entries = map.dict(id).to_vec()?;
    if json {
        let doc = DictDoc {
            id,
            length: entries.len(),
            entries: entries
                .iter()
                .map(|(key, value)| EntryDoc {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        };
        println!("{}", doc.serialize_json());
        return Ok(());
    }
    for (key, value) in &entries {
        println!("{}: {}", key, value);
    }
    Ok(())
}

/// Returns whether the store passed.
fn check(map: &OocMap, json: bool) -> bool {
    let result = map.check_integrity();
    if json {
        let doc = match &result {
            Ok(report) => CheckDoc {
                ok: true,
                lists: report.lists,
                dicts: report.dicts,
                error: None,
            },
            Err(error) => CheckDoc {
                ok: false,
                lists: 0,
                dicts: 0,
                error: Some(error.to_string()),
            },
        };
        println!("{}", doc.serialize_json());
    } else {
        match &result {
            Ok(report) => println!("ok: {} lists, {} dicts", report.lists, report.dicts),
            Err(error) => eprintln!("check failed: {}", error),
        }
    }
    result.is_ok()
}

fn run(args: &CommandLineArguments) -> Result<bool, Box<dyn Error>> {
    let options = StoreOptions {
        read_only: true,
        sync_on_commit: false,
        trace: args.trace,
        ..StoreOptions::default()
    };
    let map = OocMap::open(&args.file, options)?;
    match args.command {
        DumpCommand::Stats => stats(&map, args.json)?,
        DumpCommand::List { id } => dump_list(&map, id, args.json)?,
        DumpCommand::Dict { id } => dump_dict(&map, id, args.json)?,
        DumpCommand::Check => return Ok(check(&map, args.json)),
    }
    Ok(true)
}

fn main() -> ExitCode {
    let args = CommandLineArguments::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("oocdump: {}", error);
            ExitCode::FAILURE
        }
    }
}
