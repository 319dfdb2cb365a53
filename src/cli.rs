//! Command-line demonstrator for the hierarchical store. Not part of the
//! public library surface — a thin REPL over `Hive` for exercising a file
//! by hand.

use std::io::{self, Write};

use regstore::storage::{HiveConfig, HiveError, OpenFlags, SelectFlags};
use regstore::Hive;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let mut args = std::env::args().skip(1);
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: regstore-cli <path-to-hive-file>");
            std::process::exit(2);
        }
    };

    let flags = OpenFlags::CREATE | OpenFlags::READWRITE;
    let hive = match Hive::open(&path, HiveConfig::default(), flags) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("open failed: {e}");
            std::process::exit(1);
        }
    };

    println!("regstore {} — opened {}", regstore::VERSION, path);
    println!("type 'help' for commands, 'quit' to exit");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("regstore> ");
        io::stdout().flush().ok();
        line.clear();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match run_command(&hive, &words) {
            Ok(Some(msg)) => println!("{msg}"),
            Ok(None) => {}
            Err(Command::Quit) => break,
            Err(Command::Failed(e)) => println!("error: {e}"),
            Err(Command::Usage(u)) => println!("usage: {u}"),
        }
    }
}

enum Command {
    Quit,
    Failed(HiveError),
    Usage(&'static str),
}

impl From<HiveError> for Command {
    fn from(e: HiveError) -> Self {
        Command::Failed(e)
    }
}

/// Runs one parsed command line against `hive`. `0` always names the
/// implicit root key, matching `Hive`'s convention for `NodeRef`.
fn run_command(hive: &Hive, words: &[&str]) -> Result<Option<String>, Command> {
    let parse_ref = |s: &str| -> Result<u64, Command> {
        if s == "0" || s == "root" {
            Ok(0)
        } else {
            u64::from_str_radix(s.trim_start_matches("0x"), 16)
                .map_err(|_| Command::Usage("node references are hex offsets or 'root'"))
        }
    };

    match words[0] {
        "quit" | "exit" => Err(Command::Quit),
        "help" => Ok(Some(HELP.to_string())),

        "mkkey" => {
            let [parent, name] = require::<2>(words)?;
            let parent = parse_ref(parent)?;
            let node = hive.create_key(parent, name)?;
            Ok(Some(format!("{node:#x}")))
        }
        "set-str" => {
            let [parent, name, value] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let node = hive.create_string(parent, name, value)?;
            Ok(Some(format!("{node:#x}")))
        }
        "set-int32" => {
            let [parent, name, value] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let v: i32 = value.parse().map_err(|_| Command::Usage("value must be an i32"))?;
            let node = hive.create_int32(parent, name, v)?;
            Ok(Some(format!("{node:#x}")))
        }
        "set-int64" => {
            let [parent, name, value] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let v: i64 = value.parse().map_err(|_| Command::Usage("value must be an i64"))?;
            let node = hive.create_int64(parent, name, v)?;
            Ok(Some(format!("{node:#x}")))
        }
        "set-double" => {
            let [parent, name, value] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let v: f64 = value.parse().map_err(|_| Command::Usage("value must be a float"))?;
            let node = hive.create_double(parent, name, v)?;
            Ok(Some(format!("{node:#x}")))
        }
        "link" => {
            let [parent, name, target] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let target = parse_ref(target)?;
            let node = hive.create_link(parent, name, target)?;
            Ok(Some(format!("{node:#x}")))
        }
        "get" => {
            let [parent, name] = require::<2>(words)?;
            let parent = parse_ref(parent)?;
            match hive.find(parent, name, SelectFlags::VALUES)? {
                None => Ok(Some("not found".into())),
                Some(node) => Ok(Some(describe(hive, node)?)),
            }
        }
        "findkey" => {
            let [parent, name] = require::<2>(words)?;
            let parent = parse_ref(parent)?;
            match hive.find(parent, name, SelectFlags::KEYS)? {
                None => Ok(Some("not found".into())),
                Some(node) => Ok(Some(format!("{node:#x}"))),
            }
        }
        "ls" => {
            let [parent] = require::<1>(words)?;
            let parent = parse_ref(parent)?;
            let mut out = String::new();
            for select in [SelectFlags::KEYS, SelectFlags::VALUES] {
                let mut cursor = hive.cursor(parent, select | SelectFlags::ASCENDING)?;
                let mut cur = hive.cursor_first(&mut cursor, None)?;
                while let Some(info) = cur {
                    out.push_str(&info.name);
                    out.push('\n');
                    cur = hive.cursor_next(&mut cursor)?;
                }
            }
            Ok(Some(out.trim_end().to_string()))
        }
        "rm" => {
            let [parent, which, name] = require::<3>(words)?;
            let parent = parse_ref(parent)?;
            let select = match which {
                "key" => SelectFlags::KEYS,
                "value" => SelectFlags::VALUES,
                _ => return Err(Command::Usage("rm <parent> key|value <name>")),
            };
            hive.delete(parent, select, name)?;
            Ok(Some("deleted".into()))
        }
        "commit" => {
            hive.commit(true)?;
            Ok(Some("committed".into()))
        }
        "seed" => {
            let [parent, count] = require::<2>(words)?;
            let parent = parse_ref(parent)?;
            let n: u32 = count.parse().map_err(|_| Command::Usage("count must be a number"))?;
            let created = seed_random_keys(hive, parent, n)?;
            Ok(Some(format!("created {created} keys")))
        }
        other => Ok(Some(format!("unknown command '{other}', try 'help'"))),
    }
}

fn describe(hive: &Hive, node: u64) -> Result<String, Command> {
    use regstore::storage::NodeType;
    let ty = hive.get_type(node)?;
    Ok(match ty {
        NodeType::Int32 => format!("int32 {}", hive.get_int32(node)?),
        NodeType::Int64 => format!("int64 {}", hive.get_int64(node)?),
        NodeType::Double => format!("double {}", hive.get_double(node)?),
        NodeType::String => format!("string {:?}", hive.get_string(node)?),
        NodeType::Binary => format!("binary ({} bytes)", hive.get_binary(node)?.len()),
        NodeType::Link => format!("link -> {:#x}", hive.get_link(node)?),
        NodeType::Key => "key".to_string(),
        NodeType::LongString | NodeType::LongBinary => "unsupported node type".to_string(),
    })
}

/// Creates `count` int32 values under `parent`, named after a random
/// shuffle of `0..count`, handy for poking at balance/eviction behavior
/// interactively instead of only from the test suite.
fn seed_random_keys(hive: &Hive, parent: u64, count: u32) -> Result<u32, Command> {
    use rand::seq::SliceRandom;
    let mut order: Vec<u32> = (0..count).collect();
    order.shuffle(&mut rand::rng());
    let mut created = 0;
    for n in order {
        hive.create_int32(parent, &n.to_string(), n as i32)?;
        created += 1;
    }
    Ok(created)
}

/// Destructures `words[1..]` into exactly `N` arguments, or a usage error.
fn require<const N: usize>(words: &[&str]) -> Result<[&str; N], Command> {
    let args = &words[1..];
    args.try_into().map_err(|_| Command::Usage(USAGE_FOR_ARITY[N]))
}

const USAGE_FOR_ARITY: [&str; 4] = [
    "",
    "<command> <arg>",
    "<command> <arg1> <arg2>",
    "<command> <arg1> <arg2> <arg3>",
];

const HELP: &str = "\
mkkey <parent> <name>                   create a key
set-str <parent> <name> <value>         create a string value
set-int32 <parent> <name> <value>       create an int32 value
set-int64 <parent> <name> <value>       create an int64 value
set-double <parent> <name> <value>      create a double value
link <parent> <name> <target>           create a link to <target>
get <parent> <name>                     read a value under <parent>
findkey <parent> <name>                 resolve a child key's node ref
ls <parent>                             list a key's children and values
rm <parent> key|value <name>            delete a child key or value
seed <parent> <count>                   create <count> random int32 values
commit                                  flush and fsync pending changes
quit                                    exit

Node references print as hex offsets (e.g. 0x1000); pass them back in,
or use 'root' for the implicit root key.";
