//! A REPL driver over the [`lsm`] crate library — ambient operational
//! tooling, not part of the store's own public contract. A nom-parsed,
//! rustyline-backed REPL exposing put/get/del/scan/flush/compact/dump/
//! close/quit against [`MiniLsm`].

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lsm::config::{Options, PackingType};
use lsm::lsm_storage::MiniLsm;
use rustyline::DefaultEditor;
use std::path::PathBuf;

#[derive(Debug, Clone, ValueEnum)]
enum Packing {
    PerPage,
    Hash,
    KeyRange,
}

impl From<Packing> for PackingType {
    fn from(p: Packing) -> Self {
        match p {
            Packing::PerPage => PackingType::KeyPerPage,
            Packing::Hash => PackingType::Hash,
            Packing::KeyRange => PackingType::KeyRange,
        }
    }
}

#[derive(Debug)]
enum Command {
    Init { begin: u64, end: u64 },
    Put { key: String, value: String },
    Del { key: String },
    Get { key: String },
    Scan { lower: Option<String>, upper: Option<String> },
    Flush,
    Compact,
    Dump,
    Close,
    Quit,
}

impl Command {
    /// Parses one REPL line with `nom` parser combinators.
    fn parse(input: &str) -> Result<Self> {
        use nom::branch::alt;
        use nom::bytes::complete::{tag_no_case, take_till1};
        use nom::character::complete::{digit1, space1};
        use nom::combinator::{map, map_res, opt};
        use nom::sequence::tuple;

        let uint = |i| {
            map_res(digit1::<&str, nom::error::Error<_>>, |s: &str| {
                s.parse::<u64>().map_err(|_| nom::error::Error::new(s, nom::error::ErrorKind::Digit))
            })(i)
        };
        let string = |i| map(take_till1(|c: char| c.is_whitespace()), |s: &str| s.to_string())(i);

        let init = map(tuple((tag_no_case("init"), space1, uint, space1, uint)), |(_, _, begin, _, end)| {
            Command::Init { begin, end }
        });
        let put = map(tuple((tag_no_case("put"), space1, string, space1, string)), |(_, _, key, _, value)| {
            Command::Put { key, value }
        });
        let del = map(tuple((tag_no_case("del"), space1, string)), |(_, _, key)| Command::Del { key });
        let get = map(tuple((tag_no_case("get"), space1, string)), |(_, _, key)| Command::Get { key });
        let scan = map(
            tuple((tag_no_case("scan"), opt(tuple((space1, string, space1, string))))),
            |(_, args)| {
                let (lower, upper) = args.map_or((None, None), |(_, l, _, u)| (Some(l), Some(u)));
                Command::Scan { lower, upper }
            },
        );

        let mut command = alt((
            init,
            put,
            del,
            get,
            scan,
            map(tag_no_case("flush"), |_| Command::Flush),
            map(tag_no_case("compact"), |_| Command::Compact),
            map(tag_no_case("dump"), |_| Command::Dump),
            map(tag_no_case("close"), |_| Command::Close),
            map(tag_no_case("quit"), |_| Command::Quit),
        ));

        command(input.trim()).map(|(_, c)| c).map_err(|e| anyhow::anyhow!("{e}"))
    }
}

struct ReplHandler {
    epoch: u64,
    lsm: Option<MiniLsm>,
}

impl ReplHandler {
    fn handle(&mut self, command: Command) -> Result<bool> {
        let lsm = match &self.lsm {
            Some(lsm) => lsm,
            None => {
                println!("store is closed");
                return Ok(true);
            }
        };

        match command {
            Command::Init { begin, end } => {
                let mut ok = 0;
                for i in begin..=end {
                    let key = i.to_string();
                    let value = format!("value{i}@{}", self.epoch);
                    match lsm.put(key.as_bytes(), value.as_bytes()) {
                        Ok(()) => ok += 1,
                        Err(e) => println!("error inserting key {key}: {e}"),
                    }
                }
                println!("{ok} values filled with epoch {}", self.epoch);
            }
            Command::Put { key, value } => {
                lsm.put(key.as_bytes(), value.as_bytes())?;
                println!("{key} = {value}");
            }
            Command::Del { key } => {
                lsm.delete(key.as_bytes())?;
                println!("{key} deleted");
            }
            Command::Get { key } => match lsm.get(key.as_bytes()) {
                Ok(value) => println!("{key} = {:?}", value),
                Err(e) if e.is_not_found() => println!("{key} not found"),
                Err(e) => return Err(e.into()),
            },
            Command::Scan { lower, upper } => {
                let mut it = lsm.scan(lower.as_deref().map(str::as_bytes), upper.as_deref().map(str::as_bytes))?;
                let mut count = 0;
                while let Some(entry) = it.next_entry()? {
                    match entry.value {
                        Some(v) => println!("{:?} = {:?}", String::from_utf8_lossy(&entry.user_key), v),
                        None => println!("{:?} = <deleted>", String::from_utf8_lossy(&entry.user_key)),
                    }
                    count += 1;
                }
                println!("{count} keys scanned");
            }
            Command::Flush => {
                lsm.flush()?;
                println!("flushed");
            }
            Command::Compact => {
                lsm.compact()?;
                println!("compacted");
            }
            Command::Dump => print!("{}", lsm.dump()),
            Command::Close => {
                self.lsm.take().expect("checked Some above").close()?;
                println!("closed");
            }
            Command::Quit => return Ok(false),
        }

        self.epoch += 1;
        Ok(true)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "A CLI for the embedded LSM key-value store", long_about = None)]
struct Args {
    #[arg(long, default_value = "lsm.db")]
    path: PathBuf,
    #[arg(long, value_enum, default_value = "per-page")]
    packing: Packing,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let options = Options { packing: args.packing.into(), ..Options::default() };
    let lsm = MiniLsm::open_on_disk(&args.path, options)?;

    let mut handler = ReplHandler { epoch: 0, lsm: Some(lsm) };
    let mut editor = DefaultEditor::new()?;
    loop {
        let input = match editor.readline("lsm-cli> ") {
            Ok(line) => line,
            Err(_) => break,
        };
        if input.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&input) {
            Ok(c) => c,
            Err(e) => {
                println!("parse error: {e}");
                continue;
            }
        };
        match handler.handle(command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e}"),
        }
    }

    if let Some(lsm) = handler.lsm.take() {
        lsm.close()?;
    }
    Ok(())
}
