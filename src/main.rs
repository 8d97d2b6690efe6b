use std::fs;
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use bigsort::fixture::{self, Sequence};
use bigsort::verify;
use bigsort::{ExternalSorter, ExternalSorterBuilder, MergeStrategy, Record};

const DEFAULT_MEM_LIMIT: &str = "64000000";

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let width: Width = arg_parser.value_of_t_or_exit("width");

    let code = match arg_parser.subcommand() {
        Some(("sort", args)) => match width {
            Width::W1 => run_sort::<u8>(args),
            Width::W2 => run_sort::<u16>(args),
            Width::W4 => run_sort::<u32>(args),
            Width::W8 => run_sort::<u64>(args),
        },
        Some(("verify", args)) => match width {
            Width::W1 => run_verify::<u8>(args),
            Width::W2 => run_verify::<u16>(args),
            Width::W4 => run_verify::<u32>(args),
            Width::W8 => run_verify::<u64>(args),
        },
        Some(("generate", args)) => match width {
            Width::W1 => run_generate::<u8>(args),
            Width::W2 => run_generate::<u16>(args),
            Width::W4 => run_generate::<u32>(args),
            Width::W8 => run_generate::<u64>(args),
        },
        _ => unreachable!("subcommand is required"),
    };

    process::exit(code);
}

fn run_sort<R: Record>(args: &clap::ArgMatches) -> i32 {
    let input = args.value_of("input").expect("value is required");
    let output = args.value_of("output").expect("value is required");
    let work_dir: Option<&str> = args.value_of("work_dir");
    let mem_limit = args.value_of("mem_limit").expect("value has default");
    let merge: Merge = args.value_of_t_or_exit("merge");
    let rw_buf_size: Option<ByteSize> = args.value_of("rw_buf_size").map(|v| v.parse().expect("value is pre-validated"));

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_mem_limit(mem_limit.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize)
        .with_merge_strategy(match merge {
            Merge::Linear => MergeStrategy::LinearScan,
            Merge::Heap => MergeStrategy::BinaryHeap,
        });

    if let Some(work_dir) = work_dir {
        sorter_builder = sorter_builder.with_work_dir(path::Path::new(work_dir));
    }
    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size.as_u64() as usize);
    }

    let sorter: ExternalSorter<R> = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            return err.exit_code();
        }
    };

    log::info!(
        "sorting '{}' into '{}' (memory limit: {}, record size: {})",
        input,
        output,
        ByteSize::b(sorter.mem_limit() as u64),
        R::WIDTH
    );

    match sorter.sort_file(path::Path::new(input), path::Path::new(output)) {
        Ok(summary) => {
            log::info!(
                "{} records sorted using {} runs (split: {:?}, merge: {:?})",
                summary.records_written,
                summary.split.runs,
                summary.split_time,
                summary.merge_time
            );
            0
        }
        // the observer has already logged the failure
        Err(err) => err.exit_code(),
    }
}

fn run_verify<R: Record>(args: &clap::ArgMatches) -> i32 {
    let input = args.value_of("input").expect("value is required");

    let file = match fs::File::open(input) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            return 5;
        }
    };

    match verify::verify_sorted::<R, _>(file) {
        Ok(verification) => match verification.first_unsorted {
            None => {
                log::info!("file is sorted ascending, values found: {}", verification.records);
                0
            }
            Some(position) => {
                log::error!("bad value at position {}", position);
                1
            }
        },
        Err(err) => {
            log::error!("input file reading error: {}", err);
            5
        }
    }
}

fn run_generate<R: Record>(args: &clap::ArgMatches) -> i32 {
    let output = args.value_of("output").expect("value is required");
    let size = args
        .value_of("size")
        .expect("value has default")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64();
    let sequence = if args.is_present("ascending") {
        Sequence::Ascending
    } else {
        Sequence::Descending
    };

    let file = match fs::File::create(output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("output file creation error: {}", err);
            return 6;
        }
    };

    let count = size / R::WIDTH as u64;
    if let Err(err) = fixture::write_sequence::<R, _>(file, count, sequence) {
        log::error!("data saving error: {}", err);
        return 6;
    }
    log::info!("{} values written to '{}'", count, output);

    return 0;
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Merge {
    Linear,
    Heap,
}

impl Merge {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Merge::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Merge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Merge as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone)]
enum Width {
    W1,
    W2,
    W4,
    W8,
}

impl std::str::FromStr for Width {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Width::W1),
            "2" => Ok(Width::W2),
            "4" => Ok(Width::W4),
            "8" => Ok(Width::W8),
            _ => Err(format!("unsupported record size: {}", s)),
        }
    }
}

fn validate_byte_size(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("bigsort")
        .about("external sorter of binary unsigned integer files")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .global(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("width")
                .short('w')
                .long("width")
                .help("record size in bytes")
                .takes_value(true)
                .global(true)
                .default_value("4")
                .possible_values(["1", "2", "4", "8"]),
        )
        .subcommand(
            clap::App::new("sort")
                .about("sorts a file in ascending order")
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("mem_limit")
                        .short('m')
                        .long("mem-limit")
                        .help("memory budget, a multiple of the record size in range 1000..=120000000 bytes")
                        .takes_value(true)
                        .default_value(DEFAULT_MEM_LIMIT)
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("work_dir")
                        .short('d')
                        .long("work-dir")
                        .help("directory to be used to store temporary data")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("rw_buf_size")
                        .long("rw-buf-size")
                        .help("temporary file read/write buffer size")
                        .takes_value(true)
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("merge")
                        .long("merge")
                        .help("run merge strategy")
                        .takes_value(true)
                        .default_value("linear")
                        .possible_values(Merge::possible_values()),
                ),
        )
        .subcommand(
            clap::App::new("verify")
                .about("checks that a file is sorted in ascending order")
                .arg(
                    clap::Arg::new("input")
                        .help("file to be checked")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .subcommand(
            clap::App::new("generate")
                .about("writes an ordered sequence of values to a file")
                .arg(
                    clap::Arg::new("output")
                        .help("result file")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("size")
                        .short('s')
                        .long("size")
                        .help("file size")
                        .takes_value(true)
                        .default_value("5000")
                        .validator(validate_byte_size),
                )
                .arg(
                    clap::Arg::new("ascending")
                        .short('a')
                        .long("ascending")
                        .help("write ascending sequence instead of descending"),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
