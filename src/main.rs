use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use serde::Serialize;

use hn4::flags::StateFlags;
use hn4::logger::Logger;
use hn4::{strerror, Error, FileDevice, FormatParams, MountParams, Profile, Volume};

#[derive(Debug, Parser)]
struct Args {
    /// Device or image path
    #[clap(short, long, parse(from_os_str), value_name = "DRIVE")]
    drive: PathBuf,

    /// Create a new volume with the given profile
    #[clap(short, long, arg_enum, value_name = "PROFILE")]
    format: Option<Profile>,

    /// Volume label, applied when formatting
    #[clap(short, long, value_name = "LABEL")]
    label: Option<String>,

    /// Print a JSON report of the volume
    #[clap(short, long)]
    report: bool,

    /// Mount read-only
    #[clap(long)]
    read_only: bool,

    /// Paranoid integrity checking
    #[clap(long)]
    strict: bool,

    /// Set verbosity of the output (can be used multiple times)
    #[clap(short, long, parse(from_occurrences))]
    verbose: u32,

    /// Log file
    #[clap(short = 'o', long, parse(from_os_str), value_name = "FILE")]
    log_file: Option<PathBuf>,
}

fn main()
{
    let args = Args::parse();

    let mut log_file = None;

    // Create the log file in rw mode.

    if let Some(path) = &args.log_file {
        let f = OpenOptions::new()
            .create(true)
            .read(false)
            .write(true)
            .open(path);

        log_file = match f {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("error: {}: {}", &path.display(), e.to_string());
                None
            }
        };
    }

    Logger::init(args.verbose, log_file);

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e.to_string());
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()>
{
    let writable = args.format.is_some() || !args.read_only;
    let mut dev = match FileDevice::open(&args.drive, writable, 0) {
        Ok(dev) => dev,
        Err(_) => bail!("{}: cannot open device", args.drive.display()),
    };

    if let Some(profile) = args.format {
        let params = FormatParams {
            profile,
            label: args.label.clone(),
            uuid: None,
        };
        hn4::format(&mut dev, &params).map_err(pretty)?;
        println!("formatted {} with profile {:?}", args.drive.display(), profile);

        return Ok(());
    }

    let params = MountParams {
        mount_flags: if args.read_only {
            hn4::flags::INTENT_READ_ONLY
        } else {
            0
        },
        integrity_level: if args.strict { 2 } else { 1 },
    };

    let vol = hn4::mount(&mut dev, params).map_err(pretty)?;

    if args.report {
        let report = Report::gather(&vol);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: generation {}, epoch {}, taint {}{}",
            vol.sb.label_str(),
            vol.sb.copy_generation,
            vol.sb.current_epoch_id,
            vol.taint(),
            if vol.read_only { " (read-only)" } else { "" }
        );
    }

    hn4::unmount(vol).map_err(pretty)?;

    Ok(())
}

fn pretty(e: Error) -> anyhow::Error
{
    anyhow::anyhow!("{} ({})", e, strerror(e.code()))
}

/// The volume facts the report prints.
#[derive(Debug, Serialize)]
struct Report {
    label: String,
    uuid: String,
    profile: String,
    block_size: u32,
    capacity: u64,
    generation: u64,
    epoch: u64,
    state: String,
    read_only: bool,
    taint: u32,
    allocated_blocks: Option<u64>,
    occupied_anchors: Option<usize>,
    resurrected_blocks: Option<u64>,
}

impl Report {
    fn gather(vol: &Volume) -> Self
    {
        Self {
            label: vol.sb.label_str(),
            uuid: vol
                .sb
                .uuid
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>(),
            profile: format!("{:?}", vol.profile),
            block_size: vol.block_size,
            capacity: vol.sb.total_capacity,
            generation: vol.sb.copy_generation,
            epoch: vol.sb.current_epoch_id,
            state: format!("{:?}", StateFlags(vol.sb.state_flags)),
            read_only: vol.read_only,
            taint: vol.taint(),
            allocated_blocks: vol.allocated_blocks(),
            occupied_anchors: vol.occupied_anchors(),
            resurrected_blocks: vol.recon.as_ref().map(|r| r.ghosts),
        }
    }
}
