use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use dialoguer::console::style;
use sbcld::ack::{Acknowledger, PromptAcknowledger, TimedAcknowledger};
use sbcld::bitmap::{self, PackedBlob};
use sbcld::link::{self, DEFAULT_BAUD, SerialLink};
use sbcld::session::TransferSession;
use sbcld::stage;
use structopt::StructOpt;
use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, PartialEq, StructOpt)]
#[structopt(name = "sbcld", about = "AVR-SBC bitmap loader")]
struct Opt {
    /// More logging (-v info, -vv debug, -vvv every line sent)
    #[structopt(short, long, parse(from_occurrences), global = true)]
    verbose: u8,

    #[structopt(subcommand)]
    subcommand: Subcommands,
}

#[derive(Debug, PartialEq, StructOpt)]
enum Subcommands {
    /// List serial ports that look like a USB adapter
    List,
    /// Pack a 128x64 monochrome .bmp into a .bin blob
    Convert {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        /// Output path, defaults to the input with a .bin extension
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
        /// Reject files without the BM signature
        #[structopt(long)]
        strict: bool,
    },
    /// Send a .bmp (or a staged .bin) to the AVR-SBC and draw it
    Load {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        /// Serial port, auto-detected if not given
        #[structopt(short, long)]
        port: Option<String>,
        #[structopt(short, long, default_value = "9600")]
        baud: u32,
        /// Reject files without the BM signature
        #[structopt(long)]
        strict: bool,
        /// Also write the packed .bin next to the input
        #[structopt(long = "stage")]
        stage_bin: bool,
        /// Give up if a SERLOAD/RUN prompt isn't answered within this many seconds
        #[structopt(long)]
        ack_timeout: Option<u64>,
        /// Pause after every line sent
        #[structopt(long, default_value = "0")]
        line_delay_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let opt: Opt = Opt::from_args();
    setup_logging(opt.verbose);

    match opt.subcommand {
        Subcommands::List => list(),
        Subcommands::Convert {
            file,
            output,
            strict,
        } => {
            let blob = read_bitmap(&file, strict)?;
            let output = output.unwrap_or_else(|| stage::stage_path(&file));
            stage::write_blob(&output, &blob)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "{} {} ({} bytes, crc32 {:08X})",
                style("Wrote").green(),
                output.display(),
                blob.len(),
                blob.checksum()
            );
            Ok(())
        }
        Subcommands::Load {
            file,
            port,
            baud,
            strict,
            stage_bin,
            ack_timeout,
            line_delay_ms,
        } => {
            let blob = if stage::is_staged(&file) {
                stage::read_blob(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?
            } else {
                let blob = read_bitmap(&file, strict)?;
                if stage_bin {
                    let output = stage::stage_path(&file);
                    stage::write_blob(&output, &blob)
                        .with_context(|| format!("failed to write {}", output.display()))?;
                }
                blob
            };
            println!("Loaded {} bytes, crc32 {:08X}", blob.len(), blob.checksum());

            let port_name = match port {
                Some(port) => port,
                None => link::select_port()?,
            };
            let link = SerialLink::new(port_name, baud)
                .with_line_delay(Duration::from_millis(line_delay_ms));

            let acks: Box<dyn Acknowledger> = match ack_timeout {
                Some(secs) => Box::new(TimedAcknowledger::new(
                    PromptAcknowledger,
                    Duration::from_secs(secs),
                )),
                None => Box::new(PromptAcknowledger),
            };

            let report = TransferSession::new(link, acks)
                .echo(true)
                .run(&blob)
                .context("transfer failed")?;

            println!(
                "{} {} batches, {} bytes over the wire",
                style("Sent").green(),
                report.batches,
                report.bytes_written
            );
            println!("Type {} on the AVR-SBC", style("RUN").bold());
            Ok(())
        }
    }
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .compact()
        .finish()
        .init();
}

fn list() -> anyhow::Result<()> {
    let ports = link::list_ports()?;
    if ports.is_empty() {
        println!("No USB serial ports found! Are you in the dialout group?");
    }
    for port in ports {
        println!("{port}");
    }
    println!("(default baud rate {})", style(DEFAULT_BAUD).dim());
    Ok(())
}

fn read_bitmap(path: &Path, strict: bool) -> anyhow::Result<PackedBlob> {
    let container =
        fs::read(path).with_context(|| format!("input file {} does not exist", path.display()))?;
    let decode = if strict { bitmap::decode_strict } else { bitmap::decode };
    let blob = decode(&container).with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(blob)
}
