use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vdisk_io::{
    DiskError, FileDevice, FileDeviceOptions, SectorAdapter, MIN_CHUNK_SIZE, SECTOR_SIZE,
};

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser, Debug)]
#[command(
    name = "vdisk-tool",
    version,
    about = "Byte-addressed reads and writes against a raw sector disk image."
)]
struct Args {
    /// Raw disk image path (length must be a multiple of 512)
    ///
    /// Environment variable: `VDISK_IMAGE`.
    #[arg(long, env = "VDISK_IMAGE", value_name = "PATH")]
    image: PathBuf,

    /// Log filter (tracing-subscriber EnvFilter syntax)
    ///
    /// Environment variable: `VDISK_LOG`.
    #[arg(long, env = "VDISK_LOG", default_value = DEFAULT_LOG_FILTER)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a zero-filled image
    Create {
        /// Image size in sectors
        #[arg(long)]
        sectors: u64,

        /// Overwrite an existing image
        #[arg(long, action = clap::ArgAction::SetTrue)]
        force: bool,
    },

    /// Print device geometry and capacity
    Info,

    /// Read bytes at an offset (hex dump on stdout unless --output is given)
    Read {
        offset: u64,
        len: usize,

        /// Write the bytes to this file instead of dumping them
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Write bytes at an offset
    Write {
        offset: u64,

        #[command(flatten)]
        source: WriteSource,

        /// Byte count for --fill
        #[arg(long)]
        len: Option<usize>,
    },

    /// List allocated extents, in sectors
    Blocks {
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Sector count (defaults to the whole device, rounded down to the chunk size)
        #[arg(long)]
        count: Option<u64>,

        #[arg(long, default_value_t = MIN_CHUNK_SIZE)]
        chunk: u64,
    },

    /// Hammer one unaligned range from several threads and check the writes never interleave.
    /// Overwrites image contents.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: u8,

        #[arg(long, default_value_t = 100)]
        rounds: usize,

        #[arg(long, default_value_t = 500)]
        offset: u64,

        #[arg(long, default_value_t = 526)]
        len: usize,

        /// Append through one shared cursor instead of writing one fixed range
        #[arg(long, action = clap::ArgAction::SetTrue)]
        cursor: bool,
    },
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct WriteSource {
    /// Bytes to write, taken literally
    #[arg(long)]
    data: Option<String>,

    /// Read the bytes to write from a file
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Write `--len` copies of this byte value
    #[arg(long, requires = "len")]
    fill: Option<u8>,
}

impl WriteSource {
    fn bytes(&self, len: Option<usize>) -> anyhow::Result<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(path) = &self.input {
            return fs::read(path).with_context(|| format!("read {}", path.display()));
        }
        match (self.fill, len) {
            (Some(fill), Some(len)) => Ok(vec![fill; len]),
            _ => bail!("one of --data, --input or --fill is required"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);
    run(args)
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Create { sectors, force } => create(&args.image, sectors, force),
        Command::Info => info(&args.image),
        Command::Read {
            offset,
            len,
            output,
        } => read(&args.image, offset, len, output.as_deref()),
        Command::Write {
            offset,
            source,
            len,
        } => write(&args.image, offset, &source.bytes(len)?),
        Command::Blocks {
            start,
            count,
            chunk,
        } => blocks(&args.image, start, count, chunk),
        Command::Stress {
            threads,
            rounds,
            offset,
            len,
            cursor,
        } => {
            if cursor {
                stress_cursor(&args.image, threads, rounds, len)
            } else {
                stress_range(&args.image, threads, rounds, offset, len)
            }
        }
    }
}

fn open(path: &Path, read_only: bool) -> anyhow::Result<SectorAdapter<FileDevice>> {
    let device = FileDevice::open(
        path,
        FileDeviceOptions {
            read_only,
            create_sectors: None,
        },
    )
    .with_context(|| format!("open image {}", path.display()))?;
    SectorAdapter::open(device).with_context(|| format!("query image {}", path.display()))
}

fn create(path: &Path, sectors: u64, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "refusing to overwrite {} (use --force to override)",
            path.display()
        );
    }
    let device = FileDevice::open(
        path,
        FileDeviceOptions {
            read_only: false,
            create_sectors: Some(sectors),
        },
    )
    .with_context(|| format!("create image {}", path.display()))?;
    SectorAdapter::open(device)?
        .close()
        .context("close image")?;
    println!("created {} ({sectors} sectors)", path.display());
    Ok(())
}

fn info(path: &Path) -> anyhow::Result<()> {
    let adapter = open(path, true)?;
    let info = adapter.info();

    let mut out = io::stdout().lock();
    writeln!(out, "capacity:       {} bytes", adapter.capacity_bytes())?;
    writeln!(out, "sectors:        {}", info.capacity_sectors)?;
    writeln!(out, "sector size:    {SECTOR_SIZE}")?;
    writeln!(out, "adapter type:   {:?}", info.adapter_type)?;
    writeln!(
        out,
        "bios geometry:  {}/{}/{}",
        info.bios_geometry.cylinders, info.bios_geometry.heads, info.bios_geometry.sectors
    )?;
    writeln!(
        out,
        "phys geometry:  {}/{}/{}",
        info.phys_geometry.cylinders, info.phys_geometry.heads, info.phys_geometry.sectors
    )?;
    writeln!(out, "links:          {}", info.num_links)?;
    if let Some(parent) = &info.parent_file_name_hint {
        writeln!(out, "parent:         {parent}")?;
    }
    if let Some(uuid) = &info.uuid {
        writeln!(out, "uuid:           {uuid}")?;
    }
    drop(out);

    adapter.close().context("close image")
}

fn read(path: &Path, offset: u64, len: usize, output: Option<&Path>) -> anyhow::Result<()> {
    let adapter = open(path, true)?;
    let mut buf = vec![0u8; len];
    let n = match adapter.read_at(offset, &mut buf) {
        Ok(n) => n,
        Err(err) if matches!(err.error, DiskError::EndOfStream) && err.transferred == 0 => {
            bail!(
                "offset {offset} is at or past the end of the image ({} bytes)",
                adapter.capacity_bytes()
            )
        }
        Err(err) => return Err(err).context(format!("read {len} bytes at {offset}")),
    };
    buf.truncate(n);
    if n < len {
        tracing::warn!(requested = len, read = n, "read clamped at end of image");
    }

    match output {
        Some(out_path) => {
            fs::write(out_path, &buf).with_context(|| format!("write {}", out_path.display()))?
        }
        None => hex_dump(&mut io::stdout().lock(), offset, &buf)?,
    }

    adapter.close().context("close image")
}

fn write(path: &Path, offset: u64, data: &[u8]) -> anyhow::Result<()> {
    let adapter = open(path, false)?;
    let n = adapter
        .write_at(offset, data)
        .with_context(|| format!("write {} bytes at {offset}", data.len()))?;
    println!("wrote {n} bytes at {offset}");
    adapter.close().context("close image")
}

fn blocks(path: &Path, start: u64, count: Option<u64>, chunk: u64) -> anyhow::Result<()> {
    let adapter = open(path, true)?;
    let count = match count {
        Some(count) => count,
        None => {
            if chunk == 0 {
                bail!("chunk size must be non-zero");
            }
            let remaining = adapter.info().capacity_sectors.saturating_sub(start);
            remaining - remaining % chunk
        }
    };

    let extents = adapter
        .query_allocated_blocks(start, count, chunk)
        .with_context(|| format!("query sectors {start}+{count} (chunk {chunk})"))?;
    let mut out = io::stdout().lock();
    for block in &extents {
        writeln!(out, "{}\t{}", block.offset, block.length)?;
    }
    drop(out);

    adapter.close().context("close image")
}

fn stress_range(
    path: &Path,
    threads: u8,
    rounds: usize,
    offset: u64,
    len: usize,
) -> anyhow::Result<()> {
    let adapter = open(path, false)?;
    let started = Instant::now();

    for round in 0..rounds {
        thread::scope(|s| -> anyhow::Result<()> {
            let workers: Vec<_> = (0..threads)
                .map(|t| {
                    let adapter = &adapter;
                    s.spawn(move || adapter.write_at(offset, &vec![b'A'.wrapping_add(t); len]))
                })
                .collect();
            for worker in workers {
                match worker.join() {
                    Ok(result) => {
                        result.with_context(|| format!("write {len} bytes at {offset}"))?;
                    }
                    Err(_) => bail!("writer thread panicked"),
                }
            }
            Ok(())
        })?;

        let mut region = vec![0u8; len];
        adapter
            .read_at(offset, &mut region)
            .context("read back stressed range")?;
        if let Some(pos) = region.iter().position(|b| *b != region[0]) {
            bail!(
                "round {round}: interleaved writes at byte {}",
                offset + pos as u64
            );
        }
    }

    println!(
        "{rounds} rounds x {threads} writers on {offset}+{len}: ok ({:.2?})",
        started.elapsed()
    );
    adapter.close().context("close image")
}

fn stress_cursor(path: &Path, threads: u8, rounds: usize, len: usize) -> anyhow::Result<()> {
    let adapter = open(path, false)?;
    let expected = u64::from(threads)
        .checked_mul(rounds as u64)
        .and_then(|n| n.checked_mul(len as u64))
        .filter(|total| *total <= adapter.capacity_bytes());
    let Some(expected) = expected else {
        bail!("{threads} x {rounds} x {len} bytes does not fit in the image");
    };

    let cursor = adapter.cursor();
    let started = Instant::now();
    thread::scope(|s| -> anyhow::Result<()> {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let cursor = &cursor;
                s.spawn(move || -> anyhow::Result<()> {
                    let data = vec![b'A'.wrapping_add(t); len];
                    for _ in 0..rounds {
                        cursor.write(&data).context("cursor write")?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => bail!("writer thread panicked"),
            }
        }
        Ok(())
    })?;

    let position = cursor.position();
    if position != expected {
        bail!("cursor at {position}, expected {expected}");
    }
    if len > 0 {
        let mut written = vec![0u8; len];
        for (i, start) in (0..expected).step_by(len).enumerate() {
            adapter
                .read_at(start, &mut written)
                .context("read back cursor writes")?;
            if written.iter().any(|b| *b != written[0]) {
                bail!("write #{i} at {start} overlaps another write");
            }
        }
    }

    println!(
        "{threads} writers x {rounds} appends of {len} bytes: ok, cursor at {position} ({:.2?})",
        started.elapsed()
    );
    adapter.close().context("close image")
}

fn hex_dump(out: &mut impl Write, base: u64, bytes: &[u8]) -> io::Result<()> {
    for (i, line) in bytes.chunks(16).enumerate() {
        write!(out, "{:08x} ", base + (i * 16) as u64)?;
        for b in line {
            write!(out, " {b:02x}")?;
        }
        for _ in line.len()..16 {
            write!(out, "   ")?;
        }
        let ascii: String = line
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() || *b == b' ' {
                    char::from(*b)
                } else {
                    '.'
                }
            })
            .collect();
        writeln!(out, "  |{ascii}|")?;
    }
    Ok(())
}
