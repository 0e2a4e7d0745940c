use clap::Parser;
use grfpak::{GrfArchive, GrfEntry, GrfError, NameEncoding};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser, Debug)]
#[command(name = "grfpak")]
#[command(version, about = "Arcturus PAK / Ragnarok GRAT archive extractor", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract an archive to a directory
    Extract {
        /// Path to the .pak/.grf archive
        input: String,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: String,

        /// Decode file names as EUC-KR (Korean clients)
        #[arg(short, long)]
        korean: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
    /// List the entries of an archive
    List {
        /// Path to the .pak/.grf archive
        input: String,

        /// Decode file names as EUC-KR (Korean clients)
        #[arg(short, long)]
        korean: bool,
    },
}

fn name_encoding(korean: bool) -> NameEncoding {
    if korean {
        NameEncoding::Korean
    } else {
        NameEncoding::Western
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Commands::Extract {
            input,
            output,
            korean,
            verbose,
        } => {
            let input_path = Path::new(&input);
            if !input_path.exists() {
                eprintln!("Error: File not found: {}", input);
                std::process::exit(1);
            }

            let data = fs::read(input_path)?;
            if verbose {
                println!("Reading {} ({} bytes)...", input, data.len());
            }

            let archive = GrfArchive::parse_with_encoding(&data, name_encoding(korean))?;
            if archive.entries.is_empty() {
                println!("No entries in archive.");
                return Ok(());
            }

            let output_base = PathBuf::from(&output);
            fs::create_dir_all(&output_base)?;

            println!("Extracting {} entries...", archive.entries.len());
            let total = archive.entries.len();
            let done = AtomicUsize::new(0);

            // First pass: create all directories sequentially (must happen before files)
            for entry in &archive.entries {
                if entry.is_folder() {
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    println!("{}/{} : {}", n, total, entry.name);
                    fs::create_dir_all(entry_path(&output_base, &entry.name))?;
                }
            }

            // Second pass: extract files in parallel
            let errors = AtomicUsize::new(0);
            archive.entries.par_iter().for_each(|entry| {
                if !entry.is_folder() {
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    println!("{}/{} : {}", n, total, entry.name);
                    if let Err(e) = extract_file(&output_base, entry, &data, verbose) {
                        eprintln!("Error extracting {}: {}", entry.name, e);
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });

            if errors.load(Ordering::Relaxed) > 0 {
                eprintln!(
                    "Warning: {} files failed to extract",
                    errors.load(Ordering::Relaxed)
                );
            }
        }
        Commands::List { input, korean } => {
            let data = fs::read(&input)?;
            let archive = GrfArchive::parse_with_encoding(&data, name_encoding(korean))?;

            println!(
                "{:?} archive, {} entries",
                archive.version,
                archive.entries.len()
            );
            println!("{:>10} {:>10}  name", "stored", "original");
            for entry in &archive.entries {
                if entry.is_folder() {
                    println!("{:>10} {:>10}  {}\\", "-", "-", entry.name);
                } else {
                    println!(
                        "{:>10} {:>10}  {}",
                        entry.compressed_size, entry.original_size, entry.name
                    );
                }
            }
        }
    }

    println!("Done.");
    Ok(())
}

fn extract_file(base: &Path, entry: &GrfEntry, data: &[u8], verbose: bool) -> Result<(), GrfError> {
    let payload = entry.extract(data)?;

    if verbose {
        println!(
            "  File: {} ({} -> {} bytes)",
            entry.name,
            entry.compressed_size,
            payload.len()
        );
    }

    let path = entry_path(base, &entry.name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &payload)?;
    Ok(())
}

/// Join an archive path under the output root. Stored names use `\` as
/// the separator; empty, `.` and `..` components are dropped.
fn entry_path(base: &Path, name: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in name.split(['\\', '/']) {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        path.push(part);
    }
    path
}
