use clap::{Parser, Subcommand};
use e8pack::archive::Archive;
use e8pack::codec::codec_find;
use e8pack::stream::{FileStream, MemStream};
use std::fs::{self, File};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "e8pack")]
#[command(about = "The E8 archive container CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into a new archive
    Pack {
        #[arg(short, long)]
        output: PathBuf,
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        #[arg(short, long)]
        level: Option<i32>,
        /// Encrypt the archive with a password
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Extract all entries into a directory
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// List archive entries
    List {
        input: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Pack {
            output,
            inputs,
            codec,
            level,
            password,
        } => {
            let desc = codec_find(codec)
                .ok_or_else(|| format!("unknown codec: {codec}"))?;
            let codec_id = desc.id;
            // Out-of-range levels fall back to each codec's own default.
            let level = (*level).unwrap_or(-1);

            let mut ar = Archive::create_path(output, password.as_deref())?;
            for input in inputs {
                let name = input
                    .file_name()
                    .ok_or_else(|| format!("not a file: {}", input.display()))?
                    .to_string_lossy()
                    .into_owned();
                let mut content = FileStream::new(File::open(input)?);
                ar.add_with_codec(&name, &mut content, None, codec_id, level)?;
                println!("added: {name}");
            }
            ar.close()?;
            println!("wrote {}", output.display());
        }
        Commands::Unpack {
            input,
            output_dir,
            password,
        } => {
            let mut ar = Archive::open_path(input, password.as_deref())?;
            if !output_dir.exists() {
                fs::create_dir_all(output_dir)?;
            }
            for index in 0..ar.count() {
                let name = ar.entry(index)?.path.clone();
                let mut out = MemStream::new();
                ar.extract(index, &mut out, None)?;
                fs::write(output_dir.join(&name), out.get_ref())?;
                println!("unpacked: {name}");
            }
        }
        Commands::List { input, password } => {
            let ar = Archive::open_path(input, password.as_deref())?;
            println!("{:<32} {:>12} {:>12} {:>6}", "Name", "Size", "Stored", "Codec");
            for index in 0..ar.count() {
                let entry = ar.entry(index)?;
                let codec = e8pack::codec::CodecId::try_from(entry.codec_id)
                    .ok()
                    .and_then(e8pack::codec::codec_get)
                    .map_or("?", |c| c.name);
                println!(
                    "{:<32} {:>12} {:>12} {:>6}",
                    entry.path, entry.uncompressed_size, entry.compressed_size, codec
                );
            }
        }
    }
    Ok(())
}
