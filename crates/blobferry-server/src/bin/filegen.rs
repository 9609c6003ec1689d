//! Test file generator: drops random files into an incoming session
//! directory to simulate an external writer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use blobferry_common::logging::{init_logging, LogConfig};
use clap::Parser;
use rand::RngCore;
use tracing::info;

use blobferry_server::session::validate_session_name;

#[derive(Parser, Debug)]
#[command(
    name = "filegen",
    about = "Write random files into incoming/<session>/ at a fixed interval"
)]
struct Args {
    /// NFS incoming root
    #[arg(long, default_value = "/mnt/nfs/incoming")]
    incoming_root: PathBuf,

    /// Session directory to write into
    #[arg(long)]
    session: String,

    /// Number of files to write (0 = unlimited)
    #[arg(long, default_value_t = 10)]
    count: u64,

    /// Size of each file in bytes
    #[arg(long, default_value_t = 65536)]
    size_bytes: usize,

    /// Pause between files in milliseconds
    #[arg(long, default_value_t = 2000)]
    interval_ms: u64,

    /// Extension for generated files (without the dot)
    #[arg(long, default_value = "bin")]
    extension: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("filegen".to_string())
        .build();
    init_logging(&LogConfig::from_env().unwrap_or(log_config))?;

    validate_session_name(&args.session)
        .map_err(|err| anyhow::anyhow!("invalid --session: {err}"))?;

    let session_dir = args.incoming_root.join(&args.session);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("create {}", session_dir.display()))?;

    let mut rng = rand::thread_rng();
    let mut written = 0u64;

    while args.count == 0 || written < args.count {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!(
            "file-{written:04}-{}.{}",
            &suffix[..8],
            args.extension
        );

        let mut data = vec![0u8; args.size_bytes];
        rng.fill_bytes(&mut data);
        std::fs::write(session_dir.join(&filename), &data)
            .with_context(|| format!("write {filename}"))?;
        written += 1;

        if args.count == 0 {
            info!(file_name = %filename, size_bytes = args.size_bytes, written, "wrote file");
        } else {
            info!(
                file_name = %filename,
                size_bytes = args.size_bytes,
                progress = format!("{written}/{}", args.count),
                "wrote file"
            );
        }

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    info!(written, "generation complete");
    Ok(())
}
