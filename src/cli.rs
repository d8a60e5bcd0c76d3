use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::core::config::ServerConfig;
use crate::core::utils::format_bytes;
use crate::download::FormatDescriptor;

#[derive(Parser)]
#[command(name = "mediagate")]
#[command(author, version, about = "HTTP service that lists and retrieves media through yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Listen address, overrides BIND_ADDR
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Scratch directory for in-flight downloads, overrides SCRATCH_DIR
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// File store directory, overrides STORE_DIR
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// List the formats available for a URL
    Formats {
        /// Media URL
        url: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check that the extractor is installed and print its version
    CheckExtractor,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Applies `serve` flag overrides on top of the environment configuration.
pub fn apply_serve_overrides(
    mut config: ServerConfig,
    bind: Option<SocketAddr>,
    scratch_dir: Option<PathBuf>,
    store_dir: Option<PathBuf>,
) -> ServerConfig {
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if let Some(dir) = scratch_dir {
        config.scratch_dir = dir;
    }
    if let Some(dir) = store_dir {
        config.store_dir = dir;
    }
    config
}

/// Renders formats as an aligned text table.
pub fn render_formats_table(formats: &[FormatDescriptor]) -> String {
    let rows: Vec<[String; 6]> = formats
        .iter()
        .map(|f| {
            [
                f.id.clone(),
                f.container.clone(),
                if f.is_audio_only() {
                    "audio".to_string()
                } else {
                    f.resolution.clone().unwrap_or_default()
                },
                f.frame_rate.map(|fps| format!("{:.0}", fps)).unwrap_or_default(),
                f.approximate_size.map(format_bytes).unwrap_or_default(),
                f.codec.clone(),
            ]
        })
        .collect();

    let header = ["ID", "EXT", "RESOLUTION", "FPS", "SIZE", "CODEC"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render_row = |cells: &[String]| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&render_row(&header.map(str::to_string)));
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["mediagate", "formats", "https://x.test/v", "--json"]).unwrap();
        match cli.command {
            Some(Commands::Formats { url, json }) => {
                assert_eq!(url, "https://x.test/v");
                assert!(json);
            }
            _ => panic!("expected formats command"),
        }

        let cli = Cli::try_parse_from(["mediagate"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["mediagate", "serve", "--bind", "127.0.0.1:8080"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { bind: Some(_), .. })));
    }

    #[test]
    fn test_render_formats_table() {
        let formats = vec![
            FormatDescriptor {
                id: "137".to_string(),
                container: "mp4".to_string(),
                resolution: Some("1920x1080".to_string()),
                frame_rate: Some(30.0),
                approximate_size: Some(2048),
                codec: "avc1".to_string(),
            },
            FormatDescriptor {
                id: "140".to_string(),
                container: "m4a".to_string(),
                resolution: None,
                frame_rate: None,
                approximate_size: None,
                codec: "mp4a.40.2".to_string(),
            },
        ];

        let table = render_formats_table(&formats);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID   EXT  RESOLUTION"));
        assert!(lines[1].contains("1920x1080"));
        assert!(lines[1].contains("2.0 KiB"));
        assert!(lines[2].contains("audio"));
    }
}
