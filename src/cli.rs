//! Command-line argument parsing.

use clap::Parser;
use std::path::PathBuf;

use vibeshade::params::DriverConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "vibeshade")]
#[command(about = "Audio-reactive shader compositor for live video", long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Audio file to play instead of capturing the default input
    #[arg(long, value_name = "PATH_OR_URL")]
    pub url: Option<String>,

    /// Folder of still frames used as the camera feed
    #[arg(long, value_name = "DIR")]
    pub frames: Option<PathBuf>,

    /// Fragment shader replacing the pass-through stage
    #[arg(long, value_name = "FILE")]
    pub shader: Option<PathBuf>,

    /// Start playback without waiting for Space
    #[arg(long)]
    pub autoplay: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Load the configuration file (or defaults) and apply overrides
    pub fn load_config(&self) -> vibeshade::Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => DriverConfig::from_file(path)?,
            None => DriverConfig::default(),
        };

        if let Some(url) = &self.url {
            config.audio.url = Some(url.clone());
        }
        if let Some(frames) = &self.frames {
            config.video.frames_dir = Some(frames.clone());
        }
        if let Some(shader) = &self.shader {
            config.video.fragment_shader = Some(shader.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_without_config_file() {
        let args = Args::parse_from(["vibeshade", "--url", "song.wav", "--frames", "clips"]);
        let config = args.load_config().unwrap();

        assert_eq!(config.audio.url.as_deref(), Some("song.wav"));
        assert_eq!(config.video.frames_dir, Some(PathBuf::from("clips")));
        assert!(config.cue.is_empty());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::parse_from(["vibeshade", "--config", "/nonexistent/vibeshade.toml"]);
        assert!(matches!(
            args.load_config(),
            Err(vibeshade::Error::Config(_))
        ));
    }
}
