use clap::{Parser, Subcommand, ValueEnum};
use relief::{Config, ExternalTool, PrinterPreset, Quality};
use std::path::PathBuf;

/// Turn a GPS track into a multi-part printable terrain relief.
#[derive(Parser, Debug, Clone)]
pub struct Cli {
    /// JSON run configuration. Flags below override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Side of the square footprint, in millimeters.
    #[arg(long)]
    pub footprint: Option<f64>,

    /// Fraction of the track's extent added on each side.
    #[arg(long)]
    pub margin: Option<f64>,

    /// Elevation exaggeration.
    #[arg(long)]
    pub vertical_scale: Option<f64>,

    #[arg(long, value_enum)]
    pub quality: Option<QualityArg>,

    /// Fit tolerances for a known printer.
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,

    /// Build a small test print with `_test` file names.
    #[arg(long, default_value_t = false)]
    pub test: bool,

    /// Also write one STL per part.
    #[arg(long, default_value_t = false)]
    pub parts: bool,

    /// Native mesh boolean program used to carve the groove.
    #[arg(long)]
    pub tool: Option<PathBuf>,

    /// One argument for `--tool`, repeatable; may use {target},
    /// {tool} and {output}.
    #[arg(long = "tool-arg", allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build the relief package.
    Build {
        /// Directory of elevation tiles.
        #[arg(short, long)]
        tile_dir: PathBuf,

        /// Load tiles into memory instead of memory mapping them.
        #[arg(long, default_value_t = false)]
        in_memory: bool,

        /// JSON file with water, green and detail features.
        #[arg(short, long)]
        layers: Option<PathBuf>,

        /// Output path without extension.
        #[arg(short, long)]
        out: PathBuf,

        /// GPX file with the track.
        gpx: PathBuf,
    },

    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum QualityArg {
    Fast,
    High,
    Ultra,
}

impl From<QualityArg> for Quality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Fast => Self::Fast,
            QualityArg::High => Self::High,
            QualityArg::Ultra => Self::Ultra,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PresetArg {
    Custom,
    Bambu,
    Voron,
}

impl From<PresetArg> for PrinterPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Custom => Self::Custom,
            PresetArg::Bambu => Self::Bambu,
            PresetArg::Voron => Self::Voron,
        }
    }
}

impl Cli {
    /// Writes every flag that was given over `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(footprint) = self.footprint {
            config.footprint_mm = footprint;
        }
        if let Some(margin) = self.margin {
            config.margin = margin;
        }
        if let Some(scale) = self.vertical_scale {
            config.vertical_scale = scale;
        }
        if let Some(quality) = self.quality {
            config.quality = quality.into();
        }
        if let Some(preset) = self.preset {
            config.preset = preset.into();
        }
        config.test_mode |= self.test;
        config.export_parts |= self.parts;
        if let Some(program) = &self.tool {
            let timeout_s = config.backend.tool.as_ref().map_or(120.0, |tool| tool.timeout_s);
            config.backend.tool = Some(ExternalTool {
                program: program.clone(),
                args: self.tool_args.clone(),
                timeout_s,
            });
        }
    }
}
