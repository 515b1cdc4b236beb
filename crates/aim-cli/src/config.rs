//! TOML configuration deserialisation for propagation jobs.

use aim_core::interaction::Normalization;
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub lattice: LatticeConfig,
    #[serde(rename = "emitter", default)]
    pub emitters: Vec<EmitterConfig>,
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Time stepping and propagation parameters.
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    /// Propagation speed (default: 1).
    #[serde(default = "default_one")]
    pub c: f64,
    /// Time step (default: 1).
    #[serde(default = "default_one")]
    pub dt: f64,
    pub num_steps: usize,
    /// Steps of source history before step 0 (default: 10).
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_interpolation_order")]
    pub interpolation_order: usize,
    #[serde(default)]
    pub expansion_order: usize,
    /// Evaluator: "aim" or "direct". Default: "aim".
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub normalization: Normalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Aim,
    Direct,
}

fn default_one() -> f64 {
    1.0
}
fn default_history_window() -> usize {
    10
}
fn default_interpolation_order() -> usize {
    3
}

/// Lattice configuration.
#[derive(Debug, Deserialize)]
pub struct LatticeConfig {
    /// Box edge lengths (default: unit cube).
    #[serde(default = "default_spacing")]
    pub spacing: [f64; 3],
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            spacing: default_spacing(),
        }
    }
}

fn default_spacing() -> [f64; 3] {
    [1.0, 1.0, 1.0]
}

/// A single emitter and the source it drives.
///
/// Sources are scalar, so unknown keys (such as a dipole orientation) are
/// rejected rather than silently ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmitterConfig {
    pub position: [f64; 3],
    #[serde(default)]
    pub source: SourceKind,
    /// Scale applied to the source (default: 1).
    #[serde(default = "default_one")]
    pub amplitude: f64,
}

/// Time dependence of an emitter's source quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The shared Gaussian `[pulse]`.
    Pulse,
    /// Constant in time.
    Constant,
    /// Silent observer.
    #[default]
    Off,
}

/// Gaussian pulse $e^{-x^2/2}$, $x = (t - t_0)/\sigma$.
///
/// Unset fields default to a pulse centred in the run with a width of one
/// sixth of the total time.
#[derive(Debug, Default, Deserialize)]
pub struct PulseConfig {
    pub center: Option<f64>,
    pub width: Option<f64>,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save the field history as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_csv: bool,
    /// Whether to also save it as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_csv: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Check constraints that the deserialiser cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.emitters.is_empty() {
            anyhow::bail!("No emitters configured: add at least one [[emitter]] table");
        }
        if self.simulation.num_steps == 0 {
            anyhow::bail!("simulation.num_steps must be at least 1");
        }
        if let Some(width) = self.pulse.width {
            if !(width.is_finite() && width > 0.0) {
                anyhow::bail!("pulse.width must be positive, got {}", width);
            }
        }
        Ok(())
    }

    /// Pulse centre and width in time units, with defaults applied.
    pub fn pulse_shape(&self) -> (f64, f64) {
        let total_time = self.simulation.num_steps as f64 * self.simulation.dt;
        (
            self.pulse.center.unwrap_or(total_time / 2.0),
            self.pulse.width.unwrap_or(total_time / 6.0),
        )
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: JobConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
