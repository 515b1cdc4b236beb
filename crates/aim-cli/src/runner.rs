//! Job runner: builds emitters, history, and evaluator, then steps in time.

use std::path::Path;

use anyhow::{Context, Result};
use num_complex::Complex64;
use serde::Serialize;

use aim_core::history::History;
use aim_core::interaction::aim::AimInteraction;
use aim_core::interaction::direct::DirectInteraction;
use aim_core::interaction::Interaction;
use aim_core::lattice::Lattice;
use aim_core::types::{Emitter, SimulationParams};

use crate::config::{JobConfig, Method, SourceKind};

/// Field felt by every emitter at one step.
#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub step: i64,
    pub time: f64,
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

/// Results from a run.
pub struct RunOutput {
    pub method: String,
    pub records: Vec<StepRecord>,
}

pub fn build_emitters(job: &JobConfig) -> Vec<Emitter> {
    job.emitters
        .iter()
        .map(|e| Emitter::new(e.position))
        .collect()
}

pub fn build_params(job: &JobConfig) -> SimulationParams {
    SimulationParams {
        spacing: job.lattice.spacing,
        c: job.simulation.c,
        dt: job.simulation.dt,
        interpolation_order: job.simulation.interpolation_order,
        expansion_order: job.simulation.expansion_order,
    }
}

/// Source history over `-history_window .. num_steps`, sampled from each
/// emitter's configured source.
pub fn build_history(job: &JobConfig) -> History {
    let sim = &job.simulation;
    let (center, width) = job.pulse_shape();
    let mut history = History::new(job.emitters.len(), sim.history_window, sim.num_steps);

    for (e, emitter) in job.emitters.iter().enumerate() {
        let amplitude = emitter.amplitude;
        match emitter.source {
            SourceKind::Pulse => history.fill_with(e, |s| {
                let x = (s as f64 * sim.dt - center) / width;
                Complex64::new(amplitude * (-x * x / 2.0).exp(), 0.0)
            }),
            SourceKind::Constant => history.fill_with(e, |_| Complex64::new(amplitude, 0.0)),
            SourceKind::Off => {}
        }
    }

    history
}

/// Build the lattice the AIM evaluator would use, for reporting.
pub fn describe_lattice(job: &JobConfig) -> Result<Lattice> {
    let emitters = build_emitters(job);
    let params = build_params(job);
    let lattice = Lattice::new(params.spacing, &emitters, params.expansion_order)
        .context("Invalid lattice configuration")?;
    let transit = lattice
        .max_transit_steps(params.c, params.dt)
        .context("Invalid propagation parameters")?;

    println!("  Lattice: {:?} boxes, transit {} steps", lattice.dimensions(), transit);
    Ok(lattice)
}

fn build_interaction(job: &JobConfig, emitters: &[Emitter]) -> Result<Box<dyn Interaction>> {
    let params = build_params(job);
    let normalization = job.simulation.normalization;

    let interaction: Box<dyn Interaction> = match job.simulation.method {
        Method::Aim => {
            let aim = AimInteraction::new(emitters, &params, normalization)
                .context("Failed to set up the AIM interaction")?;
            println!(
                "  Lattice: {:?} boxes, temporal depth {}",
                aim.lattice().dimensions(),
                aim.temporal_depth()
            );
            Box::new(aim)
        }
        Method::Direct => Box::new(
            DirectInteraction::new(emitters, &params, normalization)
                .context("Failed to set up the direct interaction")?,
        ),
    };
    Ok(interaction)
}

/// Run a full job from a parsed configuration.
pub fn run_simulation(job: &JobConfig) -> Result<RunOutput> {
    let emitters = build_emitters(job);
    println!("Emitters: {}", emitters.len());

    let interaction = build_interaction(job, &emitters)?;
    println!("Method: {}", interaction.method_name());

    let history = build_history(job);
    let num_steps = job.simulation.num_steps;
    let mut records = Vec::with_capacity(num_steps);

    for step in 0..num_steps {
        let fields = interaction.evaluate(&history, step as i64);

        if (step + 1) % (num_steps / 10).max(1) == 0 || step + 1 == num_steps {
            let peak = fields.iter().map(|v| v.norm()).fold(0.0_f64, f64::max);
            println!("  [{}/{}] max |field| = {:.4e}", step + 1, num_steps, peak);
        }

        records.push(StepRecord {
            step: step as i64,
            time: step as f64 * job.simulation.dt,
            re: fields.iter().map(|v| v.re).collect(),
            im: fields.iter().map(|v| v.im).collect(),
        });
    }

    log::info!("Evaluated {} steps for {} emitters", num_steps, emitters.len());

    Ok(RunOutput {
        method: interaction.method_name().to_string(),
        records,
    })
}

/// Write the field history to a CSV file with a metadata header.
pub fn write_fields_csv(output: &RunOutput, path: &Path, job: &JobConfig) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::io::BufWriter::new(
        std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );

    writeln!(file, "# AIM retarded interaction: field per emitter")?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(file, "# method: {}", output.method)?;
    writeln!(
        file,
        "# c: {}, dt: {}, interpolation_order: {}, expansion_order: {}",
        job.simulation.c, job.simulation.dt, job.simulation.interpolation_order, job.simulation.expansion_order
    )?;
    for (e, emitter) in job.emitters.iter().enumerate() {
        writeln!(
            file,
            "# emitter {}: position={:?}, source={:?}",
            e, emitter.position, emitter.source
        )?;
    }
    writeln!(file, "#")?;

    let mut header = vec!["step".to_string(), "time".to_string()];
    for e in 0..job.emitters.len() {
        header.push(format!("re_{e}"));
        header.push(format!("im_{e}"));
    }
    writeln!(file, "{}", header.join(","))?;

    for record in &output.records {
        write!(file, "{},{:.6}", record.step, record.time)?;
        for (re, im) in record.re.iter().zip(&record.im) {
            write!(file, ",{:.10e},{:.10e}", re, im)?;
        }
        writeln!(file)?;
    }

    println!("Fields written to: {}", path.display());
    Ok(())
}

/// Write the field history to a JSON file.
pub fn write_fields_json(output: &RunOutput, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(&output.records)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Fields (JSON) written to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(method: &str) -> JobConfig {
        toml::from_str(&format!(
            r#"
            [simulation]
            num_steps = 40
            method = "{method}"

            [[emitter]]
            position = [0.0, 0.0, 0.0]
            source = "pulse"

            [[emitter]]
            position = [3.0, 0.0, 0.0]

            [pulse]
            center = 10.0
            width = 3.0
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_history_follows_sources() {
        let job = job("aim");
        let history = build_history(&job);
        assert_eq!(history.first_step(), -10);
        assert_eq!(history.value(0, 10).map(|v| v.re), Some(1.0));
        assert_eq!(history.value(1, 10).map(|v| v.re), Some(0.0));
    }

    #[test]
    fn test_methods_agree_on_lattice_points() {
        let aim = run_simulation(&job("aim")).unwrap();
        let direct = run_simulation(&job("direct")).unwrap();
        assert_eq!(aim.records.len(), 40);

        for (a, d) in aim.records.iter().zip(&direct.records) {
            assert!((a.re[1] - d.re[1]).abs() < 1e-10, "step {}", a.step);
        }
        // Pulse peak arrives three steps after emission
        let peak = aim
            .records
            .iter()
            .max_by(|a, b| a.re[1].total_cmp(&b.re[1]))
            .map(|r| r.step);
        assert_eq!(peak, Some(13));
    }

    #[test]
    fn test_csv_layout() {
        let job = job("direct");
        let output = run_simulation(&job).unwrap();
        let path = std::env::temp_dir().join(format!("aim-cli-test-{}.csv", std::process::id()));
        write_fields_csv(&output, &path, &job).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows[0], "step,time,re_0,im_0,re_1,im_1");
        assert_eq!(rows.len(), 41);
    }
}
