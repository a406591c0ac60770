use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use obstacle_analysis::{analyze_session, load_config, AnalysisConfig};

/// Estimate the frame of first whisker contact for every obstacle in a session.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory containing the session folders
    base_dir: PathBuf,
    /// Session folder name
    session: String,
    /// YAML file overriding file names, model paths and thresholds
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config: AnalysisConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };
    config.base_dir = args.base_dir;
    config.session = args.session;

    let mut model = load_model(&config)?;
    let answers = analyze_session(&config, &mut model)?;

    println!(
        "Wrote {} contacts to {}",
        answers.len(),
        config.output_path().display()
    );
    Ok(())
}

#[cfg(feature = "onnx")]
fn load_model(config: &AnalysisConfig) -> Result<impl obstacle_analysis::ContactModel, Box<dyn Error>> {
    Ok(obstacle_analysis::onnx::load_contact_model(&config.model)?)
}

#[cfg(not(feature = "onnx"))]
fn load_model(_config: &AnalysisConfig) -> Result<NoBackend, Box<dyn Error>> {
    Err("whisker-contact was built without a model backend; rebuild with `--features onnx`".into())
}

#[cfg(not(feature = "onnx"))]
enum NoBackend {}

#[cfg(not(feature = "onnx"))]
impl obstacle_analysis::ContactModel for NoBackend {
    fn embed(
        &mut self,
        _frames: &ndarray::Array4<f32>,
    ) -> obstacle_analysis::Result<ndarray::Array2<f32>> {
        match *self {}
    }

    fn classify(
        &mut self,
        _sessions: &ndarray::Array3<f32>,
    ) -> obstacle_analysis::Result<ndarray::Array2<f32>> {
        match *self {}
    }
}
