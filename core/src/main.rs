//! CLI entry point for caffe2-rs.

use anyhow::{bail, Context, Result};
use std::fs;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use caffe2_rs::cli::{Cli, Commands, InputTensor};
use caffe2_rs::config::Config;
use caffe2_rs::inference::{
    Caffe2Runtime, DType, Device, DeviceSelector, InferenceSession, InputShape, ModelSource,
    OutputNode, SessionOptions, TensorDescriptor,
};

/// Get the enabled features.
fn enabled_features() -> &'static str {
    if cfg!(feature = "cuda") {
        "cuda"
    } else {
        "cpu"
    }
}

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse_args();
    let selector = DeviceSelector::default();

    match cli.command {
        Commands::Predict {
            weights,
            graph,
            input,
            device,
            batch_size,
            classes,
            top_k,
            profile,
            format,
            config,
        } => {
            let mut config = if let Some(config_path) = config {
                Config::from_yaml_file(&config_path)
                    .with_context(|| format!("Failed to load config: {}", config_path.display()))?
            } else {
                Config::default()
            };

            // Load input data
            info!("Loading input: {}", input.display());
            let tensor = InputTensor::from_json_str(
                &fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read input: {}", input.display()))?,
            )?;
            let geometry = tensor.input_shape()?;

            // Command-line flags win over the config file
            config.apply_flags(weights, graph, device, batch_size);
            config.fit_input(tensor.batch(), geometry)?;

            let mut options = config.session_options()?;
            if options.outputs.is_empty() {
                options.outputs.push(OutputNode::new(
                    "softmax",
                    TensorDescriptor::new(DType::F32, vec![options.batch_size, classes])?,
                ));
            }
            info!("Using device: {}", options.device);

            let mut session =
                InferenceSession::create(Arc::new(Caffe2Runtime), &selector, options)?;

            if profile.is_some() {
                session.start_profiling("predict", &input.display().to_string())?;
            }

            info!("Running inference...");
            session.predict(&[tensor.data.as_slice()])?;
            let predictions = session.predictions()?;

            if let Some(profile_path) = profile {
                session.end_profiling()?;
                let trace = session.read_profile()?;
                fs::write(&profile_path, trace.as_bytes()).with_context(|| {
                    format!("Failed to write profile: {}", profile_path.display())
                })?;
                session.disable_profiling()?;
                info!("Profile written to {}", profile_path.display());
            }
            session.close();

            let output = serde_json::json!({
                "samples": predictions.len(),
                "predictions": predictions
                    .iter()
                    .map(|p| p.top_k(top_k))
                    .collect::<Vec<_>>(),
            });

            if format == "pretty" {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", serde_json::to_string(&output)?);
            }
        }

        Commands::Info {
            weights,
            graph,
            device,
        } => {
            let device: Device = device.parse()?;
            let model = ModelSource::detect(weights, graph)?;

            println!("caffe2-rs v{}", env!("CARGO_PKG_VERSION"));
            println!("caffe2: {}", option_env!("CAFFE2_HOME").unwrap_or("unknown"));
            println!("features: {}", enabled_features());
            println!();
            println!("Model: {}", model);
            println!("Device: {}", device);

            // Try to load the model to verify it works
            info!("Loading model...");
            let options = SessionOptions::new(model, InputShape::new(3, 224, 224)).with_device(device);
            let mut session = InferenceSession::create(Arc::new(Caffe2Runtime), &selector, options)?;
            session.close();
            println!("Status: OK (model loaded successfully)");
        }

        Commands::Probe { device } => {
            let device: Device = device.parse()?;
            println!("Probing device: {}", device);

            match selector.resolve(device) {
                Ok(resolved) => println!("Available: {}", resolved),
                Err(e) => {
                    warn!("{}", e);
                    bail!("Device probe failed: {}", e);
                }
            }
        }
    }

    Ok(())
}
